use std::path::Path;

/// Records this process's PID so `stop`/`reload-config` can find it later.
pub fn write(path: &Path) -> std::io::Result<()> {
    std::fs::write(path, std::process::id().to_string())
}

pub fn read(path: &Path) -> std::io::Result<u32> {
    let text = std::fs::read_to_string(path)?;
    text.trim()
        .parse()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidData, "pidfile does not contain a valid PID"))
}

pub fn remove(path: &Path) {
    let _ = std::fs::remove_file(path);
}
