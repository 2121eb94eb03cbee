//! Library surface for the integration controller binary: exposed so
//! integration tests can drive `run::start` and its building blocks
//! directly instead of spawning the binary as a subprocess.

pub mod cli;
pub mod pidfile;
pub mod run;
pub mod status;
pub mod supervisor;
