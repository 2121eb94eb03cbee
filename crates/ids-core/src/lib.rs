//! Domain types and wire codec shared by every crate in the aggregator.
//!
//! This crate has no I/O of its own: it is the single source of truth for
//! the unified alert schema, the correlator's internal projections, and the
//! dedup fingerprint, so that every other crate — producers, pipeline,
//! sinks — speaks the same typed language instead of passing
//! `serde_json::Value` soup across module boundaries.

pub mod alert;
pub mod codec;
pub mod correlation;
pub mod dedup;

pub use alert::{Alert, AlertSource, Severity};
pub use codec::{MalformedAlert, RawEnvelope};
pub use correlation::{CorrelationEvent, CorrelationRule, EventMatcher};
pub use dedup::{fingerprint, DedupEntry, Fingerprint};
