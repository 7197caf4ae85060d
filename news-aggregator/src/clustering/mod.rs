pub mod dedup;
pub mod fingerprint;
pub mod recurrence;

pub use dedup::{DedupReport, Deduplicator, DUPLICATE_THRESHOLD};
pub use recurrence::{RecurrenceDetector, RECURRENCE_THRESHOLD};
