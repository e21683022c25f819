mod counters;

pub use counters::{BackfillRequest, Counts, Event, LegacyCounts, ObjectSnapshot};
