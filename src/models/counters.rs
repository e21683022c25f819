use serde::{Deserialize, Serialize};

/// One observed visit, produced by the pixel handler and applied once by an ingest worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub object_id: String,
    pub visitor_id: String,
}

impl Event {
    pub fn new(object_id: impl Into<String>, visitor_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            visitor_id: visitor_id.into(),
        }
    }
}

/// Effective totals reported by the read API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub visits: i64,
    pub uniques: i64,
}

/// Counters stored under the earlier key scheme. Only backfill writes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyCounts {
    pub visits: i64,
    pub uniques: i64,
}

/// Raw store read for one object, or for a set of objects summed together.
///
/// `visits` and `uniques` come from the current scheme only; merging with
/// `legacy` is left to the aggregation layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectSnapshot {
    pub visits: i64,
    pub uniques: i64,
    pub legacy: LegacyCounts,
}

/// Body of an authenticated backfill write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BackfillRequest {
    pub visits: i64,
    pub uniques: i64,
}

impl BackfillRequest {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.visits < 0 || self.uniques < 0 {
            return Err("visits and uniques must be non-negative");
        }
        Ok(())
    }
}

impl From<BackfillRequest> for LegacyCounts {
    fn from(req: BackfillRequest) -> Self {
        Self {
            visits: req.visits,
            uniques: req.uniques,
        }
    }
}
