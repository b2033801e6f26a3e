//! Per-container update outcomes, consumed by the report collector (C9).

use crate::models::rule::PermitReason;
use crate::version::ChangeCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Succeeded,
    Failed,
    RolledBack,
    Skipped,
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub container: String,
    pub from: String,
    pub to: String,
    pub category: ChangeCategory,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub duration: StdDuration,
    pub status: UpdateStatus,
    pub reject_reason: Option<PermitReason>,
}

mod duration_secs {
    use super::StdDuration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &StdDuration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<StdDuration, D::Error> {
        let secs = f64::deserialize(de)?;
        Ok(StdDuration::from_secs_f64(secs.max(0.0)))
    }
}
