//! Time-based down-sampling of revision history.
//!
//! Revisions are grouped into calendar periods (in UTC) and the latest revision of
//! each period is kept. Weekly periods follow ISO-8601 week numbering, so a revision
//! on 2024-12-30 belongs to `2025-W01`.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::drive::RevisionRecord;

/// How densely revision history is sampled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    /// Keep every revision
    #[default]
    All,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::All => "all",
            Granularity::Hourly => "hourly",
            Granularity::Daily => "daily",
            Granularity::Weekly => "weekly",
            Granularity::Monthly => "monthly",
        }
    }

    /// Parse a granularity, falling back to [`Granularity::All`] with a warning
    pub fn parse_lenient(value: &str) -> Self {
        value.parse().unwrap_or_else(|_| {
            warn!("Invalid granularity '{}', falling back to 'all'", value);
            Granularity::All
        })
    }

    /// Period key for a timestamp, or `None` when every revision is its own period
    pub fn period_key(&self, timestamp: &DateTime<Utc>) -> Option<String> {
        match self {
            Granularity::All => None,
            Granularity::Hourly => Some(timestamp.format("%Y-%m-%d-%H").to_string()),
            Granularity::Daily => Some(timestamp.format("%Y-%m-%d").to_string()),
            Granularity::Weekly => {
                let week = timestamp.iso_week();
                Some(format!("{}-W{:02}", week.year(), week.week()))
            }
            Granularity::Monthly => Some(timestamp.format("%Y-%m").to_string()),
        }
    }
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(Granularity::All),
            "hourly" => Ok(Granularity::Hourly),
            "daily" => Ok(Granularity::Daily),
            "weekly" => Ok(Granularity::Weekly),
            "monthly" => Ok(Granularity::Monthly),
            other => Err(format!(
                "unknown granularity '{}' (expected all, hourly, daily, weekly or monthly)",
                other
            )),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keep one revision per period: the latest one, ties going to the later input.
///
/// Output is sorted ascending by timestamp. `All` returns the input untouched.
pub fn bucket(revisions: Vec<RevisionRecord>, granularity: Granularity) -> Vec<RevisionRecord> {
    if granularity == Granularity::All {
        return revisions;
    }

    let input_count = revisions.len();
    let mut winners: HashMap<String, RevisionRecord> = HashMap::new();

    for revision in revisions {
        let Some(key) = granularity.period_key(&revision.modified_at) else {
            continue;
        };

        match winners.entry(key) {
            Entry::Occupied(mut current) => {
                if revision.modified_at >= current.get().modified_at {
                    current.insert(revision);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(revision);
            }
        }
    }

    let mut selected: Vec<RevisionRecord> = winners.into_values().collect();
    selected.sort_by_key(|revision| revision.modified_at);

    debug!(
        "Bucketed {} revisions into {} {} periods",
        input_count,
        selected.len(),
        granularity
    );

    selected
}
