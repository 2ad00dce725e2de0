//! Voting window status.
//!
//! Status is never stored as a source of truth: it is derived from the
//! current instant and the configured bounds every time it is observed.
//! Both bounds are inclusive.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Status vocabulary of the single-winner election window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElectionStatus {
    NotStarted,
    Active,
    Ended,
}

/// Status vocabulary of community polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PollStatus {
    Upcoming,
    Active,
    Inactive,
}

/// Position of an instant relative to a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Before,
    Open,
    After,
}

/// Locate `now` within `[start, end]`. Missing bounds count as "before".
pub fn phase(now: DateTime<Utc>, start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Phase {
    match (start, end) {
        (Some(start), Some(end)) if now < start => Phase::Before,
        (Some(_), Some(end)) if now <= end => Phase::Open,
        (Some(_), Some(_)) => Phase::After,
        _ => Phase::Before,
    }
}

impl ElectionStatus {
    pub fn derive(
        now: DateTime<Utc>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        match phase(now, start, end) {
            Phase::Before => ElectionStatus::NotStarted,
            Phase::Open => ElectionStatus::Active,
            Phase::After => ElectionStatus::Ended,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElectionStatus::NotStarted => "not-started",
            ElectionStatus::Active => "active",
            ElectionStatus::Ended => "ended",
        }
    }
}

impl PollStatus {
    pub fn derive(
        now: DateTime<Utc>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        match phase(now, start, end) {
            Phase::Before => PollStatus::Upcoming,
            Phase::Open => PollStatus::Active,
            Phase::After => PollStatus::Inactive,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PollStatus::Upcoming => "upcoming",
            PollStatus::Active => "active",
            PollStatus::Inactive => "inactive",
        }
    }
}

/// Parse an RFC 3339 instant coming from a request body.
pub fn parse_instant(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw?.trim();
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
