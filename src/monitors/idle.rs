//! Idle duration evaluation against an ordered threshold table
//!
//! ```text
//! owner absent           → IdleEvaluation::Unowned
//! last activity absent   → IdleEvaluation::Unknown
//! otherwise              → IdleEvaluation::Idle { duration, crossed }
//!                          crossed = every threshold with after <= duration
//! ```
//!
//! Durations are truncated to whole seconds before comparison, and a duration
//! exactly equal to a boundary counts as crossed.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::Entity;

/// One idle-duration boundary and the alert kind it raises
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Threshold {
    pub kind: String,
    #[serde(with = "duration_secs")]
    pub after: Duration,
}

impl Threshold {
    pub fn new(kind: impl ToString, after: Duration) -> Self {
        Self {
            kind: kind.to_string(),
            after,
        }
    }
}

/// Reasons a threshold table is rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThresholdError {
    Empty,
    NonPositive(String),
    NotIncreasing(String),
    DuplicateKind(String),
}

impl fmt::Display for ThresholdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdError::Empty => write!(f, "threshold table is empty"),
            ThresholdError::NonPositive(kind) => {
                write!(f, "threshold '{kind}' must have a positive duration")
            }
            ThresholdError::NotIncreasing(kind) => write!(
                f,
                "threshold '{kind}' is not strictly greater than the previous one"
            ),
            ThresholdError::DuplicateKind(kind) => write!(f, "duplicate threshold kind '{kind}'"),
        }
    }
}

impl std::error::Error for ThresholdError {}

/// Thresholds sorted by strictly increasing duration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdTable {
    thresholds: Vec<Threshold>,
}

impl ThresholdTable {
    pub fn new(thresholds: Vec<Threshold>) -> Result<Self, ThresholdError> {
        if thresholds.is_empty() {
            return Err(ThresholdError::Empty);
        }

        for (i, threshold) in thresholds.iter().enumerate() {
            if threshold.after <= Duration::zero() {
                return Err(ThresholdError::NonPositive(threshold.kind.clone()));
            }
            if i > 0 && threshold.after <= thresholds[i - 1].after {
                return Err(ThresholdError::NotIncreasing(threshold.kind.clone()));
            }
            if thresholds[..i].iter().any(|t| t.kind == threshold.kind) {
                return Err(ThresholdError::DuplicateKind(threshold.kind.clone()));
            }
        }

        Ok(Self { thresholds })
    }

    pub fn thresholds(&self) -> &[Threshold] {
        &self.thresholds
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    /// Smallest boundary of the table
    pub fn first(&self) -> &Threshold {
        &self.thresholds[0]
    }

    /// Largest boundary of the table
    pub fn last(&self) -> &Threshold {
        &self.thresholds[self.thresholds.len() - 1]
    }

    pub fn get(&self, kind: &str) -> Option<&Threshold> {
        self.thresholds.iter().find(|t| t.kind == kind)
    }

    /// Thresholds crossed by `idle`, in ascending order
    pub fn crossed(&self, idle: Duration) -> impl Iterator<Item = &Threshold> {
        self.thresholds.iter().take_while(move |t| idle >= t.after)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleEvaluation {
    /// Entity has no owner and is never eligible
    Unowned,

    /// Last activity could not be determined
    Unknown,

    /// Owner idle for `duration`; `crossed` lists the thresholds reached
    Idle {
        duration: Duration,
        crossed: Vec<Threshold>,
    },
}

impl IdleEvaluation {
    pub fn evaluate(entity: &Entity, now: DateTime<Utc>, table: &ThresholdTable) -> Self {
        if !entity.is_owned() {
            return IdleEvaluation::Unowned;
        }

        let Some(duration) = idle_duration(entity, now) else {
            return IdleEvaluation::Unknown;
        };

        IdleEvaluation::Idle {
            duration,
            crossed: table.crossed(duration).cloned().collect(),
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            IdleEvaluation::Idle { duration, .. } => Some(*duration),
            _ => None,
        }
    }

    /// Highest threshold reached, if any
    pub fn highest(&self) -> Option<&Threshold> {
        match self {
            IdleEvaluation::Idle { crossed, .. } => crossed.last(),
            _ => None,
        }
    }
}

/// Idle duration with second precision, clamped at zero for future timestamps
pub fn idle_duration(entity: &Entity, now: DateTime<Utc>) -> Option<Duration> {
    let last_activity = entity.last_activity?;
    let seconds = (now - last_activity).num_seconds().max(0);
    Some(Duration::seconds(seconds))
}

mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = i64::deserialize(deserializer)?;
        Duration::try_seconds(seconds)
            .ok_or_else(|| serde::de::Error::custom("duration out of range"))
    }
}
