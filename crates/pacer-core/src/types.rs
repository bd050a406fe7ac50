use crate::error::PacerError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Follow,
    Unfollow,
    Like,
    Comment,
}

impl ActionKind {
    pub fn all() -> &'static [ActionKind] {
        &[
            ActionKind::Follow,
            ActionKind::Unfollow,
            ActionKind::Like,
            ActionKind::Comment,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionKind::Follow => "follow",
            ActionKind::Unfollow => "unfollow",
            ActionKind::Like => "like",
            ActionKind::Comment => "comment",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = PacerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "follow" | "follows" => Ok(ActionKind::Follow),
            "unfollow" | "unfollows" => Ok(ActionKind::Unfollow),
            "like" | "likes" => Ok(ActionKind::Like),
            "comment" | "comments" => Ok(ActionKind::Comment),
            _ => Err(PacerError::UnknownActionKind(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ActionTarget
// ---------------------------------------------------------------------------

/// Opaque identifier of the user or post an action is aimed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionTarget(String);

impl ActionTarget {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// A proposed automated operation. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    id: Uuid,
    kind: ActionKind,
    target: ActionTarget,
    proposed_at: DateTime<Utc>,
}

impl Action {
    pub fn new(kind: ActionKind, target: impl Into<String>, proposed_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target: ActionTarget::new(target),
            proposed_at,
        }
    }

    /// Log-correlation id. Plays no part in quota decisions.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    pub fn target(&self) -> &ActionTarget {
        &self.target
    }

    pub fn proposed_at(&self) -> DateTime<Utc> {
        self.proposed_at
    }
}

// ---------------------------------------------------------------------------
// ActionOutcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// The executor did not answer within the configured timeout.
    Timeout,
    /// The platform answered with something that looks like a block or
    /// challenge. Triggers the block cooldown.
    SuspectedBlock,
    Error(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => f.write_str("timeout"),
            FailureReason::SuspectedBlock => f.write_str("suspected block"),
            FailureReason::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// Result of attempting an admitted action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub succeeded: bool,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
}

impl ActionOutcome {
    pub fn success(completed_at: DateTime<Utc>) -> Self {
        Self {
            succeeded: true,
            completed_at,
            failure_reason: None,
        }
    }

    pub fn failure(completed_at: DateTime<Utc>, reason: FailureReason) -> Self {
        Self {
            succeeded: false,
            completed_at,
            failure_reason: Some(reason),
        }
    }
}
