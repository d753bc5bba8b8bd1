use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier assigned to committed content by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentRef(String);

impl ContentRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ContentRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Result of a successful commit. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub content_ref: ContentRef,
    pub size: u64,
    pub content_type: String,
    /// Store-assigned locator for the content.
    pub location: String,
}

/// A registry pointer to committed content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataEntry {
    pub name: String,
    pub content_ref: ContentRef,
    pub size: u64,
    pub content_type: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of one upload item on the client side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    Active,
    Committing,
    Registered,
    Failed,
    Cancelled,
}

impl ItemState {
    /// Returns `true` once the item can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Registered | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` while the item occupies a worker slot.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Active | Self::Committing)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Committing => "committing",
            Self::Registered => "registered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Lifecycle of one server-side transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Open,
    Receiving,
    Committed,
    Aborted,
}

impl SessionState {
    /// Returns `true` if the session still accepts chunks.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Open | Self::Receiving)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Receiving => "receiving",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one item, suitable for rendering a progress bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemProgress {
    pub item_id: String,
    pub target_path: String,
    pub state: ItemState,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ItemProgress {
    /// Returns the progress as a percentage (0-100).
    ///
    /// A zero-byte item reports 100 once registered and 0 before.
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return if self.state == ItemState::Registered {
                100.0
            } else {
                0.0
            };
        }
        self.transferred_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Aggregate over a batch of items.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub total: usize,
    pub pending: usize,
    pub active: usize,
    pub registered: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl BatchStatus {
    /// Tallies a set of item states.
    pub fn from_states<I: IntoIterator<Item = ItemState>>(states: I) -> Self {
        let mut status = Self::default();
        for state in states {
            status.total += 1;
            match state {
                ItemState::Pending => status.pending += 1,
                ItemState::Active | ItemState::Committing => status.active += 1,
                ItemState::Registered => status.registered += 1,
                ItemState::Failed => status.failed += 1,
                ItemState::Cancelled => status.cancelled += 1,
            }
        }
        status
    }

    /// Items that reached any terminal state.
    pub fn finished(&self) -> usize {
        self.registered + self.failed + self.cancelled
    }

    pub fn is_done(&self) -> bool {
        self.finished() == self.total
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} complete", self.registered, self.total)
    }
}
