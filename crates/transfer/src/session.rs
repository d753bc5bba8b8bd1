use std::ops::Range;

use dcdn_protocol::SessionState;
use serde::Serialize;
use tokio::time::{Duration, Instant};

use crate::TransferError;

/// Server-side accumulation state for one upload to one target path.
///
/// The session enforces strictly sequential appends: a chunk is accepted
/// only if its offset equals the number of bytes received so far. Bytes are
/// held until [`commit`](crate::SessionManager::commit) hands them to the
/// store, and released on commit or abort.
#[derive(Debug)]
pub struct TransferSession {
    path: String,
    owner: String,
    declared_size: Option<u64>,
    content_type: String,
    state: SessionState,
    ranges: Vec<Range<u64>>,
    buffer: Vec<u8>,
    created_at: Instant,
    last_activity: Instant,
    finished_at: Option<Instant>,
}

/// Snapshot of a session for listing and acknowledgements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub path: String,
    pub owner: String,
    pub state: SessionState,
    pub received_bytes: u64,
    pub chunks_received: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub declared_size: Option<u64>,
    pub content_type: String,
}

impl TransferSession {
    /// Opens a fresh session.
    pub fn open(
        path: impl Into<String>,
        owner: impl Into<String>,
        declared_size: Option<u64>,
        content_type: impl Into<String>,
    ) -> Self {
        let now = Instant::now();
        Self {
            path: path.into(),
            owner: owner.into(),
            declared_size,
            content_type: content_type.into(),
            state: SessionState::Open,
            ranges: Vec::new(),
            buffer: Vec::new(),
            created_at: now,
            last_activity: now,
            finished_at: None,
        }
    }

    /// Appends `data` at `offset`, returning the new cumulative length.
    ///
    /// `max_size` bounds the cumulative length regardless of the declared
    /// size.
    pub fn append(&mut self, offset: u64, data: &[u8], max_size: u64) -> Result<u64, TransferError> {
        if !self.state.is_active() {
            return Err(TransferError::NotFound(self.path.clone()));
        }

        let received = self.received_bytes();
        if offset != received {
            return Err(TransferError::InvalidOffset {
                path: self.path.clone(),
                expected: received,
                actual: offset,
            });
        }

        let end = received + data.len() as u64;
        let limit = self.declared_size.map_or(max_size, |d| d.min(max_size));
        if end > limit {
            return Err(TransferError::TooLarge {
                size: end,
                limit,
            });
        }

        if !data.is_empty() {
            self.buffer.extend_from_slice(data);
            self.ranges.push(received..end);
        }
        self.state = SessionState::Receiving;
        self.last_activity = Instant::now();
        Ok(end)
    }

    /// Checks that the session may be committed now.
    pub fn ensure_committable(&self) -> Result<(), TransferError> {
        if !self.state.is_active() {
            return Err(TransferError::NotFound(self.path.clone()));
        }
        let received = self.received_bytes();
        if let Some(declared) = self.declared_size
            && declared != received
        {
            return Err(TransferError::Incomplete {
                path: self.path.clone(),
                declared,
                received,
            });
        }
        if received == 0 {
            return Err(TransferError::EmptyContent);
        }
        Ok(())
    }

    /// Bytes accumulated so far.
    pub fn content(&self) -> &[u8] {
        &self.buffer
    }

    /// Moves the session to Committed and releases its bytes.
    pub fn mark_committed(&mut self) {
        self.state = SessionState::Committed;
        self.release();
    }

    /// Aborts an active session; a terminal session is left as is.
    ///
    /// Returns the state after the call.
    pub fn abort(&mut self) -> SessionState {
        if self.state.is_active() {
            self.state = SessionState::Aborted;
            self.release();
        }
        self.state
    }

    fn release(&mut self) {
        self.buffer = Vec::new();
        let now = Instant::now();
        self.last_activity = now;
        self.finished_at = Some(now);
    }

    /// Returns `true` if the session is active and untouched for `timeout`.
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        self.state.is_active() && now.saturating_duration_since(self.last_activity) >= timeout
    }

    /// Returns `true` if the session ended at least `retention` ago.
    pub fn is_expired_tombstone(&self, now: Instant, retention: Duration) -> bool {
        self.finished_at
            .is_some_and(|at| now.saturating_duration_since(at) >= retention)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn declared_size(&self) -> Option<u64> {
        self.declared_size
    }

    /// Cumulative length of accepted chunks.
    pub fn received_bytes(&self) -> u64 {
        self.ranges.last().map_or(0, |r| r.end)
    }

    /// Accepted byte ranges, in order.
    pub fn ranges(&self) -> &[Range<u64>] {
        &self.ranges
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            path: self.path.clone(),
            owner: self.owner.clone(),
            state: self.state,
            received_bytes: self.received_bytes(),
            chunks_received: self.ranges.len(),
            declared_size: self.declared_size,
            content_type: self.content_type.clone(),
        }
    }
}
