use dcdn_protocol::{BoxFuture, ContentRecord, SessionState, SigningContext};

use crate::{SessionInfo, TransferError};

/// Parameters for opening a chunked upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRequest {
    pub path: String,
    /// Exact byte count the commit must match, if known up front.
    pub declared_size: Option<u64>,
    /// Inferred from the path when absent.
    pub content_type: Option<String>,
}

impl StartRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            declared_size: None,
            content_type: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.declared_size = Some(size);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }
}

/// The transfer surface an upload client drives.
///
/// Every call is authorized by the caller's signing context. Sessions opened
/// by one principal are invisible to every other principal.
pub trait TransferService: Send + Sync {
    /// Opens a session for `req.path`.
    fn start<'a>(
        &'a self,
        ctx: &'a SigningContext,
        req: StartRequest,
    ) -> BoxFuture<'a, Result<SessionInfo, TransferError>>;

    /// Appends one chunk and returns the cumulative length acknowledged.
    fn append_chunk<'a>(
        &'a self,
        ctx: &'a SigningContext,
        path: &'a str,
        offset: u64,
        data: &'a [u8],
    ) -> BoxFuture<'a, Result<u64, TransferError>>;

    /// Commits the accumulated bytes as one object.
    fn commit<'a>(
        &'a self,
        ctx: &'a SigningContext,
        path: &'a str,
    ) -> BoxFuture<'a, Result<ContentRecord, TransferError>>;

    /// Aborts the session. Returns the state the session ends in; repeated
    /// calls are harmless.
    fn abort<'a>(
        &'a self,
        ctx: &'a SigningContext,
        path: &'a str,
    ) -> BoxFuture<'a, Result<SessionState, TransferError>>;

    /// Stores a small object in one request with no session.
    fn put_object<'a>(
        &'a self,
        ctx: &'a SigningContext,
        path: &'a str,
        content: &'a [u8],
        content_type: &'a str,
    ) -> BoxFuture<'a, Result<ContentRecord, TransferError>>;
}
