//! Opaque identity handed to the pipeline by an external auth provider.

use std::fmt;

/// Errors produced while obtaining a signing context.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("not signed in")]
    NotSignedIn,

    #[error("identity provider error: {0}")]
    Provider(String),
}

/// Credentials for one batch of calls.
///
/// The pipeline uses `principal` to scope sessions and registry entries;
/// the credential bytes are carried along but never interpreted.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningContext {
    principal: String,
    credential: Vec<u8>,
}

impl SigningContext {
    pub fn new(principal: impl Into<String>, credential: Vec<u8>) -> Self {
        Self {
            principal: principal.into(),
            credential,
        }
    }

    /// Context with no credential material, for local backends.
    pub fn anonymous(principal: impl Into<String>) -> Self {
        Self::new(principal, Vec::new())
    }

    pub fn principal(&self) -> &str {
        &self.principal
    }

    pub fn credential(&self) -> &[u8] {
        &self.credential
    }
}

// Credential bytes stay out of logs.
impl fmt::Debug for SigningContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningContext")
            .field("principal", &self.principal)
            .field("credential", &format_args!("<{} bytes>", self.credential.len()))
            .finish()
    }
}

/// Source of signing contexts (an auth provider bridge).
pub trait IdentitySource: Send + Sync {
    fn signing_context(&self) -> Result<SigningContext, IdentityError>;
}

/// Identity source that always yields the same context.
#[derive(Debug, Clone)]
pub struct StaticIdentity(pub SigningContext);

impl IdentitySource for StaticIdentity {
    fn signing_context(&self) -> Result<SigningContext, IdentityError> {
        Ok(self.0.clone())
    }
}
