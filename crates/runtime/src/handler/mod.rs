//! The handler contract and registry.
//!
//! A handler performs `check` and `enforce` for specific (condition,
//! resource-type) pairs. The runtime consults the registry per step
//! and recovers handler errors locally, so handlers report failure
//! through [`HandlerResult`] rather than panicking. Every call takes a
//! cancellation token and must surface cancellation as an error
//! result.

pub mod aes;
pub mod cron;
pub mod fs;
pub mod http;
pub mod posix;

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ensura_core::ResourceRef;

// ──────────────────────────────────────────────
// Errors
// ──────────────────────────────────────────────

/// Errors a handler can report. These are recovered by the runtime's
/// retry loop and only surface once the retry budget is exhausted.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("no subject specified")]
    NoSubject,

    #[error("missing required argument '{name}'")]
    MissingArgument { name: String },

    #[error("unknown condition: {condition}")]
    UnknownCondition { condition: String },

    #[error("condition '{condition}' can only be checked, not enforced")]
    Unenforceable { condition: String },

    #[error("not supported on {os}")]
    UnsupportedPlatform { os: &'static str },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("http request failed: {0}")]
    Http(String),

    #[error("{0}")]
    Crypto(String),

    #[error("{0}")]
    Other(String),
}

// ──────────────────────────────────────────────
// Results
// ──────────────────────────────────────────────

/// Outcome of a single check or enforce call.
#[derive(Debug)]
pub struct HandlerResult {
    pub success: bool,
    pub message: String,
    pub error: Option<HandlerError>,
}

impl HandlerResult {
    pub fn satisfied(message: impl Into<String>) -> Self {
        HandlerResult {
            success: true,
            message: message.into(),
            error: None,
        }
    }

    pub fn violated(message: impl Into<String>) -> Self {
        HandlerResult {
            success: false,
            message: message.into(),
            error: None,
        }
    }

    pub fn error(error: HandlerError) -> Self {
        HandlerResult {
            success: false,
            message: String::new(),
            error: Some(error),
        }
    }
}

impl From<HandlerError> for HandlerResult {
    fn from(error: HandlerError) -> Self {
        HandlerResult::error(error)
    }
}

// ──────────────────────────────────────────────
// The handler trait
// ──────────────────────────────────────────────

pub type HandlerArgs = BTreeMap<String, String>;

#[async_trait]
pub trait Handler: Send + Sync {
    /// The registry key, e.g. `fs.native` or `AES:256`.
    fn name(&self) -> &'static str;

    /// Verify the condition holds for the subject.
    async fn check(
        &self,
        cancel: &CancellationToken,
        subject: Option<&ResourceRef>,
        condition: &str,
        args: &HandlerArgs,
    ) -> HandlerResult;

    /// Repair the subject so the condition holds.
    async fn enforce(
        &self,
        cancel: &CancellationToken,
        subject: Option<&ResourceRef>,
        condition: &str,
        args: &HandlerArgs,
    ) -> HandlerResult;
}

/// Helper for handlers: subject is required for every built-in.
pub(crate) fn require_subject<'a>(
    subject: Option<&'a ResourceRef>,
) -> Result<&'a ResourceRef, HandlerError> {
    subject.ok_or(HandlerError::NoSubject)
}

/// Helper for handlers: a named argument is required.
pub(crate) fn require_arg<'a>(args: &'a HandlerArgs, name: &str) -> Result<&'a str, HandlerError> {
    match args.get(name) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(HandlerError::MissingArgument {
            name: name.to_owned(),
        }),
    }
}

// ──────────────────────────────────────────────
// Registry
// ──────────────────────────────────────────────

/// Maps handler names to implementations. Registration happens at
/// startup; lookups are read-mostly during enforcement.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<BTreeMap<String, Arc<dyn Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        HandlerRegistry::default()
    }

    pub fn register(&self, handler: Arc<dyn Handler>) {
        let mut handlers = self.handlers.write().expect("registry lock");
        handlers.insert(handler.name().to_owned(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        let handlers = self.handlers.read().expect("registry lock");
        handlers.get(name).cloned()
    }
}

/// A registry with all built-in handlers installed.
pub fn default_registry() -> HandlerRegistry {
    let registry = HandlerRegistry::new();
    registry.register(Arc::new(fs::FsHandler));
    registry.register(Arc::new(posix::PosixHandler));
    registry.register(Arc::new(aes::AesHandler));
    registry.register(Arc::new(http::HttpHandler));
    registry.register(Arc::new(cron::CronHandler));
    registry
}
