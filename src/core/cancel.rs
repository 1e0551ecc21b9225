//! Deadline and cancellation carried by every fetch.

use crate::core::error::ResolverError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Shared flag; cloning hands out another handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchContext {
    deadline: Option<Instant>,
    cancel: CancelToken,
}

impl FetchContext {
    /// No deadline, fresh token.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        FetchContext {
            deadline: Some(Instant::now() + timeout),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fails once the run is cancelled or the deadline has passed.
    pub fn check(&self, what: &str) -> Result<(), ResolverError> {
        if self.cancel.is_cancelled() {
            return Err(ResolverError::Cancelled(format!(
                "cancelled while fetching {}",
                what
            )));
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(ResolverError::Transport(format!(
                "timed out while fetching {}",
                what
            )));
        }
        Ok(())
    }
}
