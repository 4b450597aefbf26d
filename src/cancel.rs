//! Cooperative cancellation for long-running synthesis.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{CollageError, Result};

/// Shared cancellation flag. Clones observe the same flag.
///
/// Work is checked between matching windows and between timeline slots,
/// never in the middle of a buffer copy.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Returns [`CollageError::Cancelled`] once cancellation was requested.
    #[inline]
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CollageError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Polls an optional token.
#[inline]
pub(crate) fn checkpoint(cancel: Option<&CancellationToken>) -> Result<()> {
    cancel.map_or(Ok(()), CancellationToken::check)
}
