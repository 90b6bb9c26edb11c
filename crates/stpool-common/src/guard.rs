//! Reentrancy guard shared by the registry and pool entry points.
//!
//! External validator-account calls happen while a component operation is
//! in flight; a callback re-entering the component must be rejected before
//! it can observe or touch mid-mutation state.

use crate::errors::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    entered: Arc<AtomicBool>,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raises the guard for the duration of the returned token.
    pub fn enter(&self, context: &str) -> Result<GuardToken> {
        if self.entered.swap(true, Ordering::AcqRel) {
            return Err(Error::Unavailable(format!(
                "reentrant call rejected: {context}"
            )));
        }
        Ok(GuardToken {
            entered: Arc::clone(&self.entered),
        })
    }

    /// Fails when an operation is currently in flight. Used by views so
    /// pooled value is never read mid-mutation.
    pub fn ensure_clear(&self, context: &str) -> Result<()> {
        if self.entered.load(Ordering::Acquire) {
            return Err(Error::Unavailable(format!(
                "state read during mutation: {context}"
            )));
        }
        Ok(())
    }
}

pub struct GuardToken {
    entered: Arc<AtomicBool>,
}

impl Drop for GuardToken {
    fn drop(&mut self) {
        self.entered.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_rejects_nested_entry() {
        let guard = ReentrancyGuard::new();
        let token = guard.enter("outer").unwrap();
        assert!(guard.enter("inner").is_err());
        assert!(guard.ensure_clear("view").is_err());
        drop(token);
        assert!(guard.enter("again").is_ok());
    }
}
