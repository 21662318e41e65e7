//! First-failure holder
//!
//! The device tree owns one holder. Sanity-check failures record themselves
//! here; while a failure is recorded, plays and device access through the
//! `Kosmos` root are refused until [`KosmosFatalError::clear`] is called
//! (test teardown does this).

use std::fmt;

use parking_lot::Mutex;
use tracing::error;

use crate::error::{KosmosError, Result};

#[derive(Debug, Default)]
pub struct KosmosFatalError {
    first: Mutex<Option<String>>,
}

impl KosmosFatalError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a failure; later failures are ignored while one is held
    pub fn record(&self, err: &dyn fmt::Display) {
        let mut first = self.first.lock();
        if first.is_none() {
            error!("Fatal: {}", err);
            *first = Some(err.to_string());
        }
    }

    pub fn get(&self) -> Option<String> {
        self.first.lock().clone()
    }

    pub fn is_set(&self) -> bool {
        self.first.lock().is_some()
    }

    /// Forget the recorded failure, returning it
    pub fn clear(&self) -> Option<String> {
        self.first.lock().take()
    }

    /// Fail with the recorded error, if any
    pub fn check(&self) -> Result<()> {
        match self.get() {
            Some(msg) => Err(KosmosError::Fatal(msg)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_error_wins() {
        let holder = KosmosFatalError::new();
        assert!(holder.check().is_ok());

        holder.record(&"first");
        holder.record(&"second");
        assert_eq!(holder.get().as_deref(), Some("first"));
        assert!(matches!(holder.check(), Err(KosmosError::Fatal(m)) if m == "first"));

        assert_eq!(holder.clear().as_deref(), Some("first"));
        assert!(!holder.is_set());
        assert!(holder.check().is_ok());
    }
}
