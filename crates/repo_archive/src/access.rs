//! Scoped access to the destination of an acquisition.
//!
//! Some environments only grant write access to a user-picked folder while a
//! permission token is held. The core models that token as an
//! [`AccessGuard`] supplied by the caller, and brackets all of its file system
//! work in an [`AccessScope`].
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use chrono::{DateTime, Utc};

use crate::error::AccessError;

/// Capability granting file system access to a destination root.
pub trait AccessGuard: Send + Sync {
    /// Starts accessing the guarded location.
    fn begin_access(&self) -> Result<(), AccessError>;

    /// Stops accessing the guarded location.
    fn end_access(&self);
}

/// Guard for environments without permission tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAccessGuard;

impl AccessGuard for NoopAccessGuard {
    fn begin_access(&self) -> Result<(), AccessError> {
        Ok(())
    }

    fn end_access(&self) {}
}

/// A permission token that is valid until a deadline.
#[derive(Debug)]
pub struct ExpiringAccessGuard {
    expires_at: DateTime<Utc>,
    active: AtomicUsize,
}

impl ExpiringAccessGuard {
    pub fn new(expires_at: DateTime<Utc>) -> Self {
        Self {
            expires_at,
            active: AtomicUsize::new(0),
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Number of scopes that began but did not end yet.
    pub fn active_scopes(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

impl AccessGuard for ExpiringAccessGuard {
    fn begin_access(&self) -> Result<(), AccessError> {
        if Utc::now() >= self.expires_at {
            return Err(AccessError::Stale);
        }
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn end_access(&self) {
        let decremented = self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if decremented.is_err() {
            // A refused `begin_access` never incremented the counter.
            tracing::trace!("access ended without an active scope");
        }
    }
}

/// Proof that access to the destination has begun.
///
/// `end_access` is called exactly once: when the scope is dropped, or right
/// away if `begin_access` fails. The scope owns its guard, so it can be handed
/// to blocking work that outlives the future which began it.
pub struct AccessScope {
    guard: Arc<dyn AccessGuard>,
}

impl AccessScope {
    pub fn begin(guard: Arc<dyn AccessGuard>) -> Result<Self, AccessError> {
        if let Err(err) = guard.begin_access() {
            guard.end_access();
            return Err(err);
        }
        Ok(Self { guard })
    }
}

impl Drop for AccessScope {
    fn drop(&mut self) {
        self.guard.end_access();
    }
}
