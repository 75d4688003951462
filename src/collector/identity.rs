//! Alternate-identity execution for scheduling units.
//!
//! An [`IdentityContext`] is logged on once per unit, on the unit's own
//! thread, and then assumed around every provider call. [`UnitIdentity`] is
//! `!Send` so the acquired context cannot leave that thread.

use std::marker::PhantomData;
use std::sync::Arc;

use thiserror::Error;

/// Failure to acquire or assume an alternate identity. Fatal to the process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("logon failed for {user}: {reason}")]
    Logon { user: String, reason: String },

    #[error("impersonation failed: {0}")]
    Impersonation(String),
}

/// Platform hook for running code under alternate credentials.
pub trait IdentityContext: Send + Sync {
    /// Acquire the identity. Called once per unit before its first cycle.
    fn logon(&self) -> Result<(), IdentityError> {
        Ok(())
    }

    /// Switch the current thread to the identity.
    fn assume(&self) -> Result<(), IdentityError>;

    /// Switch the current thread back.
    fn restore(&self);
}

/// The identity one scheduling unit executes provider calls under.
pub struct UnitIdentity {
    context: Option<Arc<dyn IdentityContext>>,
    _thread_bound: PhantomData<*const ()>,
}

impl std::fmt::Debug for UnitIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitIdentity")
            .field("alternate", &self.context.is_some())
            .finish()
    }
}

impl UnitIdentity {
    /// Run under the process identity.
    pub fn direct() -> Self {
        Self {
            context: None,
            _thread_bound: PhantomData,
        }
    }

    /// Log on to `context` (if any) on the calling thread.
    pub fn acquire(context: Option<Arc<dyn IdentityContext>>) -> Result<Self, IdentityError> {
        if let Some(ctx) = &context {
            ctx.logon()?;
        }
        Ok(Self {
            context,
            _thread_bound: PhantomData,
        })
    }

    /// Execute `f` under this identity, restoring the previous one afterwards
    /// even if `f` unwinds.
    pub fn run<T>(&self, f: impl FnOnce() -> T) -> Result<T, IdentityError> {
        let Some(ctx) = &self.context else {
            return Ok(f());
        };
        ctx.assume()?;
        let _guard = RestoreGuard(ctx.as_ref());
        Ok(f())
    }
}

struct RestoreGuard<'a>(&'a dyn IdentityContext);

impl Drop for RestoreGuard<'_> {
    fn drop(&mut self) {
        self.0.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<&'static str>>,
        refuse: bool,
    }

    impl IdentityContext for Recording {
        fn logon(&self) -> Result<(), IdentityError> {
            self.events.lock().unwrap().push("logon");
            Ok(())
        }

        fn assume(&self) -> Result<(), IdentityError> {
            if self.refuse {
                return Err(IdentityError::Impersonation("access denied".to_string()));
            }
            self.events.lock().unwrap().push("assume");
            Ok(())
        }

        fn restore(&self) {
            self.events.lock().unwrap().push("restore");
        }
    }

    #[test]
    fn test_direct_identity_runs_closure() {
        let identity = UnitIdentity::direct();
        assert_eq!(identity.run(|| 7).unwrap(), 7);
    }

    #[test]
    fn test_identity_wraps_each_call() {
        let ctx = Arc::new(Recording::default());
        let identity = UnitIdentity::acquire(Some(ctx.clone())).unwrap();

        identity.run(|| ()).unwrap();
        identity.run(|| ()).unwrap();

        let events = ctx.events.lock().unwrap().clone();
        assert_eq!(events, vec!["logon", "assume", "restore", "assume", "restore"]);
    }

    #[test]
    fn test_identity_restores_on_panic() {
        let ctx = Arc::new(Recording::default());
        let identity = UnitIdentity::acquire(Some(ctx.clone())).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Option<()> = identity.run(|| panic!("provider blew up")).ok();
        }));
        assert!(result.is_err());
        assert_eq!(ctx.events.lock().unwrap().last(), Some(&"restore"));
    }

    #[test]
    fn test_identity_assume_failure_skips_closure() {
        let ctx = Arc::new(Recording {
            refuse: true,
            ..Default::default()
        });
        let identity = UnitIdentity::acquire(Some(ctx)).unwrap();
        let mut called = false;
        let err = identity.run(|| called = true).unwrap_err();
        assert!(matches!(err, IdentityError::Impersonation(_)));
        assert!(!called);
    }
}
