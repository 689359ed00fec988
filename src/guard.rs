//! Process-wide accounting of live sessions.
//!
//! Reader, packer and combiner scopes hold a [`SessionGuard`] for their
//! lifetime. The counter is decrement-safe across nested and overlapping
//! sessions, including unwinds, because the decrement lives in `Drop`.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

static ACTIVE_SESSIONS: AtomicUsize = AtomicUsize::new(0);

/// Number of sessions currently open in this process.
#[must_use]
pub fn active_sessions() -> usize {
    ACTIVE_SESSIONS.load(Ordering::SeqCst)
}

/// RAII token counted in [`active_sessions`].
#[derive(Debug)]
pub(crate) struct SessionGuard {
    kind: &'static str,
}

impl SessionGuard {
    pub(crate) fn acquire(kind: &'static str) -> Self {
        let previous = ACTIVE_SESSIONS.fetch_add(1, Ordering::SeqCst);
        if previous == 0 {
            debug!(kind, "first session opened");
        }
        Self { kind }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let previous = ACTIVE_SESSIONS.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 {
            debug!(kind = self.kind, "last session closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_guards_balance() {
        let before = active_sessions();
        {
            let _outer = SessionGuard::acquire("test");
            {
                let _inner = SessionGuard::acquire("test");
                assert_eq!(active_sessions(), before + 2);
            }
            assert_eq!(active_sessions(), before + 1);
        }
        assert_eq!(active_sessions(), before);
    }
}
