use std::sync::{Mutex, MutexGuard};

use tracing::warn;

/// Acquire a cache mutex, recovering the guard if a previous holder panicked.
pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = target,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                hint = "entries may be stale after panic in another thread",
                "Recovered from poisoned cache lock"
            );
            poisoned.into_inner()
        }
    }
}
