use std::sync::{Mutex, MutexGuard};

/// Locks a registry mutex, recovering the data if a holder panicked.
///
/// Registries only hold plain maps whose invariants are restored before any
/// call that could panic, so the inner value is still usable.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
