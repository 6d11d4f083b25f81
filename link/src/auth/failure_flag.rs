use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static GLOBAL_FLAG: OnceLock<AuthFailureFlag> = OnceLock::new();

/// Shared "the server rejected our token" marker.
///
/// While set, hubs holding the same flag do not schedule automatic
/// reconnects. Manual `connect()` calls are never blocked by it. Clones share
/// one underlying boolean.
#[derive(Debug, Clone, Default)]
pub struct AuthFailureFlag {
    inner: Arc<AtomicBool>,
}

impl AuthFailureFlag {
    /// A fresh, unshared flag. Useful for isolating hubs in tests.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide flag used by hubs that are not given their own.
    pub fn global() -> Self {
        GLOBAL_FLAG.get_or_init(Self::new).clone()
    }

    pub fn is_set(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }

    /// Mark an authentication failure. Returns `true` if the flag was clear.
    pub fn set(&self) -> bool {
        !self.inner.swap(true, Ordering::SeqCst)
    }

    /// Clear the flag once a valid token is available again. Returns `true`
    /// if the flag was set.
    pub fn clear(&self) -> bool {
        self.inner.swap(false, Ordering::SeqCst)
    }

    /// Whether two handles point at the same flag.
    pub fn shares_with(&self, other: &AuthFailureFlag) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
