//! Shared online/offline flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Whether the application believes the network is reachable.
///
/// Clones share one flag. The application flips it from whatever signal it
/// trusts; the interceptor only reads it.
#[derive(Debug, Clone)]
pub struct Connectivity {
    online: Arc<AtomicBool>,
}

impl Connectivity {
    /// Creates a flag in the given state.
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    /// Returns true if the network is considered reachable.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Acquire)
    }

    /// Sets the flag. Returns the previous state.
    pub fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::AcqRel)
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = Connectivity::default();
        let b = a.clone();
        assert!(b.is_online());
        assert!(a.set_online(false));
        assert!(!b.is_online());
    }
}
