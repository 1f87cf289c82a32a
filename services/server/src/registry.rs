//! Live-session bookkeeping.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_SESSION: AtomicU64 = AtomicU64::new(0);

/// Tracks which sessions are currently connected. Cloneable handle shared
/// across connection tasks.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashSet<String>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a process-unique session id and records it as active.
    pub fn register(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let n = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        let id = format!("sess-{millis:x}-{n}");
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(id.clone());
        }
        id
    }

    pub fn remove(&self, id: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(id);
        }
    }

    pub fn active(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_counted() {
        let registry = SessionRegistry::new();
        let a = registry.register();
        let b = registry.register();
        assert_ne!(a, b);
        assert_eq!(registry.active(), 2);

        registry.remove(&a);
        assert_eq!(registry.active(), 1);
        // removing twice is harmless
        registry.remove(&a);
        assert_eq!(registry.active(), 1);
    }
}
