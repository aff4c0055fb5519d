//! Response cache: bounded, first-in-first-out.
//!
//! Keys are the SHA-256 of (system prompt, serialized history, model). Raw
//! model text is stored so shaping is applied identically on every read.

use helmsman_core::Message;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

pub struct ResponseCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, String>,
    order: VecDeque<String>,
}

impl ResponseCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Deterministic key for one request.
    pub fn key(system_prompt: &str, history: &[Message], model: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(system_prompt.as_bytes());
        hasher.update(b"\0");
        // Message serialization cannot fail: plain strings and a unit enum
        hasher.update(serde_json::to_vec(history).unwrap_or_default());
        hasher.update(b"\0");
        hasher.update(model.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.entries.get(key).cloned()
    }

    /// Store `text`, evicting the oldest entry when full.
    pub fn put(&self, key: String, text: String) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.entries.insert(key.clone(), text).is_some() {
            return;
        }
        inner.order.push_back(key);
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_depends_on_every_part() {
        let history = vec![Message::user("hi")];
        let base = ResponseCache::key("sys", &history, "gpt-4o");
        assert_eq!(base, ResponseCache::key("sys", &history, "gpt-4o"));
        assert_eq!(base.len(), 64);
        assert_ne!(base, ResponseCache::key("sys2", &history, "gpt-4o"));
        assert_ne!(base, ResponseCache::key("sys", &history, "gpt-4o-mini"));
        assert_ne!(
            base,
            ResponseCache::key("sys", &[Message::assistant("hi")], "gpt-4o")
        );
    }

    #[test]
    fn evicts_oldest_first() {
        let cache = ResponseCache::new(2);
        cache.put("a".into(), "1".into());
        cache.put("b".into(), "2".into());
        cache.put("c".into(), "3".into());
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("c").as_deref(), Some("3"));
    }

    #[test]
    fn overwrite_keeps_position() {
        let cache = ResponseCache::new(2);
        cache.put("a".into(), "1".into());
        cache.put("b".into(), "2".into());
        cache.put("a".into(), "1b".into());
        cache.put("c".into(), "3".into());
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b").as_deref(), Some("2"));
    }
}
