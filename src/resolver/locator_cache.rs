use std::collections::{HashMap, VecDeque};

use crate::accessibility::node::NodeHandle;
use crate::accessibility::snapshot::{ControlDescriptor, ControlInfo};

const TOKEN_PREFIX: &str = "element:";

#[derive(Debug, Clone)]
struct CachedLocator {
    info: ControlInfo,
    handle: Option<NodeHandle>,
}

/// Bounded map from opaque locator tokens to resolved controls.
///
/// Eviction is strict FIFO: reading a token never refreshes its position.
#[derive(Debug)]
pub struct LocatorCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, CachedLocator>,
}

impl LocatorCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.entries.contains_key(token)
    }

    pub fn is_token(text: &str) -> bool {
        text.starts_with(TOKEN_PREFIX)
    }

    /// Stores a resolved control and returns its new token with the public metadata.
    pub fn store(&mut self, descriptor: &ControlDescriptor) -> (String, ControlInfo) {
        let token = format!("{TOKEN_PREFIX}{}", uuid::Uuid::new_v4().simple());
        self.entries.insert(
            token.clone(),
            CachedLocator {
                info: descriptor.info.clone(),
                handle: descriptor.handle.clone(),
            },
        );
        self.order.push_back(token.clone());

        while self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else { break };
            if self.entries.remove(&oldest).is_some() {
                tracing::debug!(token = %oldest, "locator evicted (capacity)");
            }
        }

        (token, descriptor.info.clone())
    }

    pub fn resolve(&self, token: &str) -> (Option<NodeHandle>, Option<ControlInfo>) {
        match self.entries.get(token) {
            Some(entry) => (entry.handle.clone(), Some(entry.info.clone())),
            None => (None, None),
        }
    }

    /// Replaces the live handle behind `token`. Returns false for unknown tokens.
    pub fn update_handle(&mut self, token: &str, handle: NodeHandle) -> bool {
        match self.entries.get_mut(token) {
            Some(entry) => {
                entry.handle = Some(handle);
                true
            }
            None => false,
        }
    }

    pub fn invalidate(&mut self, token: &str) -> bool {
        let removed = self.entries.remove(token).is_some();
        if removed {
            self.order.retain(|t| t != token);
            tracing::debug!(token, "locator invalidated");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessibility::node::fake::FakeNode;

    fn descriptor(index: usize, title: &str) -> ControlDescriptor {
        let node = FakeNode::new(title, "Button");
        ControlDescriptor {
            info: ControlInfo::from_node(node.as_ref(), index, 1),
            handle: Some(node.handle()),
        }
    }

    #[test]
    fn tokens_are_prefixed_and_unique() {
        let mut cache = LocatorCache::new(4);
        let (a, _) = cache.store(&descriptor(1, "OK"));
        let (b, _) = cache.store(&descriptor(1, "OK"));
        assert!(LocatorCache::is_token(&a));
        assert_ne!(a, b);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn overflow_evicts_exactly_the_first_inserted() {
        let n = 3;
        let mut cache = LocatorCache::new(n);
        let tokens: Vec<String> = (1..=n + 1)
            .map(|i| cache.store(&descriptor(i, &format!("b{i}"))).0)
            .collect();

        assert_eq!(cache.len(), n);
        let (handle, info) = cache.resolve(&tokens[0]);
        assert!(handle.is_none() && info.is_none());
        for t in &tokens[1..] {
            assert!(cache.resolve(t).1.is_some());
        }
    }

    #[test]
    fn reads_do_not_refresh_recency() {
        let mut cache = LocatorCache::new(2);
        let (first, _) = cache.store(&descriptor(1, "a"));
        let (second, _) = cache.store(&descriptor(2, "b"));
        assert!(cache.resolve(&first).1.is_some());
        cache.store(&descriptor(3, "c"));
        assert!(!cache.contains(&first));
        assert!(cache.contains(&second));
    }

    #[test]
    fn resolve_right_after_store_returns_same_metadata() {
        let mut cache = LocatorCache::new(8);
        let d = descriptor(5, "Save");
        let (token, stored) = cache.store(&d);
        let (handle, info) = cache.resolve(&token);
        assert_eq!(info.as_ref(), Some(&stored));
        assert_eq!(info.unwrap().title, "Save");
        assert!(handle.is_some());
    }

    #[test]
    fn update_and_invalidate() {
        let mut cache = LocatorCache::new(8);
        let (token, _) = cache.store(&ControlDescriptor {
            info: descriptor(1, "x").info,
            handle: None,
        });
        assert!(cache.resolve(&token).0.is_none());
        assert!(cache.update_handle(&token, FakeNode::new("x", "Button").handle()));
        assert!(cache.resolve(&token).0.is_some());
        assert!(cache.invalidate(&token));
        assert!(!cache.invalidate(&token));
        assert!(!cache.update_handle(&token, FakeNode::new("x", "Button").handle()));
        assert!(cache.is_empty());
    }
}

