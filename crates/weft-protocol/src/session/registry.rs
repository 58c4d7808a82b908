//! Insertion-ordered channel registry.
//!
//! Registration order is significant: it determines transport-level open
//! order and the order lifecycle hooks run in. The registry is written only
//! while the session is being assembled and read afterwards, so a plain
//! mutex-guarded table suffices; no concurrent map is needed.

use std::collections::HashMap;
use std::sync::Arc;

use crate::channel::ChannelInner;
use crate::error::ProtocolError;

#[derive(Default)]
pub(crate) struct ChannelRegistry {
    order: Vec<Arc<ChannelInner>>,
    by_name: HashMap<String, usize>,
}

impl ChannelRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a channel, preserving insertion order. At most one per name.
    pub(crate) fn insert(&mut self, channel: Arc<ChannelInner>) -> Result<(), ProtocolError> {
        let name = channel.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(ProtocolError::DuplicateExtension { channel: name });
        }
        self.by_name.insert(name, self.order.len());
        self.order.push(channel);
        Ok(())
    }

    pub(crate) fn get(&self, name: &str) -> Option<Arc<ChannelInner>> {
        self.by_name.get(name).map(|&idx| self.order[idx].clone())
    }

    /// Remove a channel by name, preserving the order of the rest.
    pub(crate) fn remove(&mut self, name: &str) -> Option<Arc<ChannelInner>> {
        let idx = self.by_name.remove(name)?;
        let removed = self.order.remove(idx);
        for shifted in self.by_name.values_mut() {
            if *shifted > idx {
                *shifted -= 1;
            }
        }
        Some(removed)
    }

    /// Channels in registration order.
    pub(crate) fn in_order(&self) -> Vec<Arc<ChannelInner>> {
        self.order.clone()
    }

    /// Channel names in registration order.
    pub(crate) fn names_in_order(&self) -> Vec<String> {
        self.order
            .iter()
            .map(|channel| channel.name().to_string())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;

    #[test]
    fn preserves_insertion_order() {
        let mut registry = ChannelRegistry::new();
        for name in ["zeta", "alpha", "mid"] {
            registry.insert(Channel::new(name).into_inner()).unwrap();
        }
        assert_eq!(registry.names_in_order(), ["zeta", "alpha", "mid"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = ChannelRegistry::new();
        registry.insert(Channel::new("dup").into_inner()).unwrap();
        match registry.insert(Channel::new("dup").into_inner()) {
            Err(ProtocolError::DuplicateExtension { channel }) => assert_eq!(channel, "dup"),
            other => panic!("expected DuplicateExtension, got {other:?}"),
        }
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_by_name() {
        let mut registry = ChannelRegistry::new();
        registry.insert(Channel::new("found").into_inner()).unwrap();
        assert!(registry.get("found").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn remove_keeps_remaining_order_and_lookups() {
        let mut registry = ChannelRegistry::new();
        for name in ["one", "two", "three"] {
            registry.insert(Channel::new(name).into_inner()).unwrap();
        }
        assert!(registry.remove("two").is_some());
        assert!(registry.remove("two").is_none());
        assert_eq!(registry.names_in_order(), ["one", "three"]);
        assert_eq!(registry.get("three").unwrap().name(), "three");
    }
}
