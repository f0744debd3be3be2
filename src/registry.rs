//! The set of subprotocols a server instance understands (spec §4.4).
//!
//! Insertion order is preserved so a server's startup log and its
//! `Sec-WebSocket-Protocol` negotiation order agree; lookups are
//! case-insensitive since subprotocol tokens are compared
//! case-insensitively in the handshake. This engine resolves the spec's
//! open question about a "null" registry by always constructing one
//! eagerly and non-optionally — see `ProtocolRegistry::new`.

use crate::error::Error;
use crate::protocol::Protocol;

/// Registered subprotocols, cloned-on-negotiate so each connection gets
/// its own protocol instance with its own mutable state (e.g. a binary
/// protocol's fragmentation buffer or cipher state).
pub struct ProtocolRegistry {
    entries: Vec<Box<dyn Protocol>>,
}

impl ProtocolRegistry {
    /// Always returns a usable, empty registry. Spec §9 flags the
    /// original's "fProtocols may be null" as ambiguous; this crate never
    /// represents "no protocols configured" as anything but an empty
    /// `Vec`, so every caller can treat the registry as always-present.
    pub fn new() -> Self {
        ProtocolRegistry {
            entries: Vec::new(),
        }
    }

    /// Registers `protocol`, rejecting a name collision (case-insensitive)
    /// rather than silently shadowing the earlier entry.
    pub fn add(&mut self, protocol: Box<dyn Protocol>) -> Result<(), Error> {
        if self.contains(protocol.name()) {
            return Err(Error::DuplicateProtocolName(protocol.name().to_string()));
        }
        self.entries.push(protocol);
        Ok(())
    }

    /// Removes the protocol named `name`, if registered. No-op otherwise.
    pub fn remove(&mut self, name: &str) {
        self.entries.retain(|p| !p.name().eq_ignore_ascii_case(name));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|p| p.name().eq_ignore_ascii_case(name))
    }

    /// Clones a fresh, independent instance of the protocol named `name`
    /// for a newly-upgraded connection to own.
    pub fn clone_by_name(&self, name: &str) -> Option<Box<dyn Protocol>> {
        self.entries
            .iter()
            .find(|p| p.name().eq_ignore_ascii_case(name))
            .map(|p| p.clone_box())
    }

    /// Registered subprotocol names, in insertion order.
    pub fn known_names(&self) -> Vec<&str> {
        self.entries.iter().map(|p| p.name()).collect()
    }
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::chat::ChatProtocol;

    #[test]
    fn preserves_insertion_order() {
        let mut registry = ProtocolRegistry::new();
        registry.add(Box::new(ChatProtocol::new("beta"))).unwrap();
        registry.add(Box::new(ChatProtocol::new("alpha"))).unwrap();
        assert_eq!(registry.known_names(), vec!["beta", "alpha"]);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut registry = ProtocolRegistry::new();
        registry
            .add(Box::new(ChatProtocol::new("SynopseJSON")))
            .unwrap();
        assert!(registry.contains("synopsejson"));
        assert!(registry.clone_by_name("SYNOPSEJSON").is_some());
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut registry = ProtocolRegistry::new();
        registry.add(Box::new(ChatProtocol::new("chat"))).unwrap();
        let err = registry.add(Box::new(ChatProtocol::new("Chat"))).unwrap_err();
        assert!(matches!(err, Error::DuplicateProtocolName(_)));
    }

    #[test]
    fn remove_is_case_insensitive_and_idempotent() {
        let mut registry = ProtocolRegistry::new();
        registry.add(Box::new(ChatProtocol::new("chat"))).unwrap();
        registry.remove("CHAT");
        assert!(!registry.contains("chat"));
        registry.remove("chat");
    }

    #[test]
    fn empty_registry_is_always_present_not_null() {
        let registry = ProtocolRegistry::new();
        assert_eq!(registry.known_names(), Vec::<&str>::new());
        assert!(registry.clone_by_name("anything").is_none());
    }
}
