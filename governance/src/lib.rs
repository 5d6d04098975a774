//! Capability-based access control for the token system.
//!
//! Privileged operations on the balance model and the monetary policy are
//! gated by capability grants held in a [`RoleRegistry`]. The registry is a
//! plain table injected into the components that consult it; granting and
//! revoking is wiring-level work performed at deployment and in tests.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Capability roles with different privilege levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Can change inclusion state, ban accounts, pause transfers and adjust
    /// fee/timing parameters.
    Admin,
    /// Can trigger a rebase on the balance model.
    MonetaryPolicy,
    /// Can mint new units (bridge claim settlement).
    Minter,
    /// Can burn existing units (bridge swap-out).
    Burner,
}

/// Registry of addresses and the capabilities granted to them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleRegistry {
    grants: HashMap<String, HashSet<Role>>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self {
            grants: HashMap::new(),
        }
    }

    /// Grant a capability to an address. Returns `false` if it was already held.
    pub fn grant(&mut self, addr: &str, role: Role) -> bool {
        self.grants.entry(addr.to_string()).or_default().insert(role)
    }

    /// Revoke a capability from an address. Returns `false` if it was not held.
    pub fn revoke(&mut self, addr: &str, role: Role) -> bool {
        self.grants
            .get_mut(addr)
            .map(|roles| roles.remove(&role))
            .unwrap_or(false)
    }

    /// Check whether an address holds a capability.
    pub fn has_role(&self, addr: &str, role: Role) -> bool {
        self.grants
            .get(addr)
            .map(|roles| roles.contains(&role))
            .unwrap_or(false)
    }

    /// All capabilities held by an address.
    pub fn roles_of(&self, addr: &str) -> Option<&HashSet<Role>> {
        self.grants.get(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_and_revoke_roundtrip() {
        let mut registry = RoleRegistry::new();
        assert!(!registry.has_role("alice", Role::Admin));
        assert!(registry.grant("alice", Role::Admin));
        assert!(!registry.grant("alice", Role::Admin));
        assert!(registry.has_role("alice", Role::Admin));
        assert!(!registry.has_role("alice", Role::Minter));
        assert!(registry.revoke("alice", Role::Admin));
        assert!(!registry.has_role("alice", Role::Admin));
    }

    #[test]
    fn roles_are_independent_per_address() {
        let mut registry = RoleRegistry::new();
        registry.grant("policy", Role::MonetaryPolicy);
        registry.grant("bridge", Role::Minter);
        registry.grant("bridge", Role::Burner);
        assert!(registry.has_role("policy", Role::MonetaryPolicy));
        assert!(!registry.has_role("bridge", Role::MonetaryPolicy));
        assert_eq!(registry.roles_of("bridge").map(|r| r.len()), Some(2));
    }
}
