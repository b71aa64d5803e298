//! Ownership tags for registrations that must be revoked together.
//!
//! A component that registers handlers or serializers on behalf of a
//! loadable unit (a module, a plugin, a test) creates one [`OwnerToken`] and
//! passes it to every owned registration. Dropping the unit is then a single
//! `unregister_handlers(&token)` / `unregister_bindings(&token)` call.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque scope identifier attached to registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerToken(Uuid);

impl OwnerToken {
    /// Create a fresh, unique token.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn id(&self) -> Uuid {
        self.0
    }
}

impl Default for OwnerToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner:{}", self.0)
    }
}
