//! Owner references and scoped ownership
//!
//! Objects created while reconciling a parent must point back at it so the
//! garbage collector removes them together. Rather than ambient global state,
//! an [`OwnerScope`] is created per reconciliation and passed explicitly to
//! the constructors that may create owned objects. Entering a scope returns a
//! guard; dropping the guard (normal exit, early return, `?`, or panic
//! unwinding) restores the previous owner.

use std::ops::{Deref, DerefMut};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Back-reference from a child object to the object controlling its lifecycle
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    /// API version of the owner (e.g. `frp.gou177.cyou/v1`)
    pub api_version: String,
    /// Kind of the owner
    pub kind: String,
    /// Name of the owner
    pub name: String,
    /// UID of the owner
    pub uid: String,
    /// Whether the owner is the managing controller
    #[serde(default = "crate::default_true")]
    pub controller: bool,
    /// Whether the owner cannot be deleted before this object in foreground deletion
    #[serde(default = "crate::default_true")]
    pub block_owner_deletion: bool,
}

/// Stack of active owners for one logical operation.
///
/// Never share a scope between concurrent reconciliations; create one per
/// call.
#[derive(Debug, Default)]
pub struct OwnerScope {
    stack: Vec<OwnerReference>,
}

impl OwnerScope {
    /// Create an empty scope (no active owner)
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `owner` the current owner until the returned guard is dropped
    pub fn enter(&mut self, owner: OwnerReference) -> OwnerGuard<'_> {
        self.stack.push(owner);
        let depth = self.stack.len();
        OwnerGuard { scope: self, depth }
    }

    /// The innermost active owner, if any
    pub fn current(&self) -> Option<&OwnerReference> {
        self.stack.last()
    }

    /// Owner references a newly constructed object defaults to
    pub fn default_owner_references(&self) -> Vec<OwnerReference> {
        self.current().cloned().into_iter().collect()
    }
}

/// Guard for an entered owner; restores the enclosing owner on drop
#[derive(Debug)]
pub struct OwnerGuard<'a> {
    scope: &'a mut OwnerScope,
    depth: usize,
}

impl Deref for OwnerGuard<'_> {
    type Target = OwnerScope;

    fn deref(&self) -> &OwnerScope {
        self.scope
    }
}

impl DerefMut for OwnerGuard<'_> {
    fn deref_mut(&mut self) -> &mut OwnerScope {
        self.scope
    }
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        // Nested guards borrow this one mutably, so they are always gone by now.
        self.scope.stack.truncate(self.depth - 1);
    }
}
