//! Layered configuration scopes.
//!
//! A [`Scope`] is an immutable key/value bag established once per build
//! invocation. Descendant scopes hold a read-only view of their parent plus
//! a local overlay map; lookups check the overlay first, then walk the
//! parent chain. Lookups are by exact key match, there is no wildcard or
//! hierarchical resolution.
//!
//! Values are stored type-erased and recovered with a typed [`Scope::get`].
//! A key that is absent from the whole chain is a hard failure; use
//! [`Scope::try_get`] where absence is expected.

use std::any::type_name;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::{ArcStr, Dynamic};
use crate::error::ScopeError;

struct Property {
    /// Type name recorded at insertion, for diagnostics.
    refl_name: &'static str,
    data: Dynamic,
}

/// An immutable, scoped key/value store used to pass configuration from an
/// ancestor build scope to descendants.
pub struct Scope {
    parent: Option<Arc<Scope>>,
    overlay: BTreeMap<ArcStr, Property>,
}

impl Scope {
    /// Starts building a root scope with no parent.
    pub fn root() -> ScopeBuilder {
        ScopeBuilder {
            parent: None,
            overlay: BTreeMap::new(),
        }
    }

    /// Starts building a child scope layered over `self`.
    pub fn child(self: &Arc<Self>) -> ScopeBuilder {
        ScopeBuilder {
            parent: Some(self.clone()),
            overlay: BTreeMap::new(),
        }
    }

    /// Reads the value stored under `key`, checking the overlay first and
    /// then every ancestor in order.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Result<&T, ScopeError> {
        let property = self
            .find(key)
            .ok_or_else(|| ScopeError::Missing(key.into()))?;

        property
            .data
            .downcast_ref::<T>()
            .ok_or_else(|| ScopeError::Type {
                key: key.into(),
                expected: type_name::<T>(),
                found: property.refl_name,
            })
    }

    /// Reads the value stored under `key`, returning `None` when the key is
    /// absent or holds a different type.
    pub fn try_get<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.find(key)?.data.downcast_ref::<T>()
    }

    /// Convenience accessor for `String` properties.
    pub fn get_str(&self, key: &str) -> Result<&str, ScopeError> {
        self.get::<String>(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    fn find(&self, key: &str) -> Option<&Property> {
        if let Some(property) = self.overlay.get(key) {
            return Some(property);
        }

        self.parent.as_deref()?.find(key)
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope")
            .field("keys", &self.overlay.keys().collect::<Vec<_>>())
            .field("parent", &self.parent.as_ref().map(|_| ".."))
            .finish()
    }
}

/// A builder for a [`Scope`]. The scope becomes read-only once sealed with
/// [`ScopeBuilder::finish`].
pub struct ScopeBuilder {
    parent: Option<Arc<Scope>>,
    overlay: BTreeMap<ArcStr, Property>,
}

impl ScopeBuilder {
    /// Defines `key` in the overlay under construction. Defining a key that
    /// exists in an ancestor shadows it for this scope and its descendants.
    pub fn set<T: Send + Sync + 'static>(mut self, key: impl Into<Arc<str>>, value: T) -> Self {
        self.overlay.insert(
            key.into(),
            Property {
                refl_name: type_name::<T>(),
                data: Arc::new(value),
            },
        );
        self
    }

    pub fn finish(self) -> Arc<Scope> {
        Arc::new(Scope {
            parent: self.parent,
            overlay: self.overlay,
        })
    }
}
