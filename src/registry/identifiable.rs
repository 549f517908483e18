//! Identity capability required of objects that participate in a registry.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

/// Numeric identifier assigned by a [`Registry`](super::Registry).
///
/// IDs are unique within a registry, start at 1, and only increase. An object
/// that was never registered has no ID (`None`), not a reserved value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct RefId(pub(crate) u64);

impl RefId {
    /// The raw numeric value, e.g. for handing to a foreign engine.
    #[inline]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Capability an object must expose to participate in registries.
///
/// An object can hold a distinct ID per registry it participates in, keyed by
/// registry name. Both methods take `&self` and must be thread-safe: one
/// object may be touched by several registries concurrently, each from its
/// own thread. Embed an [`IdSlots`] and delegate to it (or use
/// [`impl_identifiable!`](crate::impl_identifiable)) rather than rolling your
/// own storage.
pub trait Identifiable {
    /// The ID previously stored for `registry`, if any.
    fn registry_id(&self, registry: &str) -> Option<RefId>;

    /// Store `id` for `registry`, replacing any previous value.
    fn set_registry_id(&self, registry: &str, id: RefId);
}

/// Internally synchronized registry-name → ID storage for host object types.
///
/// The map is guarded by its own mutex, independent of any registry lock,
/// because registries for different names race on the same object. The mutex
/// is a leaf: nothing is called while it is held.
///
/// # Example
///
/// ```ignore
/// struct Widget {
///     ids: IdSlots,
///     // ... domain fields ...
/// }
///
/// refutils::impl_identifiable!(Widget, ids);
/// ```
#[derive(Default)]
pub struct IdSlots {
    slots: Mutex<HashMap<String, RefId>>,
}

impl IdSlots {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// The ID stored for `registry`, if any.
    pub fn get(&self, registry: &str) -> Option<RefId> {
        self.slots.lock().get(registry).copied()
    }

    /// Store `id` for `registry`.
    pub fn set(&self, registry: &str, id: RefId) {
        self.slots.lock().insert(registry.to_owned(), id);
    }
}

impl Identifiable for IdSlots {
    fn registry_id(&self, registry: &str) -> Option<RefId> {
        self.get(registry)
    }

    fn set_registry_id(&self, registry: &str, id: RefId) {
        self.set(registry, id);
    }
}

impl fmt::Debug for IdSlots {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdSlots")
            .field("slots", &*self.slots.lock())
            .finish()
    }
}

/// Implement [`Identifiable`] for a type by delegating to an embedded
/// [`IdSlots`] field.
///
/// ```ignore
/// struct Widget {
///     ids: IdSlots,
/// }
///
/// refutils::impl_identifiable!(Widget, ids);
/// ```
#[macro_export]
macro_rules! impl_identifiable {
    ($ty:ty, $field:ident) => {
        impl $crate::registry::Identifiable for $ty {
            fn registry_id(&self, registry: &str) -> Option<$crate::registry::RefId> {
                self.$field.get(registry)
            }

            fn set_registry_id(&self, registry: &str, id: $crate::registry::RefId) {
                self.$field.set(registry, id);
            }
        }
    };
}
