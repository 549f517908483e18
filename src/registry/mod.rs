//! Thread-safe strong and weak reference registries for [`Identifiable`]
//! objects.
//!
//! A [`Registry`] assigns a stable numeric [`RefId`] to each object it sees
//! and holds either a strong (`Arc`) or weak (`Weak`) handle per entry, with
//! a reference count so that an object stays registered exactly as long as it
//! has outstanding registrations.
//!
//! ## Problem
//!
//! A host that exposes native objects to a foreign engine hands out numeric
//! handles and must keep each object alive and findable for as long as the
//! engine may call back with that handle — across threads, and across
//! transient drops of the local reference count. Sometimes the host must also
//! *observe* objects it does not own (a weak registry) without extending
//! their lifetime.
//!
//! ## Solution
//!
//! IDs are assigned lazily and cached on the object itself (see
//! [`Identifiable`]), namespaced by registry name. The same object therefore
//! gets independent IDs in independent registries, and re-registering after a
//! full deregistration reuses the prior ID instead of allocating a new one,
//! so handles already exported to the engine stay valid across a reference's
//! full lifetime.
//!
//! ## Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use refutils::{IdSlots, Registry};
//!
//! struct Widget {
//!     ids: IdSlots,
//! }
//! refutils::impl_identifiable!(Widget, ids);
//!
//! let registry: Registry<Widget> = Registry::new("widgets");
//! let widget = Arc::new(Widget { ids: IdSlots::new() });
//!
//! let id = registry.register(&widget);
//! // ... export id.get() to the engine ...
//! let same = registry.get(id).unwrap();
//! registry.deregister(&widget);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

mod identifiable;

pub use identifiable::{IdSlots, Identifiable, RefId};


/// Ownership handle stored per entry.
enum Handle<T: ?Sized> {
    Strong(Arc<T>),
    Weak(Weak<T>),
}

impl<T: ?Sized> Handle<T> {
    /// A strong handle to the object, if it is still alive.
    ///
    /// Strong handles always upgrade; weak handles return `None` once the
    /// object's true lifetime has ended, so a stale entry can never be
    /// dereferenced.
    fn upgrade(&self) -> Option<Arc<T>> {
        match self {
            Handle::Strong(object) => Some(Arc::clone(object)),
            Handle::Weak(object) => object.upgrade(),
        }
    }
}

struct Entry<T: ?Sized> {
    handle: Handle<T>,
    /// Registrations not yet matched by a deregistration. An entry exists in
    /// the table iff this is ≥ 1.
    count: u64,
}

struct Table<T: ?Sized> {
    entries: HashMap<RefId, Entry<T>>,
    /// Monotonic ID counter; only ever increments, so an ID is never reused
    /// for a different object.
    next_id: u64,
}

/// A named, thread-safe, reference-counted registry of [`Identifiable`]
/// objects.
///
/// Mode is fixed at construction: a *strong* registry keeps registered
/// objects alive for as long as their entry exists; a *weak* registry only
/// observes them. All operations may be called from any thread; the entry
/// table sits behind a read/write lock, with `get`/`snapshot`/`len` on the
/// read side and mutations on the write side.
pub struct Registry<T: Identifiable + ?Sized> {
    name: String,
    strong: bool,
    table: RwLock<Table<T>>,
}

impl<T: Identifiable + ?Sized> Registry<T> {
    /// Create a strong registry: entries own their objects.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_mode(name.into(), true)
    }

    /// Create a weak registry: entries observe their objects without
    /// extending their lifetime.
    pub fn new_weak(name: impl Into<String>) -> Self {
        Self::with_mode(name.into(), false)
    }

    fn with_mode(name: String, strong: bool) -> Self {
        Self {
            name,
            strong,
            table: RwLock::new(Table {
                entries: HashMap::new(),
                next_id: 0,
            }),
        }
    }

    /// The registry's name, used to namespace IDs on objects.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether entries keep their objects alive.
    pub fn is_strong(&self) -> bool {
        self.strong
    }

    /// Register `object`, returning its ID for this registry.
    ///
    /// Assigns the next counter value if the object has no ID for this
    /// registry's name yet, then increments the entry's reference count
    /// (creating the entry at count 1). Registering the same object again
    /// bumps the count on the existing entry rather than creating a
    /// duplicate, and after a full deregistration the cached ID is reused, so
    /// handles already exported for the object stay stable.
    pub fn register(&self, object: &Arc<T>) -> RefId {
        let mut table = self.table.write();

        let id = match object.registry_id(&self.name) {
            Some(id) => id,
            None => {
                table.next_id += 1;
                let id = RefId(table.next_id);
                // The object's own slot lock is a leaf, so taking it while
                // holding the table lock cannot deadlock.
                object.set_registry_id(&self.name, id);
                id
            }
        };

        let entry = table.entries.entry(id).or_insert_with(|| Entry {
            handle: if self.strong {
                Handle::Strong(Arc::clone(object))
            } else {
                Handle::Weak(Arc::downgrade(object))
            },
            count: 0,
        });
        entry.count += 1;

        log::trace!(
            "registry {}: registered id {} (count {})",
            self.name,
            id,
            entry.count
        );
        id
    }

    /// Drop one registration of `object`.
    ///
    /// Decrements the entry's reference count and removes the entry when it
    /// reaches zero, atomically with the decrement. A no-op if the object was
    /// never registered here or its entry is already gone; redundant cleanup
    /// is tolerated.
    pub fn deregister(&self, object: &T) {
        let Some(id) = object.registry_id(&self.name) else {
            return;
        };

        let mut table = self.table.write();
        let Some(entry) = table.entries.get_mut(&id) else {
            return;
        };

        entry.count -= 1;
        if entry.count == 0 {
            table.entries.remove(&id);
            log::trace!("registry {}: removed id {}", self.name, id);
        }
    }

    /// Remove `object`'s entry regardless of its reference count.
    ///
    /// A no-op if absent. The object keeps its cached ID, so a later
    /// `register` resurrects the entry under the same ID.
    pub fn force_remove(&self, object: &T) {
        let Some(id) = object.registry_id(&self.name) else {
            return;
        };

        let mut table = self.table.write();
        if table.entries.remove(&id).is_some() {
            log::trace!("registry {}: force-removed id {}", self.name, id);
        }
    }

    /// The handle stored for `id`, without touching the reference count.
    ///
    /// Returns `None` for an unknown ID, and for a weak entry whose object
    /// has independently been dropped (the weak handle is upgraded at read
    /// time, never handed out raw).
    pub fn get(&self, id: RefId) -> Option<Arc<T>> {
        let table = self.table.read();
        table.entries.get(&id).and_then(|entry| entry.handle.upgrade())
    }

    /// The ID previously assigned to `object` by this registry, if any.
    ///
    /// Does not consult the entry table: the ID stays cached on the object
    /// even after its entry is removed.
    pub fn lookup_id(&self, object: &T) -> Option<RefId> {
        object.registry_id(&self.name)
    }

    /// A point-in-time copy of all live entries.
    ///
    /// The returned map holds its own strong handles, so later mutations of
    /// the registry do not affect it. Weak entries whose objects have already
    /// been dropped are omitted.
    pub fn snapshot(&self) -> HashMap<RefId, Arc<T>> {
        let table = self.table.read();
        table
            .entries
            .iter()
            .filter_map(|(id, entry)| entry.handle.upgrade().map(|object| (*id, object)))
            .collect()
    }

    /// Number of live entries.
    ///
    /// In a weak registry this counts entries, not live objects: an entry
    /// whose object has been dropped still counts until it is deregistered,
    /// force-removed, or cleared.
    pub fn len(&self) -> usize {
        self.table.read().entries.len()
    }

    /// Whether the registry has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove all entries immediately.
    ///
    /// Each formerly strong-held object loses its owning handle; the ID
    /// counter is not reset, and objects keep their cached IDs.
    pub fn clear(&self) {
        let mut table = self.table.write();
        let removed = table.entries.len();
        table.entries.clear();
        log::trace!("registry {}: cleared {} entries", self.name, removed);
    }
}

impl<T: Identifiable + ?Sized> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.name)
            .field("strong", &self.strong)
            .field("entries", &self.len())
            .finish()
    }
}
