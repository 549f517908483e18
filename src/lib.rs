//! Reference tracking and reference-based mutex locking for hosts that embed
//! a foreign engine and must keep engine-visible objects alive and
//! synchronized while native code holds transient handles to them.
//!
//! Two independent primitives:
//!
//! - [`Registry`]: a named, thread-safe map from stable numeric IDs to
//!   strong- or weak-held objects, reference-counted per registration.
//! - [`RefMutex`]: a hybrid mutex with one exclusive "master" lock class and
//!   a cooperative "ref" lock class whose holders coexist as a group.

pub mod ref_mutex;
pub mod registry;

pub use ref_mutex::{MasterGuard, RefLockGuard, RefLocker, RefMutex};
pub use registry::{IdSlots, Identifiable, RefId, Registry};
