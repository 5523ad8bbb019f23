// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The instance table: instance ids mapped to live instances.

use std::fmt;
use std::sync::{Arc, Weak};

use hashbrown::HashMap;
use parking_lot::{RwLock, RwLockWriteGuard};

use crate::instance::{Instance, InstanceData};
use crate::InstanceId;

/// The table does not own instances. Each entry is a weak reference; ownership lives with the
/// [`Instance`] handles, and an entry is only removed when its slot is retired.
pub(crate) struct InstanceTable<T> {
    inner: RwLock<HashMap<InstanceId, Weak<InstanceData<T>>>>,
}

impl<T> InstanceTable<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Looks up an instance under the shared lock and acquires a handle to it.
    pub fn find(&self, id: &InstanceId) -> Option<Instance<T>> {
        let inner = self.inner.read();
        acquire(inner.get(id)?)
    }

    /// Takes the exclusive lock for a check-then-insert or a retirement.
    pub fn write(&self) -> TableWriteGuard<'_, T> {
        TableWriteGuard {
            inner: self.inner.write(),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn contains(&self, id: &InstanceId) -> bool {
        self.inner.read().contains_key(id)
    }

    /// Forgets every entry, returning the ids that were still resident.
    pub fn drain(&self) -> Vec<InstanceId> {
        let mut ids: Vec<_> = self.inner.write().drain().map(|(id, _)| id).collect();
        ids.sort_unstable();
        ids
    }

}

impl<T> fmt::Debug for InstanceTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceTable").field("len", &self.len()).finish()
    }
}

/// Exclusive access to the table. Dropping the guard releases the lock.
pub(crate) struct TableWriteGuard<'a, T> {
    inner: RwLockWriteGuard<'a, HashMap<InstanceId, Weak<InstanceData<T>>>>,
}

impl<T> TableWriteGuard<'_, T> {
    pub fn find(&self, id: &InstanceId) -> Option<Instance<T>> {
        acquire(self.inner.get(id)?)
    }

    /// Stores a newly created instance and returns its first handle.
    pub fn insert(&mut self, data: InstanceData<T>) -> Instance<T> {
        let data = Arc::new(data);
        self.inner.insert(data.id(), Arc::downgrade(&data));
        Instance::from_acquired(data)
    }

    /// Removes the entry for `data` if it is still the stored instance and no handle was acquired
    /// since its count reached zero. On success the slot is retired and its value is returned for
    /// destruction.
    pub fn retire(&mut self, data: &Arc<InstanceData<T>>) -> Option<T> {
        let id = data.id();

        // Absent or replaced: someone else already released this slot.
        let stored = self.inner.get(&id)?;
        if !std::ptr::eq(stored.as_ptr(), Arc::as_ptr(data)) {
            return None;
        }

        let value = data.try_retire()?;
        self.inner.remove(&id);
        Some(value)
    }
}

fn acquire<T>(entry: &Weak<InstanceData<T>>) -> Option<Instance<T>> {
    // Slots are removed in the same critical section that retires them, so a slot reachable
    // from the table is never retiring.
    let data = entry.upgrade()?;
    data.try_acquire().then(|| Instance::from_acquired(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ReleaseInstance;
    use crate::{AssetId, AssetType};

    struct Detached;

    impl ReleaseInstance<&'static str> for Detached {
        fn release_instance(&self, _data: Arc<InstanceData<&'static str>>) {}
    }

    fn data(id: InstanceId, value: &'static str) -> InstanceData<&'static str> {
        InstanceData::new(value, id, AssetId::default(), AssetType::from_name("Texture"), Weak::<Detached>::new())
    }

    #[test]
    fn find_acquires_a_handle() {
        let table = InstanceTable::new();
        let id = InstanceId::from_name("a");

        assert!(table.find(&id).is_none());

        let first = table.write().insert(data(id, "a"));
        let second = table.find(&id).expect("inserted above");

        assert_eq!(first, second);
        assert_eq!(first.use_count(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.contains(&id));
    }

    #[test]
    fn retire_requires_zero_count_and_identity() {
        let table = InstanceTable::new();
        let id = InstanceId::from_name("b");
        let slot = Arc::new(data(id, "b"));
        table.write().inner.insert(id, Arc::downgrade(&slot));

        // The slot still counts one live handle.
        assert_eq!(table.write().retire(&slot), None);
        slot.set_use_count(0);

        // A different slot that happens to share the id is left alone.
        let impostor = Arc::new(data(id, "impostor"));
        impostor.set_use_count(0);
        assert_eq!(table.write().retire(&impostor), None);
        assert!(!impostor.is_retired());
        assert!(table.contains(&id));

        assert_eq!(table.write().retire(&slot), Some("b"));
        assert!(slot.is_retired());
        assert!(!table.contains(&id));

        // Retiring twice is a no-op.
        assert_eq!(table.write().retire(&slot), None);
    }

    #[test]
    fn drain_reports_resident_ids() {
        let table = InstanceTable::new();
        let a = InstanceId::from_name("a");
        let b = InstanceId::from_name("b");
        let _ha = table.write().insert(data(a, "a"));
        let _hb = table.write().insert(data(b, "b"));

        let mut expected = vec![a, b];
        expected.sort_unstable();

        assert_eq!(table.drain(), expected);
        assert_eq!(table.len(), 0);
        assert!(table.find(&a).is_none());
    }
}
