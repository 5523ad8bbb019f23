// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reference-counted instances handed out by the database.

use std::cell::UnsafeCell;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::{Arc, Weak};

use crate::lifecycle::{self, ReleaseInstance};
use crate::{AssetId, AssetType, InstanceId};

/// Live count of a slot that has been committed to destruction.
const RETIRING: isize = -1;

/// A created instance, stamped with the identity it was created under.
///
/// `use_count` counts live [`Instance`] handles. It is the sole signal for reclamation: the
/// database only ever moves it from `0` to [`RETIRING`], under its exclusive table lock, and a
/// retired slot can never be acquired again.
///
/// The value is moved out in the same step that retires the slot, so it can be destroyed while
/// the lock is still held. A retired slot therefore no longer owns a value.
pub(crate) struct InstanceData<T> {
    value: UnsafeCell<ManuallyDrop<T>>,
    use_count: AtomicIsize,
    id: InstanceId,
    asset_id: AssetId,
    asset_type: AssetType,
    database: Weak<dyn ReleaseInstance<T>>,
}

impl<T> InstanceData<T> {
    /// Stamps a freshly created value. The slot starts with one live handle.
    pub fn new(value: T, id: InstanceId, asset_id: AssetId, asset_type: AssetType, database: Weak<dyn ReleaseInstance<T>>) -> Self {
        Self {
            value: UnsafeCell::new(ManuallyDrop::new(value)),
            use_count: AtomicIsize::new(1),
            id,
            asset_id,
            asset_type,
            database,
        }
    }

    /// Adds a live handle unless the slot is retiring.
    pub fn try_acquire(&self) -> bool {
        self.use_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| (count >= 0).then_some(count + 1))
            .is_ok()
    }

    /// Commits the slot to destruction if no handle has been acquired since the count reached zero,
    /// and takes the value out of it.
    pub fn try_retire(&self) -> Option<T> {
        self.use_count
            .compare_exchange(0, RETIRING, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;

        // SAFETY: a count of zero means no handle exists that could still read the value, and
        // `try_acquire` refuses a retiring slot, so this is the only reference to it.
        let value = unsafe { &mut *self.value.get() };

        // SAFETY: only one exchange from zero to `RETIRING` can succeed, and the count never leaves
        // `RETIRING`, so the value is taken once.
        Some(unsafe { ManuallyDrop::take(value) })
    }

    #[cfg(test)]
    pub fn is_retired(&self) -> bool {
        self.use_count.load(Ordering::Acquire) == RETIRING
    }

    fn value(&self) -> &T {
        // SAFETY: the value is only taken once the slot retires, and a retiring slot has no live
        // handles through which this could be called.
        unsafe { &*self.value.get() }
    }

    #[cfg(test)]
    pub fn set_use_count(&self, count: isize) {
        self.use_count.store(count, Ordering::Release);
    }

    pub fn use_count(&self) -> usize {
        usize::try_from(self.use_count.load(Ordering::Acquire)).unwrap_or(0)
    }

    pub const fn id(&self) -> InstanceId {
        self.id
    }

    pub const fn asset_id(&self) -> AssetId {
        self.asset_id
    }

    pub const fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    pub fn database(&self) -> &Weak<dyn ReleaseInstance<T>> {
        &self.database
    }
}

// SAFETY: the value is shared between handles like the contents of an `Arc<T>`, and it is only
// moved out once, after every handle is gone.
unsafe impl<T: Send + Sync> Sync for InstanceData<T> {}

impl<T> Drop for InstanceData<T> {
    fn drop(&mut self) {
        // A retired slot gave its value away.
        if *self.use_count.get_mut() != RETIRING {
            // SAFETY: the value is still owned by the slot and is dropped exactly once, here.
            unsafe { ManuallyDrop::drop(self.value.get_mut()) }
        }
    }
}

/// A handle to an instance owned jointly by all of its handles.
///
/// Handles are obtained from an [`InstanceDatabase`][crate::InstanceDatabase]. Cloning a handle
/// adds a reference; dropping the last one removes the instance from the database and passes it
/// to the destroy function of its [`InstanceHandler`][crate::InstanceHandler].
///
/// Two handles are equal if they refer to the same instance.
pub struct Instance<T> {
    data: ManuallyDrop<Arc<InstanceData<T>>>,
}

impl<T> Instance<T> {
    /// Wraps a slot whose live count already includes this handle.
    pub(crate) fn from_acquired(data: Arc<InstanceData<T>>) -> Self {
        Self {
            data: ManuallyDrop::new(data),
        }
    }

    /// The id this instance is stored under.
    #[must_use]
    pub fn id(&self) -> InstanceId {
        self.data.id()
    }

    /// The id of the asset the instance was created from.
    #[must_use]
    pub fn asset_id(&self) -> AssetId {
        self.data.asset_id()
    }

    /// The runtime type of the asset the instance was created from.
    #[must_use]
    pub fn asset_type(&self) -> AssetType {
        self.data.asset_type()
    }

    /// The number of live handles to this instance.
    #[must_use]
    pub fn use_count(&self) -> usize {
        self.data.use_count()
    }

    /// Returns `true` if both handles refer to the same instance.
    #[must_use]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.data, &other.data)
    }

    #[cfg(test)]
    pub(crate) fn slot(&self) -> &Arc<InstanceData<T>> {
        &self.data
    }

    /// Takes the slot out of the handle without giving up its live count.
    #[cfg(test)]
    pub(crate) fn into_slot(self) -> Arc<InstanceData<T>> {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so `data` is taken exactly once.
        unsafe { ManuallyDrop::take(&mut this.data) }
    }
}

impl<T> Clone for Instance<T> {
    fn clone(&self) -> Self {
        // An existing handle keeps the count above zero, so the slot cannot be retiring.
        self.data.use_count.fetch_add(1, Ordering::Relaxed);
        Self::from_acquired(Arc::clone(&self.data))
    }
}

impl<T> Drop for Instance<T> {
    fn drop(&mut self) {
        // SAFETY: `drop` runs once and `self.data` is never accessed again.
        let data = unsafe { ManuallyDrop::take(&mut self.data) };

        if data.use_count.fetch_sub(1, Ordering::AcqRel) == 1 {
            lifecycle::release(data);
        }
    }
}

impl<T> Deref for Instance<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.data.value()
    }
}

impl<T> PartialEq for Instance<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T> Eq for Instance<T> {}

impl<T: fmt::Debug> fmt::Debug for Instance<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id())
            .field("asset_id", &self.asset_id())
            .field("use_count", &self.use_count())
            .field("value", self.data.value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use static_assertions::{assert_impl_all, assert_not_impl_any};

    use super::*;

    struct Detached;

    impl<T> ReleaseInstance<T> for Detached {
        fn release_instance(&self, _data: Arc<InstanceData<T>>) {}
    }

    struct Counted(Arc<AtomicUsize>);

    impl Drop for Counted {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn detached(value: u32) -> Instance<u32> {
        let database: Weak<dyn ReleaseInstance<u32>> = Weak::<Detached>::new();
        Instance::from_acquired(Arc::new(InstanceData::new(
            value,
            InstanceId::from_name("detached"),
            AssetId::default(),
            AssetType::from_name("Texture"),
            database,
        )))
    }

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(Instance<u32>: Send, Sync);
        assert_not_impl_any!(Instance<std::cell::Cell<u32>>: Sync);
    }

    #[test]
    fn clone_and_drop_track_use_count() {
        let a = detached(5);
        assert_eq!(a.use_count(), 1);

        let b = a.clone();
        assert_eq!(a.use_count(), 2);
        assert_eq!(a, b);
        assert_eq!(*b, 5);

        drop(b);
        assert_eq!(a.use_count(), 1);
    }

    #[test]
    fn distinct_slots_are_not_equal() {
        let a = detached(1);
        let b = detached(1);

        assert_ne!(a, b);
        assert!(!Instance::ptr_eq(&a, &b));
    }

    #[test]
    fn retiring_blocks_acquisition() {
        let data = InstanceData::new(
            0_u32,
            InstanceId::random(),
            AssetId::default(),
            AssetType::from_name("Texture"),
            Weak::<Detached>::new(),
        );

        // One live handle: retirement must not happen.
        assert_eq!(data.try_retire(), None);

        data.set_use_count(0);
        assert_eq!(data.try_retire(), Some(0));
        assert!(data.is_retired());
        assert_eq!(data.use_count(), 0);
        assert!(!data.try_acquire());

        // The value was handed out once already.
        assert_eq!(data.try_retire(), None);
    }

    #[test]
    fn retired_value_is_not_dropped_twice() {
        let dropped = Arc::new(AtomicUsize::new(0));

        let detached: Weak<dyn ReleaseInstance<Counted>> = Weak::<Detached>::new();
        let data = InstanceData::new(
            Counted(Arc::clone(&dropped)),
            InstanceId::random(),
            AssetId::default(),
            AssetType::from_name("Texture"),
            detached,
        );
        data.set_use_count(0);

        let value = data.try_retire().expect("count is zero");
        drop(data);
        assert_eq!(dropped.load(Ordering::SeqCst), 0, "the slot no longer owns the value");

        drop(value);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unretired_slot_drops_its_value() {
        let dropped = Arc::new(AtomicUsize::new(0));
        let flag = Arc::clone(&dropped);

        let detached: Weak<dyn ReleaseInstance<Counted>> = Weak::<Detached>::new();
        drop(Instance::from_acquired(Arc::new(InstanceData::new(
            Counted(flag),
            InstanceId::random(),
            AssetId::default(),
            AssetType::from_name("Texture"),
            detached,
        ))));

        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_shows_identity() {
        let a = detached(3);
        let text = format!("{a:?}");

        assert!(text.contains("use_count: 1"), "{text}");
        assert!(text.contains("value: 3"), "{text}");
    }
}
