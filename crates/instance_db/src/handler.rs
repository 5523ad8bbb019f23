// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-asset-type creation and destruction of instances.

use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use parking_lot::RwLock;

use crate::{Asset, AssetType, Error, Result};

type CreateFn<T> = dyn Fn(&Asset) -> Option<T> + Send + Sync;
type DestroyFn<T> = dyn Fn(T) + Send + Sync;

/// Creates and destroys instances of `T` for one asset type.
///
/// The create function receives a loaded [`Asset`] and returns the new instance, or `None` if
/// it cannot create one. It runs while the database holds its exclusive table lock, so it must
/// be quick and must not call back into the same database.
///
/// The destroy function receives the instance once the last [`Instance`][crate::Instance] handle
/// to it is gone. By default the instance is dropped; override it to return instances to a pool.
/// It runs under the same lock and carries the same restrictions.
///
/// Cloning a handler is cheap: both functions are reference counted.
///
/// # Examples
///
/// ```
/// use instance_db::{Asset, InstanceHandler};
///
/// struct Material {
///     name: String,
/// }
///
/// let handler = InstanceHandler::new(|_asset: &Asset| Some(Material { name: "default".into() }))
///     .with_destroy(|material: Material| println!("recycling {}", material.name));
/// # drop(handler);
/// ```
pub struct InstanceHandler<T> {
    create: Arc<CreateFn<T>>,
    destroy: Arc<DestroyFn<T>>,
}

impl<T: 'static> InstanceHandler<T> {
    /// Creates a handler with the given create function and the default destroy function.
    pub fn new(create: impl Fn(&Asset) -> Option<T> + Send + Sync + 'static) -> Self {
        Self {
            create: Arc::new(create),
            destroy: Arc::new(drop::<T>),
        }
    }

    /// Replaces the destroy function.
    #[must_use]
    pub fn with_destroy(mut self, destroy: impl Fn(T) + Send + Sync + 'static) -> Self {
        self.destroy = Arc::new(destroy);
        self
    }
}

impl<T> InstanceHandler<T> {
    pub(crate) fn create(&self, asset: &Asset) -> Option<T> {
        (self.create)(asset)
    }

    pub(crate) fn destroy(&self, instance: T) {
        (self.destroy)(instance);
    }
}

impl<T> Clone for InstanceHandler<T> {
    fn clone(&self) -> Self {
        Self {
            create: Arc::clone(&self.create),
            destroy: Arc::clone(&self.destroy),
        }
    }
}

impl<T> fmt::Debug for InstanceHandler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceHandler").finish_non_exhaustive()
    }
}

/// Maps asset types to the handler that creates their instances.
///
/// Guarded by its own lock, separate from the instance table: lookups happen on every creation
/// while registration is rare. Lookups copy the handler out so the lock is never held while a
/// create or destroy function runs.
pub(crate) struct HandlerRegistry<T> {
    handlers: RwLock<HashMap<AssetType, InstanceHandler<T>>>,
}

impl<T> HandlerRegistry<T> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `handler` for `asset_type`. An existing registration is left untouched.
    pub fn register(&self, asset_type: AssetType, handler: InstanceHandler<T>) -> Result<()> {
        match self.handlers.write().entry(asset_type) {
            Entry::Occupied(_) => Err(Error::HandlerAlreadyRegistered(asset_type)),
            Entry::Vacant(slot) => {
                slot.insert(handler);
                Ok(())
            }
        }
    }

    /// Returns `true` if a handler was removed.
    pub fn unregister(&self, asset_type: AssetType) -> bool {
        self.handlers.write().remove(&asset_type).is_some()
    }

    pub fn lookup(&self, asset_type: AssetType) -> Option<InstanceHandler<T>> {
        self.handlers.read().get(&asset_type).cloned()
    }

    pub fn contains(&self, asset_type: AssetType) -> bool {
        self.handlers.read().contains_key(&asset_type)
    }
}

impl<T> fmt::Debug for HandlerRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("len", &self.handlers.read().len())
            .finish()
    }
}
