// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! One database per instance type, shared by the subsystems that are handed the registry.

use std::any::{Any, TypeId, type_name};
use std::fmt;

use hashbrown::HashMap;
use hashbrown::hash_map::Entry;
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{Error, InstanceDatabase, InstanceDatabaseBuilder, Result, TeardownReport};

/// Holds at most one [`InstanceDatabase`] per instance type.
///
/// The system that owns a kind of instance creates its database here at startup and destroys it at
/// shutdown. Every other subsystem that needs the database is handed the registry, typically as an
/// `Arc<DatabaseRegistry>`, and looks the database up by type.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use instance_db::{AssetType, DatabaseRegistry, InstanceDatabase};
///
/// struct Shader;
///
/// let registry = Arc::new(DatabaseRegistry::new());
/// registry.create(InstanceDatabase::<Shader>::builder(AssetType::from_name("ShaderAsset")))?;
///
/// assert!(registry.is_ready::<Shader>());
/// let shaders = registry.get::<Shader>()?;
/// assert!(shaders.is_empty());
///
/// let report = registry.destroy::<Shader>()?;
/// assert!(report.is_clean());
/// assert!(!registry.is_ready::<Shader>());
/// # Ok::<(), instance_db::Error>(())
/// ```
#[derive(Default)]
pub struct DatabaseRegistry {
    databases: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl DatabaseRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the database for `T` and registers it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatabaseAlreadyCreated`] if a database for `T` is already registered; the
    /// existing database is kept. Returns any error from [`InstanceDatabaseBuilder::build`].
    pub fn create<T>(&self, builder: InstanceDatabaseBuilder<T>) -> Result<InstanceDatabase<T>>
    where
        T: Send + Sync + 'static,
    {
        match self.databases.write().entry(TypeId::of::<T>()) {
            Entry::Occupied(_) => {
                warn!(instance_type = type_name::<T>(), "an instance database for this type already exists");
                Err(Error::DatabaseAlreadyCreated(type_name::<T>()))
            }
            Entry::Vacant(slot) => {
                let database = builder.build()?;
                slot.insert(Box::new(database.clone()));
                debug!(database = database.name(), "created instance database");
                Ok(database)
            }
        }
    }

    /// Returns the database for `T`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatabaseNotCreated`] if no database for `T` is registered.
    pub fn get<T>(&self) -> Result<InstanceDatabase<T>>
    where
        T: Send + Sync + 'static,
    {
        self.databases
            .read()
            .get(&TypeId::of::<T>())
            .and_then(|database| database.downcast_ref::<InstanceDatabase<T>>())
            .cloned()
            .ok_or(Error::DatabaseNotCreated(type_name::<T>()))
    }

    /// Returns `true` if a database for `T` is registered.
    #[must_use]
    pub fn is_ready<T>(&self) -> bool
    where
        T: Send + Sync + 'static,
    {
        self.databases.read().contains_key(&TypeId::of::<T>())
    }

    /// Unregisters the database for `T` and tears it down.
    ///
    /// Clones of the database obtained earlier remain usable, but the instances resident at this
    /// point are reported as leaked and forgotten.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DatabaseNotCreated`] if no database for `T` is registered.
    pub fn destroy<T>(&self) -> Result<TeardownReport>
    where
        T: Send + Sync + 'static,
    {
        let database = self
            .databases
            .write()
            .remove(&TypeId::of::<T>())
            .and_then(|database| database.downcast::<InstanceDatabase<T>>().ok())
            .ok_or(Error::DatabaseNotCreated(type_name::<T>()))?;

        let report = database.teardown();
        debug!(database = report.database(), leaked = report.leaked().len(), "destroyed instance database");
        Ok(report)
    }

    /// Returns the number of registered databases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.databases.read().len()
    }

    /// Returns `true` if no database is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for DatabaseRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseRegistry").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::testing::{Fixture, TEXTURE, texture};
    use crate::{Asset, InstanceHandler, InstanceId};

    #[test]
    fn thread_safe_type() {
        assert_impl_all!(DatabaseRegistry: Send, Sync);
    }

    #[test]
    fn second_create_keeps_the_first_database() {
        let registry = DatabaseRegistry::new();
        let fixture = Fixture::new();

        let first = registry.create(fixture.builder()).unwrap();
        let err = registry
            .create(InstanceDatabase::<u32>::builder(TEXTURE).name("other"))
            .expect_err("one database per type");

        assert!(matches!(err, Error::DatabaseAlreadyCreated(name) if name == "u32"));
        assert_eq!(registry.get::<u32>().unwrap().name(), first.name());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn lookup_before_creation_fails() {
        let registry = DatabaseRegistry::new();

        assert!(!registry.is_ready::<u32>());
        assert!(matches!(registry.get::<u32>(), Err(Error::DatabaseNotCreated(_))));
        assert!(matches!(registry.destroy::<u32>(), Err(Error::DatabaseNotCreated(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn databases_are_keyed_by_instance_type() {
        let registry = DatabaseRegistry::new();
        registry.create(InstanceDatabase::<u32>::builder(TEXTURE)).unwrap();
        registry.create(InstanceDatabase::<String>::builder(TEXTURE)).unwrap();

        assert!(registry.is_ready::<u32>());
        assert!(registry.is_ready::<String>());
        assert!(!registry.is_ready::<u64>());
        assert!(format!("{registry:?}").contains("len: 2"));
    }

    #[test]
    fn destroy_reports_leaks_and_unregisters() {
        let registry = DatabaseRegistry::new();
        let fixture = Fixture::new();
        let db = registry.create(fixture.builder()).unwrap();
        let id = InstanceId::from_name("left behind");
        let instance = db.find_or_create(id, &texture(3)).unwrap();

        let report = registry.destroy::<u32>().unwrap();

        assert_eq!(report.leaked(), &[id]);
        assert!(!registry.is_ready::<u32>());
        assert!(db.is_empty());
        drop(instance);

        // The slot is free again.
        registry.create(fixture.builder()).unwrap();
    }

    #[test]
    fn shared_across_threads() {
        let registry = Arc::new(DatabaseRegistry::new());
        registry
            .create(InstanceDatabase::<u32>::builder(TEXTURE).handler(
                TEXTURE,
                InstanceHandler::new(|asset: &Asset| asset.get::<crate::testing::TestTexture>().map(|t| t.value)),
            ))
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get::<u32>().unwrap().find_or_create_from_asset(&texture(5)).unwrap())
            })
            .collect();
        let instances: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

        assert!(instances.iter().all(|instance| instance == &instances[0]));
        assert_eq!(*instances[0], 5);
        assert_eq!(registry.get::<u32>().unwrap().len(), 1);
    }
}
