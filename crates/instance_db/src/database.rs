// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The instance database and its builder.

use std::fmt;
use std::sync::{Arc, Weak};

use tracing::{debug, error, warn};

use crate::handler::HandlerRegistry;
use crate::instance::InstanceData;
use crate::lifecycle::ReleaseInstance;
use crate::table::InstanceTable;
use crate::validation::{self, ValidationLevel};
use crate::{
    Asset, AssetLoader, AssetType, AssetTypeTree, Error, Instance, InstanceHandler, InstanceId, NoAssetLoader, Result,
    TypeHierarchy,
};

/// A database of deduplicated instances of `T`, keyed by [`InstanceId`].
///
/// For any id the database holds at most one live instance. The first request for an id creates
/// the instance from an asset using the [`InstanceHandler`] registered for that asset's type;
/// later requests for the same id return the same instance for as long as any [`Instance`] handle
/// to it is alive. When the last handle is dropped the instance is removed and handed to its
/// handler's destroy function.
///
/// The database does not own instances, the handles do. Handles that outlive the database simply
/// drop their value.
///
/// All assets an instance can be created from must derive from the database's base asset type.
/// One database can serve several concrete asset types by registering one handler per type.
///
/// Cloning the database is cheap and yields another reference to the same instances.
///
/// # Locking
///
/// Lookups of resident instances take a shared lock. Creation and destruction take an exclusive
/// lock and run the handler's create or destroy function while holding it, so those functions
/// must be fast and must not call back into the same database.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use instance_db::{Asset, AssetData, AssetId, AssetType, InstanceDatabase, InstanceHandler};
/// use uuid::Uuid;
///
/// const IMAGE: AssetType = AssetType::from_u128(0x1);
///
/// struct ImageAsset {
///     id: AssetId,
///     pixels: Vec<u8>,
/// }
///
/// impl AssetData for ImageAsset {
///     fn asset_id(&self) -> AssetId {
///         self.id
///     }
///
///     fn asset_type(&self) -> AssetType {
///         IMAGE
///     }
/// }
///
/// struct Image {
///     len: usize,
/// }
///
/// let db = InstanceDatabase::<Image>::builder(IMAGE)
///     .handler(IMAGE, InstanceHandler::new(|asset: &Asset| {
///         asset.get::<ImageAsset>().map(|image| Image { len: image.pixels.len() })
///     }))
///     .build()?;
///
/// let asset = Asset::ready(Arc::new(ImageAsset {
///     id: AssetId::new(Uuid::from_u128(7), 0),
///     pixels: vec![0; 16],
/// }));
///
/// let first = db.find_or_create_from_asset(&asset)?;
/// let second = db.find_or_create_from_asset(&asset)?;
///
/// assert!(first == second);
/// assert_eq!(second.len, 16);
/// assert_eq!(db.len(), 1);
///
/// drop((first, second));
/// assert!(db.is_empty());
/// # Ok::<(), instance_db::Error>(())
/// ```
pub struct InstanceDatabase<T> {
    core: Arc<DatabaseCore<T>>,
}

/// The shared state behind every clone of an [`InstanceDatabase`].
pub(crate) struct DatabaseCore<T> {
    pub(crate) name: &'static str,
    pub(crate) validation: ValidationLevel,
    pub(crate) handlers: HandlerRegistry<T>,
    pub(crate) table: InstanceTable<T>,
    base_asset_type: AssetType,
    loader: Arc<dyn AssetLoader>,
    hierarchy: Arc<dyn TypeHierarchy>,
    /// Stamped into every instance so its last handle can find its way back.
    this: Weak<dyn ReleaseInstance<T>>,
}

impl<T> InstanceDatabase<T>
where
    T: Send + Sync + 'static,
{
    /// Creates a builder for a database whose instances are created from assets deriving from
    /// `base_asset_type`.
    #[must_use]
    pub fn builder(base_asset_type: AssetType) -> InstanceDatabaseBuilder<T> {
        InstanceDatabaseBuilder::new(base_asset_type)
    }

    /// Returns the instance stored under `id`, if one is alive.
    ///
    /// Never creates an instance and never blocks on an asset load.
    #[must_use]
    pub fn find(&self, id: InstanceId) -> Option<Instance<T>> {
        if !id.is_valid() {
            return None;
        }

        self.core.table.find(&id)
    }

    /// Returns the instance stored under `id`, creating it from `asset` if there is none.
    ///
    /// If the asset is not loaded yet it is loaded through the database's [`AssetLoader`],
    /// blocking the calling thread. No lock is held while loading.
    ///
    /// When several threads race to create the same id, exactly one of them runs the create
    /// function and all of them receive the same instance.
    ///
    /// If an instance already exists for `id`, it is returned even if it was created from a
    /// different asset. The mismatch is reported according to the [`ValidationLevel`].
    ///
    /// # Errors
    ///
    /// * [`Error::InvalidId`] if `id` is the nil id.
    /// * [`Error::AssetLoad`] if the asset was not loaded and loading it failed.
    /// * [`Error::AssetTypeOutsideDomain`] if a handler is registered for the asset's type but
    ///   that type does not derive from the base asset type.
    /// * [`Error::NoHandler`] if no handler is registered for the asset's type.
    /// * [`Error::CreationFailed`] if the create function returned no instance.
    ///
    /// # Panics
    ///
    /// Under [`ValidationLevel::Strict`], configuration errors panic instead of being returned.
    pub fn find_or_create(&self, id: InstanceId, asset: &Asset) -> Result<Instance<T>> {
        self.core.find_or_create(id, asset)
    }

    /// Same as [`find_or_create`][Self::find_or_create] with the id derived from the asset id.
    ///
    /// # Errors
    ///
    /// See [`find_or_create`][Self::find_or_create].
    pub fn find_or_create_from_asset(&self, asset: &Asset) -> Result<Instance<T>> {
        self.core.find_or_create(InstanceId::from_asset_id(asset.id()), asset)
    }

    /// Creates a new instance from `asset` under a random id.
    ///
    /// Every call creates a distinct instance, even for the same asset.
    ///
    /// # Errors
    ///
    /// See [`find_or_create`][Self::find_or_create].
    pub fn create(&self, asset: &Asset) -> Result<Instance<T>> {
        self.core.find_or_create(InstanceId::random(), asset)
    }

    /// Registers `handler` to create and destroy instances for assets of `asset_type`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerAlreadyRegistered`] if `asset_type` already has a handler. The
    /// existing handler stays in effect.
    ///
    /// # Panics
    ///
    /// Under [`ValidationLevel::Strict`], a duplicate registration panics.
    pub fn add_handler(&self, asset_type: AssetType, handler: InstanceHandler<T>) -> Result<()> {
        self.core.add_handler(asset_type, handler)
    }

    /// Registers a handler built from `create` with the default destroy function.
    ///
    /// # Errors
    ///
    /// See [`add_handler`][Self::add_handler].
    pub fn add_handler_fn(&self, asset_type: AssetType, create: impl Fn(&Asset) -> Option<T> + Send + Sync + 'static) -> Result<()> {
        self.add_handler(asset_type, InstanceHandler::new(create))
    }

    /// Removes the handler for `asset_type`. Returns `true` if there was one.
    ///
    /// Resident instances created by the handler are not affected until they are destroyed, at
    /// which point the missing handler is reported and the instance is dropped.
    pub fn remove_handler(&self, asset_type: AssetType) -> bool {
        self.core.handlers.unregister(asset_type)
    }

    /// Returns `true` if a handler is registered for `asset_type`.
    #[must_use]
    pub fn has_handler(&self, asset_type: AssetType) -> bool {
        self.core.handlers.contains(asset_type)
    }

    /// Returns the number of resident instances.
    #[must_use]
    pub fn len(&self) -> usize {
        self.core.table.len()
    }

    /// Returns `true` if no instance is resident.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if an instance is resident under `id`.
    #[must_use]
    pub fn contains(&self, id: InstanceId) -> bool {
        self.core.table.contains(&id)
    }

    /// The asset type every instance's asset must derive from.
    #[must_use]
    pub fn base_asset_type(&self) -> AssetType {
        self.core.base_asset_type
    }

    /// How strictly the database validates its configuration and requests.
    #[must_use]
    pub fn validation(&self) -> ValidationLevel {
        self.core.validation
    }

    /// The label used for this database in diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.core.name
    }

    /// Forgets every resident instance and reports each one as leaked.
    ///
    /// Handles to forgotten instances stay usable. Their values are dropped with the last handle
    /// without going through the destroy function.
    ///
    /// The same report is produced when the last reference to the database is dropped.
    pub fn teardown(&self) -> TeardownReport {
        self.core.teardown()
    }
}

impl<T> Clone for InstanceDatabase<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> fmt::Debug for InstanceDatabase<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceDatabase")
            .field("name", &self.core.name)
            .field("base_asset_type", &self.core.base_asset_type)
            .field("validation", &self.core.validation)
            .field("handlers", &self.core.handlers)
            .field("table", &self.core.table)
            .finish_non_exhaustive()
    }
}

impl<T> DatabaseCore<T>
where
    T: Send + Sync + 'static,
{
    fn find_or_create(&self, id: InstanceId, asset: &Asset) -> Result<Instance<T>> {
        if !id.is_valid() {
            return Err(Error::InvalidId);
        }

        // Warm path: the instance usually exists already.
        if let Some(instance) = self.table.find(&id) {
            validation::check_same_asset(self.validation, self.name, &instance, asset.id());
            return Ok(instance);
        }

        let asset = self.load(asset)?;
        self.check_domain(&asset)?;

        let mut table = self.table.write();

        // Someone else may have created it while no lock was held.
        if let Some(instance) = table.find(&id) {
            drop(table);
            validation::check_same_asset(self.validation, self.name, &instance, asset.id());
            return Ok(instance);
        }

        let asset_type = asset.asset_type();
        let Some(handler) = self.handlers.lookup(asset_type) else {
            drop(table);
            return Err(self.missing_handler(asset_type));
        };

        let Some(value) = handler.create(&asset) else {
            drop(table);
            debug!(database = self.name, instance_id = %id, %asset_type, "instance handler did not create an instance");
            return Err(Error::CreationFailed(asset_type));
        };

        let asset_id = asset.id();
        let instance = table.insert(InstanceData::new(value, id, asset_id, asset_type, Weak::clone(&self.this)));
        drop(table);

        debug!(database = self.name, instance_id = %id, %asset_id, %asset_type, "created instance");
        Ok(instance)
    }

    /// Returns the asset with its payload loaded, loading it if needed.
    fn load(&self, asset: &Asset) -> Result<Asset> {
        if asset.is_ready() {
            return Ok(asset.clone());
        }

        let asset_id = asset.id();
        match self.loader.load_blocking(asset_id, asset.asset_type()) {
            Ok(data) => Ok(Asset::ready(data)),
            Err(source) => {
                warn!(database = self.name, %asset_id, error = %source, "failed to load asset");
                Err(Error::AssetLoad { asset_id, source })
            }
        }
    }

    /// Catches handlers bound to asset types outside the database's domain. This is the first
    /// point at which the payload's runtime type is known.
    fn check_domain(&self, asset: &Asset) -> Result<()> {
        let asset_type = asset.asset_type();

        if self.hierarchy.is_subtype_of(asset_type, self.base_asset_type) || !self.handlers.contains(asset_type) {
            return Ok(());
        }

        Err(validation::configuration_error(
            self.validation,
            self.name,
            Error::AssetTypeOutsideDomain {
                asset_type,
                base_asset_type: self.base_asset_type,
            },
        ))
    }

    fn missing_handler(&self, asset_type: AssetType) -> Error {
        let error = Error::NoHandler(asset_type);

        if self.validation.is_strict() {
            return validation::configuration_error(self.validation, self.name, error);
        }

        warn!(database = self.name, %asset_type, "no instance handler found for asset type");
        error
    }

    fn add_handler(&self, asset_type: AssetType, handler: InstanceHandler<T>) -> Result<()> {
        self.handlers
            .register(asset_type, handler)
            .map_err(|error| validation::configuration_error(self.validation, self.name, error))
    }
}

impl<T> DatabaseCore<T> {
    fn teardown(&self) -> TeardownReport {
        let leaked = self.table.drain();

        if !leaked.is_empty() {
            for instance_id in &leaked {
                error!(database = self.name, %instance_id, "leaked instance");
            }
            error!(database = self.name, leaked = leaked.len(), "instance database still has active references");
        }

        TeardownReport {
            database: self.name,
            leaked,
        }
    }
}

impl<T> Drop for DatabaseCore<T> {
    fn drop(&mut self) {
        let _report = self.teardown();
    }
}

/// What a database teardown found.
#[derive(Clone, Debug, PartialEq, Eq)]
#[must_use]
pub struct TeardownReport {
    database: &'static str,
    leaked: Vec<InstanceId>,
}

impl TeardownReport {
    /// The name of the database that was torn down.
    #[must_use]
    pub const fn database(&self) -> &'static str {
        self.database
    }

    /// The ids of instances that were still resident, in ascending order.
    #[must_use]
    pub fn leaked(&self) -> &[InstanceId] {
        &self.leaked
    }

    /// Returns `true` if nothing was leaked.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.leaked.is_empty()
    }
}

/// Builder for configuring an [`InstanceDatabase`].
///
/// Defaults:
/// - no handlers
/// - [`NoAssetLoader`]: only loaded assets can be turned into instances
/// - an empty [`AssetTypeTree`]: only the base asset type itself is in the database's domain
/// - [`ValidationLevel::Warn`]
/// - the name of `T` as the diagnostic name
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// use instance_db::{Asset, AssetType, AssetTypeTree, InstanceDatabase, InstanceHandler, ValidationLevel};
///
/// let image = AssetType::from_name("Image");
/// let streaming = AssetType::from_name("StreamingImage");
///
/// let db = InstanceDatabase::<u64>::builder(image)
///     .name("images")
///     .hierarchy(Arc::new(AssetTypeTree::new().with_parent(streaming, image)))
///     .handler(streaming, InstanceHandler::new(|_: &Asset| Some(0)))
///     .validation(ValidationLevel::Strict)
///     .build()?;
///
/// assert!(db.has_handler(streaming));
/// assert_eq!(db.name(), "images");
/// # Ok::<(), instance_db::Error>(())
/// ```
pub struct InstanceDatabaseBuilder<T> {
    base_asset_type: AssetType,
    name: Option<&'static str>,
    validation: ValidationLevel,
    loader: Arc<dyn AssetLoader>,
    hierarchy: Arc<dyn TypeHierarchy>,
    handlers: Vec<(AssetType, InstanceHandler<T>)>,
}

impl<T> InstanceDatabaseBuilder<T>
where
    T: Send + Sync + 'static,
{
    fn new(base_asset_type: AssetType) -> Self {
        Self {
            base_asset_type,
            name: None,
            validation: ValidationLevel::default(),
            loader: Arc::new(NoAssetLoader),
            hierarchy: Arc::new(AssetTypeTree::new()),
            handlers: Vec::new(),
        }
    }

    /// Registers a handler when the database is built.
    #[must_use]
    pub fn handler(mut self, asset_type: AssetType, handler: InstanceHandler<T>) -> Self {
        self.handlers.push((asset_type, handler));
        self
    }

    /// Sets the loader used for assets that are not loaded yet.
    #[must_use]
    pub fn loader(mut self, loader: Arc<dyn AssetLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Sets the hierarchy used to check that assets derive from the base asset type.
    #[must_use]
    pub fn hierarchy(mut self, hierarchy: Arc<dyn TypeHierarchy>) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    /// Sets the validation level.
    #[must_use]
    pub const fn validation(mut self, validation: ValidationLevel) -> Self {
        self.validation = validation;
        self
    }

    /// Sets the name used for the database in diagnostics.
    #[must_use]
    pub const fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    /// Builds the database.
    ///
    /// # Errors
    ///
    /// Returns [`Error::HandlerAlreadyRegistered`] if two handlers were given for the same asset type.
    ///
    /// # Panics
    ///
    /// Under [`ValidationLevel::Strict`], a duplicate handler panics.
    pub fn build(self) -> Result<InstanceDatabase<T>> {
        let core = Arc::new_cyclic(|this: &Weak<DatabaseCore<T>>| {
            let this: Weak<dyn ReleaseInstance<T>> = Weak::<DatabaseCore<T>>::clone(this);
            DatabaseCore {
                name: self.name.unwrap_or_else(std::any::type_name::<T>),
                validation: self.validation,
                handlers: HandlerRegistry::new(),
                table: InstanceTable::new(),
                base_asset_type: self.base_asset_type,
                loader: self.loader,
                hierarchy: self.hierarchy,
                this,
            }
        });

        for (asset_type, handler) in self.handlers {
            core.add_handler(asset_type, handler)?;
        }

        Ok(InstanceDatabase { core })
    }
}

impl<T> fmt::Debug for InstanceDatabaseBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceDatabaseBuilder")
            .field("base_asset_type", &self.base_asset_type)
            .field("name", &self.name)
            .field("validation", &self.validation)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}
