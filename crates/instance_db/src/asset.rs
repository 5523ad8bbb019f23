// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The asset-side collaborators of the database.
//!
//! The database does not load or describe assets itself. It consumes three things from the
//! surrounding asset system:
//!
//! * asset payloads, exposed through [`AssetData`] and referenced through [`Asset`];
//! * an [`AssetLoader`] that can load a payload on demand, blocking the calling thread;
//! * a [`TypeHierarchy`] that answers whether one asset type derives from another.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use hashbrown::HashMap;
use uuid::Uuid;

use crate::BoxError;

/// Identifies an asset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetId {
    guid: Uuid,
    sub_id: u32,
}

impl AssetId {
    /// Creates an asset id.
    #[must_use]
    pub const fn new(guid: Uuid, sub_id: u32) -> Self {
        Self { guid, sub_id }
    }

    /// Returns `false` for the nil id.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.guid.is_nil()
    }

    /// The guid part of the id.
    #[must_use]
    pub const fn guid(&self) -> Uuid {
        self.guid
    }

    /// The sub id part of the id.
    #[must_use]
    pub const fn sub_id(&self) -> u32 {
        self.sub_id
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.guid.braced(), self.sub_id)
    }
}

/// Describes the runtime type of an asset.
///
/// Asset types are compared by value and used as keys when registering
/// [`InstanceHandler`][crate::InstanceHandler]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssetType(Uuid);

impl AssetType {
    /// Creates an asset type from its uuid.
    #[must_use]
    pub const fn new(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates an asset type from a compile-time constant.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    /// Creates an asset type by hashing its name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::nil(), name.as_bytes()))
    }

    /// The uuid of the type.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for AssetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0.braced(), f)
    }
}

/// A loaded asset payload.
///
/// Implemented by every concrete asset type that instances can be created from. Create functions
/// recover the concrete payload with [`downcast_ref`][dyn AssetData::downcast_ref].
pub trait AssetData: Any + Send + Sync {
    /// The id of the asset this payload was loaded for.
    fn asset_id(&self) -> AssetId;

    /// The concrete runtime type of the payload.
    fn asset_type(&self) -> AssetType;
}

impl dyn AssetData {
    /// Returns the payload as `A` if that is its concrete type.
    #[must_use]
    pub fn downcast_ref<A: AssetData>(&self) -> Option<&A> {
        let any: &dyn Any = self;
        any.downcast_ref()
    }
}

/// A reference to an asset that may or may not be loaded yet.
///
/// Cloning an `Asset` is cheap and shares the payload.
#[derive(Clone)]
pub struct Asset {
    id: AssetId,
    asset_type: AssetType,
    data: Option<Arc<dyn AssetData>>,
}

impl Asset {
    /// References an asset that has not been loaded.
    #[must_use]
    pub const fn pending(id: AssetId, asset_type: AssetType) -> Self {
        Self {
            id,
            asset_type,
            data: None,
        }
    }

    /// References a loaded asset.
    #[must_use]
    pub fn ready(data: Arc<dyn AssetData>) -> Self {
        Self {
            id: data.asset_id(),
            asset_type: data.asset_type(),
            data: Some(data),
        }
    }

    /// The id of the asset.
    #[must_use]
    pub const fn id(&self) -> AssetId {
        self.id
    }

    /// The type of the asset: the runtime type of the payload once loaded, the declared type before that.
    #[must_use]
    pub const fn asset_type(&self) -> AssetType {
        self.asset_type
    }

    /// Returns `true` if the payload is available.
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.data.is_some()
    }

    /// The payload, if loaded.
    #[must_use]
    pub fn data(&self) -> Option<&Arc<dyn AssetData>> {
        self.data.as_ref()
    }

    /// The payload as a concrete asset type, if loaded and of that type.
    #[must_use]
    pub fn get<A: AssetData>(&self) -> Option<&A> {
        self.data.as_deref().and_then(|data| data.downcast_ref::<A>())
    }
}

impl fmt::Debug for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Asset")
            .field("id", &self.id)
            .field("asset_type", &self.asset_type)
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Loads asset payloads on behalf of the database.
///
/// The database only calls the loader when an instance must be created from an asset that is not
/// loaded yet. The call happens with no database lock held.
pub trait AssetLoader: Send + Sync {
    /// Loads the asset, blocking the calling thread until the payload is available.
    ///
    /// # Errors
    ///
    /// Returns an error if the asset cannot be loaded.
    fn load_blocking(&self, id: AssetId, asset_type: AssetType) -> Result<Arc<dyn AssetData>, BoxError>;
}

/// An [`AssetLoader`] that cannot load anything.
///
/// Used by databases that only ever receive assets which are already loaded.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoAssetLoader;

impl AssetLoader for NoAssetLoader {
    fn load_blocking(&self, id: AssetId, _asset_type: AssetType) -> Result<Arc<dyn AssetData>, BoxError> {
        Err(format!("no asset loader is configured to load asset {id}").into())
    }
}

/// Answers subtype queries between asset types.
pub trait TypeHierarchy: Send + Sync {
    /// Returns `true` if `candidate` is `base` or derives from it.
    fn is_subtype_of(&self, candidate: AssetType, base: AssetType) -> bool;
}

/// A [`TypeHierarchy`] built from explicit child-to-parent edges.
///
/// Every type is a subtype of itself. Types without a registered parent are roots.
///
/// ```
/// use instance_db::{AssetType, AssetTypeTree, TypeHierarchy};
///
/// let image = AssetType::from_name("Image");
/// let streaming = AssetType::from_name("StreamingImage");
/// let tree = AssetTypeTree::new().with_parent(streaming, image);
///
/// assert!(tree.is_subtype_of(streaming, image));
/// assert!(!tree.is_subtype_of(image, streaming));
/// ```
#[derive(Clone, Debug, Default)]
pub struct AssetTypeTree {
    parents: HashMap<AssetType, AssetType>,
}

impl AssetTypeTree {
    /// Creates a tree in which every type is a root.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `child` derives directly from `parent`, replacing any earlier parent.
    #[must_use]
    pub fn with_parent(mut self, child: AssetType, parent: AssetType) -> Self {
        self.insert(child, parent);
        self
    }

    /// Records that `child` derives directly from `parent`, replacing any earlier parent.
    pub fn insert(&mut self, child: AssetType, parent: AssetType) {
        self.parents.insert(child, parent);
    }

    /// The direct parent of `asset_type`, if any.
    #[must_use]
    pub fn parent(&self, asset_type: AssetType) -> Option<AssetType> {
        self.parents.get(&asset_type).copied()
    }
}

impl TypeHierarchy for AssetTypeTree {
    fn is_subtype_of(&self, candidate: AssetType, base: AssetType) -> bool {
        let mut current = candidate;

        // Bounded by the number of edges so a cyclic tree cannot spin forever.
        for _ in 0..=self.parents.len() {
            if current == base {
                return true;
            }

            match self.parent(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }

        false
    }
}
