// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Deduplicated runtime instances created from assets.
//!
//! This crate provides [`InstanceDatabase`], a concurrent map from an [`InstanceId`] to at most one
//! live, reference-counted instance. Instances are created lazily from asset payloads by an
//! [`InstanceHandler`] registered per asset type, and destroyed as soon as the last [`Instance`]
//! handle to them is dropped. There is no eviction and no garbage collection: reclamation is
//! driven by handle counts alone and happens synchronously on the thread dropping the last handle.
//!
//! Typical uses are runtime objects that are expensive to build and cheap to share, such as GPU
//! images or compiled shaders, where every consumer of the same asset should share one object.
//!
//! # Identity
//!
//! An instance is stored under an [`InstanceId`], which is usually derived from the id of the
//! asset it is created from ([`InstanceDatabase::find_or_create_from_asset`]). Ids can also be
//! derived from a name, so several variants of an object can be created from one asset, or be
//! random ([`InstanceDatabase::create`]), which opts out of deduplication.
//!
//! # Concurrency
//!
//! | Operation | Lock | Notes |
//! | :--- | :--- | :--- |
//! | **Lookup of a resident instance** | shared | The common case once the database is warm. |
//! | **Asset load** | none | Blocks the calling thread only. |
//! | **Creation** | exclusive | Exactly one racing thread runs the create function. |
//! | **Destruction** | exclusive | Runs on the thread dropping the last handle. |
//! | **Handler registration** | separate | Never contends with the instance table. |
//!
//! A lookup that races with the drop of an instance's last handle either revives the instance or
//! misses it and creates a new one; an instance is never handed out after its destruction has
//! started.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use instance_db::{Asset, AssetData, AssetId, AssetType, DatabaseRegistry, InstanceDatabase, InstanceHandler};
//! use uuid::Uuid;
//!
//! const MESH: AssetType = AssetType::from_u128(0x4d45_5348);
//!
//! struct MeshAsset {
//!     id: AssetId,
//!     vertices: Vec<[f32; 3]>,
//! }
//!
//! impl AssetData for MeshAsset {
//!     fn asset_id(&self) -> AssetId {
//!         self.id
//!     }
//!
//!     fn asset_type(&self) -> AssetType {
//!         MESH
//!     }
//! }
//!
//! struct GpuMesh {
//!     vertex_count: usize,
//! }
//!
//! // Created once at startup and handed to every subsystem that needs meshes.
//! let registry = Arc::new(DatabaseRegistry::new());
//! registry.create(
//!     InstanceDatabase::<GpuMesh>::builder(MESH).handler(
//!         MESH,
//!         InstanceHandler::new(|asset: &Asset| {
//!             let mesh = asset.get::<MeshAsset>()?;
//!             Some(GpuMesh { vertex_count: mesh.vertices.len() })
//!         }),
//!     ),
//! )?;
//!
//! let asset = Asset::ready(Arc::new(MeshAsset {
//!     id: AssetId::new(Uuid::from_u128(1), 0),
//!     vertices: vec![[0.0; 3]; 3],
//! }));
//!
//! let meshes = registry.get::<GpuMesh>()?;
//! let mesh = meshes.find_or_create_from_asset(&asset)?;
//! assert_eq!(mesh.vertex_count, 3);
//!
//! // Another subsystem asking for the same asset gets the same mesh.
//! let again = registry.get::<GpuMesh>()?.find_or_create_from_asset(&asset)?;
//! assert!(mesh == again);
//! assert_eq!(mesh.use_count(), 2);
//!
//! drop((mesh, again));
//! assert!(registry.destroy::<GpuMesh>()?.is_clean());
//! # Ok::<(), instance_db::Error>(())
//! ```
//!
//! # Diagnostics
//!
//! Events are emitted through [`tracing`]. Creations and retirements are logged at debug level,
//! suspicious requests as warnings and configuration errors, missing handlers at destruction time
//! and leaked instances as errors. How configuration errors are treated beyond logging is
//! controlled by the database's [`ValidationLevel`].

mod asset;
mod database;
mod error;
mod handler;
mod id;
mod instance;
mod lifecycle;
mod registry;
mod table;
mod validation;

pub use asset::{Asset, AssetData, AssetId, AssetLoader, AssetType, AssetTypeTree, NoAssetLoader, TypeHierarchy};
pub use database::{InstanceDatabase, InstanceDatabaseBuilder, TeardownReport};
pub use error::{BoxError, Error, Result};
pub use handler::InstanceHandler;
pub use id::InstanceId;
pub use instance::Instance;
pub use registry::DatabaseRegistry;
pub use validation::ValidationLevel;

#[cfg(test)]
mod testing;
