// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

use crate::{AssetId, AssetType};

/// A specialized `Result` type for instance database operations
/// that return an instance database [`Error`][enum@Error] on failure.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by an [`AssetLoader`][crate::AssetLoader].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// An error originating in the instance database.
///
/// Every failed lookup or creation is reported through this type rather than by unwinding. The
/// variants fall into three groups:
///
/// * Configuration errors ([`AssetTypeOutsideDomain`][Self::AssetTypeOutsideDomain],
///   [`NoHandler`][Self::NoHandler], [`HandlerAlreadyRegistered`][Self::HandlerAlreadyRegistered]).
///   These indicate a programming mistake. Under [`ValidationLevel::Strict`][crate::ValidationLevel::Strict]
///   they panic instead of being returned.
/// * Transient failures ([`AssetLoad`][Self::AssetLoad], [`CreationFailed`][Self::CreationFailed]).
///   The caller may retry.
/// * Lifecycle errors of the [`DatabaseRegistry`][crate::DatabaseRegistry].
///
/// Future versions may add additional enum variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The instance id is the nil id, which never resolves to an instance.
    #[error("the instance id is not valid")]
    InvalidId,

    /// The asset was not loaded and the blocking load failed.
    #[error("failed to load asset {asset_id}")]
    AssetLoad {
        /// The asset that failed to load.
        asset_id: AssetId,
        /// Why the loader gave up.
        #[source]
        source: BoxError,
    },

    /// A handler exists for an asset type that does not derive from the database's base asset type.
    #[error("a handler was added for asset type {asset_type}, which is not a subtype of the base asset type {base_asset_type}")]
    AssetTypeOutsideDomain {
        /// The offending asset type.
        asset_type: AssetType,
        /// The base asset type the database was created with.
        base_asset_type: AssetType,
    },

    /// No handler is registered for the asset type.
    #[error("no instance handler found for asset type {0}")]
    NoHandler(AssetType),

    /// A handler is already registered for the asset type.
    #[error("an instance handler already exists for asset type {0}")]
    HandlerAlreadyRegistered(AssetType),

    /// The handler's create function did not produce an instance.
    #[error("the instance handler for asset type {0} did not create an instance")]
    CreationFailed(AssetType),

    /// A database for the instance type is already registered.
    #[error("an instance database for {0} already exists")]
    DatabaseAlreadyCreated(&'static str),

    /// No database for the instance type is registered.
    #[error("no instance database for {0} has been created")]
    DatabaseNotCreated(&'static str),
}

impl Error {
    /// Returns `true` for errors caused by a misconfigured database rather than by the data.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::AssetTypeOutsideDomain { .. } | Self::NoHandler(_) | Self::HandlerAlreadyRegistered(_)
        )
    }
}
