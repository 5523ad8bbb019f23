// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! How strictly a database checks its configuration and the assets it is given.

use tracing::{error, warn};

use crate::{AssetId, Error, Instance};

/// Selects how a database reacts to misconfiguration and inconsistent requests.
///
/// | Level | Asset identity mismatch | Configuration error |
/// | :--- | :--- | :--- |
/// | `Off` | not checked | logged and returned |
/// | `Warn` | logged as a warning | logged and returned |
/// | `Strict` | logged as an error | panics |
///
/// An asset identity mismatch never prevents the existing instance from being returned: for an
/// id that is already resident, the database always hands out the instance created first.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ValidationLevel {
    /// Skip consistency checks.
    Off,
    /// Report problems through logging only.
    #[default]
    Warn,
    /// Treat configuration errors as assertions.
    Strict,
}

impl ValidationLevel {
    /// Returns `true` if requests are checked for a consistent originating asset.
    #[must_use]
    pub const fn checks_asset_identity(self) -> bool {
        !matches!(self, Self::Off)
    }

    /// Returns `true` if configuration errors panic.
    #[must_use]
    pub const fn is_strict(self) -> bool {
        matches!(self, Self::Strict)
    }
}

/// Reports a configuration error and hands it back for returning to the caller.
///
/// Under [`ValidationLevel::Strict`] this panics, unless the thread is already unwinding.
#[expect(clippy::panic, reason = "strict validation turns configuration errors into assertions")]
pub(crate) fn configuration_error(level: ValidationLevel, database: &str, error: Error) -> Error {
    error!(database, %error, "instance database is misconfigured");

    if level.is_strict() && !std::thread::panicking() {
        panic!("instance database {database} is misconfigured: {error}");
    }

    error
}

/// Reports a resident instance that was created from a different asset than the caller asked with.
pub(crate) fn check_same_asset<T>(level: ValidationLevel, database: &str, instance: &Instance<T>, requested: AssetId) {
    if !level.checks_asset_identity() || instance.asset_id() == requested {
        return;
    }

    let instance_id = instance.id();
    let created_from = instance.asset_id();

    if level.is_strict() {
        error!(
            database,
            %instance_id,
            %created_from,
            %requested,
            "instance was found but was created from a different asset; acquire an id with the same asset every time"
        );
    } else {
        warn!(
            database,
            %instance_id,
            %created_from,
            %requested,
            "instance was found but was created from a different asset; acquire an id with the same asset every time"
        );
    }
}
