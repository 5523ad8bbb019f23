// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The end of an instance's life, coordinated between its handles and its database.
//!
//! When the live count of an instance drops from one to zero, the dropping handle calls
//! [`release`]. The database then takes its exclusive table lock and tries to move the count from
//! zero to the retiring sentinel. That compare-exchange is what resolves the race with a
//! concurrent lookup: a lookup that re-acquired the instance in the meantime made the count
//! non-zero, so the exchange fails and the instance lives on. Only the caller whose exchange
//! succeeds removes the entry, so an instance is never destroyed twice.
//!
//! The winning exchange also moves the value out of the slot, and the destroy function runs
//! before the lock is released. A replacement for the same id can therefore only be created once
//! the previous instance has been destroyed, even while other threads still hold references to the
//! emptied slot.

use std::sync::Arc;

use tracing::debug;

use crate::database::DatabaseCore;
use crate::instance::InstanceData;
use crate::{Error, validation};

/// The database side of the release protocol.
pub(crate) trait ReleaseInstance<T>: Send + Sync {
    /// Called with the reference of a handle whose drop took the live count from one to zero.
    fn release_instance(&self, data: Arc<InstanceData<T>>);
}

/// Entry point for the handle that dropped the live count to zero.
pub(crate) fn release<T>(data: Arc<InstanceData<T>>) {
    // Without a database the value is simply dropped with the last reference.
    if let Some(database) = data.database().upgrade() {
        database.release_instance(data);
    }
}

impl<T> ReleaseInstance<T> for DatabaseCore<T>
where
    T: Send + Sync + 'static,
{
    fn release_instance(&self, data: Arc<InstanceData<T>>) {
        let mut table = self.table.write();

        if let Some(value) = table.retire(&data) {
            debug!(database = self.name, instance_id = %data.id(), "retired instance");
            self.destroy_locked(&data, value);
        }

        drop(table);
    }
}

impl<T> DatabaseCore<T>
where
    T: Send + Sync + 'static,
{
    /// Must be called with the exclusive table lock held.
    fn destroy_locked(&self, data: &InstanceData<T>, value: T) {
        let asset_type = data.asset_type();

        if let Some(handler) = self.handlers.lookup(asset_type) {
            handler.destroy(value);
            return;
        }

        // The handler that created this instance has been removed since.
        let instance_id = data.id();
        let error = validation::configuration_error(self.validation, self.name, Error::NoHandler(asset_type));
        tracing::error!(database = self.name, %instance_id, %error, "cannot destroy instance, dropping it instead");
        drop(value);
    }
}
