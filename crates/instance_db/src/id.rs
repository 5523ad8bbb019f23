// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Instance identities.

use std::fmt;

use uuid::Uuid;

use crate::AssetId;

/// Names a slot in an [`InstanceDatabase`][crate::InstanceDatabase].
///
/// An id is derived in one of three ways:
///
/// * from an asset id, so that the same asset always maps to the same instance
///   ([`from_asset_id`][Self::from_asset_id]);
/// * from a name or arbitrary bytes, hashed deterministically
///   ([`from_name`][Self::from_name], [`from_data`][Self::from_data]);
/// * randomly, producing an id that is never handed out twice ([`random`][Self::random]).
///
/// The default id is the nil id. It is not [valid][Self::is_valid] and never resolves to an instance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId {
    guid: Uuid,
    sub_id: u32,
}

impl InstanceId {
    /// Creates an id from an explicit guid and sub id.
    #[must_use]
    pub const fn from_guid(guid: Uuid, sub_id: u32) -> Self {
        Self { guid, sub_id }
    }

    /// Creates an id that maps one-to-one to the given asset.
    ///
    /// ```
    /// use instance_db::{AssetId, InstanceId};
    /// use uuid::Uuid;
    ///
    /// let asset_id = AssetId::new(Uuid::from_u128(7), 1);
    /// assert_eq!(InstanceId::from_asset_id(asset_id), InstanceId::from_asset_id(asset_id));
    /// ```
    #[must_use]
    pub const fn from_asset_id(asset_id: AssetId) -> Self {
        Self {
            guid: asset_id.guid(),
            sub_id: asset_id.sub_id(),
        }
    }

    /// Creates an id by hashing a human-readable name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self::from_data(name.as_bytes())
    }

    /// Creates an id by hashing arbitrary bytes.
    #[must_use]
    pub fn from_data(data: &[u8]) -> Self {
        Self {
            guid: Uuid::new_v5(&Uuid::nil(), data),
            sub_id: 0,
        }
    }

    /// Creates a new random id.
    #[must_use]
    pub fn random() -> Self {
        Self {
            guid: Uuid::new_v4(),
            sub_id: 0,
        }
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

impl From<AssetId> for InstanceId {
    fn from(asset_id: AssetId) -> Self {
        Self::from_asset_id(asset_id)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.guid.braced(), self.sub_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_invalid() {
        assert!(!InstanceId::default().is_valid());
        assert!(InstanceId::from_guid(Uuid::nil(), 3).guid().is_nil());
        assert!(!InstanceId::from_guid(Uuid::nil(), 3).is_valid());
    }

    #[test]
    fn asset_id_maps_one_to_one() {
        let asset_id = AssetId::new(Uuid::from_u128(0xabc), 4);
        let id = InstanceId::from(asset_id);

        assert_eq!(id.guid(), asset_id.guid());
        assert_eq!(id.sub_id(), 4);
        assert_ne!(id, InstanceId::from_asset_id(AssetId::new(Uuid::from_u128(0xabc), 5)));
    }

    #[test]
    fn names_hash_deterministically() {
        assert_eq!(InstanceId::from_name("HelloWorld"), InstanceId::from_name("HelloWorld"));
        assert_ne!(InstanceId::from_name("HelloWorld"), InstanceId::from_name("helloworld"));
        assert_eq!(InstanceId::from_name("abc"), InstanceId::from_data(b"abc"));
        assert!(InstanceId::from_name("").is_valid());
    }

    #[test]
    fn random_ids_are_unique() {
        let a = InstanceId::random();
        let b = InstanceId::random();

        assert!(a.is_valid());
        assert_ne!(a, b);
    }

    #[test]
    fn display_includes_both_parts() {
        let id = InstanceId::from_guid(Uuid::from_u128(1), 9);
        assert_eq!(id.to_string(), "{00000000-0000-0000-0000-000000000001}:9");
    }
}
