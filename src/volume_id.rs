//! Volume identifier codec.
//!
//! A volume handle is the disk's zone and name joined by `/`. The codec
//! performs no escaping: zone and name must not themselves contain the
//! separator, otherwise decoding is ambiguous. This constraint is
//! documented rather than enforced on encode.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const SEPARATOR: char = '/';

/// Zone and name of a cloud disk.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct VolumeKey {
    /// Zone the disk lives in.
    pub zone: String,
    /// Disk name, unique within the zone.
    pub name: String,
}

/// Errors raised while decoding identifiers.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VolumeIdError {
    /// The identifier does not have the `zone/name` structure.
    #[error("malformed volume identifier {id:?}: expected <zone>/<name>")]
    Malformed {
        /// Identifier as received from the caller.
        id: String,
    },
    /// The node identifier does not name an instance.
    #[error("malformed node identifier {id:?}")]
    MalformedNode {
        /// Identifier as received from the caller.
        id: String,
    },
}

impl VolumeKey {
    /// Creates a key from a zone and a name.
    #[must_use]
    pub fn new(zone: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            name: name.into(),
        }
    }

    /// Encodes the key into its opaque identifier form.
    #[must_use]
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decodes an identifier produced by [`VolumeKey::encode`].
    ///
    /// # Errors
    ///
    /// Returns [`VolumeIdError::Malformed`] unless the identifier consists
    /// of exactly two non-empty parts separated by `/`.
    pub fn decode(id: &str) -> Result<Self, VolumeIdError> {
        let malformed = || VolumeIdError::Malformed { id: id.to_owned() };
        let mut parts = id.split(SEPARATOR);
        let (Some(zone), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed());
        };
        if zone.is_empty() || name.is_empty() {
            return Err(malformed());
        }
        Ok(Self::new(zone, name))
    }

    /// Device name under which the disk is attached to an instance.
    #[must_use]
    pub fn device_name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for VolumeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.zone, self.name)
    }
}

/// Builds the node identifier reported by `NodeGetInfo`.
#[must_use]
pub fn node_id(project: &str, zone: &str, instance: &str) -> String {
    format!("projects/{project}/zones/{zone}/instances/{instance}")
}

/// Extracts the instance name from a node identifier.
///
/// Accepts both the full `projects/<p>/zones/<z>/instances/<n>` form and a
/// bare instance name.
///
/// # Errors
///
/// Returns [`VolumeIdError::MalformedNode`] when the identifier is empty or
/// has a path shape other than the two accepted forms.
pub fn instance_name_from_node_id(id: &str) -> Result<&str, VolumeIdError> {
    let malformed = || VolumeIdError::MalformedNode { id: id.to_owned() };
    let parts: Vec<&str> = id.split(SEPARATOR).collect();
    match parts.as_slice() {
        [name] if !name.is_empty() => Ok(*name),
        ["projects", _, "zones", _, "instances", name] if !name.is_empty() => Ok(*name),
        _ => Err(malformed()),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn encode_joins_zone_and_name() {
        let key = VolumeKey::new("zone-a", "d1");
        assert_eq!(key.encode(), "zone-a/d1");
    }

    #[rstest]
    #[case("us-central1-c", "pvc-1234")]
    #[case("z", "n")]
    #[case("europe-west4-b", "disk.with.dots")]
    fn decode_reverses_encode(#[case] zone: &str, #[case] name: &str) {
        let key = VolumeKey::new(zone, name);
        let decoded = VolumeKey::decode(&key.encode())
            .unwrap_or_else(|err| panic!("decode {key}: {err}"));
        assert_eq!(decoded, key);
    }

    #[rstest]
    #[case("")]
    #[case("no-separator")]
    #[case("/name")]
    #[case("zone/")]
    #[case("a/b/c")]
    fn decode_rejects_malformed(#[case] id: &str) {
        assert_eq!(
            VolumeKey::decode(id),
            Err(VolumeIdError::Malformed { id: id.to_owned() })
        );
    }

    #[rstest]
    #[case("projects/p/zones/z/instances/node-1", "node-1")]
    #[case("node-1", "node-1")]
    fn instance_name_accepts_both_forms(#[case] id: &str, #[case] expected: &str) {
        assert_eq!(instance_name_from_node_id(id), Ok(expected));
    }

    #[rstest]
    #[case("")]
    #[case("zones/z/instances/n")]
    #[case("projects/p/zones/z/instances/")]
    fn instance_name_rejects_other_shapes(#[case] id: &str) {
        assert!(instance_name_from_node_id(id).is_err());
    }

    #[test]
    fn node_id_round_trips_through_instance_name() {
        let id = node_id("proj", "zone-a", "n1");
        assert_eq!(id, "projects/proj/zones/zone-a/instances/n1");
        assert_eq!(instance_name_from_node_id(&id), Ok("n1"));
    }
}
