//! Zone selection from accessibility requirements.

use rand::Rng;
use thiserror::Error;

use crate::types::{Topology, TopologyRequirement};

/// The only topology segment key the driver understands.
pub const TOPOLOGY_KEY_ZONE: &str = "topology.gke.io/zone";

/// Errors raised while extracting a zone from topology input.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TopologyError {
    /// A segment used a key other than [`TOPOLOGY_KEY_ZONE`].
    #[error("topology segment has unknown key {key:?}")]
    UnknownKey {
        /// Offending key.
        key: String,
    },
    /// The topology carried no zone value.
    #[error("topology specified but no zone found in its segments")]
    MissingZone,
    /// Accessibility was requested without any topology.
    #[error("accessibility requirements specified but no requisite or preferred topologies")]
    Empty,
}

/// Extracts the zone named by a single topology.
///
/// # Errors
///
/// Returns [`TopologyError::UnknownKey`] for any key other than the zone key
/// and [`TopologyError::MissingZone`] when no non-empty zone is present.
pub fn zone_from_topology(topology: &Topology) -> Result<&str, TopologyError> {
    let mut zone = None;
    for (key, value) in &topology.segments {
        if key != TOPOLOGY_KEY_ZONE {
            return Err(TopologyError::UnknownKey { key: key.clone() });
        }
        zone = Some(value.as_str());
    }
    zone.filter(|value| !value.is_empty())
        .ok_or(TopologyError::MissingZone)
}

/// Picks the zone a new volume should be created in.
///
/// The first preferred topology always wins. Without preferences a
/// requisite topology is drawn uniformly at random from `rng`.
///
/// # Errors
///
/// Returns [`TopologyError::Empty`] when neither list has entries, or the
/// error of [`zone_from_topology`] for the chosen entry.
pub fn pick_zone<R: Rng + ?Sized>(
    requirement: &TopologyRequirement,
    rng: &mut R,
) -> Result<String, TopologyError> {
    let chosen = if let Some(first) = requirement.preferred.first() {
        first
    } else {
        if requirement.requisite.is_empty() {
            return Err(TopologyError::Empty);
        }
        let index = rng.gen_range(0..requirement.requisite.len());
        requirement
            .requisite
            .get(index)
            .ok_or(TopologyError::Empty)?
    };
    zone_from_topology(chosen).map(str::to_owned)
}

/// Topology descriptor for a single zone.
#[must_use]
pub fn zone_topology(zone: &str) -> Topology {
    Topology::single(TOPOLOGY_KEY_ZONE, zone)
}
