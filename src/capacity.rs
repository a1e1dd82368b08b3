//! Capacity resolution for provisioning and expansion requests.

use thiserror::Error;

use crate::types::CapacityRange;

/// One gibibyte in bytes.
pub const GIB: u64 = 1 << 30;
/// Smallest disk the driver provisions.
pub const MIN_VOLUME_SIZE_BYTES: u64 = 5 * GIB;

/// Errors raised while resolving a capacity range.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CapacityError {
    /// The limit is below the required size.
    #[error("limit bytes {limit} is less than required bytes {required}")]
    LimitBelowRequired {
        /// Requested minimum.
        required: u64,
        /// Requested maximum.
        limit: u64,
    },
    /// The limit is below the smallest size the driver provisions.
    #[error("limit bytes {limit} is less than minimum volume size {min}", min = MIN_VOLUME_SIZE_BYTES)]
    LimitBelowMinimum {
        /// Requested maximum.
        limit: u64,
    },
}

/// Resolves the capacity to provision for `range`.
///
/// An absent range yields [`MIN_VOLUME_SIZE_BYTES`]. Otherwise the required
/// size is used when set, floored up to the minimum. Bounds are only
/// considered set when non-zero.
///
/// # Errors
///
/// Returns [`CapacityError`] when the limit is below the required size or
/// below the minimum volume size.
pub fn resolve_capacity(range: Option<&CapacityRange>) -> Result<u64, CapacityError> {
    let Some(range) = range else {
        return Ok(MIN_VOLUME_SIZE_BYTES);
    };
    let required = range.required_set();
    let limit = range.limit_set();

    if let (Some(required_bytes), Some(limit_bytes)) = (required, limit)
        && limit_bytes < required_bytes
    {
        return Err(CapacityError::LimitBelowRequired {
            required: required_bytes,
            limit: limit_bytes,
        });
    }
    if let Some(limit_bytes) = limit
        && limit_bytes < MIN_VOLUME_SIZE_BYTES
    {
        return Err(CapacityError::LimitBelowMinimum { limit: limit_bytes });
    }
    Ok(required.map_or(MIN_VOLUME_SIZE_BYTES, |bytes| {
        bytes.max(MIN_VOLUME_SIZE_BYTES)
    }))
}

/// Converts bytes to whole gibibytes, rounding up.
#[must_use]
pub const fn bytes_to_gib_rounded_up(bytes: u64) -> u64 {
    bytes.div_ceil(GIB)
}

/// Converts gibibytes to bytes, saturating on overflow.
#[must_use]
pub const fn gib_to_bytes(gib: u64) -> u64 {
    gib.saturating_mul(GIB)
}

/// Size in GiB sent to the cloud for a resolved capacity, never below the
/// provisioning minimum.
#[must_use]
pub fn request_size_gib(capacity_bytes: u64) -> u64 {
    bytes_to_gib_rounded_up(capacity_bytes).max(bytes_to_gib_rounded_up(MIN_VOLUME_SIZE_BYTES))
}
