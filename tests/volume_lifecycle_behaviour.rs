//! Behavioural scenarios for the volume lifecycle.

mod volume_lifecycle;
