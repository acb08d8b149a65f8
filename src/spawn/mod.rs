//! Worker spawn wrapper (spec.md §4.K).

pub mod wrapper;

pub use wrapper::{
    Availability, SpawnError, SpawnErrorKind, SpawnHandle, SpawnOptions, SpawnRetryPolicy, WorkerSpawner,
};
