//! # Controller
//!
//! The secret synchronization and restart-propagation engine.
//!
//! - `builder`: vault item to secret payload
//! - `store`: cluster secret/workload seams and the Kubernetes-backed store
//! - `synchronizer`: one sync cycle over all managed secrets
//! - `resolver`: which workloads consume a secret
//! - `restart`: restart-trigger writes
//! - `types`: shared identities, errors and the cycle report

pub mod builder;
pub mod resolver;
pub mod restart;
pub mod store;
pub mod synchronizer;
pub mod types;

pub use store::{KubeStore, SecretStore, WorkloadStore};
pub use synchronizer::{is_managed, SecretSynchronizer, SyncSettings};
pub use types::{
    CycleError, ObjectRef, SecretOutcome, SecretRef, StoreError, SyncError, SyncReport,
    WorkloadRef,
};
