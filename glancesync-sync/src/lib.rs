//! # glancesync-sync
//!
//! The synchronisation engine: master catalog, per-region reconciliation and
//! plan execution over an [`ImageRepository`].
//!
//! Call [`pipeline::sync_regions`] to synchronise a set of regions, or
//! [`pipeline::status_regions`] to compute their plans without executing them.

mod atomic;

pub mod ami;
pub mod backup;
pub mod error;
pub mod executor;
pub mod master;
pub mod obsolete;
pub mod pipeline;
pub mod policy;
pub mod reconcile;
pub mod repository;

pub use ami::AmiStatus;
pub use error::{RepositoryError, SyncError};
pub use executor::{execute, ExecutionReport};
pub use master::{build_master_catalog, MasterCatalog};
pub use pipeline::{sync_regions, RegionOutcome, RegionReport};
pub use policy::is_synchronisable;
pub use reconcile::{reconcile, PlanEntry, SyncPlan, SyncState};
pub use repository::local::{LocalCatalogProvider, LocalCatalogRepository};
pub use repository::memory::{MemoryProvider, MemoryRepository};
pub use repository::{ImageRepository, RepositoryProvider};
