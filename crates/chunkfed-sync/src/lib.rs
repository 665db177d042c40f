#![warn(missing_docs)]

//! chunkfed sync subsystem: keeps a cluster's recipe set consistent with its
//! export list, on the elected leader only.

pub mod coordinator;
pub mod error;
pub mod reconcile;
pub mod scheduler;

pub use coordinator::{ClusterCoordinator, NodeInfo, StaticCoordinator};
pub use error::SyncError;
pub use reconcile::{ReconcileReport, Reconciler};
pub use scheduler::{ScheduleDriver, ScheduleHandle, ScheduledTask, TaskStats, TokioScheduler};
