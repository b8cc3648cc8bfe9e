//! Master/worker coordination over the shared queue.
//!
//! The master pushes tasks and watches worker liveness; workers pull tasks,
//! heartbeat into the registry, and execute one task at a time. Tasks are
//! not assigned to particular workers.

pub mod master;
pub mod worker;

pub use master::{ClusterStatus, Master};
pub use worker::{Worker, generate_worker_id, local_hostname};
