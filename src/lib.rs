//! # reconq
//!
//! Distributed task-queue coordinator for security-recon workflows.
//!
//! Discovers queued runs from Postgres and from a shared Redis list,
//! guarantees each logical run executes at most once through a conditional
//! claim on the run row, and hands execution to an external workflow
//! executor. Also provides target chunking for fanning one scan across
//! machines, and a pull-based master/worker mode over Redis.

pub mod chunk;
pub mod config;
pub mod db;
pub mod distributed;
pub mod engine;
pub mod error;
pub mod executor;
pub mod model;
pub mod params;
pub mod queue;
pub mod store;
pub mod telemetry;
