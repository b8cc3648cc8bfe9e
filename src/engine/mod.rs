//! Local execution engine: task sources, admission, and the executor pool.

pub mod adapter;
pub mod gate;
pub mod poller;
pub mod source;

pub use adapter::{ExecutionAdapter, TaskReport};
pub use gate::{Admission, Candidate, ClaimGate, ClaimedTask, SeenSet, SourceKind};
pub use poller::QueuePoller;
pub use source::{QueueSource, RunStoreSource, TaskSource};
