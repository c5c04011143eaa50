//! Message handling on the worker side.
//!
//! - [`lease`]: one pulled message and the loop that keeps its ack deadline alive
//! - [`subscription`]: the pull loop that hands messages to job pipelines
//! - [`executor`]: runs a job's command and captures its output
//!
//! # Lease Flow
//!
//! 1. [`JobSubscription::listen`] pulls a message and wraps it in a [`JobMessage`]
//! 2. The job pipeline starts [`JobMessage::spawn_sustainer`]
//! 3. Every `interval` seconds the lease is extended by `delay` seconds
//! 4. `ack()` or `done()` moves the status off `running` and the loop exits
//!
//! Commands are spawned directly, never through a shell.

pub mod executor;
pub mod lease;
pub mod subscription;

pub use executor::JobExecutor;
pub use lease::{JobMessage, LeaseStatus};
pub use subscription::JobSubscription;
