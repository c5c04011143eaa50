pub mod config;
pub mod error;
pub mod gcp;
pub mod job;
pub mod notification;
pub mod process;
pub mod shutdown;
pub mod worker;

pub use error::{ProxyError, Result};
