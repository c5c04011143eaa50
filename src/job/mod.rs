pub mod files;
pub mod pipeline;
pub mod staging;
pub mod variable;
pub mod workspace;

pub use pipeline::Job;
pub use staging::DownloadFiles;
pub use variable::Variable;
pub use workspace::Workspace;
