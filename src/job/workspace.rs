use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::Result;

pub const DOWNLOADS_DIR: &str = "downloads";
pub const UPLOADS_DIR: &str = "uploads";

/// Per-job directory tree with `downloads/` and `uploads/` below it.
///
/// A workspace made by [`Workspace::create`] is temporary and is removed by
/// [`Workspace::close`] or, on any other exit path, when dropped.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    downloads_dir: PathBuf,
    uploads_dir: PathBuf,
    temp: Option<TempDir>,
}

impl Workspace {
    pub fn create() -> Result<Self> {
        let temp = tempfile::Builder::new().prefix("workspace").tempdir()?;
        let root = temp.path().to_path_buf();
        Self::init(root, Some(temp))
    }

    /// Use an existing directory. It is left in place on close.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::init(root.into(), None)
    }

    fn init(root: PathBuf, temp: Option<TempDir>) -> Result<Self> {
        let downloads_dir = root.join(DOWNLOADS_DIR);
        let uploads_dir = root.join(UPLOADS_DIR);
        std::fs::create_dir_all(&downloads_dir)?;
        std::fs::create_dir_all(&uploads_dir)?;
        Ok(Self {
            root,
            downloads_dir,
            uploads_dir,
            temp,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn downloads_dir(&self) -> &Path {
        &self.downloads_dir
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    pub fn close(self) -> Result<()> {
        if let Some(temp) = self.temp {
            tracing::debug!(workspace = %self.root.display(), "Removing workspace");
            temp.close()?;
        }
        Ok(())
    }
}
