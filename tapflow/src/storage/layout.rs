//! Storage layout configuration

use std::path::PathBuf;

use tokio::fs;

use crate::errors::FlowError;
use crate::filesys::file::File;

/// On-disk layout of the service
#[derive(Debug, Clone)]
pub struct StorageLayout {
    /// Base directory for all storage
    pub base_dir: PathBuf,
}

impl StorageLayout {
    /// Create a new storage layout
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Get the settings file path
    pub fn settings_file(&self) -> File {
        File::new(self.base_dir.join("settings.json"))
    }

    /// Directory of workflows imported from recordings
    pub fn workflows_dir(&self) -> PathBuf {
        self.base_dir.join("workflows")
    }

    /// A workflow file inside [`StorageLayout::workflows_dir`]
    pub fn workflow_file(&self, workflow_id: &str) -> File {
        File::new(self.workflows_dir().join(format!("{}.json", workflow_id)))
    }

    /// Root that FileInput paths are resolved against
    pub fn files_dir(&self) -> PathBuf {
        self.base_dir.join("files")
    }

    /// Get the logs directory
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Setup the storage layout (create directories)
    pub async fn setup(&self) -> Result<(), FlowError> {
        fs::create_dir_all(self.workflows_dir()).await?;
        fs::create_dir_all(self.files_dir()).await?;
        fs::create_dir_all(self.logs_dir()).await?;
        Ok(())
    }
}

impl Default for StorageLayout {
    fn default() -> Self {
        #[cfg(target_os = "linux")]
        let base_dir = PathBuf::from("/var/lib/tapflow");

        #[cfg(not(target_os = "linux"))]
        let base_dir = std::env::var("HOME")
            .map(|home| PathBuf::from(home).join(".tapflow"))
            .unwrap_or_else(|_| PathBuf::from(".tapflow"));

        Self::new(base_dir)
    }
}
