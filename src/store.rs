//! Atomic JSON persistence of aggregated [`Coverage`].

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::error::{PgcovError, Result};
use crate::model::Coverage;

pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Store { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Serialize `coverage` to pretty JSON and write it atomically: write
    /// to a sibling temp file, then rename over the final path so a
    /// concurrent reader never observes a partial file.
    pub async fn save(&self, coverage: &Coverage) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }
        let json = serde_json::to_vec_pretty(coverage)?;

        let tmp_path = self.path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&json).await?;
        file.flush().await?;
        drop(file);

        fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    pub async fn load(&self) -> Result<Coverage> {
        let bytes = fs::read(&self.path).await?;
        let coverage: Coverage = serde_json::from_slice(&bytes)?;
        Ok(coverage)
    }

    pub async fn delete(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PgcovError::Io(e)),
        }
    }
}
