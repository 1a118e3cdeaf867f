//! The directory a peer shares files from.
//!
//! Requested names are plain file names; anything that could escape the
//! root is refused before touching the filesystem.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum FileRootError {
    #[error("invalid file name {0:?}")]
    InvalidName(String),
    #[error("file {0} does not exist")]
    NotFound(String),
    #[error("cannot open {0}: {1}")]
    Io(String, std::io::Error),
}

#[derive(Debug, Clone)]
pub struct FileRoot {
    root: PathBuf,
}

impl FileRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Map a requested name to a path inside the root.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, FileRootError> {
        let invalid = || FileRootError::InvalidName(name.to_string());
        if name.is_empty() || name.contains(['/', '\\', '\0']) {
            return Err(invalid());
        }
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.root.join(name)),
            _ => Err(invalid()),
        }
    }

    pub async fn open_for_read(&self, name: &str) -> Result<tokio::fs::File, FileRootError> {
        let path = self.resolve(name)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(file),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FileRootError::NotFound(name.to_string()))
            }
            Err(e) => Err(FileRootError::Io(name.to_string(), e)),
        }
    }

    /// Regular files directly under the root, sorted by name.
    pub async fn list(&self) -> Result<Vec<String>, FileRootError> {
        let root_name = self.root.display().to_string();
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| FileRootError::Io(root_name.clone(), e))?;

        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FileRootError::Io(root_name.clone(), e))?
        {
            let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
            if !is_file {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
