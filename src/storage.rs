use crate::config::StorageConfig;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{fs, sync::Mutex};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to back up {path}: {source}")]
    Backup { path: PathBuf, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
}

/// The working CSV on disk plus a single backup generation.
#[derive(Clone)]
pub struct CsvStore {
    primary: PathBuf,
    backup: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl CsvStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            primary: config.primary_path.clone(),
            backup: config.backup_path.clone(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn primary_path(&self) -> &Path {
        &self.primary
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup
    }

    pub async fn save(&self, content: &str) -> Result<(), PersistenceError> {
        let _guard = self.write_lock.lock().await;

        if fs::try_exists(&self.primary).await.unwrap_or(false) {
            ensure_parent(&self.backup)
                .await
                .map_err(|source| self.backup_error(source))?;
            fs::copy(&self.primary, &self.backup)
                .await
                .map_err(|source| self.backup_error(source))?;
            debug!(target = "enricher.storage", backup = %self.backup.display(), "previous csv backed up");
        }

        ensure_parent(&self.primary)
            .await
            .map_err(|source| self.write_error(source))?;
        let staging = staging_path(&self.primary);
        fs::write(&staging, content)
            .await
            .map_err(|source| self.write_error(source))?;
        if let Err(source) = fs::rename(&staging, &self.primary).await {
            let _ = fs::remove_file(&staging).await;
            return Err(self.write_error(source));
        }

        info!(
            target = "enricher.storage",
            path = %self.primary.display(),
            bytes = content.len(),
            "csv saved"
        );
        Ok(())
    }

    pub async fn load(&self) -> Result<Option<String>, PersistenceError> {
        match fs::read_to_string(&self.primary).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistenceError::Read {
                path: self.primary.clone(),
                source,
            }),
        }
    }

    fn backup_error(&self, source: io::Error) -> PersistenceError {
        PersistenceError::Backup {
            path: self.backup.clone(),
            source,
        }
    }

    fn write_error(&self, source: io::Error) -> PersistenceError {
        PersistenceError::Write {
            path: self.primary.clone(),
            source,
        }
    }
}

async fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent).await,
        _ => Ok(()),
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
