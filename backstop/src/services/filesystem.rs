//! Storage connector writing backups to local directories.
//!
//! Each backup becomes a folder named after the backup, holding numbered
//! part files:
//!
//! ```text
//! <root>/<backup_name>/<backup_name>_part0.data
//! <root>/<backup_name>/<backup_name>_part1.data
//! ...
//! ```
//!
//! Parts are capped at [`LocalFileSystemStorage::max_part_size`] bytes so a
//! large dump never ends up as one unwieldy file.

use super::{BoxError, ByteStream, ServiceError, StorageService};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

/// Default upper bound for a single part file (192 MiB).
pub const DEFAULT_MAX_PART_SIZE: usize = 192 * 1024 * 1024;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// [`StorageService`] that maps each storage ref to a local root directory.
#[derive(Debug, Clone)]
pub struct LocalFileSystemStorage {
    roots: HashMap<String, PathBuf>,
    max_part_size: usize,
}

impl Default for LocalFileSystemStorage {
    fn default() -> Self {
        Self {
            roots: HashMap::new(),
            max_part_size: DEFAULT_MAX_PART_SIZE,
        }
    }
}

impl LocalFileSystemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `root` as the directory behind `storage_ref`.
    pub fn with_root(mut self, storage_ref: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.roots.insert(storage_ref.into(), root.into());
        self
    }

    /// Sets the part size. Values below one byte are raised to one.
    pub fn with_max_part_size(mut self, max_part_size: usize) -> Self {
        self.max_part_size = max_part_size.max(1);
        self
    }

    pub fn max_part_size(&self) -> usize {
        self.max_part_size
    }

    fn backup_dir(&self, storage_ref: &str, backup_name: &str) -> Result<PathBuf, ServiceError> {
        self.roots
            .get(storage_ref)
            .map(|root| root.join(backup_name))
            .ok_or_else(|| ServiceError::UnknownStorage(storage_ref.to_string()))
    }

    fn part_path(dir: &Path, backup_name: &str, index: usize) -> PathBuf {
        dir.join(format!("{}_part{}.data", backup_name, index))
    }

    /// Returns the part indices present in `dir`, ascending.
    async fn part_indices(dir: &Path, backup_name: &str) -> Result<Vec<usize>, ServiceError> {
        let prefix = format!("{}_part", backup_name);
        let mut indices = Vec::new();

        let mut entries = fs::read_dir(dir).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => ServiceError::BackupNotFound(backup_name.to_string()),
            _ => ServiceError::Io(e),
        })?;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let index = file_name
                .to_str()
                .and_then(|name| name.strip_prefix(&prefix))
                .and_then(|rest| rest.strip_suffix(".data"))
                .and_then(|n| n.parse::<usize>().ok());
            if let Some(index) = index {
                indices.push(index);
            }
        }

        indices.sort_unstable();
        Ok(indices)
    }
}

#[async_trait]
impl StorageService for LocalFileSystemStorage {
    async fn upload(
        &self,
        mut data: ByteStream,
        storage_ref: &str,
        backup_name: &str,
    ) -> Result<(), BoxError> {
        let dir = self.backup_dir(storage_ref, backup_name)?;
        if fs::try_exists(&dir).await? {
            return Err(ServiceError::AlreadyExists(backup_name.to_string()).into());
        }
        fs::create_dir_all(&dir).await?;

        let mut buf = vec![0u8; READ_CHUNK_SIZE.min(self.max_part_size)];
        let mut parts = 0usize;
        let mut current: Option<(File, usize)> = None;

        loop {
            let n = data.read(&mut buf).await?;
            if n == 0 {
                break;
            }

            let mut chunk = &buf[..n];
            while !chunk.is_empty() {
                let part_full = current
                    .as_ref()
                    .map_or(true, |(_, written)| *written >= self.max_part_size);
                if part_full {
                    if let Some((mut full, _)) = current.take() {
                        full.flush().await?;
                    }
                    let file = File::create(Self::part_path(&dir, backup_name, parts)).await?;
                    parts += 1;
                    current = Some((file, 0));
                }

                if let Some((file, written)) = current.as_mut() {
                    let take = (self.max_part_size - *written).min(chunk.len());
                    file.write_all(&chunk[..take]).await?;
                    *written += take;
                    chunk = &chunk[take..];
                }
            }
        }

        match current {
            Some((mut file, _)) => file.flush().await?,
            // empty dump still yields one readable part
            None => {
                File::create(Self::part_path(&dir, backup_name, 0)).await?;
                parts = 1;
            }
        }

        debug!(
            "Uploaded backup {} to storage {} in {} part(s)",
            backup_name, storage_ref, parts
        );
        Ok(())
    }

    async fn download(&self, storage_ref: &str, backup_name: &str) -> Result<ByteStream, BoxError> {
        let dir = self.backup_dir(storage_ref, backup_name)?;
        let indices = Self::part_indices(&dir, backup_name).await?;
        if indices.is_empty() {
            return Err(ServiceError::BackupNotFound(backup_name.to_string()).into());
        }

        let mut stream: ByteStream = Box::pin(tokio::io::empty());
        for index in indices {
            let part = File::open(Self::part_path(&dir, backup_name, index)).await?;
            stream = Box::pin(stream.chain(part));
        }

        Ok(stream)
    }

    async fn delete(&self, storage_ref: &str, backup_name: &str) -> Result<(), BoxError> {
        let dir = self.backup_dir(storage_ref, backup_name)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!("Deleted backup {} from storage {}", backup_name, storage_ref);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
