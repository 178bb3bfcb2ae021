use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use crate::error::{Result, StoreError};
use crate::trait_def::FileStore;

const STAGING_DIR_NAME: &str = ".filewire-staging";

struct FileRecord {
    md5: String,
    last_modified: i64,
    size: u64,
}

struct Loader {
    md5: String,
    size: u64,
    last_modified: i64,
    written: u64,
    staging_path: PathBuf,
}

/// A [`FileStore`] rooted at a directory on disk.
///
/// Content hashing uses MD5, matching the protocol's `md5` field. Incoming
/// bytes land in a sibling `.filewire-staging/` directory keyed by a
/// flattened version of the target path, and are renamed into place once
/// [`FileStore::cancel_file_loader`] observes a complete write. A
/// content-addressed index (`md5` → path) is rebuilt by walking the share
/// root at construction time and kept up to date as files are created,
/// overwritten, and deleted, so [`FileStore::check_shortcut`] and
/// [`FileStore::read_file`] never need to rescan the tree.
pub struct LocalFileStore {
    root: PathBuf,
    staging_dir: PathBuf,
    files: Mutex<HashMap<String, FileRecord>>,
    content_index: Mutex<HashMap<String, String>>,
    loaders: Mutex<HashMap<String, Loader>>,
}

impl LocalFileStore {
    /// Open (or create) a store rooted at `root`, scanning any files
    /// already present to seed the content index.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let staging_dir = root.join(STAGING_DIR_NAME);
        fs::create_dir_all(&root).map_err(|e| io_err(&root, e))?;
        fs::create_dir_all(&staging_dir).map_err(|e| io_err(&staging_dir, e))?;

        let mut files = HashMap::new();
        let mut content_index = HashMap::new();
        scan_dir(&root, &root, &staging_dir, &mut files, &mut content_index)?;

        tracing::info!(
            root = %root.display(),
            file_count = files.len(),
            "opened local file store"
        );

        Ok(Self {
            root,
            staging_dir,
            files: Mutex::new(files),
            content_index: Mutex::new(content_index),
            loaders: Mutex::new(HashMap::new()),
        })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn staging_path(&self, path: &str) -> PathBuf {
        self.staging_dir.join(path.replace(['/', '\\'], "~"))
    }
}

fn io_err(path: impl AsRef<Path>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.as_ref().display().to_string(),
        source,
    }
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).map_err(|e| io_err(path, e))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(|e| io_err(path, e))?;
    Ok(format!("{:x}", md5::compute(&buf)))
}

fn modified_timestamp(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn scan_dir(
    root: &Path,
    dir: &Path,
    staging_dir: &Path,
    files: &mut HashMap<String, FileRecord>,
    content_index: &mut HashMap<String, String>,
) -> Result<()> {
    if dir == staging_dir {
        return Ok(());
    }
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Ok(()),
    };
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        if path == staging_dir {
            continue;
        }
        let metadata = entry.metadata().map_err(|e| io_err(&path, e))?;
        if metadata.is_dir() {
            scan_dir(root, &path, staging_dir, files, content_index)?;
        } else if metadata.is_file() {
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            let md5 = hash_file(&path)?;
            let last_modified = modified_timestamp(&metadata);
            content_index
                .entry(md5.clone())
                .or_insert_with(|| relative.clone());
            files.insert(
                relative,
                FileRecord {
                    md5,
                    last_modified,
                    size: metadata.len(),
                },
            );
        }
    }
    Ok(())
}

impl FileStore for LocalFileStore {
    fn is_safe_path_name(&self, path: &str) -> bool {
        if path.is_empty() || path.starts_with('/') || path.starts_with('\\') {
            return false;
        }
        Path::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    }

    fn file_name_exists(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }

    fn file_name_exists_with_hash(&self, path: &str, md5: &str) -> bool {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|record| record.md5 == md5)
            .unwrap_or(false)
    }

    fn dir_name_exists(&self, path: &str) -> bool {
        self.resolve(path).is_dir()
    }

    fn create_file_loader(
        &self,
        path: &str,
        md5: &str,
        size: u64,
        last_modified: i64,
    ) -> Result<()> {
        let final_path = self.resolve(path);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let staging_path = self.staging_path(path);
        let file = fs::File::create(&staging_path).map_err(|e| io_err(&staging_path, e))?;
        file.set_len(size).map_err(|e| io_err(&staging_path, e))?;

        self.loaders.lock().unwrap().insert(
            path.to_string(),
            Loader {
                md5: md5.to_string(),
                size,
                last_modified,
                written: 0,
                staging_path,
            },
        );
        tracing::debug!(%path, %md5, size, "opened file loader");
        Ok(())
    }

    fn modify_file_loader(&self, path: &str, md5: &str, last_modified: i64) -> Result<bool> {
        if let Some(record) = self.files.lock().unwrap().get(path) {
            if record.last_modified > last_modified {
                tracing::debug!(%path, on_disk = record.last_modified, requested = last_modified, "rejected stale modify");
                return Ok(false);
            }
        }
        self.create_file_loader(path, md5, 0, last_modified)?;
        // `FILE_MODIFY_REQUEST` doesn't carry a reliable pre-transfer size
        // hint beyond the descriptor; the loader's size is corrected as
        // bytes arrive so `check_write_complete` stays accurate once the
        // first `FILE_BYTES_REQUEST` echoes the real `fileSize`.
        if let Some(loader) = self.loaders.lock().unwrap().get_mut(path) {
            loader.size = u64::MAX;
        }
        Ok(true)
    }

    fn check_shortcut(&self, path: &str) -> Result<bool> {
        let md5 = {
            let loaders = self.loaders.lock().unwrap();
            let loader = loaders
                .get(path)
                .ok_or_else(|| StoreError::NoActiveLoader(path.to_string()))?;
            loader.md5.clone()
        };
        let source = self.content_index.lock().unwrap().get(&md5).cloned();
        let Some(source) = source else {
            return Ok(false);
        };
        if source == path {
            return Ok(false);
        }
        let source_path = self.resolve(&source);
        if !source_path.is_file() {
            return Ok(false);
        }

        let final_path = self.resolve(path);
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        fs::copy(&source_path, &final_path).map_err(|e| io_err(&final_path, e))?;

        let loader = self.loaders.lock().unwrap().remove(path);
        if let Some(loader) = loader {
            let _ = fs::remove_file(&loader.staging_path);
            let size = final_path
                .metadata()
                .map(|m| m.len())
                .unwrap_or(loader.size);
            self.files.lock().unwrap().insert(
                path.to_string(),
                FileRecord {
                    md5: loader.md5.clone(),
                    last_modified: loader.last_modified,
                    size,
                },
            );
            self.content_index
                .lock()
                .unwrap()
                .entry(loader.md5)
                .or_insert_with(|| path.to_string());
        }
        tracing::debug!(%path, from = %source, "completed loader via shortcut");
        Ok(true)
    }

    fn write_file(&self, path: &str, bytes: &[u8], position: u64) -> Result<()> {
        let mut loaders = self.loaders.lock().unwrap();
        let loader = loaders
            .get_mut(path)
            .ok_or_else(|| StoreError::NoActiveLoader(path.to_string()))?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .open(&loader.staging_path)
            .map_err(|e| io_err(&loader.staging_path, e))?;
        file.seek(SeekFrom::Start(position))
            .map_err(|e| io_err(&loader.staging_path, e))?;
        file.write_all(bytes)
            .map_err(|e| io_err(&loader.staging_path, e))?;

        let end = position + bytes.len() as u64;
        if end > loader.written {
            loader.written = end;
        }
        Ok(())
    }

    fn check_write_complete(&self, path: &str) -> Result<bool> {
        let loaders = self.loaders.lock().unwrap();
        let loader = loaders
            .get(path)
            .ok_or_else(|| StoreError::NoActiveLoader(path.to_string()))?;
        Ok(loader.written >= loader.size)
    }

    fn cancel_file_loader(&self, path: &str) -> Result<()> {
        let loader = self
            .loaders
            .lock()
            .unwrap()
            .remove(path)
            .ok_or_else(|| StoreError::NoActiveLoader(path.to_string()))?;

        let complete = loader.written >= loader.size || loader.size == u64::MAX;
        let final_path = self.resolve(path);
        if complete {
            fs::rename(&loader.staging_path, &final_path).map_err(|e| io_err(&final_path, e))?;
            let size = final_path.metadata().map(|m| m.len()).unwrap_or(0);
            self.files.lock().unwrap().insert(
                path.to_string(),
                FileRecord {
                    md5: loader.md5.clone(),
                    last_modified: loader.last_modified,
                    size,
                },
            );
            self.content_index
                .lock()
                .unwrap()
                .entry(loader.md5)
                .or_insert_with(|| path.to_string());
            tracing::debug!(%path, "finalized file loader");
        } else {
            let _ = fs::remove_file(&loader.staging_path);
            tracing::debug!(%path, "abandoned incomplete file loader");
        }
        Ok(())
    }

    fn read_file(&self, md5: &str, position: u64, length: u64) -> Result<Vec<u8>> {
        let path = self
            .content_index
            .lock()
            .unwrap()
            .get(md5)
            .cloned()
            .ok_or_else(|| StoreError::UnknownContent(md5.to_string()))?;
        let full_path = self.resolve(&path);
        let mut file = fs::File::open(&full_path).map_err(|e| io_err(&full_path, e))?;
        file.seek(SeekFrom::Start(position))
            .map_err(|e| io_err(&full_path, e))?;
        let mut buf = vec![0u8; length as usize];
        let mut total = 0usize;
        while total < buf.len() {
            let read = file
                .read(&mut buf[total..])
                .map_err(|e| io_err(&full_path, e))?;
            if read == 0 {
                break;
            }
            total += read;
        }
        buf.truncate(total);
        Ok(buf)
    }

    fn delete_file(&self, path: &str, last_modified: i64, md5: &str) -> Result<bool> {
        let mut files = self.files.lock().unwrap();
        let matches = files
            .get(path)
            .map(|record| record.md5 == md5 && record.last_modified == last_modified)
            .unwrap_or(false);
        if !matches {
            return Ok(false);
        }
        let full_path = self.resolve(path);
        fs::remove_file(&full_path).map_err(|e| io_err(&full_path, e))?;
        files.remove(path);
        tracing::debug!(%path, "deleted file");
        Ok(true)
    }

    fn make_directory(&self, path: &str) -> Result<()> {
        let full_path = self.resolve(path);
        fs::create_dir_all(&full_path).map_err(|e| io_err(&full_path, e))
    }

    fn delete_directory(&self, path: &str) -> Result<()> {
        let full_path = self.resolve(path);
        fs::remove_dir_all(&full_path).map_err(|e| io_err(&full_path, e))
    }
}
