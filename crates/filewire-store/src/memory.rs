use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{Result, StoreError};
use crate::trait_def::FileStore;

struct Entry {
    md5: String,
    last_modified: i64,
    bytes: Vec<u8>,
}

struct Loader {
    md5: String,
    size: u64,
    last_modified: i64,
    bytes: Vec<u8>,
}

/// An in-memory [`FileStore`] test double.
///
/// Keeps everything in a couple of `HashMap`s guarded by a single mutex —
/// no filesystem I/O, so `PeerSession`/`LocalNode` tests exercising dispatch
/// logic don't need a temp directory per test.
#[derive(Default)]
pub struct InMemoryFileStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    files: HashMap<String, Entry>,
    dirs: std::collections::HashSet<String>,
    loaders: HashMap<String, Loader>,
}

impl InMemoryFileStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file directly, bypassing the loader lifecycle — useful for
    /// setting up shortcut-completion and delete-conflict test fixtures.
    pub fn seed_file(&self, path: &str, md5: &str, last_modified: i64, bytes: &[u8]) {
        self.state.lock().unwrap().files.insert(
            path.to_string(),
            Entry {
                md5: md5.to_string(),
                last_modified,
                bytes: bytes.to_vec(),
            },
        );
    }
}

impl FileStore for InMemoryFileStore {
    fn is_safe_path_name(&self, path: &str) -> bool {
        if path.is_empty() || path.starts_with('/') {
            return false;
        }
        !path.split('/').any(|segment| segment == "..")
    }

    fn file_name_exists(&self, path: &str) -> bool {
        self.state.lock().unwrap().files.contains_key(path)
    }

    fn file_name_exists_with_hash(&self, path: &str, md5: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .files
            .get(path)
            .map(|e| e.md5 == md5)
            .unwrap_or(false)
    }

    fn dir_name_exists(&self, path: &str) -> bool {
        self.state.lock().unwrap().dirs.contains(path)
    }

    fn create_file_loader(
        &self,
        path: &str,
        md5: &str,
        size: u64,
        last_modified: i64,
    ) -> Result<()> {
        self.state.lock().unwrap().loaders.insert(
            path.to_string(),
            Loader {
                md5: md5.to_string(),
                size,
                last_modified,
                bytes: vec![0u8; size as usize],
            },
        );
        Ok(())
    }

    fn modify_file_loader(&self, path: &str, md5: &str, last_modified: i64) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.files.get(path) {
            if entry.last_modified > last_modified {
                return Ok(false);
            }
        }
        state.loaders.insert(
            path.to_string(),
            Loader {
                md5: md5.to_string(),
                size: u64::MAX,
                last_modified,
                bytes: Vec::new(),
            },
        );
        Ok(true)
    }

    fn check_shortcut(&self, path: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let md5 = state
            .loaders
            .get(path)
            .ok_or_else(|| StoreError::NoActiveLoader(path.to_string()))?
            .md5
            .clone();
        let source = state
            .files
            .iter()
            .find(|(p, e)| *p != path && e.md5 == md5)
            .map(|(p, e)| (p.clone(), e.bytes.clone(), e.last_modified));
        let Some((_, bytes, _)) = source else {
            return Ok(false);
        };
        let loader = state.loaders.remove(path).unwrap();
        state.files.insert(
            path.to_string(),
            Entry {
                md5: loader.md5,
                last_modified: loader.last_modified,
                bytes,
            },
        );
        Ok(true)
    }

    fn write_file(&self, path: &str, bytes: &[u8], position: u64) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let loader = state
            .loaders
            .get_mut(path)
            .ok_or_else(|| StoreError::NoActiveLoader(path.to_string()))?;
        let end = position as usize + bytes.len();
        if loader.bytes.len() < end {
            loader.bytes.resize(end, 0);
        }
        loader.bytes[position as usize..end].copy_from_slice(bytes);
        if loader.size == u64::MAX {
            loader.size = loader.bytes.len() as u64;
        }
        Ok(())
    }

    fn check_write_complete(&self, path: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        let loader = state
            .loaders
            .get(path)
            .ok_or_else(|| StoreError::NoActiveLoader(path.to_string()))?;
        Ok(loader.bytes.len() as u64 >= loader.size)
    }

    fn cancel_file_loader(&self, path: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let loader = state
            .loaders
            .remove(path)
            .ok_or_else(|| StoreError::NoActiveLoader(path.to_string()))?;
        if loader.bytes.len() as u64 >= loader.size {
            state.files.insert(
                path.to_string(),
                Entry {
                    md5: loader.md5,
                    last_modified: loader.last_modified,
                    bytes: loader.bytes,
                },
            );
        }
        Ok(())
    }

    fn read_file(&self, md5: &str, position: u64, length: u64) -> Result<Vec<u8>> {
        let state = self.state.lock().unwrap();
        let entry = state
            .files
            .values()
            .find(|e| e.md5 == md5)
            .ok_or_else(|| StoreError::UnknownContent(md5.to_string()))?;
        let start = position as usize;
        let end = (start + length as usize).min(entry.bytes.len());
        if start >= entry.bytes.len() {
            return Ok(Vec::new());
        }
        Ok(entry.bytes[start..end].to_vec())
    }

    fn delete_file(&self, path: &str, last_modified: i64, md5: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let matches = state
            .files
            .get(path)
            .map(|e| e.md5 == md5 && e.last_modified == last_modified)
            .unwrap_or(false);
        if matches {
            state.files.remove(path);
        }
        Ok(matches)
    }

    fn make_directory(&self, path: &str) -> Result<()> {
        self.state.lock().unwrap().dirs.insert(path.to_string());
        Ok(())
    }

    fn delete_directory(&self, path: &str) -> Result<()> {
        self.state.lock().unwrap().dirs.remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_write_complete_cancel() {
        let store = InMemoryFileStore::new();
        store.create_file_loader("a.txt", "hash1", 5, 1).unwrap();
        assert!(!store.check_write_complete("a.txt").unwrap());
        store.write_file("a.txt", b"hello", 0).unwrap();
        assert!(store.check_write_complete("a.txt").unwrap());
        store.cancel_file_loader("a.txt").unwrap();
        assert!(store.file_name_exists("a.txt"));
    }

    #[test]
    fn shortcut_copies_from_sibling() {
        let store = InMemoryFileStore::new();
        store.seed_file("original.txt", "sharedhash", 1, b"dup content");
        store
            .create_file_loader("copy.txt", "sharedhash", 11, 2)
            .unwrap();
        assert!(store.check_shortcut("copy.txt").unwrap());
        assert!(store.file_name_exists_with_hash("copy.txt", "sharedhash"));
    }

    #[test]
    fn directories_are_tracked() {
        let store = InMemoryFileStore::new();
        assert!(!store.dir_name_exists("d"));
        store.make_directory("d").unwrap();
        assert!(store.dir_name_exists("d"));
        store.delete_directory("d").unwrap();
        assert!(!store.dir_name_exists("d"));
    }
}
