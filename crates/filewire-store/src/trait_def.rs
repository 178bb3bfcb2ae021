use crate::error::Result;

/// The filesystem-facing contract a `PeerSession` dispatches against.
///
/// This is deliberately narrow: it covers exactly the operations the
/// dispatch rule tables need, nothing more. Implementations own
/// persistence, content hashing, and conflict detection; the dispatcher
/// never touches the filesystem directly.
///
/// Object-safe so a `LocalNode` can hold a `dyn FileStore` and swap in a
/// different backing store (disk-backed, in-memory) without generic
/// plumbing through the session/dispatch layer.
pub trait FileStore: Send + Sync {
    /// Rejects paths that would resolve outside the store's root (`..`
    /// segments, absolute paths, symlink escapes).
    fn is_safe_path_name(&self, path: &str) -> bool;

    /// True if a file is present at `path`, regardless of content.
    fn file_name_exists(&self, path: &str) -> bool;

    /// True if a file is present at `path` with exactly this content hash.
    fn file_name_exists_with_hash(&self, path: &str, md5: &str) -> bool;

    /// True if a directory is present at `path`.
    fn dir_name_exists(&self, path: &str) -> bool;

    /// Open a staging slot for a brand new file. `path` must not already
    /// name an existing file — callers check `file_name_exists` first.
    fn create_file_loader(
        &self,
        path: &str,
        md5: &str,
        size: u64,
        last_modified: i64,
    ) -> Result<()>;

    /// Open a staging slot to overwrite an existing file. Returns `false`
    /// without opening a loader if the on-disk version is newer than
    /// `last_modified` (last-writer-wins is decided by timestamp, not
    /// arrival order).
    fn modify_file_loader(&self, path: &str, md5: &str, last_modified: i64) -> Result<bool>;

    /// If another local file already has the loader's target content hash,
    /// complete the loader from it without requesting any bytes over the
    /// wire. Returns `true` on a successful shortcut completion.
    fn check_shortcut(&self, path: &str) -> Result<bool>;

    /// Write a chunk into the active loader for `path` at `position`.
    fn write_file(&self, path: &str, bytes: &[u8], position: u64) -> Result<()>;

    /// True once the active loader for `path` has received every byte of
    /// the file's declared size.
    fn check_write_complete(&self, path: &str) -> Result<bool>;

    /// Finalize a complete loader (rename into place) or abandon an
    /// incomplete one. Always clears the loader for `path`.
    fn cancel_file_loader(&self, path: &str) -> Result<()>;

    /// Read `length` bytes starting at `position` from the local file
    /// version identified by `md5`.
    fn read_file(&self, md5: &str, position: u64, length: u64) -> Result<Vec<u8>>;

    /// Delete the file at `path` iff it still matches `last_modified` and
    /// `md5`. Returns `false` if no matching file exists.
    fn delete_file(&self, path: &str, last_modified: i64, md5: &str) -> Result<bool>;

    /// Create a directory at `path`.
    fn make_directory(&self, path: &str) -> Result<()>;

    /// Delete the directory at `path`.
    fn delete_directory(&self, path: &str) -> Result<()>;
}
