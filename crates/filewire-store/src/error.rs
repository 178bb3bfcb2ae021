/// Errors a [`crate::FileStore`] implementation can report.
///
/// These are store-internal failures (a rename that couldn't complete, a
/// directory that couldn't be walked) — they are distinct from the
/// *application-level* outcomes the protocol already models as `status:
/// false` responses (unsafe path, stale version, missing file). A dispatcher
/// only ever sees this error type when something below the store contract
/// itself has gone wrong.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error at {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("no active loader for {0}")]
    NoActiveLoader(String),

    #[error("no local version of content {0}")]
    UnknownContent(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
