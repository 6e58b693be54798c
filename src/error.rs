//! Crate-wide error types.
//!
//! One `thiserror` enum per layer, composed into [`RegMirrorError`]. Library
//! code always returns one of these — `color_eyre`/`eyre::Report` is
//! reserved for the CLI binary.

use std::path::PathBuf;

/// Errors from the [`crate::catalogue`] layer.
#[derive(thiserror::Error, Debug)]
pub enum CatalogueError {
    #[error("artifact already exists for this key")]
    AlreadyExists,

    #[error("no artifact found for this key")]
    NotFound,

    #[error("catalogue storage error")]
    Storage(#[source] sqlx::Error),

    #[error("mirror not found in catalogue: {0}")]
    MirrorNotFound(i64),
}

impl From<sqlx::Error> for CatalogueError {
    fn from(e: sqlx::Error) -> Self {
        CatalogueError::Storage(e)
    }
}

/// Errors from the [`crate::blob_store`] layer.
#[derive(thiserror::Error, Debug)]
pub enum BlobError {
    #[error("I/O error at {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path {0} escapes its mirror's blob root")]
    PathEscape(PathBuf),
}

/// Errors from the [`crate::fetcher`] layer.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("upstream unavailable")]
    UpstreamUnavailable(#[source] reqwest::Error),

    #[error("invalid upstream URL: {0}")]
    InvalidUrl(String),

    #[error("invalid proxy URL: {0}")]
    InvalidProxyUrl(String),
}

/// Errors that can terminate a handler's request (`spec.md` §7).
#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    #[error("cached JSON body is corrupt")]
    CacheCorrupt,

    #[error("checksum mismatch for cached artifact")]
    ChecksumMismatch,

    #[error("unsupported hash algorithm: {0}")]
    UnsupportedHash(String),

    #[error(transparent)]
    Storage(#[from] BlobError),

    #[error(transparent)]
    Catalogue(#[from] CatalogueError),

    #[error(transparent)]
    Upstream(#[from] FetchError),
}

/// Top-level dispatch error, maps 1:1 onto `spec.md` §7's outward HTTP status policy.
#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("mirror not found")]
    MirrorNotFound,

    #[error("unsupported mirror type")]
    UnsupportedType,

    #[error(transparent)]
    Handler(#[from] HandlerError),
}

impl DispatchError {
    /// The HTTP status an inbound-HTTP host should respond with (`spec.md` §6).
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::MirrorNotFound => 404,
            DispatchError::UnsupportedType => 400,
            DispatchError::Handler(_) => 500,
        }
    }
}

/// Umbrella error type for anything that crosses a crate-public boundary.
#[derive(thiserror::Error, Debug)]
pub enum RegMirrorError {
    #[error(transparent)]
    Catalogue(#[from] CatalogueError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("unknown ecosystem type: {0}")]
    UnknownEcosystem(String),

    #[error("I/O error")]
    Io(#[from] std::io::Error),
}
