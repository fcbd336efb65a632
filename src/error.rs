//! Error types for the mirror-dl library.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while crawling, diffing or syncing.
#[derive(Error, Debug)]
pub enum Error {
    /// The remote listing API reported a failure.
    #[error("listing of folder '{folder}' failed: {message}")]
    Listing {
        /// Folder id that was being listed.
        folder: String,
        /// Message returned by the API.
        message: String,
    },

    /// A folder path could not be resolved on the remote side.
    #[error("remote folder not found: {0}")]
    FolderNotFound(String),

    /// A subtree of the remote crawl failed; the whole tree is unusable.
    #[error("crawl of folder '{folder}' failed: {source}")]
    Crawl {
        /// Folder id whose subtree could not be listed.
        folder: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// The local tree root is not a directory.
    #[error("not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    /// A transfer ended in an unexpected state.
    #[error("download of {path} failed: {message}")]
    Download {
        /// Destination path of the transfer.
        path: String,
        /// What went wrong.
        message: String,
    },

    /// A worker hit a fatal error and the run was aborted.
    #[error("[worker:{worker}] {source}")]
    Worker {
        /// Worker id (1-based).
        worker: usize,
        /// Failure that stopped the worker.
        #[source]
        source: Box<Error>,
    },

    /// Invalid configuration or command-line input.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration file could not be parsed.
    #[error("config file error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A specialized `Result` type for mirror-dl operations.
pub type Result<T> = std::result::Result<T, Error>;
