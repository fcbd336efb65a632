//! mirror-dl - mirrors a remote folder tree onto the local filesystem.
//!
//! The library crawls a remote listing into a [`DirectoryNode`] tree, then
//! downloads every file under a concurrency limit, resuming partial files
//! left by earlier runs. All progress flows through one shared
//! [`Statistics`] tracker that also drives admission of new transfers.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mirror_dl::{
//!     Downloader, ListingClient, NoProgress, Statistics, SyncConfig, Syncer, crawl_remote,
//! };
//!
//! # async fn example() -> mirror_dl::Result<()> {
//! let http = reqwest::Client::new();
//! let lister = ListingClient::new(http.clone(), "https://www.premiumize.me/api", Some("key".into()));
//!
//! // Crawl the account root, sub-folders included
//! let tree = crawl_remote(&lister, "", "", true).await?;
//!
//! let config = SyncConfig::new().with_threads(3);
//! let stats = Arc::new(Statistics::new(config.idle_timeout_duration()));
//! let syncer = Syncer::new(Downloader::new(http, config.chunk_size), stats, &config, "/srv/mirror");
//!
//! let session = syncer.run(&tree, Arc::new(NoProgress)).await?;
//! println!("Downloaded {} files", session.files_downloaded);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod api;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod crawl;
pub mod diff;
pub mod download;
pub mod error;
pub mod format;
pub mod fs;
pub mod lock;
pub mod net;
pub mod stats;
pub mod sync;
pub mod tree;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use api::{FolderLister, FolderListing, ListingClient, ListingEntry};
pub use config::{AppConfig, SyncConfig};
pub use crawl::{build_local_tree, crawl_remote, locate_folder};
pub use diff::{DiffReport, SizeMismatch, diff_trees};
pub use download::Downloader;
pub use error::{Error, Result};
pub use format::{format_bytes, format_duration};
pub use fs::{FileSystem, TokioFileSystem};
pub use lock::FolderLock;
pub use stats::{DownloadTask, SessionStats, Statistics, StatsSnapshot};
pub use sync::{NoProgress, ProgressReporter, StopReason, Syncer};
pub use tree::{DirectoryNode, FileNode};
