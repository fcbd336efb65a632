//! Resumable single-file transfers.

use std::path::Path;

use reqwest::StatusCode;
use reqwest::header::{ACCEPT_RANGES, CONTENT_RANGE, HeaderMap, RANGE};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::fs::{FileSystem, TokioFileSystem};
use crate::stats::{DownloadTask, Statistics};

/// Non-standard header some servers use instead of `Accept-Ranges`.
const RANGES_SUPPORTED: &str = "ranges-supported";

/// Default size of each streamed write increment.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

fn header_is_bytes(headers: &HeaderMap, name: &str) -> bool {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("bytes"))
}

/// Whether a HEAD response advertises byte-range support.
#[must_use]
pub fn head_supports_ranges(headers: &HeaderMap) -> bool {
    header_is_bytes(headers, ACCEPT_RANGES.as_str()) || header_is_bytes(headers, RANGES_SUPPORTED)
}

/// Performs one file transfer at a time; shared by all workers.
pub struct Downloader<F: FileSystem = TokioFileSystem> {
    client: reqwest::Client,
    fs: F,
    chunk_size: usize,
}

impl Downloader<TokioFileSystem> {
    /// Creates a downloader writing through `tokio::fs`.
    #[must_use]
    pub fn new(client: reqwest::Client, chunk_size: usize) -> Self {
        Self::with_fs(client, chunk_size, TokioFileSystem)
    }
}

impl<F: FileSystem> Downloader<F> {
    /// Creates a downloader with a custom file system implementation.
    #[must_use]
    pub fn with_fs(client: reqwest::Client, chunk_size: usize, fs: F) -> Self {
        Self {
            client,
            fs,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Returns a reference to the underlying HTTP client.
    #[must_use]
    pub const fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Size of each streamed increment.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Asks the source whether byte ranges are honoured.
    ///
    /// Tries HEAD first; if that fails or is refused, falls back to a one-byte
    /// ranged GET and looks for `Content-Range`.
    ///
    /// # Errors
    ///
    /// Returns an error if the fallback request fails.
    pub async fn probe(&self, url: &str) -> Result<bool> {
        match self.client.head(url).send().await {
            Ok(response) if response.status().is_success() => {
                Ok(head_supports_ranges(response.headers()))
            }
            Ok(response) => {
                log::debug!("HEAD {url} returned {}, probing with a ranged GET", response.status());
                self.probe_with_range(url).await
            }
            Err(e) => {
                log::debug!("HEAD {url} failed ({e}), probing with a ranged GET");
                self.probe_with_range(url).await
            }
        }
    }

    async fn probe_with_range(&self, url: &str) -> Result<bool> {
        let response = self
            .client
            .get(url)
            .header(RANGE, "bytes=0-0")
            .send()
            .await?
            .error_for_status()?;
        Ok(response.headers().contains_key(CONTENT_RANGE))
    }

    async fn ensure_parent_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.fs.create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Transfers `task` into its destination, resuming from the bytes
    /// already on disk when the source allows it.
    ///
    /// Bytes found on disk are counted as downloaded before any network
    /// traffic. A source without range support restarts the file from zero.
    ///
    /// # Errors
    ///
    /// Probe, open and request errors are returned before anything is
    /// written. Errors while streaming are returned after flushing, leaving
    /// the partial file for a later run.
    pub async fn download(&self, task: &DownloadTask, stats: &Statistics) -> Result<()> {
        let location = task.location();
        let resumable = self
            .probe(task.url())
            .await
            .inspect_err(|e| log::warn!("Not downloading {location} because of error: {e}"))?;

        let path = Path::new(location);
        self.ensure_parent_dir(path).await?;
        let mut file = self.fs.open_append(path).await?;
        let mut offset = file.metadata().await?.len();

        if offset > 0 && !resumable {
            log::info!("{location}: source cannot resume, restarting from zero");
            file.set_len(0).await?;
            offset = 0;
        }

        task.set_downloaded(offset);
        stats.add_resumed(offset);

        if offset >= task.size() {
            log::debug!("{location}: already complete ({offset} bytes on disk)");
            return Ok(());
        }

        let mut request = self.client.get(task.url());
        if resumable {
            request = request.header(RANGE, format!("bytes={offset}-{}", task.size()));
        }
        let mut response = request
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .inspect_err(|e| log::warn!("Not downloading {location} because of error: {e}"))?;

        if offset > 0 && response.status() != StatusCode::PARTIAL_CONTENT {
            log::warn!(
                "{location}: server ignored the range request, restarting from zero"
            );
            file.set_len(0).await?;
            stats.rewind(offset);
            task.set_downloaded(0);
        }

        let streamed = self.stream_body(&mut response, &mut file, task, stats).await;
        let flushed = file.flush().await.map_err(Error::from);
        match streamed.and(flushed) {
            Ok(()) => {
                log::debug!("{location}: done ({} bytes)", task.downloaded());
                Ok(())
            }
            Err(e) => {
                log::warn!(
                    "{location}: stopped at {} of {} bytes: {e}",
                    task.downloaded(),
                    task.size()
                );
                Err(e)
            }
        }
    }

    /// Copies the body in `chunk_size` increments, updating counters after each.
    async fn stream_body(
        &self,
        response: &mut reqwest::Response,
        file: &mut File,
        task: &DownloadTask,
        stats: &Statistics,
    ) -> Result<()> {
        while !task.is_complete() {
            let Some(chunk) = response.chunk().await? else {
                return Err(Error::Download {
                    path: task.location().to_string(),
                    message: format!(
                        "stream ended after {} of {} bytes",
                        task.downloaded(),
                        task.size()
                    ),
                });
            };
            for piece in chunk.chunks(self.chunk_size) {
                file.write_all(piece).await?;
                stats.add_bytes(task, piece.len() as u64);
                if task.is_complete() {
                    break;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FileServer;
    use reqwest::header::HeaderValue;
    use std::time::Duration;
    use tempfile::TempDir;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn stats() -> Statistics {
        Statistics::new(Duration::from_secs(60))
    }

    #[test]
    fn head_range_headers() {
        let mut headers = HeaderMap::new();
        assert!(!head_supports_ranges(&headers));

        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("none"));
        assert!(!head_supports_ranges(&headers));

        headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        assert!(head_supports_ranges(&headers));

        let mut other = HeaderMap::new();
        other.insert(RANGES_SUPPORTED, HeaderValue::from_static("Bytes"));
        assert!(head_supports_ranges(&other));
    }

    #[tokio::test]
    async fn probe_reports_range_support() {
        let server = FileServer::start(vec![("a", payload(10))], true).await;
        let plain = FileServer::start(vec![("a", payload(10))], false).await;
        let dl = Downloader::new(reqwest::Client::new(), 4);

        assert!(dl.probe(&server.url("a")).await.unwrap());
        assert!(!dl.probe(&plain.url("a")).await.unwrap());
    }

    #[tokio::test]
    async fn probe_falls_back_to_ranged_get() {
        let server = FileServer::start(vec![("a", payload(10))], true).await;
        let dl = Downloader::new(reqwest::Client::new(), 4);

        // HEAD on a missing file is refused, so the probe retries with GET.
        let err = dl.probe(&server.url("missing")).await.unwrap_err();
        assert!(matches!(err, Error::Http(_)));
        let methods: Vec<_> = server.requests().into_iter().map(|r| r.method).collect();
        assert_eq!(methods, vec!["HEAD", "GET"]);
        assert_eq!(server.get_ranges(), vec![Some("bytes=0-0".to_string())]);
    }

    #[tokio::test]
    async fn fresh_download_writes_everything() {
        let data = payload(5000);
        let server = FileServer::start(vec![("f.bin", data.clone())], true).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("nested/dir/f.bin");

        let stats = stats();
        let task = DownloadTask::new("f.bin", dest.to_string_lossy(), server.url("f.bin"), 5000);
        let dl = Downloader::new(reqwest::Client::new(), 512);
        dl.download(&task, &stats).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert_eq!(task.downloaded(), 5000);
        assert_eq!(task.delta(), 5000);
        assert_eq!(stats.downloaded(), 5000);
        assert_eq!(stats.delta(), 5000);
        assert_eq!(server.get_ranges(), vec![Some("bytes=0-5000".to_string())]);
    }

    #[tokio::test]
    async fn resumes_from_partial_file() {
        let data = payload(3000);
        let server = FileServer::start(vec![("f.bin", data.clone())], true).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("f.bin");
        std::fs::write(&dest, &data[..1200]).unwrap();

        let stats = stats();
        let task = DownloadTask::new("f.bin", dest.to_string_lossy(), server.url("f.bin"), 3000);
        let dl = Downloader::new(reqwest::Client::new(), 256);
        dl.download(&task, &stats).await.unwrap();

        assert_eq!(server.get_ranges(), vec![Some("bytes=1200-3000".to_string())]);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert_eq!(task.downloaded(), 3000);
        // Only network bytes count as tick traffic.
        assert_eq!(task.delta(), 1800);
        assert_eq!(stats.downloaded(), 3000);
        assert_eq!(stats.delta(), 1800);
    }

    #[tokio::test]
    async fn non_resumable_source_restarts_from_zero() {
        let data = payload(800);
        let server = FileServer::start(vec![("f.bin", data.clone())], false).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("f.bin");
        std::fs::write(&dest, b"stale partial bytes").unwrap();

        let stats = stats();
        let task = DownloadTask::new("f.bin", dest.to_string_lossy(), server.url("f.bin"), 800);
        let dl = Downloader::new(reqwest::Client::new(), 100);
        dl.download(&task, &stats).await.unwrap();

        assert_eq!(server.get_ranges(), vec![None]);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
        assert_eq!(stats.downloaded(), 800);
    }

    #[tokio::test]
    async fn complete_file_issues_no_transfer() {
        let data = payload(64);
        let server = FileServer::start(vec![("f.bin", data.clone())], true).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("f.bin");
        std::fs::write(&dest, &data).unwrap();

        let stats = stats();
        let task = DownloadTask::new("f.bin", dest.to_string_lossy(), server.url("f.bin"), 64);
        Downloader::new(reqwest::Client::new(), 16)
            .download(&task, &stats)
            .await
            .unwrap();

        assert!(server.get_ranges().is_empty());
        assert!(task.is_complete());
        assert_eq!(stats.downloaded(), 64);
        assert_eq!(stats.delta(), 0);
    }

    #[tokio::test]
    async fn short_body_fails_and_keeps_partial() {
        let data = payload(100);
        let server = FileServer::start(vec![("f.bin", data.clone())], false).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("f.bin");

        let stats = stats();
        // The listing claims more bytes than the server has.
        let task = DownloadTask::new("f.bin", dest.to_string_lossy(), server.url("f.bin"), 150);
        let err = Downloader::new(reqwest::Client::new(), 32)
            .download(&task, &stats)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Download { .. }), "unexpected error: {err}");
        assert_eq!(task.downloaded(), 100);
        assert_eq!(std::fs::read(&dest).unwrap(), data);
    }

    #[tokio::test]
    async fn missing_source_fails_without_writing() {
        let server = FileServer::start(vec![], false).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("f.bin");

        let stats = stats();
        let task = DownloadTask::new("f.bin", dest.to_string_lossy(), server.url("gone"), 10);
        let result = Downloader::new(reqwest::Client::new(), 32)
            .download(&task, &stats)
            .await;

        assert!(result.is_err());
        assert_eq!(stats.downloaded(), 0);
        assert_eq!(std::fs::metadata(&dest).map(|m| m.len()).unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn open_failure_is_surfaced() {
        use async_trait::async_trait;

        struct ReadOnlyFs;

        #[async_trait]
        impl FileSystem for ReadOnlyFs {
            async fn create_dir_all(&self, _path: &Path) -> std::io::Result<()> {
                Ok(())
            }

            async fn open_append(&self, _path: &Path) -> std::io::Result<File> {
                Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "mock"))
            }
        }

        let server = FileServer::start(vec![("f.bin", payload(10))], true).await;
        let stats = stats();
        let task = DownloadTask::new("f.bin", "/nowhere/f.bin", server.url("f.bin"), 10);
        let err = Downloader::with_fs(reqwest::Client::new(), 4, ReadOnlyFs)
            .download(&task, &stats)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Io(_)));
        assert!(server.get_ranges().is_empty());
        assert_eq!(task.downloaded(), 0);
    }
}
