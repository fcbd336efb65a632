//! Remote listing collaborator.
//!
//! The engine only consumes [`FolderListing`] values; how they are fetched is
//! behind the [`FolderLister`] trait so crawls can run against any source.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Kind of a listing entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

/// One child of a listed folder.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ListingEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub link: Option<String>,
    /// Unix timestamp in seconds.
    #[serde(default)]
    pub created_at: Option<i64>,
}

/// Contents of one remote folder.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FolderListing {
    #[serde(default)]
    pub folder_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub content: Vec<ListingEntry>,
}

/// Source of remote folder listings.
#[async_trait]
pub trait FolderLister: Send + Sync {
    /// Lists the direct children of `folder_id` (empty id is the account root).
    async fn list_folder(&self, folder_id: &str) -> Result<FolderListing>;
}

#[derive(Deserialize)]
struct ListingResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(flatten)]
    listing: FolderListing,
}

/// HTTP client for a `folder/list` style listing API.
#[derive(Debug, Clone)]
pub struct ListingClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ListingClient {
    /// Creates a client for the API at `base_url`.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Returns the configured base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl FolderLister for ListingClient {
    async fn list_folder(&self, folder_id: &str) -> Result<FolderListing> {
        let mut request = self
            .http
            .get(format!("{}/folder/list", self.base_url))
            .query(&[("id", folder_id)]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        log::debug!("Listing folder '{folder_id}'");
        let response: ListingResponse = request.send().await?.error_for_status()?.json().await?;

        if response.status != "success" {
            return Err(Error::Listing {
                folder: folder_id.to_string(),
                message: response
                    .message
                    .unwrap_or_else(|| format!("status {}", response.status)),
            });
        }
        Ok(response.listing)
    }
}
