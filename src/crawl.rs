//! Builds [`DirectoryNode`] trees from the remote listing API or a local path.

use std::path::Path;

use chrono::DateTime;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::api::{EntryKind, FolderLister};
use crate::error::{Error, Result};
use crate::tree::{DirectoryNode, FileNode, join_path};

/// Name of the implicit top-level folder in human folder paths.
const ROOT_CRUMB: &str = "My Files";

/// Resolves a human folder path such as `"My Files/Movies/2024"` to a folder id.
///
/// A leading `My Files` or `/` denotes the account root; an empty path is the
/// root itself (id `""`).
///
/// # Errors
///
/// Returns [`Error::FolderNotFound`] if a path component does not exist, or
/// the listing error if the API fails.
pub async fn locate_folder(lister: &dyn FolderLister, path: &str) -> Result<String> {
    let trimmed = path.strip_prefix(ROOT_CRUMB).unwrap_or(path);
    let mut folder_id = String::new();

    for crumb in trimmed.split('/').filter(|c| !c.is_empty()) {
        let listing = lister.list_folder(&folder_id).await?;
        folder_id = listing
            .content
            .into_iter()
            .find(|entry| entry.kind == EntryKind::Folder && entry.name == crumb)
            .map(|entry| entry.id)
            .ok_or_else(|| Error::FolderNotFound(path.to_string()))?;
    }
    Ok(folder_id)
}

/// Crawls a remote folder into a tree.
///
/// The folder's `path` is `prefix` joined with its own name and is reused as
/// the destination directory of its files. Sub-folders are only descended
/// when `recursive` is set.
///
/// # Errors
///
/// Any listing failure in the subtree makes the whole crawl fail with
/// [`Error::Crawl`].
pub fn crawl_remote<'a>(
    lister: &'a dyn FolderLister,
    prefix: &'a str,
    folder_id: &'a str,
    recursive: bool,
) -> BoxFuture<'a, Result<DirectoryNode>> {
    async move {
        let listing = lister
            .list_folder(folder_id)
            .await
            .map_err(|e| Error::Crawl {
                folder: folder_id.to_string(),
                source: Box::new(e),
            })?;

        let path = join_path(prefix, &listing.name);
        let id = if listing.folder_id.is_empty() {
            folder_id.to_string()
        } else {
            listing.folder_id
        };
        let mut dir = DirectoryNode::new(id, path.clone(), listing.name);

        for entry in listing.content {
            match entry.kind {
                EntryKind::Folder if recursive => {
                    let child = crawl_remote(lister, &path, &entry.id, recursive).await?;
                    if !dir.add_directory(child) {
                        log::warn!("Duplicate folder name '{}' in {path}, skipped", entry.name);
                    }
                }
                EntryKind::Folder => {}
                EntryKind::File => {
                    let mut file = FileNode::new(
                        entry.id,
                        path.clone(),
                        entry.name,
                        entry.size.unwrap_or(0),
                    );
                    file.link = entry.link;
                    file.created = entry
                        .created_at
                        .and_then(|secs| DateTime::from_timestamp(secs, 0));
                    let name = file.name.clone();
                    if !dir.add_file(file) {
                        log::warn!("Duplicate file name '{name}' in {path}, skipped");
                    }
                }
            }
        }

        log::debug!(
            "Crawled {path}: {} file(s), {} byte(s)",
            dir.file_count(),
            dir.total_size()
        );
        Ok(dir)
    }
    .boxed()
}

/// Walks a local directory into a tree.
///
/// Symbolic links are neither followed nor recorded. Every sub-directory is
/// descended.
///
/// # Errors
///
/// Returns [`Error::NotADirectory`] if `root` is not a directory; any other
/// filesystem error aborts the whole build.
pub fn build_local_tree(root: &Path) -> Result<DirectoryNode> {
    let abs = std::path::absolute(root)?;
    if !std::fs::metadata(&abs)?.is_dir() {
        return Err(Error::NotADirectory(abs));
    }
    build_local_dir(&abs)
}

fn build_local_dir(dir_path: &Path) -> Result<DirectoryNode> {
    let path = dir_path.to_string_lossy().into_owned();
    let name = dir_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut dir = DirectoryNode::new(path.clone(), path.clone(), name);

    for entry in std::fs::read_dir(dir_path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let full = entry.path();

        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            dir.add_directory(build_local_dir(&full)?);
        } else if file_type.is_file() {
            let size = entry.metadata()?.len();
            dir.add_file(FileNode::new(
                full.to_string_lossy().into_owned(),
                path.clone(),
                entry.file_name().to_string_lossy().into_owned(),
                size,
            ));
        }
    }

    Ok(dir)
}
