//! In-memory mirror of a folder hierarchy, remote or local.
//!
//! A tree is built once by the crawler and is read-only afterwards. Size and
//! file-count aggregates are maintained as children are attached, so every
//! [`DirectoryNode`] always reports the totals of its whole subtree.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// One file inside a [`DirectoryNode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNode {
    /// Remote object id or absolute local path.
    pub id: String,
    /// Destination directory, `/`-separated.
    pub path: String,
    /// File name.
    pub name: String,
    /// Authoritative size in bytes.
    pub size: u64,
    /// Transient download link, only set for remote files.
    pub link: Option<String>,
    /// Creation time reported by the source.
    pub created: Option<DateTime<Utc>>,
}

impl FileNode {
    /// Creates a file node without link or creation time.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        path: impl Into<String>,
        name: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            name: name.into(),
            size,
            link: None,
            created: None,
        }
    }

    /// Sets the download link.
    #[must_use]
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Sets the creation time.
    #[must_use]
    pub const fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    /// Destination path of the file relative to the sync root.
    #[must_use]
    pub fn full_path(&self) -> String {
        join_path(&self.path, &self.name)
    }
}

/// One folder and everything below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryNode {
    id: String,
    path: String,
    name: String,
    directories: BTreeMap<String, DirectoryNode>,
    files: BTreeMap<String, FileNode>,
    total_size: u64,
    file_count: u64,
}

impl DirectoryNode {
    /// Creates an empty directory node.
    #[must_use]
    pub fn new(id: impl Into<String>, path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            name: name.into(),
            directories: BTreeMap::new(),
            files: BTreeMap::new(),
            total_size: 0,
            file_count: 0,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total bytes of every file in this subtree.
    #[must_use]
    pub const fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Number of files in this subtree.
    #[must_use]
    pub const fn file_count(&self) -> u64 {
        self.file_count
    }

    /// Sub-directories keyed by name.
    #[must_use]
    pub const fn directories(&self) -> &BTreeMap<String, Self> {
        &self.directories
    }

    /// Files directly inside this directory keyed by name.
    #[must_use]
    pub const fn files(&self) -> &BTreeMap<String, FileNode> {
        &self.files
    }

    /// Attaches a file and folds its size into the aggregates.
    ///
    /// Returns `false` (and leaves the node untouched) when a file with the
    /// same name is already present.
    pub fn add_file(&mut self, file: FileNode) -> bool {
        if self.files.contains_key(&file.name) {
            return false;
        }
        self.total_size += file.size;
        self.file_count += 1;
        self.files.insert(file.name.clone(), file);
        true
    }

    /// Attaches a fully built sub-directory and folds its aggregates in.
    ///
    /// Returns `false` when a directory with the same name is already present.
    pub fn add_directory(&mut self, dir: Self) -> bool {
        if self.directories.contains_key(&dir.name) {
            return false;
        }
        self.total_size += dir.total_size;
        self.file_count += dir.file_count;
        self.directories.insert(dir.name.clone(), dir);
        true
    }

    /// Looks up a descendant directory by a `/`-separated path.
    #[must_use]
    pub fn find_directory(&self, rel_path: &str) -> Option<&Self> {
        rel_path
            .split('/')
            .filter(|part| !part.is_empty())
            .try_fold(self, |dir, part| dir.directories.get(part))
    }

    /// Files in scheduler order: this directory's files by name, then each
    /// sub-directory (by name) depth-first.
    #[must_use]
    pub fn dispatch_order(&self) -> Vec<&FileNode> {
        let mut out = Vec::with_capacity(usize::try_from(self.file_count).unwrap_or(0));
        self.collect_in_order(&mut out);
        out
    }

    fn collect_in_order<'a>(&'a self, out: &mut Vec<&'a FileNode>) {
        out.extend(self.files.values());
        for dir in self.directories.values() {
            dir.collect_in_order(out);
        }
    }
}

/// Joins two `/`-separated path fragments, skipping empty ones.
#[must_use]
pub fn join_path(parent: &str, name: &str) -> String {
    match (parent.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (false, true) => parent.to_string(),
        (false, false) => format!("{}/{name}", parent.trim_end_matches('/')),
    }
}
