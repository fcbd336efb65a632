//! Local-versus-remote tree comparison with optional repair.

use std::path::Path;

use crate::format::format_bytes;
use crate::tree::{DirectoryNode, join_path};

/// A file present on both sides with different sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeMismatch {
    /// Path relative to the sync root, starting with the root folder name.
    pub path: String,
    pub local_size: u64,
    pub remote_size: u64,
}

/// Outcome of [`diff_trees`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffReport {
    /// Local files without a remote counterpart.
    pub missing_in_remote: Vec<String>,
    /// Files present on both sides whose sizes differ.
    pub size_mismatches: Vec<SizeMismatch>,
    /// Local files deleted in repair mode.
    pub removed: Vec<String>,
    /// Files present on both sides with equal size.
    pub matched_count: usize,
    /// Files present on both sides.
    pub checked_count: usize,
}

impl DiffReport {
    /// True when nothing is missing remotely and no size differs.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing_in_remote.is_empty() && self.size_mismatches.is_empty()
    }
}

/// Compares `local` against `remote` by relative path.
///
/// Only the local tree is walked; the remote tree is the lookup side. With
/// `repair` set, every size-mismatched local file is deleted.
#[must_use]
pub fn diff_trees(local: &DirectoryNode, remote: &DirectoryNode, repair: bool) -> DiffReport {
    let mut report = DiffReport::default();
    walk(local, Some(remote), remote.name(), repair, &mut report);
    report
}

fn walk(
    local: &DirectoryNode,
    remote: Option<&DirectoryNode>,
    rel: &str,
    repair: bool,
    report: &mut DiffReport,
) {
    for (name, local_file) in local.files() {
        let rel_path = join_path(rel, name);
        let Some(remote_file) = remote.and_then(|r| r.files().get(name)) else {
            report.missing_in_remote.push(rel_path);
            continue;
        };

        report.checked_count += 1;
        if local_file.size == remote_file.size {
            report.matched_count += 1;
            continue;
        }

        log::warn!(
            "Size mismatch: {rel_path} (local: {} vs remote: {})",
            format_bytes(local_file.size),
            format_bytes(remote_file.size)
        );
        report.size_mismatches.push(SizeMismatch {
            path: rel_path.clone(),
            local_size: local_file.size,
            remote_size: remote_file.size,
        });

        if repair {
            match std::fs::remove_file(Path::new(&local_file.id)) {
                Ok(()) => {
                    log::info!("Removed {}", local_file.id);
                    report.removed.push(rel_path);
                }
                Err(e) => log::error!("Failed to remove {}: {e}", local_file.id),
            }
        }
    }

    for (name, local_dir) in local.directories() {
        let remote_dir = remote.and_then(|r| r.directories().get(name));
        walk(local_dir, remote_dir, &join_path(rel, name), repair, report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::build_local_tree;
    use crate::tree::FileNode;
    use tempfile::TempDir;

    fn tree(name: &str, files: &[(&str, u64)]) -> DirectoryNode {
        let mut dir = DirectoryNode::new(name, name, name);
        for (file, size) in files {
            dir.add_file(FileNode::new(format!("{name}/{file}"), name, *file, *size));
        }
        dir
    }

    #[test]
    fn tree_against_itself_is_clean() {
        let mut root = tree("root", &[("a", 1), ("b", 2)]);
        root.add_directory(tree("sub", &[("c", 3)]));

        let report = diff_trees(&root, &root, false);
        assert!(report.is_clean());
        assert_eq!(report.matched_count, 3);
        assert_eq!(report.checked_count, 3);
        assert_eq!(report.checked_count as u64, root.file_count());
    }

    #[test]
    fn size_difference_is_a_mismatch() {
        let local = tree("root", &[("a", 10), ("b", 20)]);
        let remote = tree("root", &[("a", 10), ("b", 99)]);

        let report = diff_trees(&local, &remote, false);
        assert!(report.missing_in_remote.is_empty());
        assert_eq!(
            report.size_mismatches,
            vec![SizeMismatch {
                path: "root/b".into(),
                local_size: 20,
                remote_size: 99,
            }]
        );
        assert_eq!(report.matched_count, 1);
        assert_eq!(report.checked_count, 2);
        assert!(!report.is_clean());
    }

    #[test]
    fn local_only_files_and_dirs_are_missing_in_remote() {
        let mut local = tree("root", &[("a", 1), ("extra", 5)]);
        local.add_directory(tree("only_local", &[("x", 1), ("y", 2)]));
        let remote = tree("root", &[("a", 1), ("remote_only", 9)]);

        let report = diff_trees(&local, &remote, false);
        assert_eq!(
            report.missing_in_remote,
            vec!["root/extra", "root/only_local/x", "root/only_local/y"]
        );
        assert_eq!(report.checked_count, 1);
        assert!(report.size_mismatches.is_empty());
    }

    #[test]
    fn repair_deletes_mismatched_local_files() {
        let dir = TempDir::new().unwrap();
        let local_root = dir.path().join("Show");
        std::fs::create_dir_all(local_root.join("S01")).unwrap();
        std::fs::write(local_root.join("ok.bin"), vec![0u8; 4]).unwrap();
        std::fs::write(local_root.join("S01/partial.bin"), vec![0u8; 3]).unwrap();

        let mut remote = tree("Show", &[("ok.bin", 4)]);
        let mut season = DirectoryNode::new("s1", "Show/S01", "S01");
        season.add_file(FileNode::new("p", "Show/S01", "partial.bin", 8));
        remote.add_directory(season);

        let local = build_local_tree(&local_root).unwrap();
        let report = diff_trees(&local, &remote, true);

        assert_eq!(report.size_mismatches.len(), 1);
        assert_eq!(report.removed, vec!["Show/S01/partial.bin"]);
        assert!(!local_root.join("S01/partial.bin").exists());
        assert!(local_root.join("ok.bin").exists());
    }

    #[test]
    fn analysis_does_not_delete() {
        let dir = TempDir::new().unwrap();
        let local_root = dir.path().join("Show");
        std::fs::create_dir_all(&local_root).unwrap();
        std::fs::write(local_root.join("a.bin"), vec![0u8; 3]).unwrap();

        let remote = tree("Show", &[("a.bin", 8)]);
        let local = build_local_tree(&local_root).unwrap();
        let report = diff_trees(&local, &remote, false);

        assert_eq!(report.size_mismatches.len(), 1);
        assert!(report.removed.is_empty());
        assert!(local_root.join("a.bin").exists());
    }
}
