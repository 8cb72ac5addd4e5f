use std::collections::HashSet;
use std::fs::Metadata;
use std::path::Path;

use globset::{Glob, GlobMatcher};
use once_cell::sync::Lazy;
use walkdir::WalkDir;

use crate::error::{PlacementError, Result};

/// Snapshot artifacts never count against a share's allocation.
pub const SNAPSHOT_PATTERN: &str = "*snapshot*";

static SNAPSHOT_MATCHER: Lazy<std::result::Result<GlobMatcher, globset::Error>> =
    Lazy::new(|| Glob::new(SNAPSHOT_PATTERN).map(|glob| glob.compile_matcher()));

/// Case-sensitive match over a path relative to the walked root.
fn snapshot_matcher() -> Result<&'static GlobMatcher> {
    SNAPSHOT_MATCHER
        .as_ref()
        .map_err(|err| PlacementError::config(format!("invalid snapshot pattern: {err}")))
}

/// Apparent-size total under `root`, like `du -sb --apparent-size`: every
/// entry's logical length (root and directories included, symlinks not
/// followed, hard links once), with snapshot subtrees pruned.
pub fn apparent_usage(root: &Path) -> Result<u64> {
    let snapshots = snapshot_matcher()?;
    let mut total = 0_u64;
    let mut seen_inodes = HashSet::new();

    let iter = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            match entry.path().strip_prefix(root) {
                Ok(relative) => !snapshots.is_match(relative),
                Err(_) => true,
            }
        });

    for item in iter {
        let entry = item.map_err(|err| {
            PlacementError::capacity(root.display().to_string(), format!("walk error: {err}"))
        })?;
        let metadata = entry.metadata().map_err(|err| {
            PlacementError::capacity(
                root.display().to_string(),
                format!("metadata read failed for {}: {err}", entry.path().display()),
            )
        })?;
        if !first_sighting(&metadata, &mut seen_inodes) {
            continue;
        }
        total = total.saturating_add(metadata.len());
    }

    Ok(total)
}

#[cfg(unix)]
fn first_sighting(metadata: &Metadata, seen: &mut HashSet<(u64, u64)>) -> bool {
    use std::os::unix::fs::MetadataExt;

    if metadata.is_dir() || metadata.nlink() <= 1 {
        return true;
    }
    seen.insert((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn first_sighting(_metadata: &Metadata, _seen: &mut HashSet<(u64, u64)>) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use std::fs::{self, File};
    use std::path::Path;

    use super::{apparent_usage, snapshot_matcher};

    fn write_bytes(path: &Path, len: usize) {
        fs::write(path, vec![7_u8; len]).expect("write file");
    }

    #[test]
    fn snapshot_matcher_checks_every_component_case_sensitively() {
        let matcher = snapshot_matcher().expect("snapshot glob");
        assert!(matcher.is_match(Path::new("volume-1.snapshot-2")));
        assert!(matcher.is_match(Path::new("snapshots/volume-1")));
        assert!(matcher.is_match(Path::new("a/pre_snapshot_b/c.img")));
        assert!(!matcher.is_match(Path::new("volume-1")));
        assert!(!matcher.is_match(Path::new("Snapshot-old/volume-1")));
    }

    // Entries are created before the baseline and only resized afterwards, so
    // directory sizes (which grow with entry count on some filesystems) stay fixed.
    #[test]
    fn walk_skips_snapshot_files_and_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        write_bytes(&root.join("volume-a"), 4096);
        write_bytes(&root.join("volume-b"), 0);
        write_bytes(&root.join("volume-a.snapshot-1"), 10_000);
        fs::create_dir(root.join("snapshots")).expect("mkdir");
        write_bytes(&root.join("snapshots").join("volume-a.img"), 20_000);
        let baseline = apparent_usage(root).expect("walk");
        assert!(baseline >= 4096);
        assert!(baseline < 4096 + 10_000);

        write_bytes(&root.join("volume-a.snapshot-1"), 50_000);
        write_bytes(&root.join("snapshots").join("volume-a.img"), 60_000);
        assert_eq!(
            apparent_usage(root).expect("walk"),
            baseline
        );

        write_bytes(&root.join("volume-b"), 1000);
        assert_eq!(
            apparent_usage(root).expect("walk"),
            baseline + 1000
        );
    }

    #[test]
    fn sparse_files_count_by_logical_length() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let sparse = File::create(root.join("volume-sparse")).expect("create");
        let baseline = apparent_usage(root).expect("walk");

        sparse.set_len(5 * 1_073_741_824).expect("set_len");
        drop(sparse);

        assert_eq!(
            apparent_usage(root).expect("walk"),
            baseline + 5 * 1_073_741_824
        );
    }

    #[cfg(unix)]
    #[test]
    fn hard_links_are_counted_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        write_bytes(&root.join("volume-a"), 3000);
        fs::hard_link(root.join("volume-a"), root.join("volume-a-link")).expect("link");
        let before = apparent_usage(root).expect("walk");

        // Rewriting truncates in place, so both names still share the inode.
        write_bytes(&root.join("volume-a"), 6000);
        assert_eq!(
            apparent_usage(root).expect("walk"),
            before + 3000
        );
    }

    #[test]
    fn missing_root_is_a_capacity_error() {
        let err = apparent_usage(Path::new("/nonexistent/share-placer"))
            .expect_err("walk fails");
        assert!(matches!(
            err,
            crate::error::PlacementError::CapacityQuery { .. }
        ));
    }
}
