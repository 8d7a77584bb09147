//! A filesystem directory standing in for one side of a reconciliation.
//!
//! Files are keyed by their full path, with the directory path (ending in `/`)
//! acting as the prefix. File contents are read and written as raw bytes.
//! Applying a diff here is sequential and stops at the first failure; there is
//! no atomicity.
//!
//! Every suffix must be a relative path that stays below the directory.
//! Suffixes that are absolute or climb out with `..` are rejected before the
//! filesystem is touched.

use crate::{
    diff::{KeyCollection, KeysDiff},
    error::Result,
    Error, RangeKey,
};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

/// Default mode for created files and directories.
pub const DEFAULT_MODE: u32 = 0o700;

/// Unix modes used when the directory is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilePermissions {
    pub files: u32,
    pub directories: u32,
}

impl Default for FilePermissions {
    fn default() -> Self {
        Self {
            files: DEFAULT_MODE,
            directories: DEFAULT_MODE,
        }
    }
}

/// Parse an octal mode such as `0700` or `644`.
pub fn parse_mode(mode: &str) -> Option<u32> {
    u32::from_str_radix(mode, 8).ok().filter(|m| *m <= 0o777)
}

/// The prefix under which files of `path` are keyed: the absolute directory
/// path with a trailing `/`.
pub fn directory_prefix(path: &Path) -> Result<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| Error::io(path, e))?
            .join(path)
    };

    let mut prefix = absolute
        .to_str()
        .ok_or_else(|| Error::NonUtf8Path(absolute.clone()))?
        .to_string();
    if !prefix.ends_with('/') {
        prefix.push('/');
    }
    Ok(prefix)
}

/// Create `path` with `mode` if it does not exist yet. Parents must exist.
pub fn ensure_directory_exists(path: &Path, mode: u32) -> Result<()> {
    if path.exists() {
        return Ok(());
    }
    tracing::debug!(path = %path.display(), "creating directory");
    dir_builder(mode, false)
        .create(path)
        .map_err(|e| Error::io(path, e))
}

/// Read every regular file below `path`.
pub fn directory_content(path: &Path) -> Result<KeyCollection> {
    let prefix = directory_prefix(path)?;
    let mut keys = KeyCollection::new();

    for entry in walkdir::WalkDir::new(path).follow_links(false) {
        let entry = entry.map_err(|e| {
            let at = e.path().unwrap_or(path).to_path_buf();
            Error::io(at, e.into())
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(path)
            .unwrap_or(entry.path())
            .to_str()
            .ok_or_else(|| Error::NonUtf8Path(entry.path().to_path_buf()))?;
        let content = fs::read(entry.path()).map_err(|e| Error::io(entry.path(), e))?;

        let key = format!("{prefix}{relative}");
        keys.insert(key.clone(), RangeKey::detached(key, content));
    }

    tracing::debug!(path = %path.display(), files = keys.len(), "read directory");
    Ok(keys)
}

/// Resolve `suffix` below `path`, refusing anything that would leave it.
fn file_path(path: &Path, suffix: &str) -> Result<PathBuf> {
    let relative = Path::new(suffix);
    let escapes = relative.components().any(|c| {
        matches!(
            c,
            Component::RootDir | Component::Prefix(_) | Component::ParentDir
        )
    });
    if suffix.is_empty() || escapes {
        return Err(Error::UnsafePath {
            suffix: suffix.to_string(),
        });
    }
    Ok(path.join(relative))
}

/// Apply `diff` to the files below `path`.
///
/// Deleted suffixes are removed, upserted suffixes are written in full,
/// creating parent directories as needed. All suffixes are checked before the
/// first change is made.
pub fn apply_diff_to_directory(
    path: &Path,
    diff: &KeysDiff,
    permissions: FilePermissions,
) -> Result<()> {
    let deletions = diff
        .deletions
        .iter()
        .map(|suffix| file_path(path, suffix))
        .collect::<Result<Vec<_>>>()?;
    let upserts = diff
        .upserts
        .iter()
        .map(|(suffix, content)| Ok((file_path(path, suffix)?, content)))
        .collect::<Result<Vec<_>>>()?;

    for file in deletions {
        fs::remove_file(&file).map_err(|e| Error::io(file, e))?;
    }

    for (file, content) in upserts {
        write_file(&file, content, permissions)?;
    }

    Ok(())
}

fn write_file(file: &Path, content: &[u8], permissions: FilePermissions) -> Result<()> {
    if let Some(parent) = file.parent() {
        dir_builder(permissions.directories, true)
            .create(parent)
            .map_err(|e| Error::io(parent, e))?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(permissions.files);
    }

    let mut handle = options.open(file).map_err(|e| Error::io(file, e))?;
    handle.write_all(content).map_err(|e| Error::io(file, e))
}

fn dir_builder(mode: u32, recursive: bool) -> fs::DirBuilder {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(recursive);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = mode;
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn contents(dir: &Path) -> BTreeMap<String, Vec<u8>> {
        let prefix = directory_prefix(dir).unwrap();
        directory_content(dir)
            .unwrap()
            .into_values()
            .map(|k| (k.key.strip_prefix(&prefix).unwrap().to_string(), k.value))
            .collect()
    }

    #[test]
    fn prefix_is_absolute_with_trailing_slash() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = directory_prefix(dir.path()).unwrap();
        assert!(prefix.starts_with('/'));
        assert!(prefix.ends_with('/'));
        assert!(!prefix.ends_with("//"));
    }

    #[test]
    fn content_is_keyed_by_full_path() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested/deeper")).unwrap();
        fs::write(dir.path().join("top.conf"), "a=1").unwrap();
        fs::write(dir.path().join("nested/deeper/leaf"), "leaf").unwrap();

        let keys = directory_content(dir.path()).unwrap();
        let prefix = directory_prefix(dir.path()).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[&format!("{prefix}top.conf")].value, b"a=1");
        assert_eq!(keys[&format!("{prefix}nested/deeper/leaf")].value, b"leaf");
        assert_eq!(keys[&format!("{prefix}top.conf")].version, 0);
    }

    #[test]
    fn empty_directory_has_no_keys() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        assert!(directory_content(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn apply_writes_and_removes_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stale"), "old").unwrap();
        fs::write(dir.path().join("keep"), "longer previous content").unwrap();

        let mut diff = KeysDiff::new();
        diff.deletions.insert("stale".into());
        diff.upserts.insert("keep".into(), "new".into());
        diff.upserts.insert("a/b/c".into(), "deep".into());

        apply_diff_to_directory(dir.path(), &diff, FilePermissions::default()).unwrap();

        assert_eq!(
            contents(dir.path()),
            BTreeMap::from([
                ("a/b/c".to_string(), b"deep".to_vec()),
                ("keep".to_string(), b"new".to_vec()),
            ])
        );
    }

    #[test]
    fn apply_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut diff = KeysDiff::new();
        diff.deletions.insert("missing".into());
        diff.upserts.insert("never".into(), "written".into());

        let err =
            apply_diff_to_directory(dir.path(), &diff, FilePermissions::default()).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert!(!dir.path().join("never").exists());
    }

    #[cfg(unix)]
    #[test]
    fn created_files_use_configured_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let mut diff = KeysDiff::new();
        diff.upserts.insert("sub/file".into(), "x".into());
        let permissions = FilePermissions {
            files: 0o600,
            directories: 0o750,
        };

        apply_diff_to_directory(dir.path(), &diff, permissions).unwrap();

        let mode = |p: &str| fs::metadata(dir.path().join(p)).unwrap().permissions().mode();
        let (file_mode, dir_mode) = (mode("sub/file"), mode("sub"));
        // umask may only clear bits
        assert_eq!(file_mode & 0o777 & !0o600, 0);
        assert_eq!(dir_mode & 0o777 & !0o750, 0);
    }

    #[test]
    fn ensure_directory_creates_once() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("mirror");
        ensure_directory_exists(&target, DEFAULT_MODE).unwrap();
        assert!(target.is_dir());
        ensure_directory_exists(&target, DEFAULT_MODE).unwrap();
    }

    #[test]
    fn parse_modes() {
        assert_eq!(parse_mode("0700"), Some(0o700));
        assert_eq!(parse_mode("644"), Some(0o644));
        assert_eq!(parse_mode("0800"), None);
        assert_eq!(parse_mode("1777"), None);
    }

    #[test]
    fn binary_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("blob"), [0xff, 0x00, 0xfe]).unwrap();
        assert_eq!(
            contents(dir.path()),
            BTreeMap::from([("blob".to_string(), vec![0xff, 0x00, 0xfe])])
        );

        let mut diff = KeysDiff::new();
        diff.upserts.insert("copy".into(), vec![0x00, 0x80]);
        apply_diff_to_directory(dir.path(), &diff, FilePermissions::default()).unwrap();
        assert_eq!(fs::read(dir.path().join("copy")).unwrap(), vec![0x00, 0x80]);
    }

    #[test]
    fn absolute_suffix_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("target");
        let outside = root.path().join("outside.txt");
        fs::create_dir(&target).unwrap();

        let mut diff = KeysDiff::new();
        diff.upserts.insert("fine".into(), b"ok".to_vec());
        diff.upserts
            .insert(outside.to_str().unwrap().to_string(), b"escaped".to_vec());

        let err = apply_diff_to_directory(&target, &diff, FilePermissions::default()).unwrap_err();
        assert!(matches!(err, Error::UnsafePath { .. }));
        assert!(!outside.exists());
        // Nothing is written once any suffix is rejected.
        assert!(!target.join("fine").exists());
    }

    #[test]
    fn parent_suffix_is_rejected() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("target");
        fs::create_dir(&target).unwrap();
        fs::write(root.path().join("kept"), "x").unwrap();

        let mut upsert = KeysDiff::new();
        upsert.upserts.insert("../escaped".into(), b"x".to_vec());
        let err =
            apply_diff_to_directory(&target, &upsert, FilePermissions::default()).unwrap_err();
        assert!(matches!(err, Error::UnsafePath { ref suffix } if suffix == "../escaped"));
        assert!(!root.path().join("escaped").exists());

        let mut delete = KeysDiff::new();
        delete.deletions.insert("sub/../../kept".into());
        let err =
            apply_diff_to_directory(&target, &delete, FilePermissions::default()).unwrap_err();
        assert!(matches!(err, Error::UnsafePath { .. }));
        assert!(root.path().join("kept").exists());
    }
}
