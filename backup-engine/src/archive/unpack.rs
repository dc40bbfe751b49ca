use anyhow::Context;
use flate2::read::GzDecoder;
use std::path::{Component, Path};

use crate::error::EngineError;
use crate::fs::dir_is_empty;

#[derive(Debug, Clone)]
pub struct UnpackSummary {
    /// Entries extracted to the destination.
    pub entries_extracted: u64,
}

/// Extract entries under `prefix` from a gzip tar archive into
/// `destination`, stripping the prefix. An empty prefix extracts everything.
///
/// Refuses a non-empty destination unless `overwrite` is set, and rejects
/// any entry whose path is absolute, contains `..` components, or resolves
/// through a symlink to a location outside the destination root.
pub fn unpack(
    archive: &Path,
    prefix: &str,
    destination: &Path,
    overwrite: bool,
) -> crate::Result<UnpackSummary> {
    unpack_inner(archive, prefix, destination, overwrite)
        .map_err(|e| EngineError::archive("unpack", e))
}

fn unpack_inner(
    archive_path: &Path,
    prefix: &str,
    destination: &Path,
    overwrite: bool,
) -> anyhow::Result<UnpackSummary> {
    if !overwrite && !dir_is_empty(destination)? {
        anyhow::bail!("destination directory is not empty; pass overwrite to replace its contents");
    }
    std::fs::create_dir_all(destination).context("failed to create destination directory")?;
    let root = destination
        .canonicalize()
        .context("failed to resolve destination directory")?;

    let file = std::fs::File::open(archive_path).context("failed to open archive")?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);

    let mut extracted = 0u64;

    for entry in archive.entries().context("failed to read archive structure")? {
        let mut entry = entry.context("corrupt archive entry")?;
        let raw = entry.path().context("unreadable entry path")?.into_owned();

        if raw.is_absolute() || raw.components().any(|c| matches!(c, Component::ParentDir)) {
            anyhow::bail!("archive entry escapes the destination root: {}", raw.display());
        }

        let relative = match raw.strip_prefix(prefix) {
            Ok(r) => r,
            Err(_) => continue,
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let target = destination.join(relative);
        ensure_within(&root, &target)?;
        if entry.header().entry_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            entry
                .unpack(&target)
                .with_context(|| format!("failed to extract {}", relative.display()))?;
        }
        extracted += 1;
    }

    Ok(UnpackSummary {
        entries_extracted: extracted,
    })
}

/// The deepest existing ancestor of `target` must resolve inside `root`.
/// A lexically clean entry path can still route a write outside the
/// destination through a symlink extracted by an earlier entry; resolving
/// the existing prefix catches that before anything is written.
fn ensure_within(root: &Path, target: &Path) -> anyhow::Result<()> {
    let mut ancestor = target;
    loop {
        if ancestor.symlink_metadata().is_ok() {
            let resolved = ancestor
                .canonicalize()
                .with_context(|| format!("failed to resolve {}", ancestor.display()))?;
            anyhow::ensure!(
                resolved.starts_with(root),
                "archive entry escapes the destination root: {}",
                target.display()
            );
            return Ok(());
        }
        match ancestor.parent() {
            Some(parent) => ancestor = parent,
            None => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{pack, APP_PREFIX};
    use crate::models::ContentSelection;
    use std::fs;
    use tempfile::TempDir;

    fn packed_sample() -> (TempDir, std::path::PathBuf) {
        let tree = TempDir::new().unwrap();
        fs::write(tree.path().join("index.js"), b"main").unwrap();
        fs::create_dir(tree.path().join("src")).unwrap();
        fs::write(tree.path().join("src/util.js"), b"helper").unwrap();

        let out = TempDir::new().unwrap();
        let dest = out.path().join("a.tar.gz");
        pack(tree.path(), &ContentSelection::none(), None, &dest).unwrap();
        (out, dest)
    }

    #[test]
    fn test_round_trip() {
        let (_out, archive) = packed_sample();
        let restored = TempDir::new().unwrap();

        let summary = unpack(&archive, APP_PREFIX, restored.path(), false).unwrap();

        assert_eq!(
            fs::read(restored.path().join("index.js")).unwrap(),
            b"main"
        );
        assert_eq!(
            fs::read(restored.path().join("src/util.js")).unwrap(),
            b"helper"
        );
        assert!(summary.entries_extracted >= 2);
    }

    #[test]
    fn test_refuses_non_empty_destination() {
        let (_out, archive) = packed_sample();
        let restored = TempDir::new().unwrap();
        fs::write(restored.path().join("existing.txt"), b"keep").unwrap();

        let err = unpack(&archive, APP_PREFIX, restored.path(), false).unwrap_err();
        assert!(matches!(err, EngineError::Archive { step: "unpack", .. }));

        // Overwrite is an explicit opt-in.
        unpack(&archive, APP_PREFIX, restored.path(), true).unwrap();
        assert!(restored.path().join("index.js").exists());
    }

    #[test]
    fn test_rejects_traversal_entries() {
        let out = TempDir::new().unwrap();
        let malicious = out.path().join("evil.tar.gz");

        let file = fs::File::create(&malicious).unwrap();
        let encoder =
            flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let data = b"evil";
        let mut header = tar::Header::new_gnu();
        // `Builder::append_data` refuses `..` in paths, so write the
        // name bytes into the header directly.
        let name = b"../escape.txt";
        header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append(&header, &data[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let restored = TempDir::new().unwrap();
        let err = unpack(&malicious, "", restored.path(), false).unwrap_err();
        assert!(matches!(err, EngineError::Archive { step: "unpack", .. }));
        assert!(!out.path().join("escape.txt").exists());
    }

    #[test]
    fn test_rejects_write_through_symlink_entry() {
        let out = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let malicious = out.path().join("evil.tar.gz");

        // A symlink entry pointing outside the destination, then a file
        // entry whose lexically clean path writes through that symlink.
        let file = fs::File::create(&malicious).unwrap();
        let encoder =
            flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut link = tar::Header::new_gnu();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        builder
            .append_link(&mut link, "link", outside.path())
            .unwrap();

        let data = b"owned";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "link/pwned.txt", &data[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let restored = TempDir::new().unwrap();
        let err = unpack(&malicious, "", restored.path(), false).unwrap_err();
        assert!(matches!(err, EngineError::Archive { step: "unpack", .. }));
        assert!(!outside.path().join("pwned.txt").exists());
    }

    #[test]
    fn test_prefix_filters_entries() {
        let tree = TempDir::new().unwrap();
        fs::write(tree.path().join("app.js"), b"code").unwrap();
        let dumps = TempDir::new().unwrap();
        fs::write(dumps.path().join("db.sql"), b"dump").unwrap();

        let out = TempDir::new().unwrap();
        let archive = out.path().join("a.tar.gz");
        pack(
            tree.path(),
            &ContentSelection::all(),
            Some(dumps.path()),
            &archive,
        )
        .unwrap();

        let restored = TempDir::new().unwrap();
        unpack(&archive, APP_PREFIX, restored.path(), false).unwrap();

        assert!(restored.path().join("app.js").exists());
        assert!(!restored.path().join("db.sql").exists());
        assert!(!restored.path().join("databases").exists());
    }
}
