use anyhow::Context;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::path::Path;

use crate::archive::{APP_PREFIX, DB_PREFIX};
use crate::error::EngineError;
use crate::fs::walker::walk_source_tree;
use crate::models::ContentSelection;

#[derive(Debug, Clone)]
pub struct PackSummary {
    /// Entries written into the archive, including directories and dumps.
    pub entry_count: u64,
    /// Byte size of the published archive file.
    pub archive_size: u64,
}

/// Pack the selected subset of `source` into a gzip tar archive at `dest`.
///
/// Application entries land under `app/`; files found in `dump_dir` land
/// under `databases/`. The archive is written to a temporary path in the
/// destination directory and atomically renamed into place after a full
/// flush, so a failed pack leaves no visible partial archive.
pub fn pack(
    source: &Path,
    selection: &ContentSelection,
    dump_dir: Option<&Path>,
    dest: &Path,
) -> crate::Result<PackSummary> {
    pack_inner(source, selection, dump_dir, dest).map_err(|e| EngineError::archive("pack", e))
}

fn pack_inner(
    source: &Path,
    selection: &ContentSelection,
    dump_dir: Option<&Path>,
    dest: &Path,
) -> anyhow::Result<PackSummary> {
    if !source.is_dir() {
        anyhow::bail!("source tree is not a readable directory");
    }
    let dest_dir = dest
        .parent()
        .context("archive destination has no parent directory")?;
    std::fs::create_dir_all(dest_dir).context("failed to create archive directory")?;

    let entries = walk_source_tree(source).context("failed to scan source tree")?;

    let tmp = tempfile::NamedTempFile::new_in(dest_dir)
        .context("failed to create temporary archive file")?;
    let encoder = GzEncoder::new(tmp, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut entry_count = 0u64;

    for entry in &entries {
        if let Some(category) = entry.category {
            if !selection.contains(category) {
                continue;
            }
        }

        let archive_path = Path::new(APP_PREFIX).join(&entry.relative_path);
        builder
            .append_path_with_name(&entry.path, &archive_path)
            .with_context(|| format!("failed to append {}", entry.relative_path.display()))?;
        entry_count += 1;
    }

    if let Some(dir) = dump_dir {
        let mut dumps: Vec<_> = std::fs::read_dir(dir)
            .context("failed to read database dump directory")?
            .collect::<std::io::Result<Vec<_>>>()?;
        dumps.sort_by_key(|e| e.file_name());

        for dump in dumps {
            if !dump.file_type()?.is_file() {
                continue;
            }
            let name = dump.file_name();
            let archive_path = Path::new(DB_PREFIX).join(&name);
            builder
                .append_path_with_name(dump.path(), &archive_path)
                .with_context(|| {
                    format!("failed to append database dump {}", name.to_string_lossy())
                })?;
            entry_count += 1;
        }
    }

    let encoder = builder.into_inner().context("failed to finish tar stream")?;
    let tmp = encoder.finish().context("failed to finish compression")?;
    tmp.as_file()
        .sync_all()
        .context("failed to flush archive to stable storage")?;
    tmp.persist(dest)
        .map_err(|e| e.error)
        .context("failed to publish archive")?;

    let archive_size = std::fs::metadata(dest)?.len();

    Ok(PackSummary {
        entry_count,
        archive_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ContentCategory;
    use std::fs;
    use tempfile::TempDir;

    fn sample_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("server.js"), b"app code").unwrap();
        fs::write(dir.path().join(".env"), b"SECRET=1").unwrap();
        fs::create_dir(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/mod.js"), b"dep").unwrap();
        dir
    }

    fn archive_entry_names(path: &Path) -> Vec<String> {
        let file = fs::File::open(path).unwrap();
        let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
        let mut names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_pack_respects_selection() {
        let tree = sample_tree();
        let out = TempDir::new().unwrap();
        let dest = out.path().join("a.tar.gz");

        let summary = pack(
            tree.path(),
            &ContentSelection::none().with(ContentCategory::Environment),
            None,
            &dest,
        )
        .unwrap();

        let names = archive_entry_names(&dest);
        assert!(names.contains(&"app/server.js".to_string()));
        assert!(names.contains(&"app/.env".to_string()));
        assert!(!names.iter().any(|n| n.contains("node_modules")));
        assert_eq!(summary.entry_count as usize, names.len());
        assert_eq!(summary.archive_size, fs::metadata(&dest).unwrap().len());
    }

    #[test]
    fn test_pack_includes_dumps_under_db_prefix() {
        let tree = sample_tree();
        let dumps = TempDir::new().unwrap();
        fs::write(dumps.path().join("shop.sql"), vec![0u8; 128]).unwrap();

        let out = TempDir::new().unwrap();
        let dest = out.path().join("a.tar.gz");

        pack(tree.path(), &ContentSelection::all(), Some(dumps.path()), &dest).unwrap();

        let names = archive_entry_names(&dest);
        assert!(names.contains(&"databases/shop.sql".to_string()));
    }

    #[test]
    fn test_pack_unreadable_source_fails_cleanly() {
        let out = TempDir::new().unwrap();
        let dest = out.path().join("a.tar.gz");

        let err = pack(
            Path::new("/nonexistent/source/tree"),
            &ContentSelection::none(),
            None,
            &dest,
        )
        .unwrap_err();

        assert!(matches!(err, EngineError::Archive { step: "pack", .. }));
        assert!(!dest.exists());
        // No stray temporary file left beside the destination.
        let leftovers = fs::read_dir(out.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }
}
