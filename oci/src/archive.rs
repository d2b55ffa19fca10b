//! Deterministic tar+gzip archiving of a manifest directory.
//!
//! Entries are visited in lexical order; names are relative to the source
//! root and slash-separated; ownership and timestamps are cleared. The same
//! tree therefore always produces the same bytes, regardless of host or
//! filesystem. Anything that is not a regular file or a directory is skipped.

use std::fs::{File, Metadata, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path};

use flate2::write::GzEncoder;
use flate2::Compression;
use tape_core::error::{Result, Stage, TapeError};
use tar::{Builder, EntryType, Header};
use walkdir::WalkDir;

use crate::digest::HashingWriter;

/// Permissions of the temporary content blob.
#[cfg(unix)]
const REGULAR_FILE_MODE: u32 = 0o640;

/// Content blob written to disk while hashing.
#[derive(Debug, Clone)]
pub struct ArchivedContent {
    /// Hex SHA-256 of the compressed blob
    pub hash: String,
    /// Size of the compressed blob in bytes
    pub size: u64,
}

impl ArchivedContent {
    /// Digest with "sha256:" prefix.
    pub fn digest(&self) -> String {
        format!("{}{}", crate::digest::SHA256_PREFIX, self.hash)
    }
}

/// Archive `source_dir` into `output` as tar+gzip and return the writer.
///
/// On failure the tar and gzip streams are still finished, best effort,
/// before the error is returned.
pub fn build_artefact<W: Write>(source_dir: &Path, output: W) -> Result<W> {
    let root = std::fs::canonicalize(source_dir)
        .map_err(|_| TapeError::InvalidSourcePath(source_dir.to_path_buf()))?;
    if !root.is_dir() {
        return Err(TapeError::InvalidSourcePath(source_dir.to_path_buf()));
    }

    let encoder = GzEncoder::new(output, Compression::default());
    let mut builder = Builder::new(encoder);

    if let Err(e) = append_tree(&mut builder, &root) {
        if let Ok(encoder) = builder.into_inner() {
            let _ = encoder.finish();
        }
        return Err(e);
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| TapeError::wrap(Stage::Archive, "finalizing tar stream failed", e))?;
    encoder
        .finish()
        .map_err(|e| TapeError::wrap(Stage::Archive, "finalizing gzip stream failed", e))
}

/// Archive `source_dir` into a new file at `path`, hashing the compressed
/// bytes as they are written.
pub fn write_artefact_file(source_dir: &Path, path: &Path) -> Result<ArchivedContent> {
    let file = create_exclusive(path).map_err(|e| {
        TapeError::wrap(
            Stage::TempFile,
            format!("creating {} failed", path.display()),
            e,
        )
    })?;

    let writer = build_artefact(source_dir, HashingWriter::new(file))?;
    let (file, hash, size) = writer
        .finish()
        .map_err(|e| TapeError::wrap(Stage::Archive, "flushing content blob failed", e))?;
    file.sync_all()
        .map_err(|e| TapeError::wrap(Stage::Archive, "syncing content blob failed", e))?;

    tracing::debug!(
        source = %source_dir.display(),
        hash = %hash,
        size,
        "Archived manifest directory"
    );

    Ok(ArchivedContent { hash, size })
}

fn create_exclusive(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(REGULAR_FILE_MODE);
    }
    options.open(path)
}

fn append_tree<W: Write>(builder: &mut Builder<W>, root: &Path) -> Result<()> {
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry
            .map_err(|e| TapeError::wrap(Stage::Archive, "walking source directory failed", e))?;

        let relative = entry.path().strip_prefix(root).map_err(|e| {
            TapeError::wrap(
                Stage::Archive,
                format!("computing relative path for {}", entry.path().display()),
                e,
            )
        })?;
        // Members are named relative to the root, which gets no entry itself.
        if relative.as_os_str().is_empty() {
            continue;
        }

        let file_type = entry.file_type();
        if !(file_type.is_file() || file_type.is_dir()) {
            tracing::trace!(path = %entry.path().display(), "Skipping non-regular entry");
            continue;
        }

        let metadata = entry.metadata().map_err(|e| {
            TapeError::wrap(
                Stage::Archive,
                format!("reading metadata for {}", entry.path().display()),
                e,
            )
        })?;
        let name = slash_path(relative);
        let mut header = normalized_header(&metadata)?;

        let appended = if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            builder.append_data(&mut header, &name, io::empty())
        } else {
            header.set_entry_type(EntryType::Regular);
            header.set_size(metadata.len());
            let file = File::open(entry.path()).map_err(|e| {
                TapeError::wrap(
                    Stage::Archive,
                    format!("opening {}", entry.path().display()),
                    e,
                )
            })?;
            builder.append_data(&mut header, &name, file)
        };
        appended.map_err(|e| {
            TapeError::wrap(Stage::Archive, format!("adding {} to archive", name), e)
        })?;
    }
    Ok(())
}

/// Header with ownership and timestamps cleared.
fn normalized_header(metadata: &Metadata) -> Result<Header> {
    let mut header = Header::new_gnu();
    header.set_mode(permission_bits(metadata));
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header
        .set_username("")
        .and_then(|_| header.set_groupname(""))
        .map_err(|e| TapeError::wrap(Stage::Archive, "clearing owner names failed", e))?;
    if let Some(gnu) = header.as_gnu_mut() {
        gnu.set_atime(0);
        gnu.set_ctime(0);
    }
    Ok(header)
}

#[cfg(unix)]
fn permission_bits(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else if metadata.permissions().readonly() {
        0o444
    } else {
        0o644
    }
}

/// Relative path with '/' separators regardless of host conventions.
fn slash_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn sample_tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("kustomization.yaml"), "resources: []\n").unwrap();
        fs::create_dir(tmp.path().join("base")).unwrap();
        fs::write(tmp.path().join("base").join("deployment.yaml"), "kind: Deployment\n").unwrap();
        fs::write(tmp.path().join("base").join("service.yaml"), "kind: Service\n").unwrap();
        tmp
    }

    fn entries(blob: &[u8]) -> Vec<(String, tar::EntryType, u64, u64, u64)> {
        let mut archive = tar::Archive::new(GzDecoder::new(blob));
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                let h = e.header();
                (
                    e.path().unwrap().to_string_lossy().to_string(),
                    h.entry_type(),
                    h.uid().unwrap(),
                    h.gid().unwrap(),
                    h.mtime().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn test_archive_is_deterministic() {
        let tree = sample_tree();
        let first = build_artefact(tree.path(), Vec::new()).unwrap();

        let later = SystemTime::now() + Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(tree.path().join("kustomization.yaml"))
            .unwrap()
            .set_modified(later)
            .unwrap();

        let second = build_artefact(tree.path(), Vec::new()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_archive_names_are_relative_and_sorted() {
        let tree = sample_tree();
        let blob = build_artefact(tree.path(), Vec::new()).unwrap();
        let names: Vec<String> = entries(&blob).into_iter().map(|e| e.0).collect();
        assert_eq!(
            names,
            vec![
                "base",
                "base/deployment.yaml",
                "base/service.yaml",
                "kustomization.yaml"
            ]
        );
    }

    #[test]
    fn test_archive_strips_ownership_and_times() {
        let tree = sample_tree();
        let blob = build_artefact(tree.path(), Vec::new()).unwrap();
        for (name, _, uid, gid, mtime) in entries(&blob) {
            assert_eq!((uid, gid, mtime), (0, 0, 0), "entry {}", name);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_archive_skips_symlinks() {
        let tree = sample_tree();
        std::os::unix::fs::symlink(
            tree.path().join("kustomization.yaml"),
            tree.path().join("link.yaml"),
        )
        .unwrap();
        std::os::unix::fs::symlink(tree.path().join("base"), tree.path().join("linked-dir"))
            .unwrap();

        let blob = build_artefact(tree.path(), Vec::new()).unwrap();
        let listed = entries(&blob);
        assert_eq!(listed.len(), 4);
        for (name, kind, ..) in listed {
            assert!(!name.starts_with("link"), "unexpected entry {}", name);
            assert!(kind == tar::EntryType::Regular || kind == tar::EntryType::Directory);
        }
    }

    #[test]
    fn test_archive_preserves_content() {
        let tree = sample_tree();
        let blob = build_artefact(tree.path(), Vec::new()).unwrap();
        let target = TempDir::new().unwrap();
        tar::Archive::new(GzDecoder::new(blob.as_slice()))
            .unpack(target.path())
            .unwrap();
        assert_eq!(
            fs::read_to_string(target.path().join("base/service.yaml")).unwrap(),
            "kind: Service\n"
        );
    }

    #[test]
    fn test_archive_missing_source() {
        let tmp = TempDir::new().unwrap();
        let err = build_artefact(&tmp.path().join("absent"), Vec::new()).unwrap_err();
        assert!(matches!(err, TapeError::InvalidSourcePath(_)));
    }

    #[test]
    fn test_archive_rejects_file_source() {
        let tree = sample_tree();
        let err =
            build_artefact(&tree.path().join("kustomization.yaml"), Vec::new()).unwrap_err();
        assert!(matches!(err, TapeError::InvalidSourcePath(_)));
    }

    #[test]
    fn test_write_artefact_file_hashes_blob() {
        let tree = sample_tree();
        let out = TempDir::new().unwrap();
        let path = out.path().join("artefact.tgz");

        let content = write_artefact_file(tree.path(), &path).unwrap();
        let written = fs::read(&path).unwrap();
        assert_eq!(content.size, written.len() as u64);
        assert_eq!(content.hash, crate::digest::sha256_hex(&written));
        assert_eq!(content.digest(), crate::digest::sha256_digest(&written));

        // Existing files are never overwritten.
        let err = write_artefact_file(tree.path(), &path).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::TempFile));
    }
}
