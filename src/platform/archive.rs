//! In-process tar packaging shared by every platform

use crate::error::{is_storage_full, SnapshotError};
use crate::utils::fs::{collect_files, TreeSize};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Gzip-compressed tar, used for tree snapshots
    TarGz,
    /// Plain tar, used to bundle already-compressed components
    Tar,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Tar => "tar",
        }
    }
}

/// Write every regular file under `root` into `artifact`, keyed by relative path
pub fn write_tree(
    root: &Path,
    artifact: &Path,
    format: ArchiveFormat,
    cancel: &CancellationToken,
) -> Result<TreeSize, SnapshotError> {
    let files = collect_files(root, cancel)?;
    let mut size = TreeSize::default();

    let entries = files
        .iter()
        .map(|relative| (root.join(relative), relative.as_path()));
    write_entries(artifact, format, entries, cancel, |bytes| {
        size.files += 1;
        size.bytes += bytes;
    })?;

    debug!(
        "Packaged {} files ({} bytes) from {:?} into {:?}",
        size.files, size.bytes, root, artifact
    );
    Ok(size)
}

/// Write named files into a plain tar bundle
pub fn write_bundle(
    artifact: &Path,
    members: &[(&Path, &str)],
    cancel: &CancellationToken,
) -> Result<(), SnapshotError> {
    let entries = members.iter().map(|(path, name)| (path.to_path_buf(), Path::new(*name)));
    write_entries(artifact, ArchiveFormat::Tar, entries, cancel, |_| {})
}

fn write_entries<'a, I, F>(
    artifact: &Path,
    format: ArchiveFormat,
    entries: I,
    cancel: &CancellationToken,
    on_file: F,
) -> Result<(), SnapshotError>
where
    I: Iterator<Item = (PathBuf, &'a Path)>,
    F: FnMut(u64),
{
    let write_err = |e: io::Error| SnapshotError::io(format!("Failed to write archive {:?}", artifact), e);

    let file = BufWriter::new(File::create(artifact).map_err(write_err)?);

    let file = match format {
        ArchiveFormat::TarGz => {
            let encoder = GzEncoder::new(file, Compression::default());
            let encoder = append_entries(tar::Builder::new(encoder), entries, cancel, on_file, write_err)?;
            encoder.finish().map_err(write_err)?
        }
        ArchiveFormat::Tar => append_entries(tar::Builder::new(file), entries, cancel, on_file, write_err)?,
    };

    let file = file.into_inner().map_err(|e| write_err(e.into_error()))?;
    file.sync_all().map_err(write_err)?;
    Ok(())
}

fn append_entries<'a, W, I, F, E>(
    mut builder: tar::Builder<W>,
    entries: I,
    cancel: &CancellationToken,
    mut on_file: F,
    write_err: E,
) -> Result<W, SnapshotError>
where
    W: Write,
    I: Iterator<Item = (PathBuf, &'a Path)>,
    F: FnMut(u64),
    E: Fn(io::Error) -> SnapshotError,
{
    builder.follow_symlinks(false);

    for (source, name) in entries {
        if cancel.is_cancelled() {
            return Err(SnapshotError::Cancelled);
        }

        let mut input = File::open(&source)
            .map_err(|e| SnapshotError::io(format!("Failed to read {}", source.display()), e))?;
        let len = input
            .metadata()
            .map_err(|e| SnapshotError::io(format!("Failed to stat {}", source.display()), e))?
            .len();

        builder.append_file(name, &mut input).map_err(&write_err)?;
        on_file(len);
    }

    builder.into_inner().map_err(write_err)
}

/// Unpack `artifact` under `dest`
///
/// Entries that would land outside `dest` are skipped by the tar reader.
pub fn extract(
    artifact: &Path,
    dest: &Path,
    format: ArchiveFormat,
    cancel: &CancellationToken,
) -> Result<(), SnapshotError> {
    let mut archive = tar::Archive::new(open_reader(artifact, format)?);

    let entries = archive
        .entries()
        .map_err(|e| corrupt_or_io(artifact, e))?;

    for entry in entries {
        if cancel.is_cancelled() {
            return Err(SnapshotError::Cancelled);
        }

        let mut entry = entry.map_err(|e| corrupt_or_io(artifact, e))?;
        let unpacked = entry.unpack_in(dest).map_err(|e| corrupt_or_io(artifact, e))?;
        if !unpacked {
            debug!("Skipped archive entry outside staging: {:?}", entry.path().ok());
        }
    }

    Ok(())
}

/// Read the whole archive, counting its regular files
pub fn inspect(artifact: &Path, format: ArchiveFormat) -> Result<TreeSize, SnapshotError> {
    let mut archive = tar::Archive::new(open_reader(artifact, format)?);
    let mut size = TreeSize::default();

    for entry in archive.entries().map_err(|e| corrupt_or_io(artifact, e))? {
        let mut entry = entry.map_err(|e| corrupt_or_io(artifact, e))?;
        if entry.header().entry_type().is_file() {
            let bytes = io::copy(&mut entry, &mut io::sink()).map_err(|e| corrupt_or_io(artifact, e))?;
            size.files += 1;
            size.bytes += bytes;
        }
    }

    Ok(size)
}

/// Relative paths of the regular files stored in the archive
pub fn list_files(artifact: &Path, format: ArchiveFormat) -> Result<Vec<PathBuf>, SnapshotError> {
    let mut archive = tar::Archive::new(open_reader(artifact, format)?);
    let mut files = Vec::new();

    for entry in archive.entries().map_err(|e| corrupt_or_io(artifact, e))? {
        let entry = entry.map_err(|e| corrupt_or_io(artifact, e))?;
        if entry.header().entry_type().is_file() {
            let path = entry.path().map_err(|e| corrupt_or_io(artifact, e))?;
            files.push(path.into_owned());
        }
    }

    files.sort();
    Ok(files)
}

fn open_reader(artifact: &Path, format: ArchiveFormat) -> Result<Box<dyn Read>, SnapshotError> {
    let file = File::open(artifact).map_err(|e| {
        debug!("Cannot open artifact {:?}: {}", artifact, e);
        SnapshotError::ArtifactNotFound(artifact.to_path_buf())
    })?;

    let reader = BufReader::new(file);
    Ok(match format {
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(reader)),
        ArchiveFormat::Tar => Box::new(reader),
    })
}

fn corrupt_or_io(artifact: &Path, err: io::Error) -> SnapshotError {
    if is_storage_full(&err) {
        return SnapshotError::StorageExhausted(format!("Extracting {:?}: {}", artifact, err));
    }

    match err.kind() {
        // tar reports malformed headers as `Other`
        io::ErrorKind::InvalidData
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::Other => {
            SnapshotError::ArtifactCorrupt(format!("{}: {}", artifact.display(), err))
        }
        _ => SnapshotError::io(format!("Failed to extract {:?}", artifact), err),
    }
}
