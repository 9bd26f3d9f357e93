//! Tar codec for OCI image layouts.
//!
//! An archive is the OCI image layout itself, packed into a tar stream:
//!
//! ```text
//! oci-layout
//! index.json          only the exported references
//! blobs/<alg>/<hex>   everything reachable from them
//! ```
//!
//! Archives whose name ends in `.gz` or `.tgz` are gzip-compressed on
//! export. On import, compression is detected from the gzip magic bytes,
//! so the file name does not matter.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anywhere_registry::{copy_graph, Index, OciLayout, Storage};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::error::{Result, TransferError};

const OCI_LAYOUT_FILE: &str = "oci-layout";
const INDEX_FILE: &str = "index.json";
const LAYOUT_MARKER: &[u8] = br#"{"imageLayoutVersion":"1.0.0"}"#;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Returns true if an archive at `path` is written gzip-compressed.
#[must_use]
pub fn is_gzip_name(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("gz" | "tgz")
    )
}

/// Writes `references` and their reachable blobs from `layout` to `path`.
///
/// The archive is written to a temporary file next to `path` and renamed
/// into place, so a failed export never leaves a truncated archive.
/// Returns the number of blobs written.
///
/// # Errors
///
/// Returns an error if a reference is not in the layout, a blob is
/// missing, or the archive cannot be written.
pub async fn export(layout: &OciLayout, references: &[String], path: &Path) -> Result<usize> {
    let roots = layout.descriptors_for(references)?;
    let blobs = layout.reachable_blobs(&roots)?;

    let mut index = Index::new();
    index.manifests = roots;
    let index_bytes =
        serde_json::to_vec_pretty(&index).map_err(|e| TransferError::archive(path, e.to_string()))?;

    let count = blobs.len();
    let root = layout.root().to_path_buf();
    let target = path.to_path_buf();
    tokio::task::spawn_blocking(move || write_archive(&root, &blobs, &index_bytes, &target))
        .await
        .map_err(|e| TransferError::Join(e.to_string()))??;

    debug!(archive = %path.display(), blobs = count, "exported layout");
    Ok(count)
}

/// Loads every named artifact in the archive at `path` into `layout`.
///
/// The archive is unpacked into a temporary directory, then each named
/// manifest is graph-copied into `layout` and tagged with its name. Blobs
/// `layout` already has are not copied again. Returns the number of
/// artifacts imported.
///
/// # Errors
///
/// Returns an error if the archive cannot be read or is not an OCI image
/// layout, or if copying into `layout` fails.
pub async fn import(path: &Path, layout: &OciLayout) -> Result<usize> {
    let staging = tempfile::tempdir().map_err(|e| TransferError::io(std::env::temp_dir(), e))?;

    let archive = path.to_path_buf();
    let target = staging.path().to_path_buf();
    tokio::task::spawn_blocking(move || unpack(&archive, &target))
        .await
        .map_err(|e| TransferError::Join(e.to_string()))??;

    let staged = OciLayout::open(staging.path())
        .map_err(|e| TransferError::archive(path, format!("not an OCI image layout: {e}")))?;

    let mut imported = 0;
    for entry in staged.manifests() {
        let Some(reference) = entry.ref_name().map(ToString::to_string) else {
            continue;
        };
        let desc = entry.plain();
        let report = copy_graph(&staged, layout, &desc).await?;
        layout.tag(&desc, &reference).await?;
        debug!(reference = %reference, copied = report.copied, skipped = report.skipped, "imported artifact");
        imported += 1;
    }
    Ok(imported)
}

fn write_archive(root: &Path, blobs: &[PathBuf], index: &[u8], path: &Path) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| TransferError::io(dir, e))?;
    let file = tempfile::NamedTempFile::new_in(dir).map_err(|e| TransferError::io(dir, e))?;

    let file = if is_gzip_name(path) {
        let encoder = append_layout(GzEncoder::new(file, Compression::default()), root, blobs, index)
            .map_err(|e| TransferError::io(path, e))?;
        encoder.finish().map_err(|e| TransferError::io(path, e))?
    } else {
        append_layout(file, root, blobs, index).map_err(|e| TransferError::io(path, e))?
    };

    file.persist(path).map_err(|e| TransferError::io(path, e.error))?;
    Ok(())
}

fn append_layout<W: Write>(writer: W, root: &Path, blobs: &[PathBuf], index: &[u8]) -> std::io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.mode(tar::HeaderMode::Deterministic);

    append_bytes(&mut builder, OCI_LAYOUT_FILE, LAYOUT_MARKER)?;
    append_bytes(&mut builder, INDEX_FILE, index)?;
    for blob in blobs {
        builder.append_path_with_name(root.join(blob), blob)?;
    }
    builder.into_inner()
}

fn append_bytes<W: Write>(builder: &mut tar::Builder<W>, name: &str, bytes: &[u8]) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();
    builder.append_data(&mut header, name, bytes)
}

fn unpack(path: &Path, target: &Path) -> Result<()> {
    let mut file = File::open(path).map_err(|e| TransferError::io(path, e))?;
    let mut magic = [0u8; 2];
    let gzip = file.read_exact(&mut magic).is_ok() && magic == GZIP_MAGIC;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| TransferError::io(path, e))?;

    let reader = BufReader::new(file);
    let unpacked = if gzip {
        tar::Archive::new(GzDecoder::new(reader)).unpack(target)
    } else {
        tar::Archive::new(reader).unpack(target)
    };
    unpacked.map_err(|e| TransferError::archive(path, e.to_string()))
}
