//! Folder-to-archive packing and extraction for FOLDER transfers.
//!
//! Archives are plain DEFLATE ZIPs. The manifest recorded alongside the
//! archive is authoritative for file timestamps — the ZIP container's own
//! `mtime` field only has 2-second DOS-time precision.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{Datelike, Timelike};
use filetime::{FileTime, set_file_mtime};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::ClipTransferError;
use crate::packet::FolderManifestEntry;

const STREAM_BUF_SIZE: usize = 8 * 1024;

fn relative_posix_path(base: &Path, entry: &Path) -> String {
    let rel = entry.strip_prefix(base).unwrap_or(entry);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Archives `dir` recursively into a DEFLATE ZIP next to the system temp
/// directory, returning the archive path and a manifest of its entries in
/// traversal order.
pub fn archive_folder(dir: &Path) -> Result<(PathBuf, Vec<FolderManifestEntry>), ClipTransferError> {
    if !dir.is_dir() {
        return Err(ClipTransferError::PathNotFound(dir.display().to_string()));
    }

    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());
    let archive_path = std::env::temp_dir().join(format!("{name}-{}.zip", uuid::Uuid::new_v4()));

    let file = File::create(&archive_path).map_err(ClipTransferError::Io)?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut manifest = Vec::new();

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if path == dir {
            continue;
        }
        let rel_path = relative_posix_path(dir, path);

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{rel_path}/"), options)
                .map_err(|e| ClipTransferError::Archive(e.to_string()))?;
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let metadata = entry.metadata().map_err(|e| ClipTransferError::Archive(e.to_string()))?;
        let mtime_millis = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let entry_options = zip_mtime(mtime_millis)
            .map(|dt| options.last_modified_time(dt))
            .unwrap_or(options);
        zip.start_file(&rel_path, entry_options)
            .map_err(|e| ClipTransferError::Archive(e.to_string()))?;
        let mut reader = BufReader::with_capacity(STREAM_BUF_SIZE, File::open(path)?);
        let mut buf = [0u8; STREAM_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            zip.write_all(&buf[..n])?;
        }

        manifest.push(FolderManifestEntry {
            path: rel_path,
            mod_time: mtime_millis,
        });
    }

    zip.finish().map_err(|e| ClipTransferError::Archive(e.to_string()))?;

    Ok((archive_path, manifest))
}

/// Extracts a ZIP archive into `dest_dir`, restoring modification times from
/// `manifest` when a matching relative path exists, else from the archive
/// entry itself. Failures to restore an mtime are tolerated silently — the
/// file content is what matters.
pub fn extract_archive(
    archive_path: &Path,
    dest_dir: &Path,
    manifest: Option<&[FolderManifestEntry]>,
) -> Result<(), ClipTransferError> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))
        .map_err(|e| ClipTransferError::Archive(e.to_string()))?;

    std::fs::create_dir_all(dest_dir)?;

    for i in 0..archive.len() {
        let mut zip_entry = archive
            .by_index(i)
            .map_err(|e| ClipTransferError::Archive(e.to_string()))?;
        let rel_path = match zip_entry.enclosed_name() {
            Some(p) => p.to_path_buf(),
            None => continue,
        };
        let out_path = dest_dir.join(&rel_path);

        if zip_entry.is_dir() {
            std::fs::create_dir_all(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut out_file = BufWriter::new(File::create(&out_path)?);
        io::copy(&mut zip_entry, &mut out_file)?;
        out_file.flush()?;
        drop(out_file);

        let rel_str = relative_posix_path(Path::new(""), &rel_path);
        let mtime_millis = manifest
            .and_then(|m| m.iter().find(|e| e.path == rel_str))
            .map(|e| e.mod_time)
            .or_else(|| zip_entry_mtime_millis(&zip_entry));

        if let Some(millis) = mtime_millis {
            let ft = FileTime::from_unix_time(millis / 1000, ((millis % 1000) * 1_000_000) as u32);
            let _ = set_file_mtime(&out_path, ft);
        }
    }

    Ok(())
}

/// Converts an epoch-millis timestamp to the ZIP container's DOS-precision
/// `DateTime`, used to stamp each entry's own `mtime` at archive time (the
/// manifest remains the authoritative source on extract, since this
/// container format only has 2-second resolution).
fn zip_mtime(millis: i64) -> Option<zip::DateTime> {
    let secs = millis / 1000;
    let naive = chrono::DateTime::from_timestamp(secs, 0)?.naive_utc();
    zip::DateTime::from_date_and_time(
        naive.year() as u16,
        naive.month() as u8,
        naive.day() as u8,
        naive.hour() as u8,
        naive.minute() as u8,
        naive.second() as u8,
    )
    .ok()
}

/// Converts a ZIP entry's DOS-precision timestamp to epoch millis, tolerating
/// archives written by tools that leave it at the epoch default.
fn zip_entry_mtime_millis(entry: &zip::read::ZipFile<'_>) -> Option<i64> {
    let dt = entry.last_modified();
    chrono::NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)
        .and_then(|d| d.and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32))
        .map(|naive| naive.and_utc().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn roundtrip_preserves_bytes_and_tree() {
        let src = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("sub")).unwrap();
        fs::write(src.path().join("a.txt"), b"alpha").unwrap();
        fs::write(src.path().join("sub/b.txt"), b"beta").unwrap();

        let (archive_path, manifest) = archive_folder(src.path()).unwrap();
        assert!(manifest.iter().any(|e| e.path == "a.txt"));
        assert!(manifest.iter().any(|e| e.path == "sub/b.txt"));

        let dest = tempfile::tempdir().unwrap();
        extract_archive(&archive_path, dest.path(), Some(&manifest)).unwrap();

        assert_eq!(fs::read(dest.path().join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(dest.path().join("sub/b.txt")).unwrap(), b"beta");

        let _ = fs::remove_file(&archive_path);
    }

    #[test]
    fn empty_folder_produces_empty_manifest() {
        let src = tempfile::tempdir().unwrap();
        let (archive_path, manifest) = archive_folder(src.path()).unwrap();
        assert!(manifest.is_empty());
        let _ = fs::remove_file(&archive_path);
    }

    #[test]
    fn missing_dir_is_rejected() {
        let err = archive_folder(Path::new("/nonexistent/path/for/test")).unwrap_err();
        assert!(matches!(err, ClipTransferError::PathNotFound(_)));
    }
}
