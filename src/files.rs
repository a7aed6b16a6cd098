//! Filesystem plumbing for the upload, browse, and download endpoints.
//!
//! Zip archives are built synchronously into an unlinked spool file
//! (`tempfile::tempfile`) and then streamed to the client, which keeps
//! memory bounded without needing a seekable HTTP body.

use std::collections::HashMap;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use serde::Serialize;
use zip::write::FileOptions;
use zip::CompressionMethod;

use crate::store::marked::MarkedFile;

/// Lexically normalize a path: drop `.` segments, resolve `..` against the
/// preceding component, collapse separators. No filesystem access.
pub fn clean_path(input: &str) -> PathBuf {
    let path = Path::new(input);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    // Relative path escaping its base keeps the "..".
                    if !path.has_root() {
                        out.push("..");
                    }
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(if path.has_root() { "/" } else { "." });
    }
    out
}

/// Split `name` into stem and extension, keeping the dot with the extension.
fn split_ext(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(i) if i > 0 => (&name[..i], &name[i..]),
        _ => (name, ""),
    }
}

/// Choose a destination path in `dir` that does not collide with an existing
/// file: `X`, then `X (1)`, `X (2)`, ... (suffix before the extension).
pub fn unique_dest_path(dir: &Path, filename: &str) -> PathBuf {
    let dest = dir.join(filename);
    if !dest.exists() {
        return dest;
    }
    let (stem, ext) = split_ext(filename);
    for i in 1.. {
        let candidate = dir.join(format!("{} ({}){}", stem, i, ext));
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

/// One entry in a browse listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowseEntry {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    pub is_regular: bool,
    /// File size in bytes, or immediate entry count for directories.
    pub size: u64,
    /// Unix timestamp of the last modification.
    pub mod_time: i64,
}

fn mod_time_secs(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// List a directory for the file browser. Non-root listings are prefixed
/// with a synthetic `..` entry pointing at the parent; children whose
/// metadata cannot be read are skipped.
pub fn browse_dir(dir: &Path) -> std::io::Result<Vec<BrowseEntry>> {
    let mut entries = Vec::new();

    if dir != Path::new("/") {
        let parent = dir.parent().unwrap_or(Path::new("/"));
        entries.push(BrowseEntry {
            name: "..".to_string(),
            path: parent.to_string_lossy().to_string(),
            is_dir: true,
            is_regular: false,
            size: 0,
            mod_time: 0,
        });
    }

    let mut children: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .collect();
    children.sort_by_key(|e| e.file_name());

    for child in children {
        let meta = match child.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        let path = child.path();
        let size = if meta.is_dir() {
            std::fs::read_dir(&path).map(|it| it.count() as u64).unwrap_or(0)
        } else {
            meta.len()
        };
        entries.push(BrowseEntry {
            name: child.file_name().to_string_lossy().to_string(),
            path: path.to_string_lossy().to_string(),
            is_dir: meta.is_dir(),
            is_regular: meta.is_file(),
            size,
            mod_time: mod_time_secs(&meta),
        });
    }
    Ok(entries)
}

fn zip_mod_time(meta: &std::fs::Metadata) -> zip::DateTime {
    use chrono::{Datelike, Local, TimeZone, Timelike};
    let secs = mod_time_secs(meta);
    let Some(dt) = Local.timestamp_opt(secs, 0).single() else {
        return zip::DateTime::default();
    };
    zip::DateTime::from_date_and_time(
        dt.year().clamp(1980, 2107) as u16,
        dt.month() as u8,
        dt.day() as u8,
        dt.hour() as u8,
        dt.minute() as u8,
        dt.second() as u8,
    )
    .unwrap_or_default()
}

fn file_options(meta: &std::fs::Metadata) -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip_mod_time(meta))
        .large_file(meta.len() >= 0xffff_ffff)
}

fn dir_options(meta: &std::fs::Metadata) -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(zip_mod_time(meta))
}

fn add_file<W: Write + Seek>(
    zw: &mut zip::ZipWriter<W>,
    path: &Path,
    zip_path: &str,
) -> std::io::Result<()> {
    let meta = std::fs::metadata(path)?;
    if !meta.is_file() {
        return Ok(()); // symlinks, sockets, devices are skipped
    }
    let mut file = std::fs::File::open(path)?;
    zw.start_file(zip_path, file_options(&meta))
        .map_err(zip_io_err)?;
    std::io::copy(&mut file, zw)?;
    Ok(())
}

fn add_dir_recursive<W: Write + Seek>(
    zw: &mut zip::ZipWriter<W>,
    dir: &Path,
    base_in_zip: &str,
) -> std::io::Result<()> {
    let mut children: Vec<_> = std::fs::read_dir(dir)?.filter_map(|e| e.ok()).collect();
    children.sort_by_key(|e| e.file_name());

    for child in children {
        let meta = match child.metadata() {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("skipping {}: {}", child.path().display(), e);
                continue;
            }
        };
        let name = child.file_name().to_string_lossy().to_string();
        let zip_path = if base_in_zip.is_empty() {
            name
        } else {
            format!("{}/{}", base_in_zip, name)
        };
        if meta.is_dir() {
            zw.add_directory(format!("{}/", zip_path), dir_options(&meta))
                .map_err(zip_io_err)?;
            if let Err(e) = add_dir_recursive(zw, &child.path(), &zip_path) {
                tracing::warn!("skipping subtree {}: {}", child.path().display(), e);
            }
        } else if meta.is_file() {
            if let Err(e) = add_file(zw, &child.path(), &zip_path) {
                tracing::warn!("failed to add {}: {}", child.path().display(), e);
            }
        }
    }
    Ok(())
}

fn zip_io_err(e: zip::result::ZipError) -> std::io::Error {
    match e {
        zip::result::ZipError::Io(io) => io,
        other => std::io::Error::new(std::io::ErrorKind::Other, other),
    }
}

fn rewound(mut file: std::fs::File) -> std::io::Result<std::fs::File> {
    file.seek(SeekFrom::Start(0))?;
    Ok(file)
}

/// Build a zip of one directory into an unlinked spool file, positioned at
/// the start and ready to stream. Blocking; call from `spawn_blocking`.
pub fn zip_directory(dir: &Path) -> std::io::Result<std::fs::File> {
    let spool = tempfile::tempfile()?;
    let mut zw = zip::ZipWriter::new(spool);
    add_dir_recursive(&mut zw, dir, "")?;
    rewound(zw.finish().map_err(zip_io_err)?)
}

/// Choose mutually-unique top-level archive names for the marked entries.
///
/// Starts from each entry's basename; on collision, keeps prefixing parent
/// directory components; when the path runs out, falls back to a ` (n)`
/// suffix starting at 2.
pub fn unique_zip_names(files: &[MarkedFile]) -> HashMap<String, String> {
    let mut names = HashMap::new();
    let mut used: std::collections::HashSet<String> = std::collections::HashSet::new();

    for file in files {
        let mut zip_path = file.name.clone();
        let mut full = PathBuf::from(&file.path);

        while used.contains(&zip_path) {
            let parent = full.parent().map(Path::to_path_buf);
            match parent {
                Some(p) if p != Path::new("/") && p != Path::new(".") && p != full => {
                    let prefix = p
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    if prefix.is_empty() {
                        zip_path = numbered_fallback(&file.name, &used);
                        break;
                    }
                    zip_path = format!("{}/{}", prefix, zip_path);
                    full = p;
                }
                _ => {
                    zip_path = numbered_fallback(&file.name, &used);
                    break;
                }
            }
        }
        used.insert(zip_path.clone());
        names.insert(file.path.clone(), zip_path);
    }
    names
}

fn numbered_fallback(name: &str, used: &std::collections::HashSet<String>) -> String {
    let (stem, ext) = split_ext(name);
    for i in 2.. {
        let candidate = format!("{} ({}){}", stem, i, ext);
        if !used.contains(&candidate) {
            return candidate;
        }
    }
    unreachable!()
}

/// Build a zip of the marked entries into a spool file. Returns the rewound
/// spool plus the paths that were successfully added (and should therefore
/// leave the marked set). Blocking; call from `spawn_blocking`.
pub fn zip_marked(files: &[MarkedFile]) -> std::io::Result<(std::fs::File, Vec<String>)> {
    let spool = tempfile::tempfile()?;
    let mut zw = zip::ZipWriter::new(spool);
    let names = unique_zip_names(files);
    let mut added = Vec::with_capacity(files.len());

    for file in files {
        let zip_path = &names[&file.path];
        let result = if file.is_dir {
            match std::fs::metadata(&file.path) {
                Ok(meta) => zw
                    .add_directory(format!("{}/", zip_path), dir_options(&meta))
                    .map_err(zip_io_err)
                    .and_then(|_| add_dir_recursive(&mut zw, Path::new(&file.path), zip_path)),
                Err(e) => Err(e),
            }
        } else {
            add_file(&mut zw, Path::new(&file.path), zip_path)
        };
        match result {
            Ok(()) => added.push(file.path.clone()),
            Err(e) => tracing::warn!("failed to add {} to zip: {}", file.path, e),
        }
    }
    Ok((rewound(zw.finish().map_err(zip_io_err)?)?, added))
}

/// Archive name for a bulk download: `{dir}.zip` for one directory,
/// otherwise a short content-addressed name so repeated selections differ.
pub fn marked_zip_name(files: &[MarkedFile]) -> String {
    if files.len() == 1 && files[0].is_dir {
        return format!("{}.zip", files[0].name);
    }
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    for file in files {
        file.path.hash(&mut hasher);
    }
    format!("download-{:08x}.zip", hasher.finish() as u32)
}
