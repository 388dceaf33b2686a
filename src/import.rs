//! Packing host files into a volume image.
//!
//! `pack_folder` drives the whole `create` flow: scan the host tree, size
//! a fresh image so the content fits with index headroom, then push every
//! file through the engine's staged-write path.  Parent directories are
//! created ahead of each file, so every path prefix of an imported file
//! names a live directory entry.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};

use crate::error::SfsError;
use crate::volume::{normalize, Volume};

pub struct ScannedFile {
    pub host_path: PathBuf,
    /// Path inside the image, `/`-separated, relative to the scan root.
    pub image_path: String,
    pub size: u64,
}

pub struct FolderScan {
    pub files: Vec<ScannedFile>,
    pub dir_count: u64,
    pub data_bytes: u64,
}

/// Recursively scan a host folder.  Directories whose *name* appears in
/// `ignore` are skipped whole; symlinks and special files are skipped.
pub fn scan_folder(root: &Path, ignore: &[String]) -> Result<FolderScan, SfsError> {
    let ignore: HashSet<&str> = ignore.iter().map(String::as_str).collect();
    let mut scan = FolderScan {
        files: Vec::new(),
        dir_count: 0,
        data_bytes: 0,
    };
    walk(root, root, &ignore, &mut scan)?;
    Ok(scan)
}

fn walk(
    root: &Path,
    dir: &Path,
    ignore: &HashSet<&str>,
    scan: &mut FolderScan,
) -> Result<(), SfsError> {
    let reader = fs::read_dir(dir).map_err(|e| SfsError::Io {
        context: format!("reading directory {}", dir.display()),
        source: e,
    })?;
    let mut paths: Vec<PathBuf> = reader
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    paths.sort();

    for path in paths {
        if path.is_symlink() {
            continue;
        }
        if path.is_dir() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if ignore.contains(name) {
                tracing::debug!(path = %path.display(), "skipping ignored directory");
                continue;
            }
            scan.dir_count += 1;
            walk(root, &path, ignore, scan)?;
        } else if path.is_file() {
            let size = fs::metadata(&path)
                .map_err(|e| SfsError::Io {
                    context: format!("reading metadata of {}", path.display()),
                    source: e,
                })?
                .len();
            let rel = path.strip_prefix(root).expect("scanned path under root");
            let image_path = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            scan.data_bytes += size;
            scan.files.push(ScannedFile {
                host_path: path,
                image_path,
                size,
            });
        }
    }
    Ok(())
}

/// Size a fresh image for a scanned tree: the payload blocks, an index
/// estimate of two slots per entry plus the two sentinels, and a floor of
/// 64 KiB, rounded up to the next power of two.
pub fn estimate_image_size(scan: &FolderScan) -> u64 {
    let data_blocks: u64 = scan.files.iter().map(|f| f.size.div_ceil(512)).sum();
    let entries = 2 + 2 * scan.files.len() as u64 + 2 * scan.dir_count;
    let index_blocks = (entries * 64).div_ceil(512);
    let total_blocks = 1 + data_blocks + index_blocks;
    (total_blocks * 512).max(64 * 1024).next_power_of_two()
}

/// Create directory entries for every `/`-separated prefix of `path`.
fn ensure_parents(vol: &mut Volume, path: &str) -> Result<(), SfsError> {
    let p = normalize(path);
    let mut idx = 0;
    while let Some(pos) = p[idx..].find('/') {
        let parent = &p[..idx + pos];
        if !parent.is_empty() && !vol.exists(parent) {
            vol.mkdir(parent)?;
        }
        idx += pos + 1;
    }
    Ok(())
}

/// Import one blob at `image_path`, replacing any existing file there.
pub fn add_bytes(vol: &mut Volume, image_path: &str, content: &[u8]) -> Result<(), SfsError> {
    ensure_parents(vol, image_path)?;
    if vol.exists(image_path) {
        vol.unlink(image_path)?;
    }
    vol.write(image_path, 0, content)?;
    vol.flush(image_path)
}

/// Import one host file at `image_path`.
pub fn add_file(vol: &mut Volume, host_path: &Path, image_path: &str) -> Result<(), SfsError> {
    let content = fs::read(host_path).map_err(|e| SfsError::Io {
        context: format!("reading {}", host_path.display()),
        source: e,
    })?;
    add_bytes(vol, image_path, &content)
}

/// Pack a host folder into a brand-new image at `image`.
pub fn pack_folder(image: &Path, folder: &Path, ignore: &[String]) -> Result<(), SfsError> {
    let scan = scan_folder(folder, ignore)?;
    let size = estimate_image_size(&scan);
    tracing::info!(
        files = scan.files.len(),
        dirs = scan.dir_count,
        data_bytes = scan.data_bytes,
        image_bytes = size,
        "scanned folder"
    );

    let mut vol = Volume::format(image, size)?;

    let pb = ProgressBar::new(scan.files.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    for f in &scan.files {
        pb.set_message(f.image_path.clone());
        add_file(&mut vol, &f.host_path, &f.image_path)?;
        pb.inc(1);
    }
    pb.finish_and_clear();

    tracing::info!(path = %image.display(), "image created");
    Ok(())
}
