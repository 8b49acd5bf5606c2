//! Source bundle packaging.
//!
//! Zips a project directory into a deployable source bundle. A fixed set of
//! sensitive paths (VCS metadata, dotenv files, key material, credential
//! directories) is always excluded; user-supplied glob patterns are unioned
//! with that set, never able to re-include anything from it.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use glob::Pattern;
use thiserror::Error;
use tokio::task::spawn_blocking;
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Patterns excluded from every bundle.
const SENSITIVE_EXCLUDES: &[&str] = &[
    ".git",
    ".git/**",
    ".svn",
    ".svn/**",
    ".hg",
    ".hg/**",
    ".env",
    ".env.*",
    "*.pem",
    "*.key",
    "*.p12",
    "*.pfx",
    ".aws",
    ".aws/**",
    ".ssh",
    ".ssh/**",
];

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("Invalid exclude pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },

    #[error("Source directory contains no files to package")]
    Empty,

    #[error("Source path is not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Zip `src` into a source bundle at `dest`.
///
/// `excludes` are glob patterns matched against paths relative to `src`.
/// Symlinks are skipped rather than followed, so a link cannot pull content
/// from outside the source directory into the bundle.
pub async fn package_directory(
    src: &Path,
    dest: &Path,
    excludes: &[String],
) -> Result<(), PackageError> {
    if !src.is_dir() {
        return Err(PackageError::NotADirectory(src.to_owned()));
    }
    let patterns = compile_patterns(excludes)?;

    let src = src.to_owned();
    let dest = dest.to_owned();
    spawn_blocking(move || package_sync(&src, &dest, &patterns))
        .await
        .map_err(io::Error::from)?
}

fn compile_patterns(excludes: &[String]) -> Result<Vec<Pattern>, PackageError> {
    let mut patterns = Vec::with_capacity(SENSITIVE_EXCLUDES.len() + excludes.len());
    for raw in SENSITIVE_EXCLUDES {
        patterns.push(Pattern::new(raw).map_err(|source| PackageError::Pattern {
            pattern: (*raw).to_owned(),
            source,
        })?);
    }
    for raw in excludes {
        patterns.push(Pattern::new(raw).map_err(|source| PackageError::Pattern {
            pattern: raw.clone(),
            source,
        })?);
    }
    Ok(patterns)
}

fn is_excluded(relative: &Path, patterns: &[Pattern]) -> bool {
    patterns.iter().any(|p| p.matches_path(relative))
}

fn package_sync(src: &Path, dest: &Path, patterns: &[Pattern]) -> Result<(), PackageError> {
    let mut writer = ZipWriter::new(File::create(dest)?);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut file_count: usize = 0;
    add_directory(src, src, patterns, &mut writer, options, &mut file_count)?;

    if file_count == 0 {
        // Leave no empty bundle behind.
        drop(writer);
        let _ = std::fs::remove_file(dest);
        return Err(PackageError::Empty);
    }

    writer.finish()?;
    debug!(
        bundle = %dest.display(),
        files = file_count,
        "source bundle packaged"
    );
    Ok(())
}

fn add_directory(
    root: &Path,
    dir: &Path,
    patterns: &[Pattern],
    writer: &mut ZipWriter<File>,
    options: SimpleFileOptions,
    file_count: &mut usize,
) -> Result<(), PackageError> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let relative = path.strip_prefix(root).map_err(|e| {
            PackageError::Io(io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
        })?;

        if is_excluded(relative, patterns) {
            debug!(path = %relative.display(), "excluded from bundle");
            continue;
        }

        let file_type = entry.file_type()?;
        if file_type.is_symlink() {
            debug!(path = %relative.display(), "skipping symlink");
            continue;
        }

        let name = relative.to_string_lossy().replace('\\', "/");
        if file_type.is_dir() {
            writer.add_directory(format!("{name}/"), options)?;
            add_directory(root, &path, patterns, writer, options, file_count)?;
        } else {
            writer.start_file(name, options)?;
            let mut source = File::open(&path)?;
            io::copy(&mut source, writer)?;
            *file_count += 1;
        }
    }
    Ok(())
}
