//! Archive extraction

use crate::Compression;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::instrument;
use zip::ZipArchive;

/// Extracted files never overwrite existing ones; give up after this many
/// `name (n).ext` candidates.
const MAX_NAME_ATTEMPTS: usize = 100;
/// Report progress for streamed archives at most once per this many bytes.
const PROGRESS_INTERVAL: u64 = 1024 * 1024;

/// An archive format that can be expanded into one or more files.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Archive {
    /// Multi-file ZIP container.
    Zip,
    /// A single file wrapped in a stream compressor (never [`Compression::None`]).
    Stream(Compression),
}

/// Whether the path looks like an archive that should be extracted before import.
pub fn is_archive(path: impl AsRef<Path>) -> bool {
    Archive::from_path(path).is_some()
}

impl Archive {
    /// Extract `archive` into the `destination` directory.
    ///
    /// Entries are flattened into `destination` (directory structure inside
    /// containers is discarded) and never overwrite existing files: name
    /// collisions get a ` (n)` suffix. `on_progress` receives values in
    /// `[0, 1]` as extraction proceeds, finishing with `1.0`.
    ///
    /// On failure every file written so far is removed, so a corrupt archive
    /// never leaves a partial extraction behind.
    #[instrument(skip(on_progress), fields(format = %self, archive = %archive.display()))]
    pub fn extract(&self, archive: &Path, destination: &Path, mut on_progress: impl FnMut(f32)) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(destination).or_raise(|| ErrorKind::Io)?;
        let mut extracted = Vec::new();
        let result = match self {
            Archive::Zip => extract_zip(archive, destination, &mut extracted, &mut on_progress),
            Archive::Stream(compression) => {
                extract_stream(*compression, archive, destination, &mut extracted, &mut on_progress)
            },
        };
        if let Err(e) = result {
            for path in &extracted {
                if let Err(cleanup) = fs::remove_file(path) {
                    tracing::warn!(path = %path.display(), error = %cleanup, "Could not remove partially extracted file");
                }
            }
            return Err(e);
        }
        on_progress(1.0);
        tracing::debug!(files = extracted.len(), "Extracted archive");
        Ok(extracted)
    }
}

fn extract_zip(
    archive: &Path,
    destination: &Path,
    extracted: &mut Vec<PathBuf>,
    on_progress: &mut impl FnMut(f32),
) -> Result<()> {
    let file = File::open(archive).or_raise(|| ErrorKind::Io)?;
    let mut zip = ZipArchive::new(BufReader::new(file)).or_raise(|| ErrorKind::InvalidData)?;
    let total = zip.len();
    on_progress(0.0);
    for index in 0..total {
        let mut entry = zip.by_index(index).or_raise(|| ErrorKind::InvalidData)?;
        if entry.is_dir() {
            continue;
        }
        let Some(enclosed) = entry.enclosed_name() else {
            exn::bail!(ErrorKind::UnsafeEntry(entry.name().to_string()));
        };
        let Some(name) = enclosed.file_name() else {
            continue;
        };
        // Resource forks and other dotfiles (`__MACOSX/._game.bin`) are noise.
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let target = free_path(destination, Path::new(name))?;
        let mut output = BufWriter::new(File::create(&target).or_raise(|| ErrorKind::Io)?);
        extracted.push(target);
        io::copy(&mut entry, &mut output).or_raise(|| ErrorKind::InvalidData)?;
        output.flush().or_raise(|| ErrorKind::Io)?;
        on_progress((index + 1) as f32 / total as f32);
    }
    Ok(())
}

fn extract_stream(
    compression: Compression,
    archive: &Path,
    destination: &Path,
    extracted: &mut Vec<PathBuf>,
    on_progress: &mut impl FnMut(f32),
) -> Result<()> {
    // `mario.sfc.gz` -> `mario.sfc`
    let Some(stem) = archive.file_stem() else {
        exn::bail!(ErrorKind::UnsupportedFormat(archive.display().to_string()));
    };
    let file = File::open(archive).or_raise(|| ErrorKind::Io)?;
    let total = file.metadata().or_raise(|| ErrorKind::Io)?.len();
    let target = free_path(destination, Path::new(stem))?;
    let mut output = BufWriter::new(File::create(&target).or_raise(|| ErrorKind::Io)?);
    extracted.push(target);
    let reader = ProgressReader { inner: BufReader::new(file), read: 0, reported: 0, total, callback: on_progress };
    compression.decompress_stream(reader, &mut output)?;
    output.flush().or_raise(|| ErrorKind::Io)
}

/// First non-existing `name`, `name (2)`, `name (3)`... inside `dir`.
fn free_path(dir: &Path, name: &Path) -> Result<PathBuf> {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return Ok(candidate);
    }
    let stem = name.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default();
    let extension = name.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default();
    for n in 2..=MAX_NAME_ATTEMPTS {
        let candidate = dir.join(format!("{stem} ({n}){extension}"));
        if !candidate.exists() {
            return Ok(candidate);
        }
    }
    exn::bail!(ErrorKind::NameExhausted(dir.join(name)))
}

/// Counts compressed bytes consumed so progress can be reported against the
/// archive's on-disk size.
struct ProgressReader<'a, R, F> {
    inner: R,
    read: u64,
    reported: u64,
    total: u64,
    callback: &'a mut F,
}

impl<R: Read, F: FnMut(f32)> Read for ProgressReader<'_, R, F> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.read += n as u64;
        if self.total > 0 && self.read - self.reported >= PROGRESS_INTERVAL {
            self.reported = self.read;
            (self.callback)((self.read as f64 / self.total as f64).min(1.0) as f32);
        }
        Ok(n)
    }
}
