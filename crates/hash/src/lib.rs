//! Content hashing for ROM identification.
//!
//! Games are identified by the lowercase hexadecimal MD5 digest of their
//! content, which is what the metadata databases and BIOS registries key on.
//! Files are streamed in [`CHUNK_SIZE`] blocks so peak memory stays bounded
//! for multi-gigabyte disc images.
//!
//! - [`hash_file`] and [`hash_reader`] block the calling thread. Never call
//!   them from an async executor thread.
//! - [`hash_file_async`] runs on the blocking pool and can be cancelled with a
//!   [`CancellationToken`]; a cancelled hash yields [`Outcome::Cancelled`] and
//!   never a partial digest.

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use md5::{Digest, Md5};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
pub use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Size of each block read from the input.
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Result of a hash that may be cancelled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Lowercase hexadecimal digest of the whole input.
    Complete(String),
    /// Hashing stopped before the end of input; no digest is available.
    Cancelled,
}
impl Outcome {
    pub fn into_digest(self) -> Option<String> {
        match self {
            Self::Complete(digest) => Some(digest),
            Self::Cancelled => None,
        }
    }
}

/// Digest of an in-memory buffer.
pub fn hash_bytes(data: impl AsRef<[u8]>) -> String {
    hex::encode(Md5::digest(data.as_ref()))
}

/// Digest of a file, starting `offset` bytes into it.
///
/// Fails with [`OffsetOutOfRange`](ErrorKind::OffsetOutOfRange) if `offset`
/// is past the end of the file.
#[instrument(skip(path), fields(path = %path.as_ref().display()))]
pub fn hash_file(path: impl AsRef<Path>, offset: u64) -> Result<String> {
    match hash_path(path.as_ref(), offset, None)? {
        Outcome::Complete(digest) => Ok(digest),
        // Nothing can cancel a hash without a token.
        Outcome::Cancelled => exn::bail!(ErrorKind::Task),
    }
}

/// Digest of everything `reader` yields after skipping `offset` bytes.
pub fn hash_reader(mut reader: impl Read, offset: u64) -> Result<String> {
    let skipped = io::copy(&mut reader.by_ref().take(offset), &mut io::sink()).map_err(ErrorKind::Io)?;
    if skipped < offset {
        exn::bail!(ErrorKind::OffsetOutOfRange { offset, len: skipped });
    }
    match digest_chunks(reader, None).map_err(ErrorKind::Io)? {
        Outcome::Complete(digest) => Ok(digest),
        Outcome::Cancelled => exn::bail!(ErrorKind::Task),
    }
}

/// Digest of a file computed on the blocking thread pool.
///
/// The token is checked between chunks; once cancelled this resolves to
/// [`Outcome::Cancelled`] without waiting for the remaining input.
pub async fn hash_file_async(path: impl Into<PathBuf>, offset: u64, cancel: CancellationToken) -> Result<Outcome> {
    let path = path.into();
    let task = tokio::task::spawn_blocking({
        let cancel = cancel.clone();
        move || hash_path(&path, offset, Some(&cancel))
    });
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(Outcome::Cancelled),
        joined = task => joined.or_raise(|| ErrorKind::Task)?,
    }
}

fn hash_path(path: &Path, offset: u64, cancel: Option<&CancellationToken>) -> Result<Outcome> {
    let mut file = File::open(path).map_err(|e| ErrorKind::from_io(e, path))?;
    let len = file.metadata().map_err(|e| ErrorKind::from_io(e, path))?.len();
    if offset > len {
        exn::bail!(ErrorKind::OffsetOutOfRange { offset, len });
    }
    file.seek(SeekFrom::Start(offset)).map_err(|e| ErrorKind::from_io(e, path))?;
    let outcome = digest_chunks(file, cancel).map_err(|e| ErrorKind::from_io(e, path))?;
    if let Outcome::Complete(digest) = &outcome {
        tracing::trace!(path = %path.display(), offset, md5 = %digest, "Hashed file");
    }
    Ok(outcome)
}

fn digest_chunks(mut reader: impl Read, cancel: Option<&CancellationToken>) -> io::Result<Outcome> {
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Ok(Outcome::Cancelled);
        }
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..n]);
    }
    Ok(Outcome::Complete(hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Cursor;

    const HELLO_WORLD: &str = "5eb63bbbe01eeed093cb22bb8f5acdc3";
    const WORLD: &str = "7d793037a0760186574b0282f2f435e7";
    const EMPTY: &str = "d41d8cd98f00b204e9800998ecf8427e";

    fn write_temp(data: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, data).unwrap();
        file
    }

    #[rstest]
    #[case(0, HELLO_WORLD)]
    #[case(6, WORLD)]
    #[case(11, EMPTY)]
    fn test_hash_file_offsets(#[case] offset: u64, #[case] expected: &str) {
        let file = write_temp(b"hello world");
        assert_eq!(hash_file(file.path(), offset).unwrap(), expected);
    }

    #[test]
    fn test_hash_is_deterministic_across_chunks() {
        // Spans three chunks, the last one partial.
        let data: Vec<u8> = (0..(CHUNK_SIZE * 2 + 12345)).map(|i| (i % 251) as u8).collect();
        let file = write_temp(&data);
        let first = hash_file(file.path(), 0).unwrap();
        let second = hash_file(file.path(), 0).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, hash_bytes(&data));
        assert_eq!(hash_file(file.path(), 100).unwrap(), hash_bytes(&data[100..]));
    }

    #[test]
    fn test_hash_file_offset_past_end() {
        let file = write_temp(b"hello world");
        let err = hash_file(file.path(), 12).unwrap_err();
        assert!(matches!(&*err, ErrorKind::OffsetOutOfRange { offset: 12, len: 11 }));
    }

    #[test]
    fn test_hash_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = hash_file(dir.path().join("missing.sfc"), 0).unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn test_hash_reader() {
        assert_eq!(hash_reader(Cursor::new(b"hello world"), 0).unwrap(), HELLO_WORLD);
        assert_eq!(hash_reader(Cursor::new(b"hello world"), 6).unwrap(), WORLD);
        let err = hash_reader(Cursor::new(b"hello"), 6).unwrap_err();
        assert!(matches!(&*err, ErrorKind::OffsetOutOfRange { offset: 6, len: 5 }));
    }

    #[tokio::test]
    async fn test_hash_file_async_matches_blocking() {
        let file = write_temp(b"hello world");
        let outcome = hash_file_async(file.path(), 0, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Complete(HELLO_WORLD.to_string()));
    }

    #[tokio::test]
    async fn test_hash_file_async_cancelled_before_start() {
        let file = write_temp(b"hello world");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = hash_file_async(file.path(), 0, cancel).await.unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(outcome.into_digest(), None);
    }

    /// Cancels the token as soon as the first chunk has been handed out.
    struct CancelAfterFirstRead {
        inner: Cursor<Vec<u8>>,
        cancel: CancellationToken,
    }
    impl Read for CancelAfterFirstRead {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.cancel.cancel();
            Ok(n)
        }
    }

    #[test]
    fn test_cancel_mid_stream_yields_no_digest() {
        let cancel = CancellationToken::new();
        let reader = CancelAfterFirstRead { inner: Cursor::new(vec![7u8; CHUNK_SIZE * 3]), cancel: cancel.clone() };
        assert_eq!(digest_chunks(reader, Some(&cancel)).unwrap(), Outcome::Cancelled);
    }
}
