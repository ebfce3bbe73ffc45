//! Archive detection and extraction.
//!
//! ROM sets are usually distributed either as multi-file containers (ZIP) or
//! as a single disc/cartridge image wrapped in a stream compressor
//! (`mario.sfc.gz`, `disc.bin.xz`). This crate exposes both behind one
//! [`Archive`] type:
//!
//! - **Format detection** from file extensions ([`Archive::from_path`]),
//!   corrected by magic bytes when the file can be read ([`Archive::detect`])
//! - **Extraction** into a directory with progress reporting
//!   ([`Archive::extract`])
//! - **Streaming** decompression of single-stream formats
//!   ([`Compression::wrap_reader`], [`Compression::decompress_stream`])
//!
//! Bzip2, Gzip and ZIP are always available. XZ and Zstd are behind feature
//! flags (enabled by default).

mod archive;
mod construct;
pub mod error;
mod ops;
mod util;

pub use crate::archive::{Archive, is_archive};

/// A supported single-stream compression format.
///
/// Variants gated behind feature flags (`xz`, `zstd`) are only available
/// when the corresponding feature is enabled. Defaults to
/// [`None`](Self::None) (uncompressed).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Uncompressed
    #[default]
    None,
    /// Bzip2 compression (.bz2)
    Bzip2,
    /// Gzip compression (.gz)
    Gzip,
    /// XZ/LZMA compression (.xz)
    #[cfg(feature = "xz")]
    Xz,
    /// Zstd compression (.zst)
    #[cfg(feature = "zstd")]
    Zstd,
}

#[cfg(test)]
mod tests {
    use crate::Compression;

    #[test]
    fn compression_default() {
        assert_eq!(Compression::default(), Compression::None);
    }
}
