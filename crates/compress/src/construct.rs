use crate::error::{ErrorKind, Result};
use crate::{Archive, Compression};
use exn::ResultExt;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BZIP2_MAGIC: [u8; 3] = [0x42, 0x5A, 0x68];
const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
#[cfg(feature = "xz")]
const XZ_MAGIC: [u8; 6] = [0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
#[cfg(feature = "zstd")]
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];
// Local file header; empty and spanned archives use other signatures but
// can't be extracted anyway.
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
/// Longest signature above.
const MAGIC_LEN: u64 = 6;

impl Compression {
    /// Detect compression from a file extension.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| match ext.to_lowercase().as_str() {
                "bz2" => Compression::Bzip2,
                "gz" => Compression::Gzip,
                #[cfg(feature = "xz")]
                "xz" => Compression::Xz,
                #[cfg(feature = "zstd")]
                "zst" => Compression::Zstd,
                _ => Compression::None,
            })
            .unwrap_or(Compression::None)
    }

    /// Detect compression format from magic bytes.
    ///
    /// Returns `None` variant if no magic bytes match or if the input
    /// is too short to detect any format.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Self {
        if bytes.starts_with(&BZIP2_MAGIC) {
            return Compression::Bzip2;
        }
        if bytes.starts_with(&GZIP_MAGIC) {
            return Compression::Gzip;
        }
        #[cfg(feature = "xz")]
        if bytes.starts_with(&XZ_MAGIC) {
            return Compression::Xz;
        }
        #[cfg(feature = "zstd")]
        if bytes.starts_with(&ZSTD_MAGIC) {
            return Compression::Zstd;
        }
        Compression::None
    }
}

impl Archive {
    /// Detect an archive from its file extension.
    ///
    /// Returns `None` for anything that isn't a container or a compressed
    /// stream, which is the common case for plain ROM images.
    #[must_use]
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let path = path.as_ref();
        let is_zip = path.extension().and_then(|ext| ext.to_str()).is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
        if is_zip {
            return Some(Archive::Zip);
        }
        match Compression::from_path(path) {
            Compression::None => None,
            compression => Some(Archive::Stream(compression)),
        }
    }

    /// Detect an archive by name, then let its first bytes correct the format.
    ///
    /// `None` if the name is not an archive's. Content that matches no known
    /// signature keeps the format the name suggests, and extraction reports
    /// the damage.
    pub fn detect(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let Some(by_name) = Self::from_path(path) else {
            return Ok(None);
        };
        let mut head = Vec::new();
        File::open(path)
            .and_then(|file| file.take(MAGIC_LEN).read_to_end(&mut head))
            .or_raise(|| ErrorKind::Io)?;
        let detected = Self::from_magic_bytes(&head).unwrap_or(by_name);
        if detected != by_name {
            tracing::debug!(path = %path.display(), named = %by_name, detected = %detected, "archive content does not match its name");
        }
        Ok(Some(detected))
    }

    /// Detect an archive from the first bytes of a file.
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&ZIP_MAGIC) {
            return Some(Archive::Zip);
        }
        match Compression::from_magic_bytes(bytes) {
            Compression::None => None,
            compression => Some(Archive::Stream(compression)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Archive, Compression};
    use rstest::rstest;

    #[rstest]
    #[case("mario.sfc", Compression::None)]
    #[case(".gz", Compression::None)]
    #[case("mario.sfc.gz", Compression::Gzip)]
    #[case("disc.bin.BZ2", Compression::Bzip2)]
    #[cfg_attr(feature = "xz", case("disc.iso.xz", Compression::Xz))]
    #[cfg_attr(feature = "zstd", case("disc.iso.zst", Compression::Zstd))]
    fn test_compression_from_path(#[case] test: &str, #[case] expected: Compression) {
        assert_eq!(Compression::from_path(test), expected);
    }

    #[rstest]
    #[case("pack.zip", Some(Archive::Zip))]
    #[case("PACK.ZIP", Some(Archive::Zip))]
    #[case("mario.sfc.gz", Some(Archive::Stream(Compression::Gzip)))]
    #[case("mario.sfc", None)]
    #[case("game.bin", None)]
    #[case("zip", None)]
    fn test_archive_from_path(#[case] test: &str, #[case] expected: Option<Archive>) {
        assert_eq!(Archive::from_path(test), expected);
    }

    #[rstest]
    #[case(b"PK\x03\x04rest", Some(Archive::Zip))]
    #[case(&[0x1F, 0x8B, 0x08, 0x00], Some(Archive::Stream(Compression::Gzip)))]
    #[case(&[0x42, 0x5A, 0x68, 0x39], Some(Archive::Stream(Compression::Bzip2)))]
    #[case(b"NES\x1a", None)]
    #[case(b"", None)]
    fn test_archive_from_magic_bytes(#[case] bytes: &[u8], #[case] expected: Option<Archive>) {
        assert_eq!(Archive::from_magic_bytes(bytes), expected);
    }

    #[test]
    fn test_detect_prefers_content() {
        let dir = tempfile::tempdir().unwrap();
        let mislabelled = dir.path().join("mario.sfc.gz");
        std::fs::write(&mislabelled, [0x42, 0x5A, 0x68, 0x39, 0x31]).unwrap();
        assert_eq!(Archive::detect(&mislabelled).unwrap(), Some(Archive::Stream(Compression::Bzip2)));

        let gzip_named_zip = dir.path().join("pack.zip");
        std::fs::write(&gzip_named_zip, [0x1F, 0x8B, 0x08, 0x00]).unwrap();
        assert_eq!(Archive::detect(&gzip_named_zip).unwrap(), Some(Archive::Stream(Compression::Gzip)));

        let unknown = dir.path().join("broken.zip");
        std::fs::write(&unknown, b"??").unwrap();
        assert_eq!(Archive::detect(&unknown).unwrap(), Some(Archive::Zip));

        // Plain ROMs are never opened.
        assert_eq!(Archive::detect(dir.path().join("missing.sfc")).unwrap(), None);
        assert!(Archive::detect(dir.path().join("missing.zip")).is_err());
    }
}
