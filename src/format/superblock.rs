//! Fixed-size file header.

use crate::error::FormatError;

/// Magic bytes identifying a histogram cube.
pub const MAGIC: &[u8; 8] = b"HISTCUBE";

/// Current container format version (major).
pub const FORMAT_VERSION_MAJOR: u8 = 1;

/// Current container format version (minor).
pub const FORMAT_VERSION_MINOR: u8 = 0;

/// Size of the superblock in bytes. Chunk data starts right after it.
pub const SUPERBLOCK_SIZE: usize = 64;

/// Compute the CRC32 checksum of a byte run.
pub fn compute_checksum(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// 64-byte header at offset 0.
///
/// # Layout
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       8     Magic ("HISTCUBE")
/// 8       1     Version major
/// 9       1     Version minor
/// 10      6     Reserved
/// 16      8     Catalog offset
/// 24      8     Catalog length (bytes)
/// 32      4     CRC32 of the catalog bytes
/// 36      28    Reserved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub version_major: u8,
    pub version_minor: u8,
    pub catalog_offset: u64,
    pub catalog_len: u64,
    pub catalog_checksum: u32,
}

impl Superblock {
    /// Superblock for the current format, pointing at a catalog.
    pub fn new(catalog_offset: u64, catalog_len: u64, catalog_checksum: u32) -> Self {
        Self {
            version_major: FORMAT_VERSION_MAJOR,
            version_minor: FORMAT_VERSION_MINOR,
            catalog_offset,
            catalog_len,
            catalog_checksum,
        }
    }

    pub fn to_bytes(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        buf[0..8].copy_from_slice(MAGIC);
        buf[8] = self.version_major;
        buf[9] = self.version_minor;
        buf[16..24].copy_from_slice(&self.catalog_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.catalog_len.to_le_bytes());
        buf[32..36].copy_from_slice(&self.catalog_checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; SUPERBLOCK_SIZE]) -> Result<Self, FormatError> {
        if &buf[0..8] != MAGIC {
            return Err(FormatError::NotACube);
        }

        let version_major = buf[8];
        let version_minor = buf[9];
        if version_major != FORMAT_VERSION_MAJOR {
            return Err(FormatError::UnsupportedFormat {
                major: version_major,
                minor: version_minor,
            });
        }

        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(b)
        };
        let catalog_offset = u64_at(16);
        let catalog_len = u64_at(24);
        let catalog_checksum = u32::from_le_bytes([buf[32], buf[33], buf[34], buf[35]]);

        if catalog_offset < SUPERBLOCK_SIZE as u64 {
            return Err(FormatError::Corrupt(format!(
                "catalog offset {catalog_offset} overlaps the superblock"
            )));
        }

        Ok(Self {
            version_major,
            version_minor,
            catalog_offset,
            catalog_len,
            catalog_checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn superblock_roundtrip() {
        let sb = Superblock::new(4096, 321, 0xDEADBEEF);
        let parsed = Superblock::from_bytes(&sb.to_bytes()).unwrap();
        assert_eq!(parsed, sb);
    }

    #[test]
    fn wrong_magic() {
        let mut buf = Superblock::new(64, 1, 0).to_bytes();
        buf[0..8].copy_from_slice(b"NOTACUBE");
        assert!(matches!(
            Superblock::from_bytes(&buf),
            Err(FormatError::NotACube)
        ));
    }

    #[test]
    fn future_major_version() {
        let mut sb = Superblock::new(64, 1, 0);
        sb.version_major = 9;
        assert!(matches!(
            Superblock::from_bytes(&sb.to_bytes()),
            Err(FormatError::UnsupportedFormat { major: 9, .. })
        ));
    }

    #[test]
    fn catalog_inside_header_is_corrupt() {
        let sb = Superblock::new(8, 1, 0);
        assert!(matches!(
            Superblock::from_bytes(&sb.to_bytes()),
            Err(FormatError::Corrupt(_))
        ));
    }

    #[test]
    fn checksum_differs_on_change() {
        assert_eq!(compute_checksum(b"cube"), compute_checksum(b"cube"));
        assert_ne!(compute_checksum(b"cube"), compute_checksum(b"cubf"));
    }
}
