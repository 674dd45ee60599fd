//! Fixed VHD footer handling.
//!
//! A fixed VHD is a raw disk followed by a 512-byte big-endian footer. The
//! generator strips it from offset math when reading a source disk, and the
//! container writer can append one so a `.cosi` file boots as a fixed VHD.

use crate::DiskError;
use chrono::{DateTime, Utc};
use std::io::{Read, Seek, SeekFrom};
use uuid::Uuid;

pub const VHD_FOOTER_SIZE: u64 = 512;

const COOKIE: &[u8; 8] = b"conectix";
const FEATURES: u32 = 0x0000_0002;
const FORMAT_VERSION: u32 = 0x0001_0000;
const FIXED_DATA_OFFSET: u64 = u64::MAX;
const CREATOR_APP: &[u8; 4] = b"vpc ";
const CREATOR_VERSION: u32 = 0x0005_0000;
const CREATOR_HOST: &[u8; 4] = b"Wi2k";
const DISK_TYPE_FIXED: u32 = 2;
const CHECKSUM_OFFSET: usize = 64;
/// 2000-01-01T00:00:00Z, the VHD timestamp epoch.
const VHD_EPOCH: i64 = 946_684_800;
/// 65535 cylinders * 16 heads * 255 sectors.
const MAX_CHS_SECTORS: u64 = 267_382_800;

/// Whether the last 512 bytes of a file start with the VHD cookie.
pub fn has_vhd_footer<R: Read + Seek>(reader: &mut R, file_size: u64) -> Result<bool, DiskError> {
    if file_size < VHD_FOOTER_SIZE {
        return Ok(false);
    }
    let mut cookie = [0u8; 8];
    reader.seek(SeekFrom::Start(file_size - VHD_FOOTER_SIZE))?;
    reader.read_exact(&mut cookie)?;
    Ok(&cookie == COOKIE)
}

/// Size of the disk payload, excluding a VHD footer if one is present.
pub fn effective_disk_size<R: Read + Seek>(
    reader: &mut R,
    file_size: u64,
) -> Result<u64, DiskError> {
    if has_vhd_footer(reader, file_size)? {
        Ok(file_size - VHD_FOOTER_SIZE)
    } else {
        Ok(file_size)
    }
}

/// Cylinder/head/sector geometry recorded in the footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChsGeometry {
    pub cylinders: u16,
    pub heads: u8,
    pub sectors_per_track: u8,
}

impl ChsGeometry {
    /// CHS values for a disk of `size` bytes, per the algorithm in the VHD
    /// format specification appendix.
    pub fn for_size(size: u64) -> Self {
        let total_sectors = size.div_ceil(512).min(MAX_CHS_SECTORS);

        let (sectors_per_track, heads, cylinder_times_heads) = if total_sectors >= 66_059_280 {
            (255, 16, total_sectors / 255)
        } else {
            let mut spt = 17;
            let mut cth = total_sectors / spt;
            let mut heads = cth.div_ceil(1024).max(4);
            if cth >= heads * 1024 || heads > 16 {
                spt = 31;
                heads = 16;
                cth = total_sectors / spt;
            }
            if cth >= heads * 1024 {
                spt = 63;
                heads = 16;
                cth = total_sectors / spt;
            }
            (spt, heads, cth)
        };

        Self {
            cylinders: (cylinder_times_heads / heads).min(65_535) as u16,
            heads: heads.min(16) as u8,
            sectors_per_track: sectors_per_track.min(255) as u8,
        }
    }
}

/// Footer of a fixed-size VHD.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VhdFooter {
    pub original_size: u64,
    pub current_size: u64,
    /// Seconds since 2000-01-01 UTC.
    pub timestamp: u32,
    pub geometry: ChsGeometry,
    pub unique_id: Uuid,
}

impl VhdFooter {
    /// Footer for a fixed disk whose payload is exactly `size` bytes.
    pub fn fixed(size: u64, created: DateTime<Utc>, unique_id: Uuid) -> Self {
        let timestamp = (created.timestamp() - VHD_EPOCH).clamp(0, i64::from(u32::MAX)) as u32;
        Self {
            original_size: size,
            current_size: size,
            timestamp,
            geometry: ChsGeometry::for_size(size),
            unique_id,
        }
    }

    pub fn to_bytes(&self) -> [u8; 512] {
        let mut b = [0u8; 512];
        b[0..8].copy_from_slice(COOKIE);
        b[8..12].copy_from_slice(&FEATURES.to_be_bytes());
        b[12..16].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
        b[16..24].copy_from_slice(&FIXED_DATA_OFFSET.to_be_bytes());
        b[24..28].copy_from_slice(&self.timestamp.to_be_bytes());
        b[28..32].copy_from_slice(CREATOR_APP);
        b[32..36].copy_from_slice(&CREATOR_VERSION.to_be_bytes());
        b[36..40].copy_from_slice(CREATOR_HOST);
        b[40..48].copy_from_slice(&self.original_size.to_be_bytes());
        b[48..56].copy_from_slice(&self.current_size.to_be_bytes());
        b[56..58].copy_from_slice(&self.geometry.cylinders.to_be_bytes());
        b[58] = self.geometry.heads;
        b[59] = self.geometry.sectors_per_track;
        b[60..64].copy_from_slice(&DISK_TYPE_FIXED.to_be_bytes());
        b[68..84].copy_from_slice(self.unique_id.as_bytes());
        // b[84] saved state stays 0

        let sum = checksum(&b);
        b[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&sum.to_be_bytes());
        b
    }

    /// Parse and checksum-verify a footer.
    pub fn parse(bytes: &[u8]) -> Result<Self, DiskError> {
        let b: &[u8; 512] = bytes
            .try_into()
            .map_err(|_| DiskError::InvalidFooter(format!("expected 512 bytes, got {}", bytes.len())))?;
        if &b[0..8] != COOKIE {
            return Err(DiskError::InvalidFooter("missing 'conectix' cookie".to_owned()));
        }

        let stored = be_u32(b, CHECKSUM_OFFSET);
        let computed = checksum(b);
        if stored != computed {
            return Err(DiskError::InvalidFooter(format!(
                "checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"
            )));
        }

        let mut id = [0u8; 16];
        id.copy_from_slice(&b[68..84]);
        Ok(Self {
            original_size: be_u64(b, 40),
            current_size: be_u64(b, 48),
            timestamp: be_u32(b, 24),
            geometry: ChsGeometry {
                cylinders: u16::from_be_bytes([b[56], b[57]]),
                heads: b[58],
                sectors_per_track: b[59],
            },
            unique_id: Uuid::from_bytes(id),
        })
    }
}

/// One's complement of the byte sum, skipping the checksum field itself.
fn checksum(b: &[u8; 512]) -> u32 {
    let sum = b
        .iter()
        .enumerate()
        .filter(|(i, _)| !(CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4).contains(i))
        .fold(0u32, |acc, (_, &byte)| acc.wrapping_add(u32::from(byte)));
    !sum
}

fn be_u32(b: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn be_u64(b: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&b[at..at + 8]);
    u64::from_be_bytes(buf)
}
