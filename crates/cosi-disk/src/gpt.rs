//! GUID partition table parser.
//!
//! Only the primary header and entry array are read. LBA 0 holds the
//! protective MBR and is not interpreted; it is carried verbatim as part of
//! the primary region.

use crate::DiskError;
use std::io::{Read, Seek, SeekFrom};
use tracing::debug;
use uuid::Uuid;

/// Logical block size assumed for all GPT math.
pub const LBA_SIZE: u64 = 512;
pub const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";

const MIN_HEADER_SIZE: u32 = 92;
const MIN_ENTRY_SIZE: u32 = 128;
const NAME_OFFSET: usize = 56;
const NAME_LEN: usize = 72;

/// Decode a GPT GUID field.
///
/// The first three fields are stored little-endian and the last two as
/// plain bytes, so a straight byte copy would scramble the UUID.
pub fn decode_guid(bytes: &[u8; 16]) -> Uuid {
    Uuid::from_bytes_le(*bytes)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptHeader {
    pub revision: u32,
    pub header_size: u32,
    pub header_crc32: u32,
    pub current_lba: u64,
    pub backup_lba: u64,
    pub first_usable_lba: u64,
    pub last_usable_lba: u64,
    pub disk_guid: Uuid,
    pub partition_entry_lba: u64,
    pub num_partition_entries: u32,
    pub partition_entry_size: u32,
    pub partition_array_crc32: u32,
}

impl GptHeader {
    /// Parse the header block read from LBA 1.
    pub fn parse(block: &[u8]) -> Result<Self, DiskError> {
        if block.len() < MIN_HEADER_SIZE as usize {
            return Err(DiskError::Truncated {
                what: "GPT header".to_owned(),
                end: u64::from(MIN_HEADER_SIZE),
                disk_size: block.len() as u64,
            });
        }

        let mut signature = [0u8; 8];
        signature.copy_from_slice(&block[0..8]);
        if &signature != GPT_SIGNATURE {
            return Err(DiskError::InvalidSignature(signature));
        }

        let header_size = le_u32(block, 12);
        if header_size < MIN_HEADER_SIZE {
            return Err(DiskError::HeaderTooSmall(header_size));
        }

        let partition_entry_size = le_u32(block, 84);
        if partition_entry_size < MIN_ENTRY_SIZE {
            return Err(DiskError::EntryTooSmall(partition_entry_size));
        }

        Ok(Self {
            revision: le_u32(block, 8),
            header_size,
            header_crc32: le_u32(block, 16),
            current_lba: le_u64(block, 24),
            backup_lba: le_u64(block, 32),
            first_usable_lba: le_u64(block, 40),
            last_usable_lba: le_u64(block, 48),
            disk_guid: decode_guid(&guid_bytes(block, 56)),
            partition_entry_lba: le_u64(block, 72),
            num_partition_entries: le_u32(block, 80),
            partition_entry_size,
            partition_array_crc32: le_u32(block, 88),
        })
    }

    /// Byte length of the full partition entry array.
    pub fn entry_array_len(&self) -> u64 {
        u64::from(self.num_partition_entries) * u64::from(self.partition_entry_size)
    }
}

/// A populated slot of the partition entry array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GptPartition {
    /// Zero-based slot in the entry array.
    pub slot: u32,
    pub type_guid: Uuid,
    pub unique_guid: Uuid,
    pub first_lba: u64,
    /// Inclusive.
    pub last_lba: u64,
    pub attributes: u64,
    pub name: String,
}

impl GptPartition {
    fn parse(slot: u32, entry: &[u8]) -> Result<Option<Self>, DiskError> {
        let type_bytes = guid_bytes(entry, 0);
        if type_bytes == [0u8; 16] {
            return Ok(None);
        }

        let first_lba = le_u64(entry, 32);
        let last_lba = le_u64(entry, 40);
        if last_lba < first_lba {
            return Err(DiskError::InvalidPartitionRange {
                index: slot,
                first_lba,
                last_lba,
            });
        }

        Ok(Some(Self {
            slot,
            type_guid: decode_guid(&type_bytes),
            unique_guid: decode_guid(&guid_bytes(entry, 16)),
            first_lba,
            last_lba,
            attributes: le_u64(entry, 48),
            name: decode_name(&entry[NAME_OFFSET..NAME_OFFSET + NAME_LEN]),
        }))
    }

    pub fn start_offset(&self) -> u64 {
        self.first_lba.saturating_mul(LBA_SIZE)
    }

    pub fn size_bytes(&self) -> u64 {
        self.end_offset().saturating_sub(self.start_offset())
    }

    /// Byte just past the last sector. Saturates for entries that
    /// [`Gpt::read`] would reject.
    pub fn end_offset(&self) -> u64 {
        self.checked_end_offset().unwrap_or(u64::MAX)
    }

    /// `None` when the last sector lies beyond any 64-bit byte offset.
    pub fn checked_end_offset(&self) -> Option<u64> {
        self.last_lba.checked_add(1)?.checked_mul(LBA_SIZE)
    }
}

/// Parsed primary GPT of a disk image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gpt {
    pub header: GptHeader,
    /// Non-empty entries, in entry-array order.
    pub partitions: Vec<GptPartition>,
    pub disk_size: u64,
}

impl Gpt {
    /// Read the primary GPT from `reader`.
    ///
    /// `disk_size` is the usable size of the disk, excluding any VHD footer.
    pub fn read<R: Read + Seek>(reader: &mut R, disk_size: u64) -> Result<Self, DiskError> {
        let header_end = 2 * LBA_SIZE;
        if disk_size < header_end {
            return Err(DiskError::Truncated {
                what: "GPT header".to_owned(),
                end: header_end,
                disk_size,
            });
        }

        let mut block = vec![0u8; LBA_SIZE as usize];
        reader.seek(SeekFrom::Start(LBA_SIZE))?;
        reader.read_exact(&mut block)?;
        let header = GptHeader::parse(&block)?;
        debug!(
            "GPT header: {} entries of {} bytes at LBA {}",
            header.num_partition_entries, header.partition_entry_size, header.partition_entry_lba
        );

        let array_start = header.partition_entry_lba.checked_mul(LBA_SIZE);
        let array_end = array_start.and_then(|start| start.checked_add(header.entry_array_len()));
        let (Some(array_start), Some(array_end)) = (array_start, array_end) else {
            return Err(DiskError::Truncated {
                what: format!("partition entry array at LBA {}", header.partition_entry_lba),
                end: u64::MAX,
                disk_size,
            });
        };
        if array_end > disk_size {
            return Err(DiskError::Truncated {
                what: "partition entry array".to_owned(),
                end: array_end,
                disk_size,
            });
        }

        let mut array = vec![0u8; header.entry_array_len() as usize];
        reader.seek(SeekFrom::Start(array_start))?;
        reader.read_exact(&mut array)?;

        let mut partitions = Vec::new();
        for (slot, entry) in array
            .chunks_exact(header.partition_entry_size as usize)
            .enumerate()
        {
            let Some(partition) = GptPartition::parse(slot as u32, entry)? else {
                continue;
            };
            let end = partition.checked_end_offset().unwrap_or(u64::MAX);
            if end > disk_size {
                return Err(DiskError::Truncated {
                    what: format!("partition in slot {slot}"),
                    end,
                    disk_size,
                });
            }
            partitions.push(partition);
        }

        Ok(Self {
            header,
            partitions,
            disk_size,
        })
    }

    /// Length of the region holding the protective MBR, the header, and
    /// the whole entry array. Extracted verbatim, never rebuilt.
    pub fn primary_region_len(&self) -> u64 {
        self.header
            .partition_entry_lba
            .saturating_mul(LBA_SIZE)
            .saturating_add(self.header.entry_array_len())
    }

    /// Partitions ordered by their starting address on disk.
    pub fn partitions_by_start(&self) -> Vec<&GptPartition> {
        let mut sorted: Vec<&GptPartition> = self.partitions.iter().collect();
        sorted.sort_by_key(|p| p.first_lba);
        sorted
    }
}

fn le_u32(buf: &[u8], at: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(b)
}

fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(b)
}

fn guid_bytes(buf: &[u8], at: usize) -> [u8; 16] {
    let mut b = [0u8; 16];
    b.copy_from_slice(&buf[at..at + 16]);
    b
}

fn decode_name(raw: &[u8]) -> String {
    let units = raw
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0);
    char::decode_utf16(units)
        .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const ESP_TYPE: &str = "c12a7328-f81f-11d2-ba4b-00a0c93ec93b";
    const LINUX_TYPE: &str = "0fc63daf-8483-4772-8e79-3d69d8477de4";

    struct Part<'a> {
        type_guid: &'a str,
        first: u64,
        last: u64,
        name: &'a str,
    }

    /// Build a disk with the entry array at LBA 2 and `slots` entries of 128 bytes.
    fn synth_disk(lbas: u64, slots: u32, parts: &[Option<Part<'_>>]) -> Vec<u8> {
        let mut disk = vec![0u8; (lbas * LBA_SIZE) as usize];
        disk[510] = 0x55;
        disk[511] = 0xAA;

        let h = LBA_SIZE as usize;
        disk[h..h + 8].copy_from_slice(GPT_SIGNATURE);
        disk[h + 8..h + 12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
        disk[h + 12..h + 16].copy_from_slice(&92u32.to_le_bytes());
        disk[h + 24..h + 32].copy_from_slice(&1u64.to_le_bytes());
        disk[h + 32..h + 40].copy_from_slice(&(lbas - 1).to_le_bytes());
        disk[h + 40..h + 48].copy_from_slice(&34u64.to_le_bytes());
        disk[h + 48..h + 56].copy_from_slice(&(lbas - 34).to_le_bytes());
        let disk_guid = Uuid::parse_str("11111111-2222-3333-4444-555555555555").unwrap();
        disk[h + 56..h + 72].copy_from_slice(&disk_guid.to_bytes_le());
        disk[h + 72..h + 80].copy_from_slice(&2u64.to_le_bytes());
        disk[h + 80..h + 84].copy_from_slice(&slots.to_le_bytes());
        disk[h + 84..h + 88].copy_from_slice(&128u32.to_le_bytes());

        for (i, part) in parts.iter().enumerate() {
            let Some(part) = part else { continue };
            let e = 2 * h + i * 128;
            let ty = Uuid::parse_str(part.type_guid).unwrap();
            disk[e..e + 16].copy_from_slice(&ty.to_bytes_le());
            disk[e + 16..e + 32].copy_from_slice(&Uuid::new_v4().to_bytes_le());
            disk[e + 32..e + 40].copy_from_slice(&part.first.to_le_bytes());
            disk[e + 40..e + 48].copy_from_slice(&part.last.to_le_bytes());
            for (j, unit) in part.name.encode_utf16().enumerate() {
                let at = e + NAME_OFFSET + j * 2;
                disk[at..at + 2].copy_from_slice(&unit.to_le_bytes());
            }
        }
        disk
    }

    #[test]
    fn mixed_endian_esp_guid() {
        let raw: [u8; 16] = [
            0x28, 0x73, 0x2a, 0xc1, 0x1f, 0xf8, 0xd2, 0x11, 0xba, 0x4b, 0x00, 0xa0, 0xc9, 0x3e,
            0xc9, 0x3b,
        ];
        assert_eq!(decode_guid(&raw).to_string(), ESP_TYPE);
    }

    #[test]
    fn parses_header_and_partitions() {
        let disk = synth_disk(
            128,
            4,
            &[
                Some(Part { type_guid: ESP_TYPE, first: 34, last: 49, name: "esp" }),
                Some(Part { type_guid: LINUX_TYPE, first: 50, last: 93, name: "rootfs" }),
            ],
        );
        let size = disk.len() as u64;
        let gpt = Gpt::read(&mut Cursor::new(disk), size).unwrap();

        assert_eq!(gpt.header.revision, 0x0001_0000);
        assert_eq!(gpt.header.num_partition_entries, 4);
        assert_eq!(
            gpt.header.disk_guid.to_string(),
            "11111111-2222-3333-4444-555555555555"
        );
        assert_eq!(gpt.partitions.len(), 2);

        let esp = &gpt.partitions[0];
        assert_eq!(esp.type_guid.to_string(), ESP_TYPE);
        assert_eq!(esp.name, "esp");
        assert_eq!(esp.start_offset(), 34 * 512);
        assert_eq!(esp.size_bytes(), 16 * 512);
        assert_eq!(gpt.partitions[1].name, "rootfs");
    }

    #[test]
    fn drops_unused_entries() {
        let disk = synth_disk(
            128,
            4,
            &[
                Some(Part { type_guid: ESP_TYPE, first: 34, last: 40, name: "a" }),
                None,
                Some(Part { type_guid: LINUX_TYPE, first: 41, last: 60, name: "b" }),
                Some(Part { type_guid: LINUX_TYPE, first: 61, last: 70, name: "c" }),
            ],
        );
        let size = disk.len() as u64;
        let gpt = Gpt::read(&mut Cursor::new(disk), size).unwrap();
        assert_eq!(gpt.partitions.len(), 3);
        assert_eq!(gpt.partitions[1].slot, 2);
    }

    #[test]
    fn primary_region_covers_mbr_header_and_array() {
        let disk = synth_disk(128, 128, &[]);
        let size = disk.len() as u64;
        let gpt = Gpt::read(&mut Cursor::new(disk), size).unwrap();
        assert_eq!(gpt.primary_region_len(), 2 * 512 + 128 * 128);
    }

    #[test]
    fn sorts_partitions_by_start() {
        let disk = synth_disk(
            128,
            4,
            &[
                Some(Part { type_guid: LINUX_TYPE, first: 80, last: 90, name: "late" }),
                Some(Part { type_guid: ESP_TYPE, first: 34, last: 40, name: "early" }),
            ],
        );
        let size = disk.len() as u64;
        let gpt = Gpt::read(&mut Cursor::new(disk), size).unwrap();
        let names: Vec<&str> = gpt.partitions_by_start().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["early", "late"]);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut disk = synth_disk(128, 4, &[]);
        disk[512..520].copy_from_slice(b"NOT GPT!");
        let size = disk.len() as u64;
        let err = Gpt::read(&mut Cursor::new(disk), size).unwrap_err();
        assert!(matches!(err, DiskError::InvalidSignature(_)));
    }

    #[test]
    fn rejects_short_header_size() {
        let mut disk = synth_disk(128, 4, &[]);
        disk[524..528].copy_from_slice(&60u32.to_le_bytes());
        let size = disk.len() as u64;
        let err = Gpt::read(&mut Cursor::new(disk), size).unwrap_err();
        assert!(matches!(err, DiskError::HeaderTooSmall(60)));
    }

    #[test]
    fn entry_array_beyond_addressable_range_is_truncation() {
        let mut disk = synth_disk(64, 4, &[]);
        disk[584..592].copy_from_slice(&(u64::MAX / 256).to_le_bytes());
        let size = disk.len() as u64;
        let err = Gpt::read(&mut Cursor::new(disk), size).unwrap_err();
        assert!(matches!(
            err,
            DiskError::Truncated { end: u64::MAX, disk_size, .. } if disk_size == size
        ));
    }

    #[test]
    fn partition_ending_at_last_lba_value_is_truncation() {
        let disk = synth_disk(
            64,
            4,
            &[Some(Part { type_guid: LINUX_TYPE, first: 34, last: u64::MAX, name: "huge" })],
        );
        let size = disk.len() as u64;
        let err = Gpt::read(&mut Cursor::new(disk), size).unwrap_err();
        assert!(matches!(err, DiskError::Truncated { end: u64::MAX, .. }));
    }

    #[test]
    fn rejects_partition_past_end_of_disk() {
        let disk = synth_disk(
            64,
            4,
            &[Some(Part { type_guid: LINUX_TYPE, first: 34, last: 200, name: "big" })],
        );
        let size = disk.len() as u64;
        let err = Gpt::read(&mut Cursor::new(disk), size).unwrap_err();
        assert!(matches!(err, DiskError::Truncated { .. }));
    }

    #[test]
    fn rejects_inverted_range() {
        let disk = synth_disk(
            64,
            4,
            &[Some(Part { type_guid: LINUX_TYPE, first: 40, last: 39, name: "bad" })],
        );
        let size = disk.len() as u64;
        let err = Gpt::read(&mut Cursor::new(disk), size).unwrap_err();
        assert!(matches!(err, DiskError::InvalidPartitionRange { .. }));
    }

    #[test]
    fn tiny_disk_is_truncated() {
        let err = Gpt::read(&mut Cursor::new(vec![0u8; 512]), 512).unwrap_err();
        assert!(matches!(err, DiskError::Truncated { .. }));
    }

    #[test]
    fn name_stops_at_first_nul() {
        let mut raw = [0u8; NAME_LEN];
        for (i, unit) in "boot".encode_utf16().enumerate() {
            raw[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        raw[10] = b'x';
        assert_eq!(decode_name(&raw), "boot");
    }
}
