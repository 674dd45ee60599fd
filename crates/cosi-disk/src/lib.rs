//! Raw disk image structures read and written by the COSI generator.
//!
//! This crate parses the GUID partition table of a source disk image (`Gpt`)
//! and detects or produces the fixed VHD footer (`VhdFooter`) that may trail
//! a disk image or a finished container.

pub mod gpt;
pub mod vhd;

pub use gpt::{decode_guid, Gpt, GptHeader, GptPartition, GPT_SIGNATURE, LBA_SIZE};
pub use vhd::{effective_disk_size, has_vhd_footer, ChsGeometry, VhdFooter, VHD_FOOTER_SIZE};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskError {
    #[error("disk I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid GPT signature: expected 'EFI PART', found {0:?}")]
    InvalidSignature([u8; 8]),
    #[error("GPT header size {0} is below the minimum of 92 bytes")]
    HeaderTooSmall(u32),
    #[error("GPT partition entry size {0} is below the minimum of 128 bytes")]
    EntryTooSmall(u32),
    #[error("disk image truncated: {what} ends at byte {end}, disk is {disk_size} bytes")]
    Truncated {
        what: String,
        end: u64,
        disk_size: u64,
    },
    #[error("partition {index} has end LBA {last_lba} before start LBA {first_lba}")]
    InvalidPartitionRange {
        index: u32,
        first_lba: u64,
        last_lba: u64,
    },
    #[error("invalid VHD footer: {0}")]
    InvalidFooter(String),
}
