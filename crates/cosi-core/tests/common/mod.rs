#![allow(dead_code)]

use cosi_archive::{compress_stream, write_cosi, CompressionSettings};
use cosi_schema::{
    Compression, Disk, DiskType, GptDiskRegion, Image, ImagePath, Manifest, OsArch, PartitionType,
    RegionType,
};
use cosi_tools::{MockRunner, ToolOutput};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const LBA: u64 = 512;

// Every fake filesystem is a run of one byte value, so the scripted tools
// can tell images apart by their first byte.
pub const ESP_BYTE: u8 = 0xE5;
pub const ROOT_BYTE: u8 = 0x7A;
pub const VAR_BYTE: u8 = 0x5A;
pub const BOOT_BYTE: u8 = 0xB0;
pub const HASH_BYTE: u8 = 0x48;

pub const ESP_UUID: &str = "7A1B-22C3";
pub const ROOT_UUID: &str = "0f3c1c5e-1111-4d2e-9a2b-6f0d3a1b2c3d";
pub const VAR_UUID: &str = "5d0e2f7a-3b4c-4e1a-8f00-112233445566";
pub const BOOT_UUID: &str = "b007b007-0000-4000-8000-000000000001";

pub const OS_RELEASE: &str = "NAME=\"Azure Linux\"\nVERSION_ID=\"3.0\"\nID=azurelinux\n";
pub const ROOTHASH: &str = "a3f1c9d2e4b5a6978877665544332211ffeeddccbbaa99887766554433221100";

pub const ESP_TYPE: &str = "c12a7328-f81f-11d2-ba4b-00a0c93ec93b";
pub const ROOT_AMD64_TYPE: &str = "4f68bce3-e8cd-4db1-96e7-fbcaf984b709";
pub const LINUX_TYPE: &str = "0fc63daf-8483-4772-8e79-3d69d8477de4";

pub struct Part {
    pub type_guid: &'static str,
    pub first: u64,
    pub last: u64,
    pub fill: u8,
}

/// A GPT disk of `lbas` sectors with four entry slots at LBA 2. Partition
/// payloads are filled with their `fill` byte.
pub fn synth_disk(lbas: u64, parts: &[Part]) -> Vec<u8> {
    let mut disk = vec![0u8; (lbas * LBA) as usize];
    disk[510] = 0x55;
    disk[511] = 0xAA;

    let h = LBA as usize;
    disk[h..h + 8].copy_from_slice(b"EFI PART");
    disk[h + 8..h + 12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
    disk[h + 12..h + 16].copy_from_slice(&92u32.to_le_bytes());
    disk[h + 24..h + 32].copy_from_slice(&1u64.to_le_bytes());
    disk[h + 32..h + 40].copy_from_slice(&(lbas - 1).to_le_bytes());
    disk[h + 40..h + 48].copy_from_slice(&34u64.to_le_bytes());
    disk[h + 48..h + 56].copy_from_slice(&(lbas - 34).to_le_bytes());
    disk[h + 56..h + 72].copy_from_slice(&Uuid::new_v4().to_bytes_le());
    disk[h + 72..h + 80].copy_from_slice(&2u64.to_le_bytes());
    disk[h + 80..h + 84].copy_from_slice(&4u32.to_le_bytes());
    disk[h + 84..h + 88].copy_from_slice(&128u32.to_le_bytes());

    for (i, part) in parts.iter().enumerate() {
        let e = 2 * h + i * 128;
        let ty = Uuid::parse_str(part.type_guid).unwrap();
        disk[e..e + 16].copy_from_slice(&ty.to_bytes_le());
        disk[e + 16..e + 32].copy_from_slice(&Uuid::new_v4().to_bytes_le());
        disk[e + 32..e + 40].copy_from_slice(&part.first.to_le_bytes());
        disk[e + 40..e + 48].copy_from_slice(&part.last.to_le_bytes());
        let start = (part.first * LBA) as usize;
        let end = ((part.last + 1) * LBA) as usize;
        disk[start..end].fill(part.fill);
    }
    disk
}

/// Root listed before the ESP in the entry array, plus an unformatted
/// partition at the end.
pub fn sample_disk() -> Vec<u8> {
    synth_disk(
        256,
        &[
            Part { type_guid: ROOT_AMD64_TYPE, first: 66, last: 193, fill: ROOT_BYTE },
            Part { type_guid: ESP_TYPE, first: 34, last: 65, fill: ESP_BYTE },
            Part { type_guid: LINUX_TYPE, first: 194, last: 221, fill: 0 },
        ],
    )
}

pub fn rpm_header(tags: &[(u32, &str)]) -> Vec<u8> {
    let mut index = Vec::new();
    let mut data = Vec::new();
    for (tag, value) in tags {
        index.extend_from_slice(&tag.to_be_bytes());
        index.extend_from_slice(&6u32.to_be_bytes());
        index.extend_from_slice(&(data.len() as u32).to_be_bytes());
        index.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(value.as_bytes());
        data.push(0);
    }
    let mut blob = Vec::new();
    blob.extend_from_slice(&(tags.len() as u32).to_be_bytes());
    blob.extend_from_slice(&(data.len() as u32).to_be_bytes());
    blob.extend(index);
    blob.extend(data);
    blob
}

fn first_byte(path: &str) -> Option<u8> {
    let mut b = [0u8; 1];
    File::open(path).ok()?.read_exact(&mut b).ok()?;
    Some(b[0])
}

fn fs_of(byte: Option<u8>) -> Option<(&'static str, &'static str)> {
    match byte? {
        ESP_BYTE => Some(("vfat", ESP_UUID)),
        ROOT_BYTE => Some(("ext4", ROOT_UUID)),
        VAR_BYTE => Some(("ext4", VAR_UUID)),
        BOOT_BYTE => Some(("ext4", BOOT_UUID)),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Script {
    pub grub_on_esp: bool,
    pub grub_on_root: bool,
    pub esp_mount_fails: bool,
    pub esp_probe_fails: bool,
    pub resize_ok: bool,
    pub roothash: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            grub_on_esp: true,
            grub_on_root: false,
            esp_mount_fails: false,
            esp_probe_fails: false,
            resize_ok: true,
            roothash: true,
        }
    }
}

/// A runner that answers every tool the generator, builder and mutations use.
pub fn scripted_runner(script: Script) -> MockRunner {
    let packages = format!(
        "{}\n{}\n",
        hex::encode_upper(rpm_header(&[(1000, "bash"), (1001, "5.2.15"), (1002, "5.azl3"), (1022, "x86_64")])),
        hex::encode_upper(rpm_header(&[(1000, "azurelinux-release"), (1001, "3.0"), (1002, "24.azl3")])),
    );

    let runner = MockRunner::new()
        .on("blkid", move |args| {
            let path = args[args.len() - 1];
            let byte = first_byte(path);
            if script.esp_probe_fails && byte == Some(ESP_BYTE) {
                return Ok(ToolOutput::failure(4, "blkid: cannot read superblock"));
            }
            let Some((fs, uuid)) = fs_of(byte) else {
                return Ok(ToolOutput::failure(2, ""));
            };
            if args.contains(&"export") {
                Ok(ToolOutput::success(format!("DEVNAME={path}\nUUID={uuid}\nTYPE={fs}\n")))
            } else {
                Ok(ToolOutput::success(format!("{fs}\n")))
            }
        })
        .on("mount", move |args| {
            let (image, dir) = (Path::new(args[2]), Path::new(args[3]));
            let put = |rel: &str, content: &[u8]| {
                let p = dir.join(rel);
                std::fs::create_dir_all(p.parent().unwrap()).unwrap();
                std::fs::write(p, content).unwrap();
            };
            match first_byte(image.to_str().unwrap()) {
                Some(ESP_BYTE) if script.esp_mount_fails => {
                    return Ok(ToolOutput::failure(32, "mount: wrong fs type, bad option, bad superblock"));
                }
                Some(ROOT_BYTE) => {
                    put("etc/os-release", OS_RELEASE.as_bytes());
                    put("var/lib/rpm/rpmdb.sqlite", b"SQLite format 3\0");
                    if script.grub_on_root {
                        put("boot/grub2/grub.cfg", b"set default=0\n");
                    }
                }
                Some(ESP_BYTE) if script.grub_on_esp => put("EFI/BOOT/grubx64.efi", b"MZ"),
                Some(BOOT_BYTE) => {
                    let args = if script.roothash {
                        format!("ro rd.systemd.verity=1 roothash={ROOTHASH}")
                    } else {
                        "ro".to_owned()
                    };
                    let cfg = format!("menuentry 'Azure Linux' {{\n  linux /vmlinuz {args}\n}}\n");
                    put("grub2/grub.cfg", cfg.as_bytes());
                }
                _ => {}
            }
            Ok(ToolOutput::success(""))
        })
        .succeed("umount", "")
        .succeed("e2fsck", "")
        .succeed("dumpe2fs", "Block count:              8\nBlock size:               512\n")
        .succeed("sqlite3", &packages)
        .on("tune2fs", |args| {
            let (uuid, path) = (args[1], args[2]);
            let mut f = std::fs::OpenOptions::new().write(true).open(path).unwrap();
            f.seek(SeekFrom::Start(0)).unwrap();
            f.write_all(uuid.as_bytes()).unwrap();
            Ok(ToolOutput::success(""))
        });

    if script.resize_ok {
        runner.succeed("resize2fs", "")
    } else {
        runner.fail("resize2fs", 1, "resize2fs: Permission denied")
    }
}

pub fn write_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

/// Compress `len` copies of `fill` into `dir` and describe it as `images/<name>`.
pub fn staged_image(dir: &Path, name: &str, fill: u8, len: usize) -> cosi_schema::ImageFile {
    let dest = dir.join(format!("{name}.staged"));
    let raw = vec![fill; len];
    let c = compress_stream(raw.as_slice(), &dest, CompressionSettings::default()).unwrap();
    c.into_image_file(ImagePath::new(format!("images/{name}")), &dest)
}

/// A 1.2 container with an ESP, root and var image, each backing a GPT region.
pub fn sample_container(dir: &Path) -> PathBuf {
    let staging = dir.join("staging");
    std::fs::create_dir_all(&staging).unwrap();

    let primary = staged_image(&staging, "primary-gpt.raw.zst", 0x01, 1536);
    let esp = staged_image(&staging, "partition-1.raw.zst", ESP_BYTE, 16384);
    let root = staged_image(&staging, "partition-2.raw.zst", ROOT_BYTE, 65536);
    let var = staged_image(&staging, "partition-3.raw.zst", VAR_BYTE, 8192);

    let mut m = Manifest::new(OsArch::X86_64);
    m.os_release = OS_RELEASE.to_owned();
    m.compression = Some(Compression { max_window_log: 22 });
    let image = |file: &cosi_schema::ImageFile, mp: &str, fs: &str, uuid: &str, pt| Image {
        image: file.clone(),
        mount_point: mp.to_owned(),
        fs_type: fs.to_owned(),
        fs_uuid: uuid.to_owned(),
        part_type: pt,
        verity: None,
    };
    m.images = vec![
        image(&esp, "/boot/efi", "vfat", ESP_UUID, PartitionType::Esp),
        image(&root, "/", "ext4", ROOT_UUID, PartitionType::RootAmd64),
        image(&var, "/var", "ext4", VAR_UUID, PartitionType::Var),
    ];
    let region = |file: &cosi_schema::ImageFile, region_type, number| GptDiskRegion {
        image: file.clone(),
        region_type,
        number,
    };
    m.disk = Some(Disk {
        size: 256 * LBA,
        disk_type: DiskType::Gpt,
        lba_size: 512,
        gpt_regions: vec![
            region(&primary, RegionType::PrimaryGpt, None),
            region(&esp, RegionType::Partition, Some(1)),
            region(&root, RegionType::Partition, Some(2)),
            region(&var, RegionType::Partition, Some(3)),
        ],
    });

    let out = dir.join("sample.cosi");
    write_cosi(File::create(&out).unwrap(), &m).unwrap();
    out
}

/// A tar file with exactly these entries, in order.
pub fn raw_tar(path: &Path, entries: &[(&str, &[u8])]) {
    let mut ar = tar::Builder::new(File::create(path).unwrap());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o400);
        header.set_cksum();
        ar.append_data(&mut header, name, *data).unwrap();
    }
    ar.finish().unwrap();
}
