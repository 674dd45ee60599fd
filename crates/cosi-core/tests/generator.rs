mod common;

use common::*;
use cosi_archive::CosiReader;
use cosi_core::{CoreError, Generator, GeneratorConfig};
use cosi_disk::VhdFooter;
use cosi_schema::{BootloaderType, OsArch, PartitionType, RegionType};
use std::io::Read;
use std::path::Path;

fn config(scratch: &Path) -> GeneratorConfig {
    GeneratorConfig {
        scratch_dir: Some(scratch.to_path_buf()),
        ..GeneratorConfig::default()
    }
}

fn scratch_is_empty(scratch: &Path) -> bool {
    std::fs::read_dir(scratch).unwrap().next().is_none()
}

#[test]
fn disk_image_becomes_container() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let source = write_file(dir.path(), "disk.raw", &sample_disk());
    let output = dir.path().join("disk.cosi");
    let runner = scripted_runner(Script::default());

    let manifest = Generator::new(&runner, config(scratch.path()))
        .generate_to(&source, &output)
        .unwrap();

    assert_eq!(manifest.os_arch, OsArch::X86_64);
    assert_eq!(manifest.os_release, OS_RELEASE);
    assert!(manifest.id.is_some());
    assert_eq!(
        manifest.bootloader.as_ref().map(|b| b.bootloader_type.clone()),
        Some(BootloaderType::Grub)
    );
    assert_eq!(manifest.compression.map(|c| c.max_window_log), Some(22));

    let names: Vec<_> = manifest.os_packages.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["azurelinux-release", "bash"]);

    // Partitions are numbered by start address, not by table slot.
    let disk = manifest.disk.as_ref().unwrap();
    assert_eq!(disk.size, 256 * LBA);
    assert_eq!(disk.gpt_regions.len(), 4);
    assert_eq!(disk.gpt_regions[0].region_type, RegionType::PrimaryGpt);
    assert_eq!(disk.gpt_regions[0].image.uncompressed_size, 1536);
    assert_eq!(disk.gpt_regions[1].number, Some(1));
    assert_eq!(disk.gpt_regions[1].image.uncompressed_size, 32 * LBA);
    assert_eq!(disk.gpt_regions[2].image.uncompressed_size, 4096);
    assert_eq!(disk.gpt_regions[3].image.uncompressed_size, 28 * LBA);

    // The unformatted partition stays a region only.
    assert_eq!(manifest.images.len(), 2);
    let esp = manifest.image_by_mount_point("/boot/efi").unwrap();
    assert_eq!(esp.fs_type, "vfat");
    assert_eq!(esp.fs_uuid, ESP_UUID);
    assert_eq!(esp.part_type, PartitionType::Esp);
    assert_eq!(esp.image.path, "images/partition-1.raw.zst");
    let root = manifest.image_by_mount_point("/").unwrap();
    assert_eq!(root.fs_type, "ext4");
    assert_eq!(root.fs_uuid, ROOT_UUID);
    assert_eq!(root.image, disk.gpt_regions[2].image);

    let reader = CosiReader::open(&output).unwrap();
    assert!(reader.marker_first());
    assert_eq!(reader.manifest(), &manifest);
    for file in reader.manifest().referenced_files() {
        reader.verify_image(file).unwrap();
    }
    let mut bytes = Vec::new();
    reader
        .open_image(&reader.manifest().image_by_mount_point("/").unwrap().image)
        .unwrap()
        .read_to_end(&mut bytes)
        .unwrap();
    assert_eq!(bytes, vec![ROOT_BYTE; 4096]);

    assert!(scratch_is_empty(scratch.path()));
    assert_eq!(runner.calls_to("mount").len(), 2);
    assert_eq!(runner.calls_to("mount").len(), runner.calls_to("umount").len());
}

#[test]
fn primary_region_is_copied_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let disk = sample_disk();
    let source = write_file(dir.path(), "disk.raw", &disk);
    let output = dir.path().join("disk.cosi");
    let runner = scripted_runner(Script::default());

    let manifest = Generator::new(&runner, config(scratch.path()))
        .generate_to(&source, &output)
        .unwrap();

    let reader = CosiReader::open(&output).unwrap();
    let primary = &manifest.disk.as_ref().unwrap().gpt_regions[0].image;
    let mut bytes = Vec::new();
    reader.open_image(primary).unwrap().read_to_end(&mut bytes).unwrap();
    assert_eq!(bytes, &disk[..1536]);
}

#[test]
fn failed_shrink_keeps_original_size() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let source = write_file(dir.path(), "disk.raw", &sample_disk());
    let output = dir.path().join("disk.cosi");
    let runner = scripted_runner(Script {
        resize_ok: false,
        ..Script::default()
    });

    let manifest = Generator::new(&runner, config(scratch.path()))
        .generate_to(&source, &output)
        .unwrap();

    let root = manifest.image_by_mount_point("/").unwrap();
    assert_eq!(root.image.uncompressed_size, 128 * LBA);
    assert!(!runner.calls_to("resize2fs").is_empty());
    assert!(runner.calls_to("dumpe2fs").is_empty());
}

#[test]
fn shrink_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let source = write_file(dir.path(), "disk.raw", &sample_disk());
    let runner = scripted_runner(Script::default());
    let no_shrink = GeneratorConfig {
        shrink: false,
        ..config(scratch.path())
    };

    let staged = Generator::new(&runner, no_shrink).generate(&source).unwrap();
    let root = staged.manifest.image_by_mount_point("/").unwrap();
    assert_eq!(root.image.uncompressed_size, 128 * LBA);
    assert!(runner.calls_to("resize2fs").is_empty());
}

#[test]
fn missing_bootloader_is_fatal_and_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let source = write_file(dir.path(), "disk.raw", &sample_disk());
    let output = dir.path().join("disk.cosi");
    let runner = scripted_runner(Script {
        grub_on_esp: false,
        ..Script::default()
    });

    let err = Generator::new(&runner, config(scratch.path()))
        .generate_to(&source, &output)
        .unwrap_err();

    assert!(matches!(err, CoreError::BootloaderNotFound));
    assert!(!output.exists());
    assert!(scratch_is_empty(scratch.path()));
}

#[test]
fn unmountable_esp_is_skipped_when_root_carries_grub() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let source = write_file(dir.path(), "disk.raw", &sample_disk());
    let output = dir.path().join("disk.cosi");
    let runner = scripted_runner(Script {
        grub_on_esp: false,
        grub_on_root: true,
        esp_mount_fails: true,
        ..Script::default()
    });

    let manifest = Generator::new(&runner, config(scratch.path()))
        .generate_to(&source, &output)
        .unwrap();

    assert!(output.exists());
    assert_eq!(manifest.os_release, OS_RELEASE);
    let esp = manifest.image_by_mount_point("/boot/efi").unwrap();
    assert_eq!(esp.fs_type, "vfat");
    assert_eq!(esp.fs_uuid, ESP_UUID);
    assert_eq!(runner.calls_to("mount").len(), 2);
    assert_eq!(runner.calls_to("umount").len(), 1);
    assert!(scratch_is_empty(scratch.path()));
}

#[test]
fn unprobeable_partition_stays_a_region_only() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let source = write_file(dir.path(), "disk.raw", &sample_disk());
    let output = dir.path().join("disk.cosi");
    let runner = scripted_runner(Script {
        grub_on_esp: false,
        grub_on_root: true,
        esp_probe_fails: true,
        ..Script::default()
    });

    let manifest = Generator::new(&runner, config(scratch.path()))
        .generate_to(&source, &output)
        .unwrap();

    assert!(manifest.image_by_mount_point("/boot/efi").is_none());
    assert_eq!(manifest.images.len(), 1);
    assert_eq!(manifest.disk.as_ref().unwrap().gpt_regions.len(), 4);
    assert_eq!(runner.calls_to("mount").len(), 1);
}

#[test]
fn vhd_footer_is_excluded_from_disk_size() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let mut disk = sample_disk();
    let len = disk.len() as u64;
    let footer = VhdFooter::fixed(len, chrono::Utc::now(), uuid::Uuid::new_v4());
    disk.extend_from_slice(&footer.to_bytes());
    let source = write_file(dir.path(), "disk.vhd", &disk);
    let runner = scripted_runner(Script::default());

    let staged = Generator::new(&runner, config(scratch.path())).generate(&source).unwrap();
    assert_eq!(staged.manifest.disk.as_ref().unwrap().size, len);
}

#[test]
fn arch_follows_root_partition_type() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let disk = synth_disk(
        256,
        &[
            Part { type_guid: ESP_TYPE, first: 34, last: 65, fill: ESP_BYTE },
            Part {
                type_guid: "b921b045-1df0-41c3-af44-4c6f280d3fae",
                first: 66,
                last: 193,
                fill: ROOT_BYTE,
            },
        ],
    );
    let source = write_file(dir.path(), "disk.raw", &disk);
    let runner = scripted_runner(Script::default());

    let staged = Generator::new(&runner, config(scratch.path())).generate(&source).unwrap();
    assert_eq!(staged.manifest.os_arch, OsArch::Arm64);

    let forced = GeneratorConfig {
        os_arch: Some("x86_64".to_owned()),
        ..config(scratch.path())
    };
    let staged = Generator::new(&runner, forced).generate(&source).unwrap();
    assert_eq!(staged.manifest.os_arch, OsArch::X86_64);
}

#[test]
fn unreadable_partition_table_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let source = write_file(dir.path(), "disk.raw", &vec![0u8; 64 * 1024]);
    let runner = scripted_runner(Script::default());

    let err = Generator::new(&runner, config(scratch.path()))
        .generate(&source)
        .unwrap_err();
    assert!(matches!(err, CoreError::Disk(_)));
    assert!(runner.calls().is_empty());
}
