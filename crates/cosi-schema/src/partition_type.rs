//! GPT partition-type roles from the Discoverable Partitions Specification.
//!
//! Types serialize as their canonical type UUID. Deserialization accepts the
//! UUID or the role name, and anything unrecognized becomes
//! [`PartitionType::LinuxGeneric`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Mount point marker used for swap partitions.
pub const SWAP_MOUNT_POINT: &str = "swap";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionType {
    Esp,
    Xbootldr,
    Swap,
    Home,
    Srv,
    Var,
    Tmp,
    LinuxGeneric,
    RootAmd64,
    RootAmd64Verity,
    RootAmd64VeritySig,
    UsrAmd64,
    UsrAmd64Verity,
    UsrAmd64VeritySig,
    RootArm64,
    RootArm64Verity,
    RootArm64VeritySig,
    UsrArm64,
    UsrArm64Verity,
    UsrArm64VeritySig,
}

const TABLE: &[(PartitionType, u128, &str, &str)] = &[
    (PartitionType::Esp, 0xc12a7328_f81f_11d2_ba4b_00a0c93ec93b, "esp", "EFI System Partition"),
    (PartitionType::Xbootldr, 0xbc13c2ff_59e6_4262_a352_b275fd6f7172, "xbootldr", "Extended Boot Loader"),
    (PartitionType::Swap, 0x0657fd6d_a4ab_43c4_84e5_0933c84b4f4f, "swap", "Swap"),
    (PartitionType::Home, 0x933ac7e1_2eb4_4f13_b844_0e14e2aef915, "home", "Home"),
    (PartitionType::Srv, 0x3b8f8425_20e0_4f3b_907f_1a25a76f98e8, "srv", "Server Data"),
    (PartitionType::Var, 0x4d21b016_b534_45c2_a9fb_5c16e091fd2d, "var", "Variable Data"),
    (PartitionType::Tmp, 0x7ec6f557_3bc5_4aca_b293_16ef5df639d1, "tmp", "Temporary Data"),
    (PartitionType::LinuxGeneric, 0x0fc63daf_8483_4772_8e79_3d69d8477de4, "linux-generic", "Linux Filesystem Data"),
    (PartitionType::RootAmd64, 0x4f68bce3_e8cd_4db1_96e7_fbcaf984b709, "root-amd64", "Root (x86-64)"),
    (PartitionType::RootAmd64Verity, 0x2c7357ed_ebd2_46d9_aec1_23d437ec2bf5, "root-amd64-verity", "Root Verity (x86-64)"),
    (PartitionType::RootAmd64VeritySig, 0x41092b05_9fc8_4523_994f_2def0408b176, "root-amd64-verity-sig", "Root Verity Signature (x86-64)"),
    (PartitionType::UsrAmd64, 0x8484680c_9521_48c6_9c11_b0720656f69e, "usr-amd64", "/usr (x86-64)"),
    (PartitionType::UsrAmd64Verity, 0x77ff5f63_e7b6_4633_acf4_1565b864c0e6, "usr-amd64-verity", "/usr Verity (x86-64)"),
    (PartitionType::UsrAmd64VeritySig, 0xe7bb33fb_06cf_4e81_8273_e543b413e2e2, "usr-amd64-verity-sig", "/usr Verity Signature (x86-64)"),
    (PartitionType::RootArm64, 0xb921b045_1df0_41c3_af44_4c6f280d3fae, "root-arm64", "Root (AArch64)"),
    (PartitionType::RootArm64Verity, 0xdf3300ce_d69f_4c92_978c_9bfb0f38d820, "root-arm64-verity", "Root Verity (AArch64)"),
    (PartitionType::RootArm64VeritySig, 0x6db69de6_29f4_4758_a7a5_962190f00ce3, "root-arm64-verity-sig", "Root Verity Signature (AArch64)"),
    (PartitionType::UsrArm64, 0xb0e01050_ee5f_4390_949a_9101b17104e9, "usr-arm64", "/usr (AArch64)"),
    (PartitionType::UsrArm64Verity, 0x6e11a4e7_fbca_4ded_b9e9_e1a512bb664e, "usr-arm64-verity", "/usr Verity (AArch64)"),
    (PartitionType::UsrArm64VeritySig, 0xc23ce4ff_44bd_4b00_b2d4_b41b3419e02a, "usr-arm64-verity-sig", "/usr Verity Signature (AArch64)"),
];

impl PartitionType {
    fn row(self) -> &'static (PartitionType, u128, &'static str, &'static str) {
        // Every variant has a row; LinuxGeneric is the fallback.
        TABLE.iter().find(|row| row.0 == self).unwrap_or(&TABLE[7])
    }

    /// Canonical GPT type UUID.
    pub fn uuid(self) -> Uuid {
        Uuid::from_u128(self.row().1)
    }

    /// Short role name, e.g. `root-amd64`.
    pub fn role_name(self) -> &'static str {
        self.row().2
    }

    /// Human-readable description.
    pub fn display_name(self) -> &'static str {
        self.row().3
    }

    /// Look up a known role by type UUID.
    pub fn try_from_uuid(uuid: &Uuid) -> Option<Self> {
        let value = uuid.as_u128();
        TABLE.iter().find(|row| row.1 == value).map(|row| row.0)
    }

    /// Look up a role by type UUID, falling back to [`PartitionType::LinuxGeneric`].
    pub fn from_uuid(uuid: &Uuid) -> Self {
        Self::try_from_uuid(uuid).unwrap_or(Self::LinuxGeneric)
    }

    pub fn from_role_name(name: &str) -> Option<Self> {
        TABLE.iter().find(|row| row.2 == name).map(|row| row.0)
    }

    pub fn is_root(self) -> bool {
        matches!(self, Self::RootAmd64 | Self::RootArm64)
    }

    pub fn is_arm64(self) -> bool {
        matches!(
            self,
            Self::RootArm64
                | Self::RootArm64Verity
                | Self::RootArm64VeritySig
                | Self::UsrArm64
                | Self::UsrArm64Verity
                | Self::UsrArm64VeritySig
        )
    }

    /// Mount point a partition of this role is expected at, if it has one.
    pub fn canonical_mount_point(self) -> Option<&'static str> {
        match self {
            Self::Esp => Some("/boot/efi"),
            Self::Xbootldr => Some("/boot"),
            Self::Swap => Some(SWAP_MOUNT_POINT),
            Self::Home => Some("/home"),
            Self::Srv => Some("/srv"),
            Self::Var => Some("/var"),
            Self::Tmp => Some("/tmp"),
            Self::RootAmd64 | Self::RootArm64 => Some("/"),
            Self::UsrAmd64 | Self::UsrArm64 => Some("/usr"),
            _ => None,
        }
    }

    /// Check that a mount point and filesystem type are well-formed for this role.
    pub fn check_placement(self, mount_point: &str, fs_type: &str) -> Result<(), String> {
        let allowed: &[&str] = match self {
            Self::Esp => &["/boot/efi", "/efi", "/boot"],
            Self::Xbootldr => &["/boot"],
            Self::Swap => &[SWAP_MOUNT_POINT],
            Self::Home => &["/home"],
            Self::Srv => &["/srv"],
            Self::Var => &["/var"],
            Self::Tmp => &["/tmp", "/var/tmp"],
            Self::RootAmd64 | Self::RootArm64 => &["/"],
            Self::UsrAmd64 | Self::UsrArm64 => &["/usr"],
            Self::LinuxGeneric => &[],
            _ => {
                return Err(format!(
                    "{} partitions hold verity data and are not mounted",
                    self.display_name()
                ))
            }
        };

        if !allowed.is_empty() && !allowed.contains(&mount_point) {
            return Err(format!(
                "{} must be mounted at one of {}, found '{mount_point}'",
                self.display_name(),
                allowed.join(", ")
            ));
        }

        if self == Self::Esp && fs_type != "vfat" {
            return Err(format!(
                "EFI System Partition must be vfat, found '{fs_type}'"
            ));
        }
        if self == Self::Swap && fs_type != "swap" {
            return Err(format!("swap partition has filesystem type '{fs_type}'"));
        }

        Ok(())
    }
}

impl fmt::Display for PartitionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl Serialize for PartitionType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.uuid().hyphenated())
    }
}

impl<'de> Deserialize<'de> for PartitionType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if let Ok(uuid) = Uuid::parse_str(&s) {
            return Ok(Self::from_uuid(&uuid));
        }
        Ok(Self::from_role_name(&s).unwrap_or(Self::LinuxGeneric))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn esp_uuid_is_the_efi_constant() {
        assert_eq!(
            PartitionType::Esp.uuid().to_string(),
            "c12a7328-f81f-11d2-ba4b-00a0c93ec93b"
        );
    }

    #[test]
    fn table_covers_every_variant_once() {
        for (ty, raw, name, _) in TABLE {
            assert_eq!(PartitionType::try_from_uuid(&Uuid::from_u128(*raw)), Some(*ty));
            assert_eq!(PartitionType::from_role_name(name), Some(*ty));
        }
        assert_eq!(TABLE.len(), 20);
    }

    #[test]
    fn unknown_uuid_falls_back_to_generic() {
        let odd = Uuid::from_u128(0x1234);
        assert_eq!(PartitionType::try_from_uuid(&odd), None);
        assert_eq!(PartitionType::from_uuid(&odd), PartitionType::LinuxGeneric);
    }

    #[test]
    fn serde_writes_uuid_and_reads_either_form() {
        let json = serde_json::to_string(&PartitionType::RootAmd64).unwrap();
        assert_eq!(json, "\"4f68bce3-e8cd-4db1-96e7-fbcaf984b709\"");

        let by_name: PartitionType = serde_json::from_str("\"xbootldr\"").unwrap();
        assert_eq!(by_name, PartitionType::Xbootldr);

        let upper: PartitionType =
            serde_json::from_str("\"C12A7328-F81F-11D2-BA4B-00A0C93EC93B\"").unwrap();
        assert_eq!(upper, PartitionType::Esp);

        let unknown: PartitionType = serde_json::from_str("\"something-else\"").unwrap();
        assert_eq!(unknown, PartitionType::LinuxGeneric);
    }

    #[test]
    fn esp_placement_rules() {
        assert!(PartitionType::Esp.check_placement("/boot/efi", "vfat").is_ok());
        assert!(PartitionType::Esp.check_placement("/efi", "vfat").is_ok());
        let err = PartitionType::Esp.check_placement("/mnt", "vfat").unwrap_err();
        assert!(err.contains("/boot/efi"));
        assert!(PartitionType::Esp.check_placement("/boot/efi", "ext4").is_err());
    }

    #[test]
    fn generic_partitions_mount_anywhere() {
        assert!(PartitionType::LinuxGeneric
            .check_placement("/opt/data", "xfs")
            .is_ok());
    }

    #[test]
    fn verity_partitions_are_not_mounted() {
        assert!(PartitionType::RootAmd64Verity
            .check_placement("/", "verity_hash")
            .is_err());
        assert_eq!(PartitionType::RootAmd64Verity.canonical_mount_point(), None);
    }

    #[test]
    fn architecture_helpers() {
        assert!(PartitionType::RootArm64.is_arm64());
        assert!(PartitionType::RootArm64.is_root());
        assert!(!PartitionType::RootAmd64.is_arm64());
        assert!(!PartitionType::Var.is_root());
    }
}
