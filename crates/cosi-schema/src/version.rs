use crate::ManifestError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Manifest schema version, serialized as `"major.minor"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetadataVersion {
    pub major: u32,
    pub minor: u32,
}

impl MetadataVersion {
    /// Flat image list only.
    pub const V1_0: Self = Self::new(1, 0);
    /// Adds package inventory, bootloader and container id.
    pub const V1_1: Self = Self::new(1, 1);
    /// Adds the physical disk layout and the marker-first container convention.
    pub const V1_2: Self = Self::new(1, 2);
    pub const CURRENT: Self = Self::V1_2;

    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn is_supported(&self) -> bool {
        self.major == 1
    }

    /// Containers at this version or newer must start with the marker entry.
    pub fn requires_marker(&self) -> bool {
        *self >= Self::V1_2
    }
}

impl Default for MetadataVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for MetadataVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for MetadataVersion {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ManifestError::InvalidVersion(s.to_owned());
        let (major, minor) = s.split_once('.').ok_or_else(invalid)?;
        let major = major.parse().map_err(|_| invalid())?;
        let minor = minor.parse().map_err(|_| invalid())?;
        Ok(Self { major, minor })
    }
}

impl Serialize for MetadataVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MetadataVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let v: MetadataVersion = "1.2".parse().unwrap();
        assert_eq!(v, MetadataVersion::V1_2);
        assert_eq!(v.to_string(), "1.2");
    }

    #[test]
    fn rejects_malformed_strings() {
        for bad in ["1", "1.", ".2", "one.two", "1.2.3", ""] {
            assert!(bad.parse::<MetadataVersion>().is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn ordering_is_numeric() {
        let v1_10: MetadataVersion = "1.10".parse().unwrap();
        assert!(v1_10 > MetadataVersion::V1_2);
        assert!(MetadataVersion::V1_0 < MetadataVersion::V1_1);
    }

    #[test]
    fn marker_requirement_starts_at_1_2() {
        assert!(!MetadataVersion::V1_0.requires_marker());
        assert!(!MetadataVersion::V1_1.requires_marker());
        assert!(MetadataVersion::V1_2.requires_marker());
        assert!(MetadataVersion::new(1, 5).requires_marker());
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&MetadataVersion::V1_1).unwrap();
        assert_eq!(json, "\"1.1\"");
        let back: MetadataVersion = serde_json::from_str("\"1.0\"").unwrap();
        assert_eq!(back, MetadataVersion::V1_0);
        assert!(serde_json::from_str::<MetadataVersion>("\"v1\"").is_err());
    }

    #[test]
    fn only_major_one_supported() {
        assert!(MetadataVersion::new(1, 9).is_supported());
        assert!(!MetadataVersion::new(2, 0).is_supported());
    }
}
