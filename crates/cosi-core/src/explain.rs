//! Read-only diagnosis of a container.
//!
//! The raw tar layout is walked without trusting the manifest, the manifest
//! is parsed separately, and the two are cross-checked. Content problems are
//! collected as findings; only an unreadable file or a manifest that is not
//! JSON stops the scan. A manifest that is JSON but does not fit the schema
//! is itself a finding, and its entry references are still cross-checked.

use crate::CoreError;
use cosi_archive::{scan_layout, sha384_reader, RawEntry, RawLayout, MARKER_NAME, METADATA_NAME};
use cosi_disk::{VhdFooter, VHD_FOOTER_SIZE};
use cosi_schema::{ImageFile, Manifest, ManifestError, MetadataVersion, RegionType, Sha384Hash};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Layout,
    Image,
    CrossReference,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Layout => "layout",
            Self::Image => "image",
            Self::CrossReference => "cross-reference",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub category: Category,
    pub severity: Severity,
    /// Entry name, image path, or mount point the finding is about.
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ExplainOptions {
    /// Recompute the SHA-384 of every referenced entry.
    pub verify_hashes: bool,
}

#[derive(Debug, Serialize)]
pub struct ExplainReport {
    pub path: PathBuf,
    pub layout: RawLayout,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<Manifest>,
    pub findings: Vec<Finding>,
}

impl ExplainReport {
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.severity == Severity::Error)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    /// Findings of one category, in the order they were made.
    pub fn in_category(&self, category: Category) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.category == category)
    }

    fn push(
        &mut self,
        category: Category,
        severity: Severity,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.findings.push(Finding {
            category,
            severity,
            subject: subject.into(),
            message: message.into(),
        });
    }
}

pub fn explain(path: &Path, options: &ExplainOptions) -> Result<ExplainReport, CoreError> {
    let layout = scan_layout(path)?;
    let mut report = ExplainReport {
        path: path.to_path_buf(),
        layout,
        manifest: None,
        findings: Vec::new(),
    };

    let entries = index_entries(&mut report);
    check_marker(&mut report);
    check_end(&mut report, path)?;

    let Some(meta) = entries.get(METADATA_NAME) else {
        report.push(
            Category::Layout,
            Severity::Error,
            METADATA_NAME,
            "container has no manifest entry",
        );
        check_marker_required(&mut report, None);
        return Ok(report);
    };
    let bytes = read_range(path, meta.data_offset, meta.size)?;
    let document: serde_json::Value =
        serde_json::from_slice(&bytes).map_err(|e| CoreError::Manifest(ManifestError::Parse(e)))?;

    match serde_json::from_value::<Manifest>(document.clone()) {
        Ok(manifest) => {
            check_marker_required(&mut report, Some(manifest.version));
            check_manifest(&mut report, &manifest);
            let refs: Vec<EntryRef> = manifest
                .referenced_files()
                .into_iter()
                .map(EntryRef::from_image_file)
                .collect();
            check_references(&mut report, path, &refs, &entries, options)?;
            report.manifest = Some(manifest);
        }
        Err(e) => {
            report.push(
                Category::Image,
                Severity::Error,
                METADATA_NAME,
                format!("manifest does not match the schema: {e}"),
            );
            let version = document
                .get("version")
                .and_then(serde_json::Value::as_str)
                .and_then(|v| v.parse::<MetadataVersion>().ok());
            check_marker_required(&mut report, version);
            let refs = EntryRef::from_document(&document);
            check_references(&mut report, path, &refs, &entries, options)?;
        }
    }

    debug!(
        "explained {}: {} findings",
        path.display(),
        report.findings.len()
    );
    Ok(report)
}

/// An archive entry the manifest points at.
#[derive(Debug, Clone)]
struct EntryRef {
    path: String,
    compressed_size: Option<u64>,
    sha384: Option<Sha384Hash>,
}

impl EntryRef {
    fn from_image_file(file: &ImageFile) -> Self {
        Self {
            path: file.path.to_string(),
            compressed_size: Some(file.compressed_size),
            sha384: file.sha384.clone(),
        }
    }

    fn from_json(file: &serde_json::Value) -> Option<Self> {
        Some(Self {
            path: file.get("path")?.as_str()?.to_owned(),
            compressed_size: file.get("compressedSize").and_then(serde_json::Value::as_u64),
            sha384: file
                .get("sha384")
                .and_then(serde_json::Value::as_str)
                .map(Sha384Hash::new),
        })
    }

    /// Best-effort references from a manifest that failed typed parsing.
    fn from_document(doc: &serde_json::Value) -> Vec<Self> {
        let list = |key: &str| {
            doc.get(key)
                .and_then(serde_json::Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default()
        };
        let mut files = Vec::new();
        for image in list("images") {
            files.extend(image.get("image"));
            files.extend(image.get("verity").and_then(|v| v.get("image")));
        }
        if let Some(regions) = doc
            .get("disk")
            .and_then(|d| d.get("gptRegions"))
            .and_then(serde_json::Value::as_array)
        {
            files.extend(regions.iter().filter_map(|r| r.get("image")));
        }
        files.extend(list("auxiliaryFiles").iter().filter_map(|a| a.get("image")));
        files.into_iter().filter_map(Self::from_json).collect()
    }
}

/// Raw entries by name. Duplicates are reported; the first one wins.
fn index_entries(report: &mut ExplainReport) -> BTreeMap<String, RawEntry> {
    let mut by_name = BTreeMap::new();
    let mut duplicates = Vec::new();
    for entry in &report.layout.entries {
        if entry.entry_type != '0' && entry.entry_type != '\0' {
            continue;
        }
        if by_name.contains_key(&entry.name) {
            duplicates.push(entry.clone());
        } else {
            by_name.insert(entry.name.clone(), entry.clone());
        }
    }
    for dup in duplicates {
        report.push(
            Category::Layout,
            Severity::Error,
            dup.name,
            format!("entry appears again at index {}", dup.index),
        );
    }
    if let Some(err) = report.layout.scan_error.clone() {
        let subject = report.path.display().to_string();
        report.push(
            Category::Layout,
            Severity::Error,
            subject,
            format!("archive walk stopped early: {err}"),
        );
    }
    by_name
}

fn check_marker(report: &mut ExplainReport) {
    let Some(marker) = report.layout.entries.iter().find(|e| e.name == MARKER_NAME).cloned() else {
        return;
    };
    if marker.index != 0 {
        report.push(
            Category::Layout,
            Severity::Error,
            MARKER_NAME,
            format!("marker is entry {}, expected 0", marker.index),
        );
    }
    if marker.size != 0 {
        report.push(
            Category::Layout,
            Severity::Warning,
            MARKER_NAME,
            format!("marker is {} bytes, expected 0", marker.size),
        );
    }
}

/// A missing marker is an error once the manifest version requires one, and
/// a warning when the version is unknown.
fn check_marker_required(report: &mut ExplainReport, version: Option<MetadataVersion>) {
    if report.layout.entries.iter().any(|e| e.name == MARKER_NAME) {
        return;
    }
    let severity = match version {
        Some(v) if v.requires_marker() => Severity::Error,
        Some(_) => Severity::Info,
        None => Severity::Warning,
    };
    let message = match version {
        Some(v) => format!("no marker entry (metadata version {v})"),
        None => "no marker entry".to_owned(),
    };
    report.push(Category::Layout, severity, MARKER_NAME, message);
}

fn check_end(report: &mut ExplainReport, path: &Path) -> Result<(), CoreError> {
    let layout = &report.layout;
    let (end, trailing, file_size) = (layout.end_of_archive, layout.trailing_bytes, layout.file_size);
    let expected = layout.expected_end_offset;

    if end.is_none() {
        report.push(
            Category::Layout,
            Severity::Error,
            "end-of-archive",
            format!("no end-of-archive marker at byte {expected}"),
        );
    }
    if trailing == 0 {
        return Ok(());
    }

    if trailing == VHD_FOOTER_SIZE {
        let bytes = read_range(path, file_size - VHD_FOOTER_SIZE, VHD_FOOTER_SIZE)?;
        if let Ok(footer) = VhdFooter::parse(&bytes) {
            let payload = file_size - VHD_FOOTER_SIZE;
            if footer.current_size == payload {
                report.push(
                    Category::Layout,
                    Severity::Info,
                    "vhd-footer",
                    format!("fixed VHD footer describing {payload} bytes"),
                );
            } else {
                report.push(
                    Category::Layout,
                    Severity::Warning,
                    "vhd-footer",
                    format!(
                        "VHD footer declares {} bytes, expected {payload}",
                        footer.current_size
                    ),
                );
            }
            return Ok(());
        }
    }

    report.push(
        Category::Layout,
        Severity::Warning,
        "trailing-bytes",
        format!("{trailing} bytes follow the end of the archive"),
    );
    Ok(())
}

fn check_manifest(report: &mut ExplainReport, manifest: &Manifest) {
    for problem in manifest.problems() {
        report.push(Category::Image, Severity::Error, METADATA_NAME, problem.to_string());
    }

    for image in &manifest.images {
        if let Err(reason) = image.part_type.check_placement(&image.mount_point, &image.fs_type) {
            report.push(Category::Image, Severity::Warning, image.mount_point.clone(), reason);
        }
        if let Some(verity) = &image.verity {
            if verity.roothash.is_empty() {
                report.push(
                    Category::Image,
                    Severity::Error,
                    image.mount_point.clone(),
                    "verity image has an empty roothash",
                );
            }
        }
    }

    if let Some(disk) = &manifest.disk {
        match disk.gpt_regions.first() {
            Some(region) if region.region_type == RegionType::PrimaryGpt => {}
            Some(region) => report.push(
                Category::Image,
                Severity::Warning,
                region.image.path.to_string(),
                "first disk region is not the primary GPT",
            ),
            None => report.push(
                Category::Image,
                Severity::Warning,
                "disk",
                "disk has no regions",
            ),
        }
    }
}

fn check_references(
    report: &mut ExplainReport,
    path: &Path,
    refs: &[EntryRef],
    entries: &BTreeMap<String, RawEntry>,
    options: &ExplainOptions,
) -> Result<(), CoreError> {
    let mut referenced = BTreeSet::new();
    for file in refs {
        if !referenced.insert(file.path.as_str()) {
            continue;
        }
        match (entries.get(&file.path), file.compressed_size) {
            (None, _) => report.push(
                Category::CrossReference,
                Severity::Error,
                file.path.clone(),
                "referenced by the manifest but missing from the archive",
            ),
            (Some(entry), Some(size)) if entry.size != size => report.push(
                Category::CrossReference,
                Severity::Error,
                file.path.clone(),
                format!("manifest declares {size} bytes, archive entry has {}", entry.size),
            ),
            (Some(entry), _) if options.verify_hashes => verify_hash(report, path, file, entry)?,
            (Some(_), _) => {}
        }
    }

    for name in entries.keys() {
        if name == MARKER_NAME || name == METADATA_NAME || referenced.contains(name.as_str()) {
            continue;
        }
        report.push(
            Category::CrossReference,
            Severity::Warning,
            name.clone(),
            "orphan entry, not referenced by the manifest",
        );
    }
    Ok(())
}

fn verify_hash(
    report: &mut ExplainReport,
    path: &Path,
    file: &EntryRef,
    entry: &RawEntry,
) -> Result<(), CoreError> {
    let Some(expected) = &file.sha384 else {
        report.push(
            Category::Image,
            Severity::Info,
            file.path.clone(),
            "no sha384 recorded, hash not checked",
        );
        return Ok(());
    };
    let mut f = File::open(path)?;
    f.seek(SeekFrom::Start(entry.data_offset))?;
    let (_, actual) = sha384_reader(f.take(entry.size))?;
    if !actual.eq_ignore_ascii_case(expected) {
        report.push(
            Category::CrossReference,
            Severity::Error,
            file.path.clone(),
            format!("sha384 mismatch: manifest {expected}, entry {actual}"),
        );
    }
    Ok(())
}

fn read_range(path: &Path, offset: u64, len: u64) -> Result<Vec<u8>, CoreError> {
    let mut f = File::open(path)?;
    f.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(len as usize);
    f.take(len).read_to_end(&mut buf)?;
    Ok(buf)
}
