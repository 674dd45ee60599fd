use super::{core_err, human_size, json_pretty, EXIT_FINDINGS, EXIT_SUCCESS};
use cosi_core::{explain, ExplainOptions, ExplainReport, Severity};
use std::path::Path;

fn colorize_severity(severity: Severity) -> String {
    use console::Style;
    let text = severity.to_string();
    match severity {
        Severity::Error => Style::new().red().bold().apply_to(text).to_string(),
        Severity::Warning => Style::new().yellow().apply_to(text).to_string(),
        Severity::Info => Style::new().dim().apply_to(text).to_string(),
    }
}

pub fn run(container: &Path, verify_hashes: bool, json: bool) -> Result<u8, String> {
    let report = explain(container, &ExplainOptions { verify_hashes }).map_err(core_err)?;
    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(if report.has_errors() {
        EXIT_FINDINGS
    } else {
        EXIT_SUCCESS
    })
}

fn print_report(report: &ExplainReport) {
    let layout = &report.layout;
    println!("{} ({})", report.path.display(), human_size(layout.file_size));
    println!();
    println!("  {:>3}  {:>12}  {:>12}  {:>12}  name", "#", "header", "data", "size");
    for entry in &layout.entries {
        println!(
            "  {:>3}  {:>12}  {:>12}  {:>12}  {}",
            entry.index, entry.header_offset, entry.data_offset, entry.size, entry.name
        );
    }
    match layout.end_of_archive {
        Some(offset) => println!("  end-of-archive at {offset}"),
        None => println!("  end-of-archive missing (expected at {})", layout.expected_end_offset),
    }
    if layout.trailing_bytes > 0 {
        println!("  {} trailing bytes", layout.trailing_bytes);
    }

    if let Some(ref manifest) = report.manifest {
        println!();
        println!(
            "manifest: version {}, {}, {} images, {} auxiliary files",
            manifest.version,
            manifest.os_arch,
            manifest.images.len(),
            manifest.auxiliary_files.len()
        );
    }

    println!();
    if report.findings.is_empty() {
        println!("No findings.");
        return;
    }
    for finding in &report.findings {
        println!(
            "  {:<7} [{}] {}: {}",
            colorize_severity(finding.severity),
            finding.category,
            finding.subject,
            finding.message
        );
    }
    println!();
    println!(
        "{} errors, {} warnings, {} notes",
        report.count(Severity::Error),
        report.count(Severity::Warning),
        report.count(Severity::Info)
    );
}
