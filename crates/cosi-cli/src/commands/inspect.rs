use super::{json_pretty, print_summary, EXIT_FAILURE, EXIT_SUCCESS};
use cosi_archive::CosiReader;
use std::path::Path;

pub fn run(container: &Path, verify: bool, json: bool) -> Result<u8, String> {
    let reader = CosiReader::open(container).map_err(|e| format!("container error: {e}"))?;
    let manifest = reader.manifest();

    let mut failures = Vec::new();
    if verify {
        for file in manifest.referenced_files() {
            if let Err(e) = reader.verify_image(file) {
                failures.push(e.to_string());
            }
        }
    }

    if json {
        let value = serde_json::json!({
            "path": container.display().to_string(),
            "markerFirst": reader.marker_first(),
            "manifest": manifest,
            "verified": verify.then_some(failures.is_empty()),
            "failures": failures,
        });
        println!("{}", json_pretty(&value)?);
    } else {
        println!("path:        {}", container.display());
        print_summary(manifest);
        if verify {
            if failures.is_empty() {
                println!(
                    "verified:    {} entries OK",
                    manifest.referenced_files().len()
                );
            } else {
                for failure in &failures {
                    println!("  ✗ {failure}");
                }
            }
        }
    }
    Ok(if failures.is_empty() {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}
