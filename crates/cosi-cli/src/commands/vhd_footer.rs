use super::{human_size, json_pretty, require_cosi_output, with_spinner, EXIT_SUCCESS};
use cosi_core::append_vhd_footer;
use std::path::Path;

pub fn run(source: &Path, output: &Path, json: bool) -> Result<u8, String> {
    require_cosi_output(output)?;
    let footer = with_spinner(json, "appending VHD footer...", "VHD footer appended", || {
        append_vhd_footer(source, output)
    })?;
    if json {
        let value = serde_json::json!({
            "output": output.display().to_string(),
            "currentSize": footer.current_size,
            "uniqueId": footer.unique_id.to_string(),
        });
        println!("{}", json_pretty(&value)?);
    } else {
        println!("wrote {}", output.display());
        println!(
            "disk size:   {} ({} bytes)",
            human_size(footer.current_size),
            footer.current_size
        );
        println!("unique id:   {}", footer.unique_id);
    }
    Ok(EXIT_SUCCESS)
}
