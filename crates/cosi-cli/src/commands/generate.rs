use super::{report_written, require_cosi_output, with_spinner};
use cosi_core::{Generator, GeneratorConfig};
use cosi_tools::SystemRunner;
use std::path::PathBuf;
use tracing::debug;

pub struct Args {
    pub source: PathBuf,
    pub output: PathBuf,
    pub config: Option<PathBuf>,
    pub scratch: Option<PathBuf>,
    pub no_shrink: bool,
    pub arch: Option<String>,
    pub level: Option<i32>,
    pub window_log: Option<u32>,
    pub json: bool,
}

/// Settings from `--config`, with command-line flags layered on top.
pub fn resolve_config(args: &Args) -> Result<GeneratorConfig, String> {
    let mut config = match args.config {
        Some(ref path) => {
            if !path.exists() {
                return Err(format!("config file {} not found", path.display()));
            }
            GeneratorConfig::load(path).map_err(|e| e.to_string())?
        }
        None => GeneratorConfig::default(),
    };
    if args.no_shrink {
        config.shrink = false;
    }
    if let Some(ref arch) = args.arch {
        config.os_arch = Some(arch.clone());
    }
    if let Some(ref scratch) = args.scratch {
        config.scratch_dir = Some(scratch.clone());
    }
    if let Some(level) = args.level {
        config.compression.level = level;
    }
    if let Some(window_log) = args.window_log {
        config.compression.window_log = window_log;
    }
    debug!("generator config: {config:?}");
    Ok(config)
}

pub fn run(args: &Args) -> Result<u8, String> {
    require_cosi_output(&args.output)?;
    if !args.source.is_file() {
        return Err(format!("source image {} not found", args.source.display()));
    }
    let config = resolve_config(args)?;
    let runner = SystemRunner::new();
    let generator = Generator::new(&runner, config);

    let manifest = with_spinner(
        args.json,
        &format!("generating from {}...", args.source.display()),
        "container generated",
        || generator.generate_to(&args.source, &args.output),
    )?;
    report_written(&args.output, &manifest, args.json)
}
