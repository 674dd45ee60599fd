mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{exit_code_for, EXIT_FAILURE};
use cosi_core::{install_signal_handler, LayoutVariant};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "mkcosi",
    version,
    about = "Build, inspect, explain, and rewrite composable OS image (COSI) containers"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Convert a GPT disk image (raw or fixed VHD) into a container.
    Generate {
        /// Source disk image.
        source: PathBuf,
        /// Output container (.cosi).
        output: PathBuf,
        /// Generator settings file (TOML).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory for staging files.
        #[arg(long)]
        scratch: Option<PathBuf>,
        /// Keep partitions at their original size.
        #[arg(long, default_value_t = false)]
        no_shrink: bool,
        /// Override the detected OS architecture.
        #[arg(long)]
        arch: Option<String>,
        /// zstd compression level.
        #[arg(long)]
        level: Option<i32>,
        /// zstd window log, recorded in the manifest.
        #[arg(long)]
        window_log: Option<u32>,
    },
    /// Assemble a container from a directory of compressed filesystem images.
    Build {
        /// Image layout: regular or verity.
        variant: LayoutVariant,
        /// Directory holding <name>.<extension> images.
        dir: PathBuf,
        /// Output container (.cosi).
        output: PathBuf,
        /// Image file extension.
        #[arg(long, default_value = cosi_core::variants::DEFAULT_EXTENSION)]
        extension: String,
        /// Directory for staging files.
        #[arg(long)]
        scratch: Option<PathBuf>,
    },
    /// Show a container's manifest.
    Inspect {
        container: PathBuf,
        /// Check every image entry's size and SHA-384.
        #[arg(long, default_value_t = false)]
        verify: bool,
    },
    /// Walk a container's raw layout and cross-check it against its manifest.
    Explain {
        container: PathBuf,
        /// Recompute the SHA-384 of every referenced entry.
        #[arg(long, default_value_t = false)]
        verify_hashes: bool,
    },
    /// Add a file to a container as an auxiliary file.
    Insert {
        source: PathBuf,
        output: PathBuf,
        /// File to attach.
        file: PathBuf,
        /// Name inside the container. Defaults to the file name.
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove filesystems by mount point.
    Delete {
        source: PathBuf,
        output: PathBuf,
        /// Mount point to remove (repeatable).
        #[arg(long = "mount-point", short = 'm', required = true)]
        mount_points: Vec<String>,
    },
    /// Give ext filesystems fresh random UUIDs.
    RandomizeFsUuid {
        source: PathBuf,
        output: PathBuf,
        /// Mount point to rewrite (repeatable).
        #[arg(long = "mount-point", short = 'm', required = true)]
        mount_points: Vec<String>,
        /// Directory for staging files.
        #[arg(long)]
        scratch: Option<PathBuf>,
    },
    /// Re-encode a container with a fixed VHD footer appended.
    VhdFooter { source: PathBuf, output: PathBuf },
    /// Check that the external tools used by generate and build are available.
    Doctor,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("COSI_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();
    let json = cli.json;

    let missing = match cli.command {
        Commands::Generate { .. } | Commands::Build { .. } => cosi_tools::check_generator_prereqs(),
        Commands::RandomizeFsUuid { .. } => cosi_tools::check_uuid_prereqs(),
        _ => Vec::new(),
    };
    if !missing.is_empty() && std::env::var("COSI_SKIP_PREREQS").as_deref() != Ok("1") {
        eprintln!("error: {}", cosi_tools::format_missing(&missing));
        return ExitCode::from(EXIT_FAILURE);
    }

    let result = match cli.command {
        Commands::Generate {
            source,
            output,
            config,
            scratch,
            no_shrink,
            arch,
            level,
            window_log,
        } => commands::generate::run(&commands::generate::Args {
            source,
            output,
            config,
            scratch,
            no_shrink,
            arch,
            level,
            window_log,
            json,
        }),
        Commands::Build {
            variant,
            dir,
            output,
            extension,
            scratch,
        } => commands::build::run(variant, &dir, &output, &extension, scratch.as_deref(), json),
        Commands::Inspect { container, verify } => {
            commands::inspect::run(&container, verify, json)
        }
        Commands::Explain {
            container,
            verify_hashes,
        } => commands::explain::run(&container, verify_hashes, json),
        Commands::Insert {
            source,
            output,
            file,
            name,
        } => commands::insert::run(&source, &output, &file, name.as_deref(), json),
        Commands::Delete {
            source,
            output,
            mount_points,
        } => commands::delete::run(&source, &output, &mount_points, json),
        Commands::RandomizeFsUuid {
            source,
            output,
            mount_points,
            scratch,
        } => commands::randomize_fs_uuid::run(
            &source,
            &output,
            &mount_points,
            scratch.as_deref(),
            json,
        ),
        Commands::VhdFooter { source, output } => commands::vhd_footer::run(&source, &output, json),
        Commands::Doctor => commands::doctor::run(json),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}
