use super::EXIT_SUCCESS;
use clap::CommandFactory;
use std::path::Path;

const BIN: &str = "mkcosi";

fn render(cmd: clap::Command, path: &Path) -> Result<(), String> {
    let mut buf = Vec::new();
    clap_mangen::Man::new(cmd)
        .render(&mut buf)
        .map_err(|e| format!("man page render failed: {e}"))?;
    std::fs::write(path, &buf).map_err(|e| format!("failed to write {}: {e}", path.display()))
}

/// One page for the binary plus `mkcosi-<command>.1` per subcommand.
pub fn run<C: CommandFactory>(dir: &Path) -> Result<u8, String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("failed to create {}: {e}", dir.display()))?;
    let cmd = C::command();
    render(cmd.clone(), &dir.join(format!("{BIN}.1")))?;

    let mut pages = 1;
    for sub in cmd.get_subcommands() {
        let name = format!("{BIN}-{}", sub.get_name());
        render(sub.clone(), &dir.join(format!("{name}.1")))?;
        pages += 1;
    }
    println!("{pages} man pages written to {}", dir.display());
    Ok(EXIT_SUCCESS)
}
