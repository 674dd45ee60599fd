use crate::runner::{path_arg, run_checked, ToolRunner};
use crate::ToolError;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, warn};

/// A read-only loop mount of a filesystem image on a private temporary
/// directory. Unmounted and removed when dropped.
pub struct LoopMount<'a> {
    runner: &'a dyn ToolRunner,
    dir: Option<TempDir>,
}

impl<'a> LoopMount<'a> {
    pub fn new(runner: &'a dyn ToolRunner, image: &Path, scratch: &Path) -> Result<Self, ToolError> {
        let dir = tempfile::Builder::new().prefix("mnt-").tempdir_in(scratch)?;
        run_checked(
            runner,
            "mount",
            &["-o", "loop,ro", path_arg(image)?, path_arg(dir.path())?],
        )?;
        debug!("mounted {} at {}", image.display(), dir.path().display());
        Ok(Self {
            runner,
            dir: Some(dir),
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.as_ref().map_or(Path::new(""), TempDir::path)
    }

    /// Unmount now and report failure instead of only logging it.
    pub fn unmount(mut self) -> Result<(), ToolError> {
        match self.dir.take() {
            Some(dir) => release(self.runner, dir),
            None => Ok(()),
        }
    }
}

impl Drop for LoopMount<'_> {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = release(self.runner, dir) {
                warn!("{e}");
            }
        }
    }
}

fn release(runner: &dyn ToolRunner, dir: TempDir) -> Result<(), ToolError> {
    let result = path_arg(dir.path()).and_then(|p| run_checked(runner, "umount", &[p]));
    match result {
        Ok(_) => {
            debug!("unmounted {}", dir.path().display());
            Ok(())
        }
        Err(e) => {
            // Never delete through a mount that may still be live.
            warn!("leaving {} in place", dir.path().display());
            std::mem::forget(dir);
            Err(e)
        }
    }
}
