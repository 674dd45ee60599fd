use crate::ArchiveError;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Output file that only appears at its destination once committed.
///
/// Bytes go to a temporary file in the destination directory; `commit`
/// syncs it and renames it into place. Dropping without committing deletes
/// the temporary file, so a failed run leaves nothing behind.
pub struct AtomicOutput {
    tmp: NamedTempFile,
    dest: PathBuf,
}

impl AtomicOutput {
    pub fn create(dest: &Path) -> Result<Self, ArchiveError> {
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let tmp = tempfile::Builder::new()
            .prefix(".cosi-")
            .suffix(".partial")
            .tempfile_in(&dir)?;
        Ok(Self {
            tmp,
            dest: dest.to_path_buf(),
        })
    }

    pub fn file(&mut self) -> &mut File {
        self.tmp.as_file_mut()
    }

    pub fn destination(&self) -> &Path {
        &self.dest
    }

    pub fn commit(self) -> Result<PathBuf, ArchiveError> {
        self.tmp.as_file().sync_all()?;
        self.tmp
            .persist(&self.dest)
            .map_err(|e| ArchiveError::Io(e.error))?;
        if let Some(dir) = self.dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fsync_dir(dir)?;
        }
        Ok(self.dest)
    }
}

impl Write for AtomicOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tmp.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tmp.flush()
    }
}

/// Fsync a directory so a preceding rename into it is durable.
fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}
