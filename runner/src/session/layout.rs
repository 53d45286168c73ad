use crate::topology::SlotId;
use once_cell::sync::Lazy;
use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// prefix used when neither the config nor the command line names one
pub static DEFAULT_PREFIX: Lazy<PathBuf> = Lazy::new(|| PathBuf::from("nfiles/Data_"));

pub const DEFAULT_WIDTH: usize = 5;

/// Naming scheme of the `files` output files: `<prefix><slot>`, with the
/// slot index zero padded to `width` digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotLayout {
    prefix: PathBuf,
    width: usize,
    files: usize,
}

impl SlotLayout {
    pub fn new(prefix: impl Into<PathBuf>, width: usize, files: usize) -> Self {
        Self {
            prefix: prefix.into(),
            width,
            files,
        }
    }

    pub fn path(&self, slot: SlotId) -> PathBuf {
        // pushing onto the raw prefix keeps a trailing separator meaningful
        let mut name = OsString::from(self.prefix.as_os_str());
        name.push(format!("{slot:0width$}", width = self.width));

        PathBuf::from(name)
    }

    pub fn paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        (0..self.files).map(|slot| self.path(slot))
    }

    /// directory holding the slot files, `None` for the working directory
    pub fn directory(&self) -> Option<PathBuf> {
        self.path(0)
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(Path::to_path_buf)
    }

    /// make sure the output directory exists, to be called by a single rank
    pub fn create_directory(&self) -> io::Result<()> {
        if let Some(directory) = self.directory() {
            fs::create_dir_all(&directory)?;
            debug!(directory = ?directory, "Output directory ready");
        }

        Ok(())
    }

    /// delete slot files left over from an earlier run, returns how many existed
    pub fn remove_files(&self) -> io::Result<usize> {
        let mut removed = 0;

        for path in self.paths() {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(error) if error.kind() == io::ErrorKind::NotFound => {}
                Err(error) => return Err(error),
            }
        }

        if removed > 0 {
            info!(removed, prefix = ?self.prefix, "Removed stale slot files");
        }

        Ok(removed)
    }
}
