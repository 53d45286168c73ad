pub mod layout;
pub mod monitor;

use crate::topology::SlotId;
use layout::SlotLayout;
use monitor::{RoundMonitor, SlotGuard};
use serde::{Deserialize, Serialize};
use std::{
    fs::{File, OpenOptions},
    io::{self, BufWriter, Write},
    path::PathBuf,
};
use thiserror::Error;
use tracing::{debug, error, trace};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to open {path:?} for writing: {source}")]
    OpenFailed { path: PathBuf, source: io::Error },
    #[error("Failed to write to {path:?}: {source}")]
    WriteFailed { path: PathBuf, source: io::Error },
}

/// How a session opens its slot file
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OpenMode {
    /// first writer of the round, start from an empty file
    Truncate,
    /// granted writer, keep what earlier writers left
    Append,
}

#[derive(Debug)]
enum SessionWriter {
    Direct(File),
    Buffered(BufWriter<File>),
}

impl Write for SessionWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Direct(file) => file.write(buf),
            Self::Buffered(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Direct(file) => file.flush(),
            Self::Buffered(writer) => writer.flush(),
        }
    }
}

/// Exclusive, scoped access to one slot file.
///
/// The caller must hold the slot's token (first writer or granted) for the
/// whole lifetime of the session. The file is closed when the session is
/// dropped, whether `finish` ran or an error cut the write short.
#[derive(Debug)]
pub struct FileWriteSession<'m> {
    // declared before the guard so the file is closed before the slot is released
    writer: SessionWriter,
    path: PathBuf,
    written: u64,
    guard: SlotGuard<'m>,
}

impl<'m> FileWriteSession<'m> {
    /// open `slot` of `layout`; with `buffer_size` set, writes are collected
    /// locally and reach the file in buffer sized chunks
    pub fn open(
        layout: &SlotLayout,
        slot: SlotId,
        mode: OpenMode,
        buffer_size: Option<usize>,
        monitor: &'m RoundMonitor,
    ) -> Result<Self, SessionError> {
        let path = layout.path(slot);
        let mut options = OpenOptions::new();
        options.create(true);

        match mode {
            OpenMode::Truncate => options.write(true).truncate(true),
            OpenMode::Append => options.append(true),
        };

        let file = match options.open(&path) {
            Ok(file) => file,
            Err(source) => {
                error!(path = ?path, error = ?source, "Failed to open slot file");

                return Err(SessionError::OpenFailed { path, source });
            }
        };

        let guard = monitor.enter(slot);
        debug!(path = ?path, ?mode, buffered = buffer_size.is_some(), "Opened slot file");

        Ok(Self {
            writer: match buffer_size {
                Some(capacity) => SessionWriter::Buffered(BufWriter::with_capacity(capacity, file)),
                None => SessionWriter::Direct(file),
            },
            path,
            written: 0,
            guard,
        })
    }

    /// append `payload` as is, no framing is added
    pub fn write_payload(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        self.writer
            .write_all(payload)
            .map_err(|source| SessionError::WriteFailed {
                path: self.path.clone(),
                source,
            })?;
        self.written += payload.len() as u64;

        Ok(())
    }

    /// flush and close, returns the number of bytes this session wrote
    pub fn finish(mut self) -> Result<u64, SessionError> {
        if let Err(source) = self.writer.flush() {
            return Err(SessionError::WriteFailed {
                path: self.path.clone(),
                source,
            });
        }

        self.guard.monitor().record_write(self.written);
        trace!(path = ?self.path, bytes = self.written, "Closed slot file");

        Ok(self.written)
    }
}
