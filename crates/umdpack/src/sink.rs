//! Bounded hand-off from the emitter to the output file.
//!
//! The emitter writes into a [`ChannelWriter`], which batches bytes into
//! chunks and sends them over a bounded channel. [`ArtifactSink`] drains the
//! channel on its own thread into a temporary file next to the destination
//! and renames it into place once everything has been flushed. A full
//! channel blocks the emitter until the disk catches up.

use log::{debug, trace};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::thread::{self, JoinHandle};
use tempfile::NamedTempFile;

use crate::error::{BuildError, BuildResult};

/// Bytes batched before a chunk is sent
pub const CHUNK_SIZE: usize = 64 * 1024;
/// Chunks in flight before the producer blocks
pub const CHANNEL_DEPTH: usize = 4;

/// `io::Write` end of the artifact channel
#[derive(Debug)]
pub struct ChannelWriter {
    sender: Option<SyncSender<Vec<u8>>>,
    buffer: Vec<u8>,
}

impl ChannelWriter {
    fn new(sender: SyncSender<Vec<u8>>) -> Self {
        Self {
            sender: Some(sender),
            buffer: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    fn send_buffer(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::replace(&mut self.buffer, Vec::with_capacity(CHUNK_SIZE));
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "artifact channel closed"))?;
        sender.send(chunk).map_err(|_| {
            io::Error::new(
                io::ErrorKind::BrokenPipe,
                "artifact writer stopped before the bundle was complete",
            )
        })
    }

    /// Send any buffered bytes and close the channel
    pub fn finish(mut self) -> io::Result<()> {
        self.send_buffer()?;
        self.sender.take();
        Ok(())
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        if self.buffer.len() >= CHUNK_SIZE {
            self.send_buffer()?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_buffer()
    }
}

/// Consumer side: a thread that writes received chunks to a temporary file
#[derive(Debug)]
pub struct ArtifactSink {
    destination: PathBuf,
    handle: JoinHandle<BuildResult<Staged>>,
}

/// A fully written temporary file waiting to be moved into place
#[derive(Debug)]
struct Staged {
    file: NamedTempFile,
    bytes: u64,
}

impl ArtifactSink {
    /// Create the temporary file in the destination's directory and start
    /// draining. Fails immediately when the file cannot be created.
    pub fn open(destination: &Path) -> BuildResult<(ChannelWriter, Self)> {
        let dir = destination.parent().unwrap_or_else(|| Path::new("."));
        let file = tempfile::Builder::new()
            .prefix(".umdpack-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| BuildError::filesystem("Failed to create output file", destination, e))?;
        debug!("Streaming artifact through {:?}", file.path());

        let (sender, receiver) = sync_channel(CHANNEL_DEPTH);
        let target = destination.to_path_buf();
        let handle = thread::Builder::new()
            .name("umdpack-sink".to_owned())
            .spawn(move || drain(file, &receiver, &target))
            .map_err(|e| BuildError::filesystem("Failed to start output writer", destination, e))?;

        Ok((
            ChannelWriter::new(sender),
            Self {
                destination: destination.to_path_buf(),
                handle,
            },
        ))
    }

    /// Wait for the channel to close, then sync and rename the file onto the
    /// destination. Returns the number of bytes written. If this fails the
    /// temporary file is removed and the destination keeps its old content.
    pub fn commit(self) -> BuildResult<u64> {
        let (destination, staged) = self.join()?;
        set_artifact_permissions(staged.file.as_file(), &destination)?;
        staged.file.persist(&destination).map_err(|e| {
            BuildError::filesystem("Failed to move artifact into place", &destination, e.error)
        })?;
        debug!("Wrote {} bytes to {:?}", staged.bytes, destination);
        Ok(staged.bytes)
    }

    /// Wait for the consumer and throw the temporary file away
    pub fn discard(self) -> BuildResult<()> {
        self.join().map(drop)
    }

    fn join(self) -> BuildResult<(PathBuf, Staged)> {
        match self.handle.join() {
            Ok(staged) => Ok((self.destination, staged?)),
            Err(_) => Err(BuildError::filesystem(
                "Output writer panicked while writing",
                self.destination,
                io::Error::other("output writer thread panicked"),
            )),
        }
    }
}

fn drain(
    mut file: NamedTempFile,
    receiver: &Receiver<Vec<u8>>,
    destination: &Path,
) -> BuildResult<Staged> {
    let mut bytes = 0u64;
    // iteration ends once the writer is finished or dropped
    for chunk in receiver {
        trace!("Writing chunk of {} bytes", chunk.len());
        file.write_all(&chunk)
            .map_err(|e| BuildError::filesystem("Failed to write output file", destination, e))?;
        bytes += chunk.len() as u64;
    }
    file.flush()
        .map_err(|e| BuildError::filesystem("Failed to flush output file", destination, e))?;
    file.as_file()
        .sync_all()
        .map_err(|e| BuildError::filesystem("Failed to sync output file", destination, e))?;
    Ok(Staged { file, bytes })
}

#[cfg(unix)]
fn set_artifact_permissions(file: &File, destination: &Path) -> BuildResult<()> {
    use std::os::unix::fs::PermissionsExt;
    // temp files are created 0600; the artifact is meant to be served
    file.set_permissions(std::fs::Permissions::from_mode(0o644))
        .map_err(|e| BuildError::filesystem("Failed to set output permissions", destination, e))
}

#[cfg(not(unix))]
fn set_artifact_permissions(_file: &File, _destination: &Path) -> BuildResult<()> {
    Ok(())
}
