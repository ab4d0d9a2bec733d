//! Pseudo-terminal adapter over `pty-process`.
//!
//! A [`PtyPair`] is allocated on `pty-req` and sized right away. Spawning a
//! process on it consumes the pair: the child gets the secondary device as
//! its controlling terminal, the parent's copy of the secondary is closed,
//! and what remains is an [`AttachedPty`] for resizing, a [`TerminalInput`]
//! for the input pump, and the primary's read half for the output pump.

use crate::ssh::request::WindowSize;
use pty_process::{OwnedReadPty, OwnedWritePty, Pts, Pty, Size};
use std::io;
use tokio::process::Child;
use tokio::sync::mpsc;

fn io_err<E>(e: E) -> io::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    io::Error::other(e)
}

// pty_process::Size takes rows first.
fn to_size(size: WindowSize) -> Size {
    Size::new(size.rows, size.cols)
}

/// Allocated but not yet attached primary/secondary pair.
pub struct PtyPair {
    pty: Pty,
    pts: Pts,
    size: WindowSize,
}

impl PtyPair {
    pub fn open(size: WindowSize) -> io::Result<Self> {
        let pty = Pty::new().map_err(io_err)?;
        let pts = pty.pts().map_err(io_err)?;
        // Some platforms refuse to size a terminal with no process on it;
        // `spawn` applies the size again.
        let _ = pty.resize(to_size(size));
        Ok(Self { pty, pts, size })
    }

    pub fn size(&self) -> WindowSize {
        self.size
    }

    /// Geometry change before any process is attached; the latest size is
    /// the one the process starts with.
    pub fn set_size(&mut self, size: WindowSize) {
        let _ = self.pty.resize(to_size(size));
        self.size = size;
    }

    /// Spawn `command` with its stdio on the secondary device, as session
    /// leader with the terminal as controlling tty.
    pub fn spawn(
        self,
        command: &mut pty_process::Command,
    ) -> io::Result<(Child, AttachedPty, TerminalInput, OwnedReadPty)> {
        let child = command.spawn(&self.pts).map_err(io_err)?;
        drop(self.pts);
        let (reader, writer) = self.pty.into_split();
        apply_size(&writer, self.size)?;
        let (resizes_tx, resizes) = mpsc::unbounded_channel();
        let attached = AttachedPty {
            resizes: resizes_tx,
            size: self.size,
        };
        Ok((child, attached, TerminalInput { writer, resizes }, reader))
    }
}

/// Primary side of a terminal that has a process attached. Resizes are
/// queued to the [`TerminalInput`] owner, so asking for one never waits on
/// terminal I/O.
pub struct AttachedPty {
    resizes: mpsc::UnboundedSender<WindowSize>,
    size: WindowSize,
}

impl AttachedPty {
    pub fn size(&self) -> WindowSize {
        self.size
    }

    pub fn resize(&mut self, size: WindowSize) -> io::Result<()> {
        self.resizes
            .send(size)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "terminal input closed"))?;
        self.size = size;
        Ok(())
    }
}

/// Write half of the primary device plus the resizes waiting to be applied
/// to it.
pub struct TerminalInput {
    writer: OwnedWritePty,
    resizes: mpsc::UnboundedReceiver<WindowSize>,
}

impl TerminalInput {
    pub fn into_parts(self) -> (OwnedWritePty, mpsc::UnboundedReceiver<WindowSize>) {
        (self.writer, self.resizes)
    }
}

pub fn apply_size(writer: &OwnedWritePty, size: WindowSize) -> io::Result<()> {
    writer.resize(to_size(size)).map_err(io_err)
}
