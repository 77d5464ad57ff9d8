//! Kernel-backed pipes for pipeline orchestration (§4.7.2).
//!
//! Deliberately thin wrappers around `os_pipe`'s handles rather than the raw crate types, so
//! `openfiles.rs` can name `sys::pipes::PipeReader`/`PipeWriter` the same way the teacher's
//! `openfiles.rs` names its own platform pipe types.

use std::io;

/// The read end of a pipe created by [`pipe`].
pub(crate) struct PipeReader(os_pipe::PipeReader);

/// The write end of a pipe created by [`pipe`].
pub(crate) struct PipeWriter(os_pipe::PipeWriter);

/// Creates a new OS pipe. Closing the writer's last clone unblocks a blocked reader with EOF;
/// this is what gives pipeline stages correct SIGPIPE/EOF behavior without the evaluator
/// simulating it (spec.md §4.7.2 step 1).
pub(crate) fn pipe() -> io::Result<(PipeReader, PipeWriter)> {
    let (reader, writer) = os_pipe::pipe()?;
    Ok((PipeReader(reader), PipeWriter(writer)))
}

impl PipeReader {
    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        Ok(Self(self.0.try_clone()?))
    }
}

impl PipeWriter {
    pub(crate) fn try_clone(&self) -> io::Result<Self> {
        Ok(Self(self.0.try_clone()?))
    }
}

impl io::Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut self.0, buf)
    }
}

impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut self.0, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::Write::flush(&mut self.0)
    }
}

impl std::os::fd::AsFd for PipeReader {
    fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl std::os::fd::AsFd for PipeWriter {
    fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl std::os::fd::AsRawFd for PipeReader {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

impl std::os::fd::AsRawFd for PipeWriter {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

impl From<PipeReader> for std::os::fd::OwnedFd {
    fn from(value: PipeReader) -> Self {
        value.0.into()
    }
}

impl From<PipeWriter> for std::os::fd::OwnedFd {
    fn from(value: PipeWriter) -> Self {
        value.0.into()
    }
}

impl From<PipeReader> for std::process::Stdio {
    fn from(value: PipeReader) -> Self {
        value.0.into()
    }
}

impl From<PipeWriter> for std::process::Stdio {
    fn from(value: PipeWriter) -> Self {
        value.0.into()
    }
}
