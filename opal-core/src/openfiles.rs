//! File-descriptor bookkeeping for a [`Context`](crate::context::Context): the concrete
//! stdin/stdout/stderr/pipe/file handles a sink or pipeline stage is wired to.

use std::collections::HashMap;
use std::io::{IsTerminal, Read, Write};
#[cfg(unix)]
use std::os::fd::AsFd;
use std::process::Stdio;

use crate::error::{Error, ErrorKind};
use crate::sys;

/// One file-like resource a [`Context`](crate::context::Context) may have wired to a well-known
/// descriptor slot.
pub enum OpenFile {
    /// The original standard input this process was started with.
    Stdin(std::io::Stdin),
    /// The original standard output this process was started with.
    Stdout(std::io::Stdout),
    /// The original standard error this process was started with.
    Stderr(std::io::Stderr),
    /// A file open for reading or writing (a redirect sink, or a sink read back).
    File(std::fs::File),
    /// A read end of a pipeline pipe.
    PipeReader(OpenPipeReader),
    /// A write end of a pipeline pipe.
    PipeWriter(OpenPipeWriter),
}

/// Returns an open file that discards all I/O; used to seed a child's stdin/stdout when a
/// pipeline stage has nothing piped in on that side.
pub fn null() -> Result<OpenFile, Error> {
    Ok(OpenFile::File(sys::fs::open_null_file()?))
}

impl Clone for OpenFile {
    fn clone(&self) -> Self {
        // `try_dup` only fails if the underlying `dup`/`try_clone` syscall fails, which would
        // mean the process is nearly out of file descriptors; treat that as fatal rather than
        // threading a `Result` through every call site that needs a cheap duplicate.
        self.try_dup().unwrap_or_else(|e| {
            crate::invariant!(false, "failed to duplicate open file descriptor: {e}");
            unreachable!()
        })
    }
}

impl OpenFile {
    /// Tries to duplicate the open file.
    pub fn try_dup(&self) -> Result<Self, Error> {
        let result = match self {
            Self::Stdin(_) => Self::Stdin(std::io::stdin()),
            Self::Stdout(_) => Self::Stdout(std::io::stdout()),
            Self::Stderr(_) => Self::Stderr(std::io::stderr()),
            Self::File(f) => Self::File(f.try_clone()?),
            Self::PipeReader(r) => Self::PipeReader(OpenPipeReader(r.0.try_clone()?)),
            Self::PipeWriter(w) => Self::PipeWriter(OpenPipeWriter(w.0.try_clone()?)),
        };

        Ok(result)
    }

    pub(crate) fn is_term(&self) -> bool {
        match self {
            Self::Stdin(f) => f.is_terminal(),
            Self::Stdout(f) => f.is_terminal(),
            Self::Stderr(f) => f.is_terminal(),
            Self::File(f) => f.is_terminal(),
            Self::PipeReader(_) | Self::PipeWriter(_) => false,
        }
    }
}

#[cfg(unix)]
impl AsFd for OpenFile {
    fn as_fd(&self) -> std::os::fd::BorrowedFd<'_> {
        match self {
            Self::Stdin(f) => f.as_fd(),
            Self::Stdout(f) => f.as_fd(),
            Self::Stderr(f) => f.as_fd(),
            Self::File(f) => f.as_fd(),
            Self::PipeReader(r) => r.0.as_fd(),
            Self::PipeWriter(w) => w.0.as_fd(),
        }
    }
}

impl From<std::fs::File> for OpenFile {
    fn from(file: std::fs::File) -> Self {
        Self::File(file)
    }
}

impl From<OpenFile> for Stdio {
    fn from(open_file: OpenFile) -> Self {
        match open_file {
            OpenFile::Stdin(_) | OpenFile::Stdout(_) | OpenFile::Stderr(_) => Self::inherit(),
            OpenFile::File(f) => f.into(),
            OpenFile::PipeReader(r) => r.0.into(),
            OpenFile::PipeWriter(w) => w.0.into(),
        }
    }
}

impl std::io::Read for OpenFile {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Stdin(f) => f.read(buf),
            Self::Stdout(_) => Err(io_err(ErrorKind::OpenFileNotReadable("stdout"))),
            Self::Stderr(_) => Err(io_err(ErrorKind::OpenFileNotReadable("stderr"))),
            Self::File(f) => f.read(buf),
            Self::PipeReader(reader) => reader.0.read(buf),
            Self::PipeWriter(_) => Err(io_err(ErrorKind::OpenFileNotReadable("pipe writer"))),
        }
    }
}

impl std::io::Write for OpenFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Stdin(_) => Err(io_err(ErrorKind::OpenFileNotWritable("stdin"))),
            Self::Stdout(f) => f.write(buf),
            Self::Stderr(f) => f.write(buf),
            Self::File(f) => f.write(buf),
            Self::PipeReader(_) => Err(io_err(ErrorKind::OpenFileNotWritable("pipe reader"))),
            Self::PipeWriter(writer) => writer.0.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdin(_) | Self::PipeReader(_) => Ok(()),
            Self::Stdout(f) => f.flush(),
            Self::Stderr(f) => f.flush(),
            Self::File(f) => f.flush(),
            Self::PipeWriter(writer) => writer.0.flush(),
        }
    }
}

fn io_err(kind: ErrorKind) -> std::io::Error {
    std::io::Error::other(Error::from(kind))
}

/// The open files bound to a [`Context`](crate::context::Context): a small fd-indexed map, keyed
/// the same way a unix process's descriptor table is (0/1/2 reserved for std streams).
#[derive(Clone)]
pub struct OpenFiles {
    files: HashMap<u32, OpenFile>,
}

impl Default for OpenFiles {
    fn default() -> Self {
        Self {
            files: HashMap::from([
                (Self::STDIN_FD, OpenFile::Stdin(std::io::stdin())),
                (Self::STDOUT_FD, OpenFile::Stdout(std::io::stdout())),
                (Self::STDERR_FD, OpenFile::Stderr(std::io::stderr())),
            ]),
        }
    }
}

impl OpenFiles {
    /// File descriptor used for standard input.
    pub const STDIN_FD: u32 = 0;
    /// File descriptor used for standard output.
    pub const STDOUT_FD: u32 = 1;
    /// File descriptor used for standard error.
    pub const STDERR_FD: u32 = 2;

    /// Tries to duplicate every open file, for handing an independent copy to a pipeline stage's
    /// child [`Context`](crate::context::Context).
    pub fn try_clone(&self) -> Result<Self, Error> {
        let mut files = HashMap::with_capacity(self.files.len());
        for (fd, file) in &self.files {
            files.insert(*fd, file.try_dup()?);
        }
        Ok(Self { files })
    }

    /// Retrieves the file backing standard input in this context.
    pub fn stdin(&self) -> Option<&OpenFile> {
        self.files.get(&Self::STDIN_FD)
    }

    /// Retrieves the file backing standard output in this context.
    pub fn stdout(&self) -> Option<&OpenFile> {
        self.files.get(&Self::STDOUT_FD)
    }

    /// Retrieves the file backing standard error in this context.
    pub fn stderr(&self) -> Option<&OpenFile> {
        self.files.get(&Self::STDERR_FD)
    }

    /// Removes the open file at `fd`, if any.
    pub fn remove(&mut self, fd: u32) -> Option<OpenFile> {
        self.files.remove(&fd)
    }

    /// Looks up the open file at `fd`, if any.
    pub fn get(&self, fd: u32) -> Option<&OpenFile> {
        self.files.get(&fd)
    }

    /// Returns true if `fd` names an open file in this table.
    pub fn contains(&self, fd: u32) -> bool {
        self.files.contains_key(&fd)
    }

    /// Associates `fd` with `file`, returning whatever was previously there.
    pub fn set(&mut self, fd: u32, file: OpenFile) -> Option<OpenFile> {
        self.files.insert(fd, file)
    }
}

/// Creates a new pipe, returning its reader and writer ends (spec.md §4.7.2 step 1).
pub fn pipe() -> Result<(OpenPipeReader, OpenPipeWriter), Error> {
    let (reader, writer) = sys::pipes::pipe()?;
    Ok((OpenPipeReader(reader), OpenPipeWriter(writer)))
}

/// The read end of a pipe created by [`pipe`].
pub struct OpenPipeReader(sys::pipes::PipeReader);

impl From<OpenPipeReader> for OpenFile {
    fn from(value: OpenPipeReader) -> Self {
        Self::PipeReader(value)
    }
}

impl std::io::Read for OpenPipeReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.0.read(buf)
    }
}

/// The write end of a pipe created by [`pipe`].
pub struct OpenPipeWriter(sys::pipes::PipeWriter);

impl From<OpenPipeWriter> for OpenFile {
    fn from(value: OpenPipeWriter) -> Self {
        Self::PipeWriter(value)
    }
}

impl std::io::Write for OpenPipeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.flush()
    }
}

impl OpenPipeWriter {
    /// Closes this end of the pipe by dropping it, guarded so a concurrent cancellation-driven
    /// close (spec.md §4.7.2 step 3/4) cannot double-close the descriptor.
    pub fn close(self) {
        drop(self);
    }
}
