//! Filesystem helpers used by sinks and the local session.

use std::fs::File;
use std::io;

/// Opens a file that discards all writes and yields EOF on read, for contexts that need an
/// `OpenFile` but no real backing store (e.g. a closed stdin slot).
pub(crate) fn open_null_file() -> io::Result<File> {
    File::options().read(true).write(true).open("/dev/null")
}
