//! Process-group signalling used to implement cancellation against local child processes.

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

/// Sends `SIGKILL` to the process group led by `pid`, used when a [`Context`](crate::context::Context)
/// is cancelled while a local child is running (spec.md §4.7.4).
pub(crate) fn kill_process_group(pid: u32) -> std::io::Result<()> {
    let pgid = Pid::from_raw(-(i32::try_from(pid).unwrap_or(i32::MAX)));
    signal::kill(pgid, Signal::SIGKILL).map_err(std::io::Error::from)
}
