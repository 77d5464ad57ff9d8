//! Thin unix platform shim.
//!
//! The teacher this crate is grounded on (`brush-core`) carries separate `unix`/`windows`/`wasm`/
//! stub platform modules behind its own `sys::platform` facade, because a shell has to run
//! everywhere. This crate's session and sink implementations only ever run against a unix kernel
//! (the SSH and local-process paths both assume POSIX signal semantics), so the facade collapses
//! to a single module rather than carrying dead platform branches.

pub(crate) mod fs;
pub(crate) mod pipes;
pub(crate) mod signal;
