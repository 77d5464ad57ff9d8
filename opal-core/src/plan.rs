//! Plan record model (C3): the frozen, read-only in-memory tree produced by the (out-of-scope)
//! planner. This module only defines the shapes; `plan_reader` is the one producer of [`Step`]
//! values this crate contains.

use std::collections::HashMap;
use std::path::PathBuf;

/// A typed argument value (spec.md §3). `Duration` is reserved in the wire format (§6) but not
/// yet constructible from it — see `plan_reader` and the Open Questions ledger in DESIGN.md.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A UTF-8 string value.
    String(String),
    /// A signed 64-bit integer value.
    Int(i64),
    /// A boolean value.
    Bool(bool),
    /// An index into the plan's placeholder table, populated by value-providers at plan time.
    Placeholder(u32),
}

impl Value {
    /// Returns the string, if this is a `Value::String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Returns the int, if this is a `Value::Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the bool, if this is a `Value::Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

/// One named argument to a [`ExecNode::Command`]. A command's argument list is an ordered
/// sequence; canonical form sorts by key, and keys are unique within one command (enforced by the
/// planner; violations are an `invariant!` failure here, not a recoverable error).
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    /// The argument's name, as declared by the decorator's schema.
    pub key: String,
    /// The argument's value.
    pub value: Value,
}

/// Overwrite-vs-append mode for a [`ExecNode::Redirect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// Truncate the sink before writing (`>`).
    Overwrite,
    /// Append to the sink (`>>`).
    Append,
}

/// Capability flags a [`Sink`] reports; the evaluator rejects a redirect mode the sink does not
/// support before ever opening it (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkCapabilities {
    /// The sink supports `Overwrite` mode.
    pub overwrite: bool,
    /// The sink supports `Append` mode.
    pub append: bool,
    /// Writes to the sink are atomic (rename-into-place or equivalent).
    pub atomic: bool,
    /// Concurrent writers to the sink do not corrupt each other's output.
    pub concurrent_safe: bool,
}

/// A redirection target (spec.md §3). `FsPath` is the only kind specified at this layer; a
/// decorator implementing the Endpoint role may contribute additional sink-like targets as a
/// boxed `dyn Endpoint` (see `descriptor::role::Endpoint`) rather than a new `Sink` variant, so
/// this enum stays closed over what the core itself understands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sink {
    /// A path on the active session's filesystem, plus the unix permission bits to create it
    /// with.
    FsPath {
        /// Destination path.
        path: PathBuf,
        /// Permission bits used if the sink is created.
        mode: u32,
    },
}

impl Sink {
    /// The capabilities this sink kind reports to the evaluator.
    pub fn capabilities(&self) -> SinkCapabilities {
        match self {
            Self::FsPath { .. } => SinkCapabilities {
                overwrite: true,
                append: true,
                atomic: false,
                concurrent_safe: false,
            },
        }
    }
}

/// A [`ExecNode::Redirect`]'s target: either a core-understood [`Sink`], or a decorator
/// implementing the Endpoint role, addressed by path with the args it should be opened with (its
/// own schema, not the redirected command's). `Sink` itself stays closed per its own doc comment;
/// this is the "boxed `dyn Endpoint`, not a new `Sink` variant" it promises, carried as a
/// plan-level value rather than a live trait object since a `Step` must stay `Clone`/`PartialEq`.
#[derive(Debug, Clone, PartialEq)]
pub enum RedirectTarget {
    /// A path on the active session's filesystem.
    Fs(Sink),
    /// A decorator-backed endpoint, opened with its own argument list.
    Endpoint {
        /// Dotted decorator path (e.g. `shell`).
        decorator: String,
        /// Arguments passed to the decorator's own schema, not the redirected command's.
        args: Vec<Arg>,
    },
}

/// The execution tree (spec.md §3): every `Command` leaf resolves a decorator via the registry;
/// every other variant composes child nodes per the operator semantics in §4.7.1.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecNode {
    /// A single decorator invocation. `block` is non-empty only when `decorator` is a Wrapper
    /// role that takes a nested body (e.g. `@retry`, `@parallel`).
    Command {
        /// Dotted decorator path (e.g. `shell`, `var.name`, `ssh.connect`).
        decorator: String,
        /// Ordered argument list.
        args: Vec<Arg>,
        /// Nested steps, for wrapper decorators that scope a body.
        block: Vec<Step>,
    },
    /// `N >= 2` commands joined by `|`. Elements must be `Command`, `Pipeline`, or `Redirect`;
    /// anything else here is a planner bug, caught by `invariant!` at evaluation.
    Pipeline(Vec<ExecNode>),
    /// `left && right`: short-circuits unless `left` exits zero.
    And(Box<ExecNode>, Box<ExecNode>),
    /// `left || right`: short-circuits unless `left` exits non-zero.
    Or(Box<ExecNode>, Box<ExecNode>),
    /// An ordered list that always runs every child; exit code is the last child's.
    Sequence(Vec<ExecNode>),
    /// `source`'s stdout routed into `sink` in `mode`. Nesting (`Redirect` whose `source` is
    /// itself `Redirect`) is rejected at evaluation.
    Redirect {
        /// The subtree whose stdout is redirected.
        source: Box<ExecNode>,
        /// The redirection target.
        sink: RedirectTarget,
        /// Overwrite or append.
        mode: RedirectMode,
    },
}

/// One top-level unit in a target: an `(id, tree)` pair. `id` is the planner's stable identifier,
/// threaded through telemetry, debug events, and error attribution.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Stable identifier assigned by the planner.
    pub id: u64,
    /// The execution tree rooted at this step.
    pub tree: ExecNode,
}

/// The plan's variable placeholder table, resolved from the planner's (out-of-scope) variable
/// vault before evaluation begins and handed to the executor façade, which binds it onto the root
/// `Context` (spec.md §4.8, `builtins::var`). Keyed by name rather than by `Value::Placeholder`
/// index, since `@var.<name>` addresses variables by name, not by plan-local index.
#[derive(Debug, Clone, Default)]
pub struct VariableVault {
    values: HashMap<String, Value>,
}

impl VariableVault {
    /// Builds a vault from a name-to-value map.
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self { values }
    }

    /// Looks up `name`, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }
}
