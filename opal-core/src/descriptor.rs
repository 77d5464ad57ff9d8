//! Decorator descriptors (C4): role-tagged metadata, schema validation, and the builder that
//! assembles both. See `registry.rs` for where descriptors end up once built.

use std::collections::HashSet;
use std::sync::Arc;

use fancy_regex::Regex;

use crate::context::Context;
use crate::error::{Error, ErrorKind};
use crate::plan::Value;

/// The transport kinds a decorator may require of the active session (spec.md §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportScope {
    /// Any session satisfies this decorator.
    Any,
    /// Only a local-process session satisfies this decorator.
    Local,
    /// Only an SSH session satisfies this decorator.
    Ssh,
    /// Any non-local (remote) session satisfies this decorator — SSH today, container/remote
    /// transports in the future.
    Remote,
}

impl TransportScope {
    /// Returns true if a session whose own scope is `actual` may run a decorator that requires
    /// `self`.
    pub fn allows(self, actual: Self) -> bool {
        match (self, actual) {
            (Self::Any, _) => true,
            (Self::Remote, Self::Ssh | Self::Remote) => true,
            (required, actual) => required == actual,
        }
    }
}

/// A decorator's declared capabilities (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// The transport(s) the active session must provide.
    pub transport_scope: TransportScope,
    /// Whether the decorator has side effects beyond its return value.
    pub purity: Purity,
    /// Whether repeated invocations with the same arguments are safe.
    pub idempotent: bool,
    /// Whether the decorator accepts/requires a nested `block`.
    pub block: BlockPolicy,
    /// Pipe/redirect participation.
    pub io: IoCapabilities,
}

/// Whether a decorator is free of externally observable side effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Purity {
    /// No side effects beyond the returned value (e.g. `@var`).
    Pure,
    /// Reads or writes external state (e.g. `@env`, `@shell`).
    Impure,
}

/// Whether a Wrapper decorator accepts a nested `block` of steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPolicy {
    /// The decorator never takes a block.
    Forbidden,
    /// The decorator may optionally take a block.
    Optional,
    /// The decorator always requires a block.
    Required,
}

/// Pipe/redirect participation a decorator supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IoCapabilities {
    /// Can receive piped stdin.
    pub pipe_in: bool,
    /// Can produce piped stdout.
    pub pipe_out: bool,
    /// Can be the source of a `Redirect` reading from a sink.
    pub redirect_in: bool,
    /// Can be the source of a `Redirect` writing to a sink.
    pub redirect_out: bool,
}

/// A decorator's declared roles (spec.md §4.4). A decorator may implement any non-empty subset;
/// implementing none is rejected at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Resolves values at plan/runtime (`@var`, `@env`).
    Provider,
    /// Wraps an execution node to compose behavior around it (`@shell`, `@retry`).
    Wrapper,
    /// Opens a scoped session (`@ssh.connect`).
    Boundary,
    /// Opens a file-like handle for a redirect (`@shell` as a sink).
    Endpoint,
    /// Decorates plan metadata only; no runtime effect.
    Annotate,
}

/// The parameter type a [`ParamSchema`] entry declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// A UTF-8 string parameter.
    String,
    /// A signed integer parameter.
    Int,
    /// A floating point parameter.
    Float,
    /// A boolean parameter.
    Bool,
    /// A duration parameter (transits as a string on the wire — see SPEC_FULL.md §3.1).
    Duration,
}

/// Extra validation applied to a parameter's value beyond its [`ParamKind`].
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    /// Minimum string length (`ParamKind::String` only).
    pub min_length: Option<usize>,
    /// Maximum string length (`ParamKind::String` only).
    pub max_length: Option<usize>,
    /// A regex the value must fully match.
    pub pattern: Option<Regex>,
    /// A named format the value must conform to (`uri`, `hostname`, `ipv4`, `cidr`, `semver`,
    /// `duration`, ...). Validated structurally, not against the `pattern` regex.
    pub format: Option<String>,
    /// Minimum numeric value (`Int`/`Float` only).
    pub minimum: Option<f64>,
    /// Maximum numeric value (`Int`/`Float` only).
    pub maximum: Option<f64>,
}

/// One parameter's full schema entry (spec.md §3).
#[derive(Debug, Clone)]
pub struct ParamSchema {
    /// The parameter's name.
    pub name: String,
    /// The parameter's declared type.
    pub kind: ParamKind,
    /// Whether the parameter must be present.
    pub required: bool,
    /// The default value used when absent and not required.
    pub default: Option<Value>,
    /// Example values, for documentation/tooling only.
    pub examples: Vec<Value>,
    /// Additional constraints on the value.
    pub constraints: Constraints,
}

/// A decorator's full parameter table: an ordered list of [`ParamSchema`] entries, at most one of
/// them primary.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    params: Vec<ParamSchema>,
    primary: Option<usize>,
}

impl Schema {
    /// The parameters in canonical order (primary first, if any, then declaration order).
    pub fn params(&self) -> &[ParamSchema] {
        &self.params
    }

    /// The primary parameter, if one was declared.
    pub fn primary(&self) -> Option<&ParamSchema> {
        self.primary.map(|i| &self.params[i])
    }

    /// Looks up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&ParamSchema> {
        self.params.iter().find(|p| p.name == name)
    }
}

/// Fluent assembly of a [`Descriptor`] (spec.md §4.4). `build()` validates the schema and fails
/// with a programmer error — surfaced as `Err`, not a panic, since a malformed descriptor is
/// caught at decorator *registration* time, before any user-facing evaluation has happened; it is
/// the registry's job to treat a failed build as an `invariant!` (a decorator author shipped a
/// broken descriptor), not this builder's.
pub struct DescriptorBuilder {
    path: String,
    version: String,
    summary: String,
    docs_url: Option<String>,
    params: Vec<ParamSchema>,
    primary: Option<usize>,
    capabilities: Capabilities,
}

impl DescriptorBuilder {
    /// Starts building a descriptor for `path` (e.g. `shell`, `aws.s3.object`).
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            version: "0.1.0".to_string(),
            summary: String::new(),
            docs_url: None,
            params: Vec::new(),
            primary: None,
            capabilities: Capabilities {
                transport_scope: TransportScope::Any,
                purity: Purity::Impure,
                idempotent: false,
                block: BlockPolicy::Forbidden,
                io: IoCapabilities::default(),
            },
        }
    }

    /// Sets the one-line summary shown in tooling.
    #[must_use]
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// Sets the documentation URL.
    #[must_use]
    pub fn docs_url(mut self, url: impl Into<String>) -> Self {
        self.docs_url = Some(url.into());
        self
    }

    /// Sets the declared capabilities.
    #[must_use]
    pub fn capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Adds a (non-primary) parameter.
    #[must_use]
    pub fn param(mut self, param: ParamSchema) -> Self {
        self.params.push(param);
        self
    }

    /// Adds the primary parameter. Only one primary parameter may be set; calling this twice is
    /// an `invariant!` failure (a decorator-authoring bug, not a user error).
    #[must_use]
    pub fn primary_param(mut self, mut param: ParamSchema) -> Self {
        crate::invariant!(
            self.primary.is_none(),
            "descriptor {} declared more than one primary parameter",
            self.path
        );
        param.required = true;
        self.params.push(param);
        self.primary = Some(self.params.len() - 1);
        self
    }

    /// Validates the schema and produces the final [`Descriptor`].
    ///
    /// Rejects: a required parameter with a non-`None` default; an uncompilable `pattern`
    /// regex (regexes are pre-compiled at `param()`/`primary_param()` time, so this mainly
    /// re-checks invariants that could only be violated by direct struct construction); `min >
    /// max` in a parameter's constraints.
    pub fn build(self) -> Result<Descriptor, Error> {
        for param in &self.params {
            if param.required && param.default.is_some() {
                return Err(ErrorKind::InvalidArgument {
                    decorator: self.path.clone(),
                    message: format!(
                        "parameter \"{}\" is required and also declares a default",
                        param.name
                    ),
                }
                .into());
            }

            if let (Some(min), Some(max)) = (param.constraints.minimum, param.constraints.maximum)
            {
                if min > max {
                    return Err(ErrorKind::InvalidArgument {
                        decorator: self.path.clone(),
                        message: format!(
                            "parameter \"{}\" has minimum {min} greater than maximum {max}"
                        ),
                    }
                    .into());
                }
            }
        }

        Ok(Descriptor {
            path: self.path,
            version: self.version,
            summary: self.summary,
            docs_url: self.docs_url,
            schema: Schema {
                params: self.params,
                primary: self.primary,
            },
            capabilities: self.capabilities,
        })
    }
}

/// Decorator metadata (spec.md §3), produced by [`DescriptorBuilder::build`].
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// Dotted decorator path.
    pub path: String,
    /// Semver-ish version string.
    pub version: String,
    /// One-line summary.
    pub summary: String,
    /// Documentation URL, if any.
    pub docs_url: Option<String>,
    /// The validated parameter schema.
    pub schema: Schema,
    /// The declared capabilities.
    pub capabilities: Capabilities,
}

/// Value-provider role (spec.md §4.4): `Resolve(ctx, calls) -> results`, batched so one registry
/// call may fetch many values from the same backend.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Resolves one or more calls against this provider's backend.
    async fn resolve(&self, ctx: &Context, calls: &[ResolveCall]) -> Vec<ResolveResult>;
}

/// One call into a [`Provider`]: the primary parameter value plus any secondary parameters.
#[derive(Debug, Clone)]
pub struct ResolveCall {
    /// The decorator's primary parameter, e.g. the variable or environment variable name.
    pub primary: Value,
    /// Any non-primary parameters supplied alongside it (e.g. `@env`'s `default`).
    pub params: Vec<crate::plan::Arg>,
}

/// The result of one [`ResolveCall`].
#[derive(Debug, Clone)]
pub struct ResolveResult {
    /// The resolved value, or `Err` if this particular call failed.
    pub value: Result<Value, Error>,
    /// A tag identifying where the value came from (for debug events / tooling).
    pub origin: String,
}

/// A resolved execution node, produced by a [`Wrapper`]; `execute` is what the evaluator actually
/// calls.
#[async_trait::async_trait]
pub trait ExecNodeImpl: Send + Sync {
    /// Runs this node, returning its exit code.
    async fn execute(&self, ctx: &Context) -> Result<i32, Error>;
}

/// Middleware role (spec.md §4.4): produces an execution node that composes behavior around
/// `next`.
pub trait Wrapper: Send + Sync {
    /// Wraps `next` (absent for a leaf `Command`) with this decorator's behavior.
    fn wrap(&self, next: Option<Arc<dyn ExecNodeImpl>>, params: &Params) -> Arc<dyn ExecNodeImpl>;
}

/// Boundary role (spec.md §4.4): opens a scoped session, in addition to the `Wrapper` contract
/// used to scope its nested block.
#[async_trait::async_trait]
pub trait Boundary: Wrapper {
    /// Opens a new session layered on `parent`.
    async fn open(
        &self,
        parent: &dyn crate::session::Session,
        params: &Params,
    ) -> Result<Arc<dyn crate::session::Session>, Error>;
}

/// Read/write mode for [`Endpoint::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointMode {
    /// Open for reading.
    Read,
    /// Open for writing.
    Write,
}

/// Endpoint role (spec.md §4.4): opens a file-like handle used as a redirect sink/source.
#[async_trait::async_trait]
pub trait Endpoint: Send + Sync {
    /// Opens this endpoint in `mode`.
    async fn open(
        &self,
        ctx: &Context,
        mode: EndpointMode,
    ) -> Result<crate::openfiles::OpenFile, Error>;
}

/// Annotate role (spec.md §4.4): decorates plan metadata only; no runtime effect, so no methods.
pub trait Annotate: Send + Sync {}

/// A validated, typed view over one command node's arguments, handed to decorator
/// implementations instead of the raw `Vec<Arg>` (spec.md's "Dynamic typing" design note: keep
/// `Value` tagged with explicit accessors that return `None`/default on mismatch rather than
/// panicking).
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: std::collections::HashMap<String, Value>,
}

impl Params {
    /// Builds a `Params` from a command's raw argument list.
    pub fn from_args(args: &[crate::plan::Arg]) -> Self {
        Self {
            values: args
                .iter()
                .map(|a| (a.key.clone(), a.value.clone()))
                .collect(),
        }
    }

    /// Returns the string value of `key`, if present and of that type.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    /// Returns the int value of `key`, if present and of that type.
    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_int)
    }

    /// Returns the bool value of `key`, if present and of that type.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    /// Returns the raw value of `key`, regardless of type.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// The set of roles a registered decorator implements, plus whichever trait objects it supplied
/// for them (spec.md §4.4's role inference, expressed as explicit dynamic-dispatch registration
/// per §9's "Polymorphism without inheritance" design note rather than runtime reflection).
#[derive(Clone, Default)]
pub struct RoleSet {
    pub(crate) roles: HashSet<Role>,
    pub(crate) provider: Option<Arc<dyn Provider>>,
    pub(crate) wrapper: Option<Arc<dyn Wrapper>>,
    pub(crate) boundary: Option<Arc<dyn Boundary>>,
    pub(crate) endpoint: Option<Arc<dyn Endpoint>>,
}

impl RoleSet {
    /// Starts an empty role set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers this decorator's `Provider` implementation.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.roles.insert(Role::Provider);
        self.provider = Some(provider);
        self
    }

    /// Registers this decorator's `Wrapper` implementation.
    #[must_use]
    pub fn with_wrapper(mut self, wrapper: Arc<dyn Wrapper>) -> Self {
        self.roles.insert(Role::Wrapper);
        self.wrapper = Some(wrapper);
        self
    }

    /// Registers this decorator's `Boundary` implementation (also satisfies `Wrapper`).
    #[must_use]
    pub fn with_boundary(mut self, boundary: Arc<dyn Boundary>) -> Self {
        self.roles.insert(Role::Boundary);
        self.roles.insert(Role::Wrapper);
        self.boundary = Some(boundary);
        self
    }

    /// Registers this decorator's `Endpoint` implementation.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Arc<dyn Endpoint>) -> Self {
        self.roles.insert(Role::Endpoint);
        self.endpoint = Some(endpoint);
        self
    }

    /// Marks this decorator as `Annotate`-only.
    #[must_use]
    pub fn with_annotate(mut self) -> Self {
        self.roles.insert(Role::Annotate);
        self
    }

    /// The roles this set declares.
    pub fn roles(&self) -> &HashSet<Role> {
        &self.roles
    }

    /// Whether this set is non-empty, as required at registration.
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
