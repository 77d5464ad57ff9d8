//! Tree evaluator (C7): walks one [`ExecNode`] at a time and returns its exit code, generalizing
//! the teacher's `interp.rs` pipeline/sequence/conditional handling from a fixed shell grammar to
//! the decorator-resolved execution tree described in SPEC_FULL.md §4.7.

use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::context::Context;
use crate::descriptor::{
    Descriptor, EndpointMode, ExecNodeImpl, ParamKind, ParamSchema, Params, ResolveCall,
    TransportScope,
};
use crate::error::{Error, ErrorKind};
use crate::openfiles::{pipe, OpenFile, OpenFiles};
use crate::plan::{Arg, ExecNode, RedirectMode, RedirectTarget, Sink, Step, Value};
use crate::registry::Registry;

/// Runs one top-level step, returning its exit code.
#[tracing::instrument(skip(ctx, registry), fields(step_id = step.id))]
pub async fn execute_step(ctx: &Context, step: &Step, registry: &Registry) -> Result<i32, Error> {
    execute_node(ctx, &step.tree, registry).await
}

/// Runs one execution node (SPEC_FULL.md §4.7.1), returning its exit code. Boxed because the
/// variants recurse into each other and a plain `async fn` calling itself has no finite size.
pub fn execute_node<'a>(
    ctx: &'a Context,
    node: &'a ExecNode,
    registry: &'a Registry,
) -> BoxFuture<'a, Result<i32, Error>> {
    Box::pin(async move {
        match node {
            ExecNode::Command { decorator, args, block } => {
                execute_command(ctx, decorator, args, block, registry).await
            }
            ExecNode::Pipeline(nodes) => execute_pipeline(ctx, nodes, registry).await,
            ExecNode::And(left, right) => {
                let code = execute_node(ctx, left, registry).await?;
                if code != 0 {
                    return Ok(code);
                }
                execute_node(ctx, right, registry).await
            }
            ExecNode::Or(left, right) => {
                let code = execute_node(ctx, left, registry).await?;
                if code == 0 {
                    return Ok(code);
                }
                execute_node(ctx, right, registry).await
            }
            ExecNode::Sequence(nodes) => {
                crate::invariant!(!nodes.is_empty(), "Sequence must have at least one child");
                let mut last = 0;
                for child in nodes {
                    // Unlike every other composition operator, a non-zero child does not stop the
                    // sequence (SPEC_FULL.md §4.7.1) — every child always runs.
                    last = execute_node(ctx, child, registry).await?;
                }
                Ok(last)
            }
            ExecNode::Redirect { source, sink, mode } => {
                execute_redirect(ctx, source, sink, *mode, registry).await
            }
        }
    })
}

async fn execute_command(
    ctx: &Context,
    decorator: &str,
    args: &[Arg],
    block: &[Step],
    registry: &Registry,
) -> Result<i32, Error> {
    let (path, args) = resolve_decorator_path(decorator, args, registry);
    let args = args.as_ref();
    let Some(entry) = registry.lookup(path) else {
        crate::invariant!(false, "command node named unregistered decorator {decorator}");
        unreachable!()
    };

    let required_scope = entry.descriptor.capabilities.transport_scope;
    let actual_scope = transport_scope_of(ctx.session().as_ref());
    if !required_scope.allows(actual_scope) {
        return Err(ErrorKind::TransportScopeMismatch {
            decorator: decorator.to_string(),
            required: required_scope,
            actual: actual_scope,
        }
        .into());
    }

    let params = match build_params(&entry.descriptor, args) {
        Ok(params) => params,
        Err(e) => {
            tracing::error!(decorator, error = %e, "argument validation failed");
            if entry.descriptor.path == "shell" && missing_primary(&entry.descriptor, args) {
                return Ok(127);
            }
            return Ok(1);
        }
    };

    if let Some(wrapper) = entry.roles.wrapper.clone() {
        let next: Option<Arc<dyn ExecNodeImpl>> = if block.is_empty() {
            None
        } else {
            Some(Arc::new(BlockNode { steps: block.to_vec() }))
        };

        let node = wrapper.wrap(next, &params);
        return match node.execute(ctx).await {
            Ok(code) => Ok(code),
            Err(e) if e.is_cancellation() => Ok(-1),
            Err(e) => {
                tracing::error!(decorator, error = %e, "decorator execution failed");
                Ok(1)
            }
        };
    }

    if let Some(provider) = entry.roles.provider.clone() {
        crate::invariant!(
            block.is_empty(),
            "decorator {decorator} is a Provider, which takes no nested block"
        );
        let primary_name = entry.descriptor.schema.primary().map(|p| p.name.as_str());
        let primary = primary_name
            .and_then(|name| args.iter().find(|a| a.key == name))
            .map(|a| a.value.clone())
            .unwrap_or(Value::String(String::new()));
        let params = args
            .iter()
            .filter(|a| Some(a.key.as_str()) != primary_name)
            .cloned()
            .collect();
        let call = ResolveCall { primary, params };
        let mut results = provider.resolve(ctx, std::slice::from_ref(&call)).await;
        let result = results.pop().unwrap_or(crate::descriptor::ResolveResult {
            value: Err(ErrorKind::VariableNotFound(decorator.to_string()).into()),
            origin: decorator.to_string(),
        });
        return match result.value {
            Ok(_) => Ok(0),
            Err(e) if e.is_cancellation() => Ok(-1),
            Err(e) => {
                tracing::error!(decorator, error = %e, "provider resolution failed");
                Ok(1)
            }
        };
    }

    crate::invariant!(
        false,
        "decorator {decorator} has neither a Wrapper nor a Provider implementation but was invoked as a command"
    );
    unreachable!()
}

/// Resolves a dotted `decorator` string (e.g. `var.region`) to its registered path plus the
/// effective argument list. An exact registry match (e.g. plain `shell`) is tried first; only on a
/// miss is the string split on its last `.` and the suffix folded in as the primary parameter's
/// value, so `var.region` becomes a call to `var` with `name = "region"` (SPEC_FULL.md §4.8's
/// `@var.<name>`/`@env.<name>` dotted-path convention). Returns a borrowed copy of `args` when no
/// splitting is needed, to avoid an allocation on the common exact-match path.
fn resolve_decorator_path<'a>(
    decorator: &'a str,
    args: &'a [Arg],
    registry: &Registry,
) -> (&'a str, std::borrow::Cow<'a, [Arg]>) {
    if registry.lookup(decorator).is_some() {
        return (decorator, std::borrow::Cow::Borrowed(args));
    }
    match decorator.rsplit_once('.') {
        Some((base, suffix)) if registry.lookup(base).is_some() => {
            let mut with_suffix = args.to_vec();
            with_suffix.push(Arg {
                key: "name".to_string(),
                value: Value::String(suffix.to_string()),
            });
            (base, std::borrow::Cow::Owned(with_suffix))
        }
        _ => (decorator, std::borrow::Cow::Borrowed(args)),
    }
}

/// Whether `descriptor`'s primary parameter is absent from `args` — used to special-case
/// `@shell`'s missing `command` parameter to exit `127` (SPEC_FULL.md §4.8, §6.4) rather than the
/// generic argument-validation failure code.
fn missing_primary(descriptor: &Descriptor, args: &[Arg]) -> bool {
    match descriptor.schema.primary() {
        Some(primary) => !args.iter().any(|a| a.key == primary.name),
        None => false,
    }
}

/// Runs a Wrapper decorator's nested `block` as its own sequence of steps, stopping at the first
/// non-zero exit code. Resolves against the process-wide registry rather than threading an
/// arbitrary `&'a Registry` through a `'static` trait object — none of this crate's built-in
/// decorators take a block, so this only matters for a future block-taking decorator, which is
/// expected to register against the global registry in production (see DESIGN.md).
struct BlockNode {
    steps: Vec<Step>,
}

#[async_trait::async_trait]
impl ExecNodeImpl for BlockNode {
    async fn execute(&self, ctx: &Context) -> Result<i32, Error> {
        let registry = crate::registry::global();
        let mut last = 0;
        for step in &self.steps {
            last = execute_step(ctx, step, registry).await?;
            if last != 0 {
                break;
            }
        }
        Ok(last)
    }
}

fn transport_scope_of(session: &dyn crate::session::Session) -> TransportScope {
    if session.transport_path().starts_with("ssh://") {
        TransportScope::Ssh
    } else {
        TransportScope::Local
    }
}

fn build_params(descriptor: &Descriptor, args: &[Arg]) -> Result<Params, Error> {
    for schema_param in descriptor.schema.params() {
        match args.iter().find(|a| a.key == schema_param.name) {
            None => {
                if schema_param.required && schema_param.default.is_none() {
                    return Err(ErrorKind::InvalidArgument {
                        decorator: descriptor.path.clone(),
                        message: format!("missing required parameter \"{}\"", schema_param.name),
                    }
                    .into());
                }
            }
            Some(arg) => validate_value(descriptor, schema_param, &arg.value)?,
        }
    }
    Ok(Params::from_args(args))
}

fn validate_value(descriptor: &Descriptor, schema: &ParamSchema, value: &Value) -> Result<(), Error> {
    // A placeholder is a reference to a value this evaluator does not materialize itself (the
    // plan's producer is expected to have already resolved it); skip static type-checking rather
    // than rejecting a value we cannot inspect.
    if matches!(value, Value::Placeholder(_)) {
        return Ok(());
    }

    let kind_matches = matches!(
        (schema.kind, value),
        (ParamKind::String | ParamKind::Duration, Value::String(_))
            | (ParamKind::Int | ParamKind::Float, Value::Int(_))
            | (ParamKind::Bool, Value::Bool(_))
    );
    if !kind_matches {
        return Err(invalid_argument(
            descriptor,
            schema,
            format!("expected a {:?} value", schema.kind),
        ));
    }

    if let Value::String(s) = value {
        let len = s.chars().count();
        if schema.constraints.min_length.is_some_and(|min| len < min) {
            return Err(invalid_argument(descriptor, schema, "value is too short".to_string()));
        }
        if schema.constraints.max_length.is_some_and(|max| len > max) {
            return Err(invalid_argument(descriptor, schema, "value is too long".to_string()));
        }
        if let Some(pattern) = &schema.constraints.pattern {
            if !pattern.is_match(s).unwrap_or(false) {
                return Err(invalid_argument(
                    descriptor,
                    schema,
                    "value does not match the required pattern".to_string(),
                ));
            }
        }
    }

    if let Value::Int(i) = value {
        let f = *i as f64;
        if schema.constraints.minimum.is_some_and(|min| f < min) {
            return Err(invalid_argument(descriptor, schema, "value is below the minimum".to_string()));
        }
        if schema.constraints.maximum.is_some_and(|max| f > max) {
            return Err(invalid_argument(descriptor, schema, "value is above the maximum".to_string()));
        }
    }

    Ok(())
}

fn invalid_argument(descriptor: &Descriptor, schema: &ParamSchema, message: String) -> Error {
    ErrorKind::InvalidArgument {
        decorator: descriptor.path.clone(),
        message: format!("parameter \"{}\": {message}", schema.name),
    }
    .into()
}

async fn execute_pipeline(ctx: &Context, nodes: &[ExecNode], registry: &Registry) -> Result<i32, Error> {
    crate::invariant!(nodes.len() >= 2, "Pipeline must have at least 2 elements");
    for node in nodes {
        crate::invariant!(
            matches!(
                node,
                ExecNode::Command { .. } | ExecNode::Pipeline(_) | ExecNode::Redirect { .. }
            ),
            "invalid pipeline element"
        );
    }

    let n = nodes.len();
    let mut pipe_ends: Vec<(Option<OpenFile>, Option<OpenFile>)> = Vec::with_capacity(n - 1);
    for _ in 0..n - 1 {
        let (reader, writer) = pipe()?;
        pipe_ends.push((Some(OpenFile::from(reader)), Some(OpenFile::from(writer))));
    }

    // Each pipe end is moved (not cloned) into exactly one stage's `OpenFiles`, so the write end
    // closes the instant that stage's context is dropped, giving downstream readers a true EOF
    // without a manual once-guarded closer (the kernel pipe plus Rust ownership already make a
    // double-close impossible). A stage blocked on I/O past cancellation is unblocked because
    // `Session::run`'s own cancellation handling kills the child, which closes its fds the same
    // way normal completion would.
    let mut stage_contexts = Vec::with_capacity(n);
    for (i, _) in nodes.iter().enumerate() {
        let mut open_files = ctx.open_files().try_clone()?;
        if i > 0 {
            if let Some(reader) = pipe_ends[i - 1].0.take() {
                open_files.set(OpenFiles::STDIN_FD, reader);
            }
        }
        if i < n - 1 {
            if let Some(writer) = pipe_ends[i].1.take() {
                open_files.set(OpenFiles::STDOUT_FD, writer);
            }
        }
        stage_contexts.push(ctx.clone_for_child(ctx.args().clone(), open_files));
    }

    // Each stage runs as its own `tokio::spawn`ed task (rather than in-process futures joined
    // together) so a panic inside one stage — an unregistered decorator, a planner invariant
    // violation reached only at evaluation time — unwinds just that task. `JoinHandle::await`
    // turns the panic into a `JoinError`, surfaced below as `ErrorKind::Join` instead of taking
    // down the whole pipeline (SPEC_FULL.md §7).
    let mut handles = Vec::with_capacity(n);
    for (stage_ctx, node) in stage_contexts.into_iter().zip(nodes.iter().cloned()) {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            execute_node(&stage_ctx, &node, &registry).await
        }));
    }

    let mut results = Vec::with_capacity(n);
    for handle in handles {
        results.push(match handle.await {
            Ok(result) => result,
            Err(join_err) => Err(ErrorKind::Join(join_err).into()),
        });
    }

    for (i, result) in results.iter().enumerate() {
        if let Err(e) = result {
            tracing::warn!(stage = i, error = %e, "pipeline stage failed");
        }
    }

    match results.into_iter().next_back() {
        Some(Ok(code)) => Ok(code),
        Some(Err(e)) if e.is_cancellation() => Ok(-1),
        Some(Err(e)) => Err(e),
        None => unreachable!("pipeline invariant guarantees at least 2 stages"),
    }
}

async fn execute_redirect(
    ctx: &Context,
    source: &ExecNode,
    target: &RedirectTarget,
    mode: RedirectMode,
    registry: &Registry,
) -> Result<i32, Error> {
    crate::invariant!(
        !matches!(source, ExecNode::Redirect { .. }),
        "nested Redirect is not permitted"
    );

    match target {
        RedirectTarget::Fs(sink) => execute_redirect_to_fs(ctx, source, sink, mode, registry).await,
        RedirectTarget::Endpoint { decorator, args } => {
            execute_redirect_to_endpoint(ctx, source, decorator, args, mode, registry).await
        }
    }
}

/// Redirects `source`'s stdout into a core-understood [`Sink`]. `Session::put`/`get` only take
/// whole buffers (no streaming write handle), so this buffers the source's stdout in memory via a
/// pipe and one `spawn_blocking` reader rather than writing incrementally — the same constraint
/// that keeps this crate's plan model from offering a streaming alternative (see `Sink`'s own doc
/// comment). `Append` mode reads the sink's current contents back first and concatenates, since
/// that is the only append primitive a transport-agnostic `Session` can offer.
async fn execute_redirect_to_fs(
    ctx: &Context,
    source: &ExecNode,
    sink: &Sink,
    mode: RedirectMode,
    registry: &Registry,
) -> Result<i32, Error> {
    let Sink::FsPath { path, mode: file_mode } = sink;
    let caps = sink.capabilities();
    let mode_supported = match mode {
        RedirectMode::Overwrite => caps.overwrite,
        RedirectMode::Append => caps.append,
    };
    if !mode_supported {
        return Err(ErrorKind::UnsupportedSinkMode {
            sink: path.display().to_string(),
            mode: redirect_mode_name(mode),
        }
        .into());
    }

    let (reader, writer) = pipe()?;
    let reader_task = tokio::task::spawn_blocking(move || {
        let mut reader = reader;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).map(|()| buf)
    });

    let mut open_files = ctx.open_files().try_clone()?;
    open_files.set(OpenFiles::STDOUT_FD, OpenFile::from(writer));
    let child_ctx = ctx.clone_for_child(ctx.args().clone(), open_files);

    let source_result = execute_node(&child_ctx, source, registry).await;
    drop(child_ctx);

    let exit_code = match source_result {
        Ok(code) => code,
        Err(e) if e.is_cancellation() => return Ok(-1),
        Err(e) => return Err(e),
    };

    let new_data = reader_task.await??;
    let existing = if mode == RedirectMode::Append {
        match ctx.session().get(ctx, path).await {
            Ok(data) => data,
            Err(e) if is_not_found(&e) => Vec::new(),
            Err(e) if e.is_cancellation() => return Ok(-1),
            Err(e) => return Err(e),
        }
    } else {
        Vec::new()
    };
    let mut final_data = existing;
    final_data.extend(new_data);

    match ctx.session().put(ctx, &final_data, path, *file_mode).await {
        Ok(()) => Ok(exit_code),
        Err(e) if e.is_cancellation() => Ok(-1),
        Err(e) => Err(e),
    }
}

/// `true` only for a genuine "the file does not exist yet" read failure, so `Append` mode treats
/// that specific case as an empty prior file without masking any other I/O error (a permission
/// failure, a disconnected SSH session) as if the sink were merely absent.
fn is_not_found(e: &Error) -> bool {
    matches!(e.kind(), ErrorKind::Io(io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
}

/// Redirects `source`'s stdout into a decorator-backed [`crate::descriptor::Endpoint`]. Unlike the
/// `Fs` path, this plugs the endpoint's own writer directly into the child's stdout slot —
/// the same direct pipe-fd-wiring idiom `execute_pipeline` uses between stages — so bytes stream
/// through without an intermediate buffer; whatever the endpoint implementation does on EOF (e.g.
/// `builtins::shell::ShellEndpoint`'s own eventual `Session::put`) happens on its own time once the
/// write end closes.
async fn execute_redirect_to_endpoint(
    ctx: &Context,
    source: &ExecNode,
    decorator: &str,
    args: &[Arg],
    mode: RedirectMode,
    registry: &Registry,
) -> Result<i32, Error> {
    let Some(entry) = registry.lookup(decorator) else {
        crate::invariant!(false, "redirect node named unregistered decorator {decorator}");
        unreachable!()
    };
    let Some(endpoint) = entry.roles.endpoint.clone() else {
        crate::invariant!(
            false,
            "decorator {decorator} has no Endpoint implementation but was used as a redirect sink"
        );
        unreachable!()
    };

    if mode == RedirectMode::Append {
        return Err(ErrorKind::UnsupportedSinkMode {
            sink: decorator.to_string(),
            mode: redirect_mode_name(mode),
        }
        .into());
    }

    let args_map: HashMap<String, Value> = args.iter().map(|a| (a.key.clone(), a.value.clone())).collect();
    let endpoint_ctx = ctx.with_args(args_map);
    let sink_file = endpoint.open(&endpoint_ctx, EndpointMode::Write).await?;

    let mut open_files = ctx.open_files().try_clone()?;
    open_files.set(OpenFiles::STDOUT_FD, sink_file);
    let child_ctx = ctx.clone_for_child(ctx.args().clone(), open_files);

    let source_result = execute_node(&child_ctx, source, registry).await;
    drop(child_ctx);

    match source_result {
        Ok(code) => Ok(code),
        Err(e) if e.is_cancellation() => Ok(-1),
        Err(e) => Err(e),
    }
}

fn redirect_mode_name(mode: RedirectMode) -> &'static str {
    match mode {
        RedirectMode::Overwrite => "overwrite",
        RedirectMode::Append => "append",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::session::local::LocalSession;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn test_registry() -> Registry {
        let registry = Registry::new();
        builtins::register_all(&registry);
        registry
    }

    fn test_context(tmp: &std::path::Path) -> Context {
        let session = Arc::new(LocalSession::new(HashMap::new(), tmp.to_path_buf()));
        Context::new(session)
    }

    fn shell_step(id: u64, command: &str) -> Step {
        Step {
            id,
            tree: ExecNode::Command {
                decorator: "shell".to_string(),
                args: vec![Arg {
                    key: "command".to_string(),
                    value: Value::String(command.to_string()),
                }],
                block: vec![],
            },
        }
    }

    #[tokio::test]
    async fn command_returns_exit_code() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path());

        let step = shell_step(1, "exit 3");
        let code = execute_step(&ctx, &step, &registry).await.expect("runs");
        assert_eq!(code, 3);
    }

    #[tokio::test]
    async fn and_short_circuits_on_failure() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path());

        let node = ExecNode::And(
            Box::new(shell_step(1, "exit 1").tree),
            Box::new(shell_step(2, "touch should-not-run").tree),
        );
        let code = execute_node(&ctx, &node, &registry).await.expect("runs");
        assert_eq!(code, 1);
        assert!(!tmp.path().join("should-not-run").exists());
    }

    #[tokio::test]
    async fn or_runs_right_only_on_failure() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path());

        let node = ExecNode::Or(
            Box::new(shell_step(1, "exit 0").tree),
            Box::new(shell_step(2, "touch should-not-run").tree),
        );
        execute_node(&ctx, &node, &registry).await.expect("runs");
        assert!(!tmp.path().join("should-not-run").exists());
    }

    #[tokio::test]
    async fn sequence_runs_every_child_despite_failure() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path());

        let marker = tmp.path().join("ran-second");
        let node = ExecNode::Sequence(vec![
            shell_step(1, "exit 1").tree,
            shell_step(2, &format!("touch {}", marker.display())).tree,
        ]);
        let code = execute_node(&ctx, &node, &registry).await.expect("runs");
        assert_eq!(code, 0);
        assert!(marker.exists());
    }

    #[tokio::test]
    async fn pipeline_returns_last_stage_exit_code() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path());

        let node = ExecNode::Pipeline(vec![
            shell_step(1, "echo hello").tree,
            shell_step(2, "cat").tree,
        ]);
        let code = execute_node(&ctx, &node, &registry).await.expect("runs");
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn redirect_overwrites_then_append_reads_back() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path());
        let out_path = tmp.path().join("out.txt");

        let overwrite = ExecNode::Redirect {
            source: Box::new(shell_step(1, "echo one").tree),
            sink: RedirectTarget::Fs(Sink::FsPath { path: out_path.clone(), mode: 0o644 }),
            mode: RedirectMode::Overwrite,
        };
        execute_node(&ctx, &overwrite, &registry).await.expect("runs");

        let append = ExecNode::Redirect {
            source: Box::new(shell_step(2, "echo two").tree),
            sink: RedirectTarget::Fs(Sink::FsPath { path: out_path.clone(), mode: 0o644 }),
            mode: RedirectMode::Append,
        };
        execute_node(&ctx, &append, &registry).await.expect("runs");

        let contents = std::fs::read_to_string(&out_path).expect("read back");
        assert_eq!(contents, "one\ntwo\n");
    }

    #[tokio::test]
    async fn redirect_append_to_a_not_yet_existing_file_does_not_error() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path());
        let out_path = tmp.path().join("fresh.txt");

        let append = ExecNode::Redirect {
            source: Box::new(shell_step(1, "echo first").tree),
            sink: RedirectTarget::Fs(Sink::FsPath { path: out_path.clone(), mode: 0o644 }),
            mode: RedirectMode::Append,
        };
        let code = execute_node(&ctx, &append, &registry).await.expect("runs");
        assert_eq!(code, 0);
        assert_eq!(std::fs::read_to_string(&out_path).expect("read back"), "first\n");
    }

    #[tokio::test]
    async fn redirect_rejects_nesting() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path());
        let out_path = tmp.path().join("out.txt");

        let inner = ExecNode::Redirect {
            source: Box::new(shell_step(1, "echo one").tree),
            sink: RedirectTarget::Fs(Sink::FsPath { path: out_path.clone(), mode: 0o644 }),
            mode: RedirectMode::Overwrite,
        };
        let outer = ExecNode::Redirect {
            source: Box::new(inner),
            sink: RedirectTarget::Fs(Sink::FsPath { path: out_path, mode: 0o644 }),
            mode: RedirectMode::Overwrite,
        };

        let result = std::panic::AssertUnwindSafe(execute_node(&ctx, &outer, &registry));
        let outcome = std::panic::catch_unwind(|| {
            tokio::runtime::Handle::current().block_on(result.0)
        });
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn redirect_to_a_decorator_endpoint_streams_through_shell() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path());
        let out_path = tmp.path().join("via-shell.txt");

        let redirect = ExecNode::Redirect {
            source: Box::new(shell_step(1, "echo through-endpoint").tree),
            sink: RedirectTarget::Endpoint {
                decorator: "shell".to_string(),
                args: vec![Arg {
                    key: "command".to_string(),
                    value: Value::String(out_path.display().to_string()),
                }],
            },
            mode: RedirectMode::Overwrite,
        };
        let code = execute_node(&ctx, &redirect, &registry).await.expect("runs");
        assert_eq!(code, 0);

        // `ShellEndpoint`'s write path commits via a background `Session::put` once the pipe
        // closes; give it a moment to land before asserting on the file.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(
            std::fs::read_to_string(&out_path).expect("read back"),
            "through-endpoint\n"
        );
    }

    #[tokio::test]
    async fn redirect_to_a_decorator_endpoint_rejects_append() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path());

        let redirect = ExecNode::Redirect {
            source: Box::new(shell_step(1, "echo x").tree),
            sink: RedirectTarget::Endpoint {
                decorator: "shell".to_string(),
                args: vec![Arg {
                    key: "command".to_string(),
                    value: Value::String(tmp.path().join("out").display().to_string()),
                }],
            },
            mode: RedirectMode::Append,
        };
        let result = execute_node(&ctx, &redirect, &registry).await;
        assert!(matches!(result.unwrap_err().kind(), ErrorKind::UnsupportedSinkMode { .. }));
    }

    #[tokio::test]
    async fn pipeline_stage_panic_surfaces_as_join_error_instead_of_unwinding() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path());

        let node = ExecNode::Pipeline(vec![
            shell_step(1, "echo hello").tree,
            ExecNode::Command {
                decorator: "does.not.exist".to_string(),
                args: vec![],
                block: vec![],
            },
        ]);
        let result = execute_node(&ctx, &node, &registry).await;
        assert!(matches!(result.unwrap_err().kind(), ErrorKind::Join(_)));
    }

    #[tokio::test]
    async fn dotted_decorator_path_resolves_against_the_named_provider() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path()).with_vault(Arc::new(crate::plan::VariableVault::new(
            HashMap::from([("region".to_string(), Value::String("us-east-1".to_string()))]),
        )));

        let node = ExecNode::Command {
            decorator: "var.region".to_string(),
            args: vec![],
            block: vec![],
        };
        let code = execute_node(&ctx, &node, &registry).await.expect("resolves");
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn dotted_decorator_path_reports_missing_variable_as_a_user_error() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path());

        let node = ExecNode::Command {
            decorator: "var.missing".to_string(),
            args: vec![],
            block: vec![],
        };
        let code = execute_node(&ctx, &node, &registry).await.expect("reports failure, not an error");
        assert_eq!(code, 1);
    }

    #[tokio::test]
    async fn shell_missing_command_exits_127() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path());

        let node = ExecNode::Command {
            decorator: "shell".to_string(),
            args: vec![],
            block: vec![],
        };
        let code = execute_node(&ctx, &node, &registry).await.expect("runs");
        assert_eq!(code, 127);
    }

    #[tokio::test]
    async fn unknown_decorator_is_an_invariant_violation() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let ctx = test_context(tmp.path());

        let node = ExecNode::Command {
            decorator: "does.not.exist".to_string(),
            args: vec![],
            block: vec![],
        };
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            tokio::runtime::Handle::current().block_on(execute_node(&ctx, &node, &registry))
        }));
        assert!(outcome.is_err());
    }
}
