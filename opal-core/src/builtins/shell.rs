//! `@shell` (spec.md §4.8): the one multi-role built-in, `Wrapper` + `Endpoint`. As a `Wrapper` it
//! is the leaf that actually runs a command through the active session; as an `Endpoint` it opens
//! a path on the active session's filesystem as a redirect target, generalizing beyond the core's
//! built-in `Sink::FsPath` (spec.md §3: "a decorator implementing the Endpoint role may contribute
//! additional sink-like targets").

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::descriptor::{
    BlockPolicy, Capabilities, Descriptor, DescriptorBuilder, Endpoint, EndpointMode,
    ExecNodeImpl, IoCapabilities, ParamKind, ParamSchema, Params, Purity, TransportScope, Wrapper,
};
use crate::error::{Error, ErrorKind};
use crate::openfiles::{pipe, OpenFile};
use crate::session::RunOptions;

/// Builds the `shell` decorator's descriptor.
pub fn descriptor() -> Descriptor {
    DescriptorBuilder::new("shell")
        .summary("runs a command through the active session")
        .primary_param(ParamSchema {
            name: "command".to_string(),
            kind: ParamKind::String,
            required: false,
            default: None,
            examples: vec![crate::plan::Value::String("echo hello".to_string())],
            constraints: crate::descriptor::Constraints::default(),
        })
        .capabilities(Capabilities {
            transport_scope: TransportScope::Any,
            purity: Purity::Impure,
            idempotent: false,
            block: BlockPolicy::Forbidden,
            io: IoCapabilities {
                pipe_in: true,
                pipe_out: true,
                redirect_in: true,
                redirect_out: true,
            },
        })
        .build()
        .unwrap_or_else(|e| {
            crate::invariant!(false, "shell descriptor failed to build: {e}");
            unreachable!()
        })
}

/// `Wrapper` implementation backing `@shell` as a command.
pub struct ShellWrapper;

impl Wrapper for ShellWrapper {
    fn wrap(&self, next: Option<Arc<dyn ExecNodeImpl>>, params: &Params) -> Arc<dyn ExecNodeImpl> {
        crate::invariant!(
            next.is_none(),
            "@shell forbids a nested block but was wrapped around one"
        );
        let command = params.get_str("command").unwrap_or_default().to_string();
        Arc::new(ShellExec { command })
    }
}

struct ShellExec {
    command: String,
}

#[async_trait]
impl ExecNodeImpl for ShellExec {
    async fn execute(&self, ctx: &Context) -> Result<i32, Error> {
        if ctx.check_cancelled().is_err() {
            return Ok(-1);
        }

        let argv = vec![
            "bash".to_string(),
            "-c".to_string(),
            self.command.clone(),
        ];
        let opts = RunOptions {
            stdin: ctx.open_files().stdin().map(Clone::clone),
            stdout: ctx.open_files().stdout().map(Clone::clone),
            stderr: ctx.open_files().stderr().map(Clone::clone),
            env_override: None,
            cwd_override: None,
        };

        match ctx.session().run(ctx, &argv, opts).await {
            Ok(result) => Ok(result.exit_code),
            Err(e) if e.is_cancellation() => Ok(-1),
            Err(e) => Err(e),
        }
    }
}

/// `Endpoint` implementation backing `@shell` as a redirect target. The redirect's `command`
/// argument is read as the target path from the evaluator-supplied `Context::args` (the same
/// ambient mechanism `@env`'s `Provider::resolve` uses for its `default` argument).
pub struct ShellEndpoint;

#[async_trait]
impl Endpoint for ShellEndpoint {
    async fn open(&self, ctx: &Context, mode: EndpointMode) -> Result<OpenFile, Error> {
        let path_str = ctx
            .args()
            .get("command")
            .and_then(crate::plan::Value::as_str)
            .ok_or_else(|| {
                Error::from(ErrorKind::InvalidArgument {
                    decorator: "shell".to_string(),
                    message: "endpoint requires a \"command\" argument naming the path".to_string(),
                })
            })?;
        let path = PathBuf::from(path_str);

        match mode {
            EndpointMode::Read => {
                let data = ctx.session().get(ctx, &path).await?;
                let (reader, mut writer) = pipe()?;
                tokio::task::spawn_blocking(move || {
                    let _ = writer.write_all(&data);
                });
                Ok(OpenFile::from(reader))
            }
            EndpointMode::Write => {
                let (reader, writer) = pipe()?;
                let session = Arc::clone(ctx.session());
                let ctx = ctx.clone();
                let path_for_task = path.clone();
                tokio::spawn(async move {
                    let bytes = tokio::task::spawn_blocking(move || {
                        let mut reader = reader;
                        let mut buf = Vec::new();
                        reader.read_to_end(&mut buf).map(|_| buf)
                    })
                    .await;
                    if let Ok(Ok(bytes)) = bytes {
                        let _ = session.put(&ctx, &bytes, &path_for_task, 0o644).await;
                    }
                });
                Ok(OpenFile::from(writer))
            }
        }
    }
}

/// Convenience: the shared `Wrapper`/`Endpoint` instances for registration.
pub fn wrapper() -> Arc<dyn Wrapper> {
    Arc::new(ShellWrapper)
}

/// Convenience: the shared `Endpoint` instance for registration.
pub fn endpoint() -> Arc<dyn Endpoint> {
    Arc::new(ShellEndpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Params;
    use crate::plan::Arg;
    use crate::session::local::LocalSession;
    use std::collections::HashMap;

    #[tokio::test]
    async fn wrap_runs_command_and_returns_exit_code() {
        let session = Arc::new(LocalSession::new(HashMap::new(), std::path::PathBuf::from("/tmp")));
        let ctx = Context::new(session);

        let params = Params::from_args(&[Arg {
            key: "command".to_string(),
            value: crate::plan::Value::String("exit 7".to_string()),
        }]);
        let node = ShellWrapper.wrap(None, &params);
        let code = node.execute(&ctx).await.expect("execute succeeds");
        assert_eq!(code, 7);
    }

    #[test]
    #[should_panic(expected = "forbids a nested block")]
    fn wrap_rejects_a_nested_block() {
        let params = Params::from_args(&[]);
        let dummy: Arc<dyn ExecNodeImpl> = Arc::new(NoopNode);
        let _ = ShellWrapper.wrap(Some(dummy), &params);
    }

    struct NoopNode;

    #[async_trait]
    impl ExecNodeImpl for NoopNode {
        async fn execute(&self, _ctx: &Context) -> Result<i32, Error> {
            Ok(0)
        }
    }
}
