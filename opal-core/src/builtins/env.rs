//! `@env.<name>` (spec.md §4.8): `Provider` only, resolving against the active session's own
//! environment rather than the host process's, so the same invocation inside an SSH block reads
//! the remote env.

use std::sync::Arc;

use crate::context::Context;
use crate::descriptor::{
    Capabilities, BlockPolicy, Descriptor, DescriptorBuilder, IoCapabilities, ParamKind,
    ParamSchema, Provider, Purity, ResolveCall, ResolveResult, TransportScope,
};
use crate::error::ErrorKind;
use crate::plan::Value;

/// Builds the `env` decorator's descriptor.
pub fn descriptor() -> Descriptor {
    DescriptorBuilder::new("env")
        .summary("resolves a value from the active session's environment")
        .primary_param(ParamSchema {
            name: "name".to_string(),
            kind: ParamKind::String,
            required: false,
            default: None,
            examples: vec![Value::String("HOME".to_string())],
            constraints: crate::descriptor::Constraints::default(),
        })
        .param(ParamSchema {
            name: "default".to_string(),
            kind: ParamKind::String,
            required: false,
            default: None,
            examples: vec![],
            constraints: crate::descriptor::Constraints::default(),
        })
        .capabilities(Capabilities {
            transport_scope: TransportScope::Any,
            purity: Purity::Impure,
            idempotent: true,
            block: BlockPolicy::Forbidden,
            io: IoCapabilities::default(),
        })
        .build()
        .unwrap_or_else(|e| {
            crate::invariant!(false, "env descriptor failed to build: {e}");
            unreachable!()
        })
}

/// `Provider` implementation backing `@env.<name>`.
pub struct EnvProvider;

#[async_trait::async_trait]
impl Provider for EnvProvider {
    async fn resolve(&self, ctx: &Context, calls: &[ResolveCall]) -> Vec<ResolveResult> {
        // A defensive snapshot taken once per call, per spec.md §4.8's "repeated reads within the
        // same run see the same snapshot" note.
        let env = ctx.session().env();

        calls
            .iter()
            .map(|call| {
                let Some(name) = call.primary.as_str() else {
                    return ResolveResult {
                        value: Err(ErrorKind::InvalidArgument {
                            decorator: "env".to_string(),
                            message: "environment variable name must be a string".to_string(),
                        }
                        .into()),
                        origin: "env".to_string(),
                    };
                };

                let default = call
                    .params
                    .iter()
                    .find(|p| p.key == "default")
                    .map(|p| p.value.clone());

                let value = env.get(name).map(|v| Value::String(v.clone())).or(default).ok_or_else(|| {
                    ErrorKind::EnvVarNotFound(name.to_string()).into()
                });

                ResolveResult {
                    value,
                    origin: "env".to_string(),
                }
            })
            .collect()
    }
}

/// Convenience: the `Provider` for registration.
pub fn provider() -> Arc<dyn Provider> {
    Arc::new(EnvProvider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Arg;
    use crate::session::local::LocalSession;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[tokio::test]
    async fn resolves_present_variable() {
        let env = HashMap::from([("HOME".to_string(), "/home/opal".to_string())]);
        let session = Arc::new(LocalSession::new(env, PathBuf::from("/")));
        let ctx = Context::new(session);

        let results = EnvProvider
            .resolve(
                &ctx,
                &[ResolveCall {
                    primary: Value::String("HOME".to_string()),
                    params: vec![],
                }],
            )
            .await;

        assert_eq!(
            results[0].value.as_ref().expect("resolved").as_str(),
            Some("/home/opal")
        );
    }

    #[tokio::test]
    async fn falls_back_to_default() {
        let session = Arc::new(LocalSession::new(HashMap::new(), PathBuf::from("/")));
        let ctx = Context::new(session);

        let results = EnvProvider
            .resolve(
                &ctx,
                &[ResolveCall {
                    primary: Value::String("MISSING".to_string()),
                    params: vec![Arg {
                        key: "default".to_string(),
                        value: Value::String("fallback".to_string()),
                    }],
                }],
            )
            .await;

        assert_eq!(
            results[0].value.as_ref().expect("resolved").as_str(),
            Some("fallback")
        );
    }

    #[tokio::test]
    async fn missing_without_default_is_user_error() {
        let session = Arc::new(LocalSession::new(HashMap::new(), PathBuf::from("/")));
        let ctx = Context::new(session);

        let results = EnvProvider
            .resolve(
                &ctx,
                &[ResolveCall {
                    primary: Value::String("MISSING".to_string()),
                    params: vec![],
                }],
            )
            .await;

        assert!(results[0].value.is_err());
    }
}
