//! `@var.<name>` (spec.md §4.8): `Provider` only, resolving against the `Context`'s bound
//! `VariableVault`.

use std::sync::Arc;

use crate::context::Context;
use crate::descriptor::{
    Capabilities, BlockPolicy, Descriptor, DescriptorBuilder, IoCapabilities, ParamKind,
    ParamSchema, Provider, Purity, ResolveCall, ResolveResult, TransportScope,
};
use crate::error::ErrorKind;
use crate::plan::Value;

/// Builds the `var` decorator's descriptor.
pub fn descriptor() -> Descriptor {
    DescriptorBuilder::new("var")
        .summary("resolves a value from the plan's variable vault")
        .primary_param(ParamSchema {
            name: "name".to_string(),
            kind: ParamKind::String,
            required: false,
            default: None,
            examples: vec![Value::String("region".to_string())],
            constraints: crate::descriptor::Constraints::default(),
        })
        .capabilities(Capabilities {
            transport_scope: TransportScope::Any,
            purity: Purity::Pure,
            idempotent: true,
            block: BlockPolicy::Forbidden,
            io: IoCapabilities::default(),
        })
        .build()
        .unwrap_or_else(|e| {
            crate::invariant!(false, "var descriptor failed to build: {e}");
            unreachable!()
        })
}

/// `Provider` implementation backing `@var.<name>`.
pub struct VarProvider;

#[async_trait::async_trait]
impl Provider for VarProvider {
    async fn resolve(&self, ctx: &Context, calls: &[ResolveCall]) -> Vec<ResolveResult> {
        calls
            .iter()
            .map(|call| {
                let Some(name) = call.primary.as_str() else {
                    return ResolveResult {
                        value: Err(ErrorKind::InvalidArgument {
                            decorator: "var".to_string(),
                            message: "variable name must be a string".to_string(),
                        }
                        .into()),
                        origin: "var".to_string(),
                    };
                };

                let value = ctx
                    .vault()
                    .get(name)
                    .cloned()
                    .ok_or_else(|| ErrorKind::VariableNotFound(name.to_string()).into());

                ResolveResult {
                    value,
                    origin: "var".to_string(),
                }
            })
            .collect()
    }
}

/// Convenience: the descriptor and `Provider` for registration.
pub fn provider() -> Arc<dyn Provider> {
    Arc::new(VarProvider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::VariableVault;
    use crate::session::local::LocalSession;
    use std::collections::HashMap;

    fn test_context(vault: VariableVault) -> Context {
        let session = Arc::new(LocalSession::new(HashMap::new(), std::path::PathBuf::from("/")));
        Context::new(session).with_vault(Arc::new(vault))
    }

    #[tokio::test]
    async fn resolves_present_variable() {
        let vault = VariableVault::new(HashMap::from([(
            "region".to_string(),
            Value::String("us-east-1".to_string()),
        )]));
        let ctx = test_context(vault);

        let results = VarProvider
            .resolve(
                &ctx,
                &[ResolveCall {
                    primary: Value::String("region".to_string()),
                    params: vec![],
                }],
            )
            .await;

        assert_eq!(
            results[0].value.as_ref().expect("resolved").as_str(),
            Some("us-east-1")
        );
    }

    #[tokio::test]
    async fn missing_variable_is_user_error() {
        let ctx = test_context(VariableVault::default());

        let results = VarProvider
            .resolve(
                &ctx,
                &[ResolveCall {
                    primary: Value::String("missing".to_string()),
                    params: vec![],
                }],
            )
            .await;

        assert!(results[0].value.is_err());
    }
}
