//! Executor façade (C9): the one public entry point that runs a target's steps end to end,
//! installing the secret-unwrap capability for the run's duration and driving the telemetry
//! collector around the evaluator (SPEC_FULL.md §4.9).

use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;
use crate::eval;
use crate::plan::{Step, VariableVault};
use crate::registry::Registry;
use crate::telemetry::{Collector, DebugEvent, DebugLevel, TelemetryLevel, TelemetryReport, TraceHandle};

/// Runtime knobs for one [`Executor::execute`] call.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// How much debug-event detail to collect.
    pub debug_level: DebugLevel,
    /// How much telemetry to collect.
    pub telemetry_level: TelemetryLevel,
    /// The plan's resolved variable placeholder table, bound onto the root `Context` before the
    /// first step runs (SPEC_FULL.md §4.8, `builtins::var`). Empty by default, so a plan with no
    /// `@var.<name>` references needs no caller-supplied vault.
    pub vault: Arc<VariableVault>,
}

/// The outcome of running a target's steps.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// The last step's exit code (or the first non-zero one, since a failure stops the run).
    pub exit_code: i32,
    /// How many steps actually ran before the loop stopped.
    pub steps_run: usize,
    /// Collected debug events, present only when `debug_level != Off`.
    pub debug_events: Option<Vec<DebugEvent>>,
    /// Collected telemetry, present only when `telemetry_level != Off`.
    pub telemetry: Option<TelemetryReport>,
}

/// Stateless entry point; kept as a unit struct (rather than a bare free function) so the public
/// API reads as a named façade, matching the rest of this crate's `Noun::verb` call style.
pub struct Executor;

impl Executor {
    /// Runs every step in `steps` in order against `registry`, stopping at the first step that
    /// exits non-zero (spec.md §4.9's fail-fast semantics). Installs the secret-unwrap capability
    /// before the first step and clears it unconditionally on return, including on error.
    pub async fn execute(
        ctx: &Context,
        steps: &[Step],
        registry: &Registry,
        config: ExecutorConfig,
    ) -> Result<ExecutionResult, Error> {
        let capability = crate::secret::global_capability();
        capability.install();
        let result = Self::run_steps(ctx, steps, registry, config).await;
        capability.clear();
        result
    }

    async fn run_steps(
        ctx: &Context,
        steps: &[Step],
        registry: &Registry,
        config: ExecutorConfig,
    ) -> Result<ExecutionResult, Error> {
        let mut collector = Collector::new(config.debug_level, config.telemetry_level);
        collector.enter_execute(steps.len());

        let ctx = ctx.with_vault(Arc::clone(&config.vault));

        let mut steps_run = 0usize;
        let mut exit_code = 0i32;

        for step in steps {
            collector.step_start(step.id);
            let step_ctx = ctx.with_trace(TraceHandle::for_step(step.id));

            let started = std::time::Instant::now();
            let result = eval::execute_step(&step_ctx, step, registry).await;
            let duration = started.elapsed();

            let code = match result {
                Ok(code) => code,
                Err(e) => {
                    collector.exit_execute(steps_run);
                    return Err(e);
                }
            };

            collector.step_complete(step.id, code, duration);
            steps_run += 1;
            exit_code = code;

            if code != 0 {
                break;
            }
        }

        collector.exit_execute(steps_run);
        let (debug_events, telemetry) = collector.into_parts();

        crate::postcondition!(
            exit_code == -1 || (0..=255).contains(&exit_code),
            "exit code {exit_code} out of the documented range"
        );
        crate::postcondition!(
            steps_run <= steps.len(),
            "steps_run {steps_run} exceeds the {} steps handed to the executor",
            steps.len()
        );

        Ok(ExecutionResult {
            exit_code,
            steps_run,
            debug_events,
            telemetry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::plan::{Arg, ExecNode, Value};
    use crate::secret::global_capability;
    use crate::session::local::LocalSession;
    use std::collections::HashMap;
    use std::sync::Arc;

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

    fn test_registry() -> Registry {
        let registry = Registry::new();
        builtins::register_all(&registry);
        registry
    }

    #[tokio::test]
    async fn runs_every_step_on_success() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let session = Arc::new(LocalSession::new(HashMap::new(), tmp.path().to_path_buf()));
        let ctx = Context::new(session);

        let steps = vec![shell_step(1, "exit 0"), shell_step(2, "exit 0")];
        let result = Executor::execute(&ctx, &steps, &registry, ExecutorConfig::default())
            .await
            .expect("executes");

        assert_eq!(result.exit_code, 0);
        assert_eq!(result.steps_run, 2);
        assert!(result.debug_events.is_none());
        assert!(result.telemetry.is_none());
    }

    #[tokio::test]
    async fn stops_at_first_failure() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let session = Arc::new(LocalSession::new(HashMap::new(), tmp.path().to_path_buf()));
        let ctx = Context::new(session);

        let steps = vec![
            shell_step(1, "exit 5"),
            shell_step(2, "touch should-not-run"),
        ];
        let result = Executor::execute(&ctx, &steps, &registry, ExecutorConfig::default())
            .await
            .expect("executes");

        assert_eq!(result.exit_code, 5);
        assert_eq!(result.steps_run, 1);
        assert!(!tmp.path().join("should-not-run").exists());
    }

    #[tokio::test]
    async fn collects_telemetry_and_debug_events_when_enabled() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let session = Arc::new(LocalSession::new(HashMap::new(), tmp.path().to_path_buf()));
        let ctx = Context::new(session);

        let steps = vec![shell_step(1, "exit 2")];
        let config = ExecutorConfig {
            debug_level: DebugLevel::Detailed,
            telemetry_level: TelemetryLevel::Timing,
            ..Default::default()
        };
        let result = Executor::execute(&ctx, &steps, &registry, config)
            .await
            .expect("executes");

        assert_eq!(result.exit_code, 2);
        let telemetry = result.telemetry.expect("telemetry present");
        assert_eq!(telemetry.first_failing_step, Some(1));
        assert_eq!(telemetry.samples.len(), 1);
        assert!(result.debug_events.expect("debug events present").len() >= 2);
    }

    #[tokio::test]
    async fn binds_the_configured_vault_before_running_steps() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let session = Arc::new(LocalSession::new(HashMap::new(), tmp.path().to_path_buf()));
        let ctx = Context::new(session);

        let vault = VariableVault::new(HashMap::from([(
            "region".to_string(),
            crate::plan::Value::String("us-east-1".to_string()),
        )]));
        let config = ExecutorConfig {
            vault: Arc::new(vault),
            ..Default::default()
        };

        let steps = vec![Step {
            id: 1,
            tree: crate::plan::ExecNode::Command {
                decorator: "var.region".to_string(),
                args: vec![],
                block: vec![],
            },
        }];
        let result = Executor::execute(&ctx, &steps, &registry, config)
            .await
            .expect("executes");
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn capability_is_cleared_after_the_run() {
        let registry = test_registry();
        let tmp = tempfile::tempdir().expect("tmpdir");
        let session = Arc::new(LocalSession::new(HashMap::new(), tmp.path().to_path_buf()));
        let ctx = Context::new(session);

        let steps = vec![shell_step(1, "exit 0")];
        Executor::execute(&ctx, &steps, &registry, ExecutorConfig::default())
            .await
            .expect("executes");

        assert!(!global_capability().is_installed());
    }
}
