//! Entry point for the `opal` binary: reads a compiled plan off disk and runs it to completion
//! (SPEC_FULL.md §10.1, §10.3, §11). Everything that decides WHAT a target does — parsing,
//! planning, decorator resolution — lives in `opal-core` or upstream of it; this binary only
//! wires a plan to a root session and reports the result.

#![deny(missing_docs)]

mod args;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use opal_core::session::local::LocalSession;
use opal_core::{Context, Executor, ExecutorConfig};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = args::Args::parse();

    match run(args) {
        Ok(code) => exit_code_from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: args::Args) -> anyhow::Result<i32> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    runtime.block_on(run_plan(args))
}

async fn run_plan(args: args::Args) -> anyhow::Result<i32> {
    if let Some(known_hosts) = &args.known_hosts {
        tracing::debug!(
            path = %known_hosts.display(),
            strict = args.strict_host_key,
            "known-hosts settings recorded for any @ssh.connect session the plan opens",
        );
    }

    let bytes = tokio::fs::read(&args.plan_path)
        .await
        .with_context(|| format!("failed to read plan file {}", args.plan_path.display()))?;

    let plan = opal_core::read_plan(&bytes, None)
        .with_context(|| format!("failed to parse plan file {}", args.plan_path.display()))?;

    tracing::info!(target = %plan.header.target, steps = plan.steps.len(), "running plan");

    let session = LocalSession::from_host_process().context("failed to seed the root session")?;
    let ctx = Context::new(Arc::new(session));

    let registry = opal_core::Registry::new();
    opal_core::builtins::register_all(&registry);

    let config = ExecutorConfig {
        debug_level: args.debug.into_level(),
        telemetry_level: args.telemetry.into_level(),
        ..ExecutorConfig::default()
    };

    let result = Executor::execute(&ctx, &plan.steps, &registry, config)
        .await
        .with_context(|| format!("failed to run plan for target {:?}", plan.header.target))?;

    if let Some(events) = &result.debug_events {
        for event in events {
            tracing::debug!(?event, "debug event");
        }
    }
    if let Some(report) = &result.telemetry {
        tracing::info!(?report, "telemetry report");
    }

    Ok(result.exit_code)
}

/// Maps an `ExecutionResult::exit_code` onto a process exit code. `-1` (cancellation) maps to
/// 130, the conventional shell exit code for a command killed by SIGINT.
fn exit_code_from(code: i32) -> ExitCode {
    ExitCode::from(clamp_to_u8(code))
}

/// The `u8`-valued half of [`exit_code_from`], split out because `ExitCode` itself isn't
/// comparable, so this is what the tests below actually exercise.
fn clamp_to_u8(code: i32) -> u8 {
    if code == -1 {
        return 130;
    }
    u8::try_from(code).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_cancellation_to_130() {
        assert_eq!(clamp_to_u8(-1), 130);
    }

    #[test]
    fn maps_in_range_codes_directly() {
        assert_eq!(clamp_to_u8(0), 0);
        assert_eq!(clamp_to_u8(5), 5);
    }

    #[test]
    fn maps_out_of_range_codes_to_failure() {
        assert_eq!(clamp_to_u8(999), 1);
    }
}
