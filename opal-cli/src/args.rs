//! Command-line surface for the `opal` binary (SPEC_FULL.md §10.3).
//!
//! Deliberately small: a plan file to run plus the handful of dials SPEC_FULL.md names. There is
//! no config file format, no environment-file loading, and no profile/rc files — everything the
//! run needs is either on this command line or already in the plan itself.

use std::fmt;
use std::path::PathBuf;

use clap::Parser;
use opal_core::telemetry::{DebugLevel, TelemetryLevel};

#[derive(Debug, Parser)]
#[command(name = "opal", about = "Runs a compiled opal plan", version)]
pub struct Args {
    /// Path to the binary plan file to execute.
    pub plan_path: PathBuf,

    /// How much in-memory debug-event detail to collect while running the plan.
    #[arg(long, value_enum, default_value_t = DebugArg::Off)]
    pub debug: DebugArg,

    /// How much telemetry to collect while running the plan.
    #[arg(long, value_enum, default_value_t = TelemetryArg::Off)]
    pub telemetry: TelemetryArg,

    /// Known-hosts file consulted by `@ssh.connect` sessions, if the plan opens any.
    #[arg(long = "known-hosts", value_name = "PATH")]
    pub known_hosts: Option<PathBuf>,

    /// Reject host keys that aren't already in the known-hosts file, instead of trusting them
    /// on first use.
    #[arg(long = "strict-host-key")]
    pub strict_host_key: bool,
}

/// Command-line mirror of [`DebugLevel`]; `clap::ValueEnum` needs its own type to render
/// `--help`, so this exists purely to translate into the core crate's enum at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DebugArg {
    /// No debug events are collected.
    #[default]
    Off,
    /// Collect `enter_execute`/`exit_execute` events with step counts.
    Paths,
    /// Collect per-step start/complete events with exit codes and durations.
    Detailed,
}

impl DebugArg {
    /// Translates this command-line value into the core crate's [`DebugLevel`].
    pub fn into_level(self) -> DebugLevel {
        match self {
            Self::Off => DebugLevel::Off,
            Self::Paths => DebugLevel::Paths,
            Self::Detailed => DebugLevel::Detailed,
        }
    }
}

impl fmt::Display for DebugArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Off => "off",
            Self::Paths => "paths",
            Self::Detailed => "detailed",
        };
        f.write_str(s)
    }
}

/// Command-line mirror of [`TelemetryLevel`]; see [`DebugArg`] for why this duplication exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TelemetryArg {
    /// No telemetry is collected.
    #[default]
    Off,
    /// Collect total/run step counts and the first failing step's id.
    Basic,
    /// `Basic`, plus a per-step timing sample.
    Timing,
}

impl TelemetryArg {
    /// Translates this command-line value into the core crate's [`TelemetryLevel`].
    pub fn into_level(self) -> TelemetryLevel {
        match self {
            Self::Off => TelemetryLevel::Off,
            Self::Basic => TelemetryLevel::Basic,
            Self::Timing => TelemetryLevel::Timing,
        }
    }
}

impl fmt::Display for TelemetryArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Off => "off",
            Self::Basic => "basic",
            Self::Timing => "timing",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_arg_maps_onto_debug_level() {
        assert_eq!(DebugArg::Off.into_level(), DebugLevel::Off);
        assert_eq!(DebugArg::Paths.into_level(), DebugLevel::Paths);
        assert_eq!(DebugArg::Detailed.into_level(), DebugLevel::Detailed);
    }

    #[test]
    fn telemetry_arg_maps_onto_telemetry_level() {
        assert_eq!(TelemetryArg::Off.into_level(), TelemetryLevel::Off);
        assert_eq!(TelemetryArg::Basic.into_level(), TelemetryLevel::Basic);
        assert_eq!(TelemetryArg::Timing.into_level(), TelemetryLevel::Timing);
    }

    #[test]
    fn parses_a_plan_path_with_defaults() {
        let args = Args::parse_from(["opal", "plan.bin"]);
        assert_eq!(args.plan_path, PathBuf::from("plan.bin"));
        assert_eq!(args.debug, DebugArg::Off);
        assert_eq!(args.telemetry, TelemetryArg::Off);
        assert!(args.known_hosts.is_none());
        assert!(!args.strict_host_key);
    }

    #[test]
    fn parses_known_hosts_and_strict_flag() {
        let args = Args::parse_from([
            "opal",
            "--known-hosts",
            "/etc/ssh/known_hosts",
            "--strict-host-key",
            "--debug",
            "detailed",
            "--telemetry",
            "timing",
            "plan.bin",
        ]);
        assert_eq!(args.known_hosts, Some(PathBuf::from("/etc/ssh/known_hosts")));
        assert!(args.strict_host_key);
        assert_eq!(args.debug, DebugArg::Detailed);
        assert_eq!(args.telemetry, TelemetryArg::Timing);
    }
}
