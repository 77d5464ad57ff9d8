//! Debug/telemetry dials (§4.7.5): two independent, runtime-selected levels of in-memory event
//! collection, distinct from this crate's ambient `tracing` instrumentation (which always runs,
//! regardless of these levels — see SPEC_FULL.md §4.7.5).

use std::time::Duration;

/// Selects how much step-tracing detail `Executor::execute` collects and returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DebugLevel {
    /// No debug events are collected; zero overhead.
    #[default]
    Off,
    /// `enter_execute`/`exit_execute` with step counts.
    Paths,
    /// `Paths`, plus per-step `step_start`/`step_complete` with exit code and duration.
    Detailed,
}

/// Selects how much telemetry `Executor::execute` collects and returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TelemetryLevel {
    /// No telemetry is collected.
    #[default]
    Off,
    /// Total/run step counts and the first failing step's id.
    Basic,
    /// `Basic`, plus a per-step `(step_id, duration, exit_code)` sample.
    Timing,
}

/// One in-memory debug event (§4.7.5).
#[derive(Debug, Clone, PartialEq)]
pub enum DebugEvent {
    /// `Executor::execute` began processing `step_count` steps.
    EnterExecute {
        /// Number of steps about to be processed.
        step_count: usize,
    },
    /// `Executor::execute` finished, having run `steps_run` steps.
    ExitExecute {
        /// Number of steps actually run.
        steps_run: usize,
    },
    /// A step began executing.
    StepStart {
        /// The step's planner-assigned id.
        step_id: u64,
    },
    /// A step finished executing.
    StepComplete {
        /// The step's planner-assigned id.
        step_id: u64,
        /// The step's exit code.
        exit_code: i32,
        /// How long the step took.
        duration: Duration,
    },
}

/// One telemetry sample, recorded at `TelemetryLevel::Timing`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    /// The step's planner-assigned id.
    pub step_id: u64,
    /// How long the step took.
    pub duration: Duration,
    /// The step's exit code.
    pub exit_code: i32,
}

/// Accumulated telemetry returned on [`crate::executor::ExecutionResult`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryReport {
    /// Total steps the executor was handed.
    pub total_steps: usize,
    /// Steps actually run before fail-fast stopped the loop (or all of them, on success).
    pub steps_run: usize,
    /// The id of the first step that exited non-zero, if any.
    pub first_failing_step: Option<u64>,
    /// Per-step timing samples; populated only at `TelemetryLevel::Timing`.
    pub samples: Vec<TelemetrySample>,
}

/// An opaque handle identifying the current telemetry span, threaded through [`crate::context::Context`].
/// Carries just enough identity (a step id, once one is known) for `tracing::instrument` spans to
/// correlate nested decorator calls back to the step that triggered them; it does not itself hold
/// any exporter state (exporting is out of scope, per spec.md §1).
#[derive(Debug, Clone, Default)]
pub struct TraceHandle {
    step_id: Option<u64>,
}

impl TraceHandle {
    /// The handle used before any step has begun executing.
    pub fn root() -> Self {
        Self::default()
    }

    /// Returns a handle scoped to `step_id`.
    #[must_use]
    pub fn for_step(step_id: u64) -> Self {
        Self {
            step_id: Some(step_id),
        }
    }

    /// The step id this handle is scoped to, if any.
    pub fn step_id(&self) -> Option<u64> {
        self.step_id
    }
}

/// Accumulates debug events and telemetry samples for one `Executor::execute` call, gated by the
/// two independent dials.
pub(crate) struct Collector {
    debug_level: DebugLevel,
    telemetry_level: TelemetryLevel,
    debug_events: Vec<DebugEvent>,
    report: TelemetryReport,
}

impl Collector {
    pub(crate) fn new(debug_level: DebugLevel, telemetry_level: TelemetryLevel) -> Self {
        Self {
            debug_level,
            telemetry_level,
            debug_events: Vec::new(),
            report: TelemetryReport::default(),
        }
    }

    pub(crate) fn enter_execute(&mut self, step_count: usize) {
        self.report.total_steps = step_count;
        if self.debug_level != DebugLevel::Off {
            self.debug_events.push(DebugEvent::EnterExecute { step_count });
        }
    }

    pub(crate) fn exit_execute(&mut self, steps_run: usize) {
        self.report.steps_run = steps_run;
        if self.debug_level != DebugLevel::Off {
            self.debug_events.push(DebugEvent::ExitExecute { steps_run });
        }
    }

    pub(crate) fn step_start(&mut self, step_id: u64) {
        if self.debug_level == DebugLevel::Detailed {
            self.debug_events.push(DebugEvent::StepStart { step_id });
        }
    }

    pub(crate) fn step_complete(&mut self, step_id: u64, exit_code: i32, duration: Duration) {
        if self.debug_level == DebugLevel::Detailed {
            self.debug_events.push(DebugEvent::StepComplete {
                step_id,
                exit_code,
                duration,
            });
        }

        if self.telemetry_level != TelemetryLevel::Off {
            if exit_code != 0 && self.report.first_failing_step.is_none() {
                self.report.first_failing_step = Some(step_id);
            }
            if self.telemetry_level == TelemetryLevel::Timing {
                self.report.samples.push(TelemetrySample {
                    step_id,
                    duration,
                    exit_code,
                });
            }
        }
    }

    pub(crate) fn into_parts(self) -> (Option<Vec<DebugEvent>>, Option<TelemetryReport>) {
        let debug = (self.debug_level != DebugLevel::Off).then_some(self.debug_events);
        let telemetry = (self.telemetry_level != TelemetryLevel::Off).then_some(self.report);
        (debug, telemetry)
    }
}
