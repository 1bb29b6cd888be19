//! The enforcement loop: check every step of the plan in order, repair
//! violations through the step's handler, report, sleep, repeat.

use std::time::{Duration, Instant, SystemTime};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ensura_core::Plan;

use crate::handler::{HandlerArgs, HandlerRegistry};

// ──────────────────────────────────────────────
// Configuration
// ──────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    /// Time between enforcement passes.
    pub interval: Duration,
    /// Default repair attempts per step; overridden per statement or
    /// by the plan's global violation handler.
    pub max_retries: u32,
    /// Check without enforcing.
    pub dry_run: bool,
    /// Run a single pass and stop.
    pub check_only: bool,
    /// Mask secret-like handler argument values in log events.
    pub redact: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            interval: Duration::from_secs(30),
            max_retries: 3,
            dry_run: false,
            check_only: false,
            redact: true,
        }
    }
}

// ──────────────────────────────────────────────
// Results
// ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Satisfied,
    Violated,
    Repaired,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StepStatus::Pending => "pending",
            StepStatus::Satisfied => "satisfied",
            StepStatus::Violated => "violated",
            StepStatus::Repaired => "repaired",
            StepStatus::Failed => "failed",
        })
    }
}

#[derive(Debug)]
pub struct StepResult {
    pub id: String,
    pub description: String,
    pub status: StepStatus,
    pub attempts: u32,
    pub message: String,
    pub error: Option<String>,
}

/// Outcome of one full traversal of the plan.
#[derive(Debug)]
pub struct RunResult {
    pub started: SystemTime,
    pub duration: Duration,
    pub steps: Vec<StepResult>,
    pub all_satisfied: bool,
    pub total_checks: u32,
    pub total_repairs: u32,
    pub total_failures: u32,
}

impl RunResult {
    pub fn to_json(&self) -> serde_json::Value {
        let steps: Vec<serde_json::Value> = self
            .steps
            .iter()
            .map(|step| {
                let mut value = serde_json::json!({
                    "id":          step.id,
                    "description": step.description,
                    "status":      step.status.to_string(),
                    "attempts":    step.attempts,
                });
                if !step.message.is_empty() {
                    value["message"] = serde_json::json!(step.message);
                }
                if let Some(error) = &step.error {
                    value["error"] = serde_json::json!(error);
                }
                value
            })
            .collect();

        serde_json::json!({
            "allSatisfied":  self.all_satisfied,
            "totalChecks":   self.total_checks,
            "totalRepairs":  self.total_repairs,
            "totalFailures": self.total_failures,
            "duration":      format!("{:?}", self.duration),
            "steps":         steps,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("one or more guarantees not satisfied")]
    Unsatisfied,
}

// ──────────────────────────────────────────────
// Runtime
// ──────────────────────────────────────────────

/// Executes the plan sequentially; one runtime, one plan. A pass holds
/// an exclusive lock so overlapping passes are impossible.
pub struct Runtime {
    config: Config,
    registry: HandlerRegistry,
    plan: Plan,
    pass_lock: tokio::sync::Mutex<()>,
}

impl Runtime {
    pub fn new(plan: Plan, registry: HandlerRegistry, config: Config) -> Self {
        Runtime {
            config,
            registry,
            plan,
            pass_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run until cancelled (or once, in check-only mode). Cancellation
    /// is a clean exit; an unsatisfied check-only pass is an error.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<(), RuntimeError> {
        if self.config.check_only {
            let result = self.run_pass(cancel, true).await;
            self.report(&result);
            return if result.all_satisfied {
                Ok(())
            } else {
                Err(RuntimeError::Unsatisfied)
            };
        }

        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            let result = self.run_pass(cancel, self.config.dry_run).await;
            self.report(&result);

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// A single enforcement pass over the whole plan.
    pub async fn run_once(&self, cancel: &CancellationToken) -> RunResult {
        self.run_pass(cancel, self.config.dry_run).await
    }

    /// A single pass that only checks, never repairs.
    pub async fn check(&self, cancel: &CancellationToken) -> RunResult {
        self.run_pass(cancel, true).await
    }

    async fn run_pass(&self, cancel: &CancellationToken, dry_run: bool) -> RunResult {
        let _pass = self.pass_lock.lock().await;

        let started = SystemTime::now();
        let clock = Instant::now();
        let mut result = RunResult {
            started,
            duration: Duration::ZERO,
            steps: Vec::with_capacity(self.plan.steps.len()),
            all_satisfied: true,
            total_checks: 0,
            total_repairs: 0,
            total_failures: 0,
        };

        for step in &self.plan.steps {
            // Cancellation is honored at step boundaries; the partial
            // result is returned as-is.
            if cancel.is_cancelled() {
                result.all_satisfied = false;
                break;
            }

            let step_result = self.execute_step(cancel, step, dry_run).await;
            result.total_checks += 1;
            match step_result.status {
                StepStatus::Repaired => result.total_repairs += 1,
                StepStatus::Violated | StepStatus::Failed => {
                    result.all_satisfied = false;
                    result.total_failures += 1;
                }
                _ => {}
            }
            result.steps.push(step_result);
        }

        result.duration = clock.elapsed();
        result
    }

    async fn execute_step(
        &self,
        cancel: &CancellationToken,
        step: &ensura_core::Step,
        dry_run: bool,
    ) -> StepResult {
        let mut result = StepResult {
            id: step.id.clone(),
            description: step.description.clone(),
            status: StepStatus::Pending,
            attempts: 0,
            message: String::new(),
            error: None,
        };

        let Some(handler) = self.registry.get(&step.handler) else {
            result.status = StepStatus::Failed;
            result.error = Some(format!("handler not found: {}", step.handler));
            warn!(step = %step.id, handler = %step.handler, "handler not found");
            return result;
        };

        let subject = step.stmt.subject.as_ref();
        let condition = step.stmt.condition.as_str();
        debug!(step = %step.id, handler = %step.handler, args = ?self.loggable_args(&step.args), "checking");

        let check = handler.check(cancel, subject, condition, &step.args).await;
        result.attempts += 1;
        if check.success {
            result.status = StepStatus::Satisfied;
            result.message = check.message;
            return result;
        }

        result.status = StepStatus::Violated;
        result.message = check.message;
        if let Some(error) = check.error {
            result.error = Some(error.to_string());
        }

        if dry_run {
            return result;
        }

        let retries = self.effective_retries(step);
        for attempt in 1..=retries {
            if cancel.is_cancelled() {
                break;
            }
            result.attempts += 1;

            let enforce = handler.enforce(cancel, subject, condition, &step.args).await;
            if let Some(error) = enforce.error {
                debug!(step = %step.id, attempt, error = %error, "enforce attempt failed");
                result.error = Some(error.to_string());
                continue;
            }

            let recheck = handler.check(cancel, subject, condition, &step.args).await;
            if recheck.success {
                result.status = StepStatus::Repaired;
                result.message = format!("repaired after {} attempts", attempt);
                result.error = None;
                info!(step = %step.id, attempt, "repaired");
                return result;
            }
        }

        result.status = StepStatus::Failed;
        result.message = format!("failed after {} repair attempts", retries);
        warn!(step = %step.id, retries, "repair failed");
        result
    }

    /// Per-statement retry budget, else the plan's global one, else the
    /// configured default.
    fn effective_retries(&self, step: &ensura_core::Step) -> u32 {
        if let Some(violation) = &step.stmt.violation {
            if violation.retry > 0 {
                return violation.retry;
            }
        }
        if let Some(violation) = &self.plan.global_violation {
            if violation.retry > 0 {
                return violation.retry;
            }
        }
        self.config.max_retries
    }

    fn loggable_args(&self, args: &HandlerArgs) -> HandlerArgs {
        if !self.config.redact {
            return args.clone();
        }
        args.iter()
            .map(|(key, value)| {
                let lowered = key.to_ascii_lowercase();
                let secret = ["key", "password", "token", "secret"]
                    .iter()
                    .any(|needle| lowered.contains(needle));
                let value = if secret {
                    "[redacted]".to_owned()
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect()
    }

    fn report(&self, result: &RunResult) {
        if result.all_satisfied {
            info!(
                checks = result.total_checks,
                repairs = result.total_repairs,
                duration = ?result.duration,
                "enforcement pass complete: all satisfied"
            );
            return;
        }
        warn!(
            checks = result.total_checks,
            repairs = result.total_repairs,
            failures = result.total_failures,
            duration = ?result.duration,
            "enforcement pass complete: violations detected"
        );
        for step in &result.steps {
            if matches!(step.status, StepStatus::Violated | StepStatus::Failed) {
                warn!(
                    step = %step.description,
                    status = %step.status,
                    message = %step.message,
                    error = step.error.as_deref().unwrap_or(""),
                    "unsatisfied guarantee"
                );
            }
        }
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
