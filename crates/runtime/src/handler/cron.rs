//! Cron scheduling handler.
//!
//! Entries are stored as a marker line `# EnsuraScript: <jobname>`
//! followed by the schedule/command line. Re-installing a job replaces
//! the existing pair, so enforcement is idempotent. The crontab is
//! rewritten through `crontab -` on stdin.

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use ensura_core::ResourceRef;

use super::{require_arg, require_subject, Handler, HandlerArgs, HandlerError, HandlerResult};

pub struct CronHandler;

#[async_trait]
impl Handler for CronHandler {
    fn name(&self) -> &'static str {
        "cron.native"
    }

    async fn check(
        &self,
        cancel: &CancellationToken,
        subject: Option<&ResourceRef>,
        condition: &str,
        args: &HandlerArgs,
    ) -> HandlerResult {
        let subject = match require_subject(subject) {
            Ok(subject) => subject,
            Err(err) => return err.into(),
        };
        if condition != "scheduled" {
            return HandlerError::UnknownCondition {
                condition: condition.to_owned(),
            }
            .into();
        }
        if let Err(err) = require_arg(args, "schedule") {
            return err.into();
        }
        if !cfg!(unix) {
            return HandlerError::UnsupportedPlatform {
                os: std::env::consts::OS,
            }
            .into();
        }

        let job = subject.path.as_str();
        let crontab = match read_crontab(cancel).await {
            Ok(crontab) => crontab,
            Err(err) => return err.into(),
        };

        if crontab.contains(&marker(job)) {
            HandlerResult::satisfied(format!("cron job {} is scheduled", job))
        } else {
            HandlerResult::violated(format!("cron job {} is not scheduled", job))
        }
    }

    async fn enforce(
        &self,
        cancel: &CancellationToken,
        subject: Option<&ResourceRef>,
        condition: &str,
        args: &HandlerArgs,
    ) -> HandlerResult {
        let subject = match require_subject(subject) {
            Ok(subject) => subject,
            Err(err) => return err.into(),
        };
        if condition != "scheduled" {
            return HandlerError::Unenforceable {
                condition: condition.to_owned(),
            }
            .into();
        }
        let schedule = match require_arg(args, "schedule") {
            Ok(schedule) => schedule.to_owned(),
            Err(err) => return err.into(),
        };
        let command = match require_arg(args, "command") {
            Ok(command) => command.to_owned(),
            Err(err) => return err.into(),
        };
        if !cfg!(unix) {
            return HandlerError::UnsupportedPlatform {
                os: std::env::consts::OS,
            }
            .into();
        }

        let job = subject.path.as_str();
        let existing = match read_crontab(cancel).await {
            Ok(crontab) => crontab,
            Err(err) => return err.into(),
        };

        let updated = merge_crontab(&existing, job, &schedule, &command);
        match install_crontab(cancel, &updated).await {
            Ok(()) => {
                HandlerResult::satisfied(format!("scheduled cron job {}: {}", job, schedule))
            }
            Err(err) => err.into(),
        }
    }
}

fn marker(job: &str) -> String {
    format!("# EnsuraScript: {}", job)
}

/// Rebuild the crontab text with the job's marker/entry pair replaced.
fn merge_crontab(existing: &str, job: &str, schedule: &str, command: &str) -> String {
    let marker = marker(job);

    let mut lines: Vec<&str> = Vec::new();
    let mut skip_next = false;
    for line in existing.lines() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if line.contains(&marker) {
            skip_next = true;
            continue;
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }

    let mut out = lines.join("\n");
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(&marker);
    out.push('\n');
    out.push_str(&format!("{} {}\n", schedule, command));
    out
}

/// Current user's crontab, or empty when none is installed yet
/// (crontab exits 1 in that case).
async fn read_crontab(cancel: &CancellationToken) -> Result<String, HandlerError> {
    let output = Command::new("crontab").arg("-l").output();

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(HandlerError::Cancelled),
        output = output => output.map_err(HandlerError::Io)?,
    };

    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    if output.status.code() == Some(1) {
        return Ok(String::new());
    }
    Err(HandlerError::Other(format!(
        "crontab -l failed: {}",
        String::from_utf8_lossy(&output.stderr).trim()
    )))
}

async fn install_crontab(cancel: &CancellationToken, content: &str) -> Result<(), HandlerError> {
    let mut child = Command::new("crontab")
        .arg("-")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(HandlerError::Io)?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(content.as_bytes())
            .await
            .map_err(HandlerError::Io)?;
    }

    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(HandlerError::Cancelled),
        output = child.wait_with_output() => output.map_err(HandlerError::Io)?,
    };

    if output.status.success() {
        Ok(())
    } else {
        Err(HandlerError::Other(format!(
            "failed to install crontab: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
