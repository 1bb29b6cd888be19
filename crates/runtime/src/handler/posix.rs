//! POSIX permissions handler. The `mode` argument parses as octal.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ensura_core::ResourceRef;

use super::{require_arg, require_subject, Handler, HandlerArgs, HandlerError, HandlerResult};

pub struct PosixHandler;

#[async_trait]
impl Handler for PosixHandler {
    fn name(&self) -> &'static str {
        "posix"
    }

    async fn check(
        &self,
        _cancel: &CancellationToken,
        subject: Option<&ResourceRef>,
        condition: &str,
        args: &HandlerArgs,
    ) -> HandlerResult {
        let subject = match require_subject(subject) {
            Ok(subject) => subject,
            Err(err) => return err.into(),
        };
        if condition != "permissions" {
            return HandlerError::UnknownCondition {
                condition: condition.to_owned(),
            }
            .into();
        }
        check_permissions(&subject.path, args)
    }

    async fn enforce(
        &self,
        _cancel: &CancellationToken,
        subject: Option<&ResourceRef>,
        condition: &str,
        args: &HandlerArgs,
    ) -> HandlerResult {
        let subject = match require_subject(subject) {
            Ok(subject) => subject,
            Err(err) => return err.into(),
        };
        if condition != "permissions" {
            return HandlerError::Unenforceable {
                condition: condition.to_owned(),
            }
            .into();
        }
        enforce_permissions(&subject.path, args)
    }
}

fn parse_mode(mode: &str) -> Result<u32, HandlerError> {
    u32::from_str_radix(mode, 8)
        .map_err(|err| HandlerError::Other(format!("invalid mode {:?}: {}", mode, err)))
}

#[cfg(unix)]
fn check_permissions(path: &str, args: &HandlerArgs) -> HandlerResult {
    use std::os::unix::fs::PermissionsExt;

    let expected = match require_arg(args, "mode").and_then(parse_mode) {
        Ok(mode) => mode,
        Err(err) => return err.into(),
    };

    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) => return HandlerError::Io(err).into(),
    };

    let actual = metadata.permissions().mode() & 0o777;
    if actual == expected {
        HandlerResult::satisfied(format!("{} has permissions {:04o}", path, actual))
    } else {
        HandlerResult::violated(format!(
            "{} has permissions {:04o}, expected {:04o}",
            path, actual, expected
        ))
    }
}

#[cfg(unix)]
fn enforce_permissions(path: &str, args: &HandlerArgs) -> HandlerResult {
    use std::os::unix::fs::PermissionsExt;

    let expected = match require_arg(args, "mode").and_then(parse_mode) {
        Ok(mode) => mode,
        Err(err) => return err.into(),
    };

    match std::fs::set_permissions(path, std::fs::Permissions::from_mode(expected)) {
        Ok(()) => {
            HandlerResult::satisfied(format!("set permissions on {} to {:04o}", path, expected))
        }
        Err(err) => HandlerError::Io(err).into(),
    }
}

#[cfg(not(unix))]
fn check_permissions(_path: &str, _args: &HandlerArgs) -> HandlerResult {
    HandlerError::UnsupportedPlatform {
        os: std::env::consts::OS,
    }
    .into()
}

#[cfg(not(unix))]
fn enforce_permissions(_path: &str, _args: &HandlerArgs) -> HandlerResult {
    HandlerError::UnsupportedPlatform {
        os: std::env::consts::OS,
    }
    .into()
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
