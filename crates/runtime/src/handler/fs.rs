//! Filesystem handler: existence, access, checksum, and content
//! guarantees for files and directories.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use ensura_core::ResourceRef;

use super::{require_arg, require_subject, Handler, HandlerArgs, HandlerError, HandlerResult};

pub struct FsHandler;

#[async_trait]
impl Handler for FsHandler {
    fn name(&self) -> &'static str {
        "fs.native"
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
        let path = subject.path.as_str();

        match condition {
            "exists" => check_exists(path).await,
            "readable" => check_readable(path).await,
            "writable" => check_writable(path).await,
            "checksum" => check_checksum(path, args).await,
            "content" => check_content(path, args).await,
            other => HandlerError::UnknownCondition {
                condition: other.to_owned(),
            }
            .into(),
        }
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
        let path = subject.path.as_str();

        match condition {
            "exists" => enforce_exists(path, &subject.resource_type).await,
            "content" => enforce_content(path, args).await,
            other => HandlerError::Unenforceable {
                condition: other.to_owned(),
            }
            .into(),
        }
    }
}

async fn check_exists(path: &str) -> HandlerResult {
    match tokio::fs::metadata(path).await {
        Ok(_) => HandlerResult::satisfied(format!("{} exists", path)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            HandlerResult::violated(format!("{} does not exist", path))
        }
        Err(err) => HandlerError::Io(err).into(),
    }
}

async fn check_readable(path: &str) -> HandlerResult {
    match tokio::fs::File::open(path).await {
        Ok(_) => HandlerResult::satisfied(format!("{} is readable", path)),
        Err(_) => HandlerResult::violated(format!("{} is not readable", path)),
    }
}

async fn check_writable(path: &str) -> HandlerResult {
    let open = tokio::fs::OpenOptions::new().write(true).open(path).await;
    match open {
        Ok(_) => HandlerResult::satisfied(format!("{} is writable", path)),
        Err(_) => HandlerResult::violated(format!("{} is not writable", path)),
    }
}

async fn check_checksum(path: &str, args: &HandlerArgs) -> HandlerResult {
    let expected = match require_arg(args, "expected") {
        Ok(expected) => expected,
        Err(err) => return err.into(),
    };

    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(err) => return HandlerError::Io(err).into(),
    };

    let actual = hex_digest(&data);
    if actual == expected {
        HandlerResult::satisfied("checksum matches")
    } else {
        HandlerResult::violated(format!(
            "checksum mismatch: expected {}, got {}",
            expected, actual
        ))
    }
}

async fn check_content(path: &str, args: &HandlerArgs) -> HandlerResult {
    let expected = match require_arg(args, "expected") {
        Ok(expected) => expected,
        Err(err) => return err.into(),
    };

    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(err) => return HandlerError::Io(err).into(),
    };

    if data == expected.as_bytes() {
        HandlerResult::satisfied("content matches")
    } else {
        HandlerResult::violated("content does not match expected")
    }
}

async fn enforce_exists(path: &str, resource_type: &str) -> HandlerResult {
    if resource_type == "directory" {
        return match tokio::fs::create_dir_all(path).await {
            Ok(()) => HandlerResult::satisfied(format!("created directory {}", path)),
            Err(err) => HandlerError::Io(err).into(),
        };
    }

    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                return HandlerError::Io(err).into();
            }
        }
    }

    let created = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await;
    match created {
        Ok(_) => HandlerResult::satisfied(format!("created file {}", path)),
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
            HandlerResult::satisfied(format!("{} already exists", path))
        }
        Err(err) => HandlerError::Io(err).into(),
    }
}

async fn enforce_content(path: &str, args: &HandlerArgs) -> HandlerResult {
    let content = match require_arg(args, "content") {
        Ok(content) => content,
        Err(err) => return err.into(),
    };
    match tokio::fs::write(path, content).await {
        Ok(()) => HandlerResult::satisfied(format!("wrote content to {}", path)),
        Err(err) => HandlerError::Io(err).into(),
    }
}

fn hex_digest(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────
