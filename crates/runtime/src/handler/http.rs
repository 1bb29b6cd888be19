//! HTTP endpoint handler: reachability, status code, and TLS probes.
//!
//! Uses `ureq` (sync) inside `tokio::task::spawn_blocking`, raced
//! against the cancellation token. Every request carries a 30 second
//! deadline. Endpoints are observed, never repaired, so `enforce`
//! always fails.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use ensura_core::ResourceRef;

use super::{require_subject, Handler, HandlerArgs, HandlerError, HandlerResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpHandler;

#[async_trait]
impl Handler for HttpHandler {
    fn name(&self) -> &'static str {
        "http.get"
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
        let url = subject.path.clone();

        match condition {
            "reachable" => check_reachable(cancel, url).await,
            "status_code" => {
                let expected = args
                    .get("expected_status")
                    .cloned()
                    .unwrap_or_else(|| "200".to_owned());
                check_status_code(cancel, url, expected).await
            }
            "tls" => check_tls(cancel, url).await,
            other => HandlerError::UnknownCondition {
                condition: other.to_owned(),
            }
            .into(),
        }
    }

    async fn enforce(
        &self,
        _cancel: &CancellationToken,
        _subject: Option<&ResourceRef>,
        condition: &str,
        _args: &HandlerArgs,
    ) -> HandlerResult {
        HandlerError::Unenforceable {
            condition: condition.to_owned(),
        }
        .into()
    }
}

async fn check_reachable(cancel: &CancellationToken, url: String) -> HandlerResult {
    let status = match fetch_status(cancel, url.clone(), false).await {
        Ok(status) => status,
        Err(err) => {
            return HandlerResult {
                success: false,
                message: format!("{} is not reachable", url),
                error: Some(err),
            }
        }
    };

    // Any successful response (2xx, 3xx) counts as reachable.
    if (200..400).contains(&status) {
        HandlerResult::satisfied(format!("{} is reachable (status: {})", url, status))
    } else {
        HandlerResult::violated(format!("{} returned status {}", url, status))
    }
}

async fn check_status_code(
    cancel: &CancellationToken,
    url: String,
    expected: String,
) -> HandlerResult {
    let expected: u16 = match expected.parse() {
        Ok(expected) => expected,
        Err(_) => {
            return HandlerError::Other(format!("invalid expected status: {}", expected)).into()
        }
    };

    let status = match fetch_status(cancel, url.clone(), false).await {
        Ok(status) => status,
        Err(err) => {
            return HandlerResult {
                success: false,
                message: format!("{} is not reachable", url),
                error: Some(err),
            }
        }
    };

    if status == expected {
        HandlerResult::satisfied(format!("{} returned expected status {}", url, expected))
    } else {
        HandlerResult::violated(format!(
            "{} returned status {}, expected {}",
            url, status, expected
        ))
    }
}

async fn check_tls(cancel: &CancellationToken, url: String) -> HandlerResult {
    if !url.starts_with("https://") {
        return HandlerResult::violated(format!("{} is not using TLS", url));
    }

    // The rustls stack refuses anything below TLS 1.2, so a completed
    // handshake meets the floor.
    match fetch_status(cancel, url.clone(), true).await {
        Ok(_) => HandlerResult::satisfied(format!("{} is using TLS 1.2 or newer", url)),
        Err(err) => HandlerResult {
            success: false,
            message: format!("{} TLS check failed", url),
            error: Some(err),
        },
    }
}

/// Issue one request on a blocking thread and return the status code.
async fn fetch_status(
    cancel: &CancellationToken,
    url: String,
    head: bool,
) -> Result<u16, HandlerError> {
    let request = tokio::task::spawn_blocking(move || -> Result<u16, HandlerError> {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .http_status_as_error(false)
            .build();
        let agent = ureq::Agent::new_with_config(config);

        let response = if head {
            agent.head(&url).call()
        } else {
            agent.get(&url).call()
        };
        let response = response.map_err(|err| HandlerError::Http(err.to_string()))?;
        Ok(response.status().as_u16())
    });

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(HandlerError::Cancelled),
        joined = request => {
            joined.map_err(|err| HandlerError::Other(format!("task join error: {}", err)))?
        }
    }
}

// ──────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ensura_core::Position;

    fn subject(url: &str) -> ResourceRef {
        ResourceRef::inline(Position::default(), "http", url)
    }

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    #[tokio::test]
    async fn enforce_is_never_supported() {
        let result = HttpHandler
            .enforce(
                &cancel(),
                Some(&subject("https://example.com")),
                "reachable",
                &HandlerArgs::new(),
            )
            .await;
        assert!(matches!(
            result.error,
            Some(HandlerError::Unenforceable { .. })
        ));
    }

    #[tokio::test]
    async fn tls_check_rejects_plain_http_without_a_request() {
        let result = HttpHandler
            .check(
                &cancel(),
                Some(&subject("http://example.com")),
                "tls",
                &HandlerArgs::new(),
            )
            .await;
        assert!(!result.success);
        assert!(result.message.contains("not using TLS"));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn invalid_expected_status_is_an_error() {
        let mut args = HandlerArgs::new();
        args.insert("expected_status".to_owned(), "teapot".to_owned());
        let result = HttpHandler
            .check(
                &cancel(),
                Some(&subject("https://example.com")),
                "status_code",
                &args,
            )
            .await;
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();
        let result = HttpHandler
            .check(
                &token,
                Some(&subject("http://127.0.0.1:1/")),
                "reachable",
                &HandlerArgs::new(),
            )
            .await;
        assert!(matches!(result.error, Some(HandlerError::Cancelled)));
    }

    #[tokio::test]
    async fn unknown_condition_is_reported() {
        let result = HttpHandler
            .check(
                &cancel(),
                Some(&subject("https://example.com")),
                "latency",
                &HandlerArgs::new(),
            )
            .await;
        assert!(matches!(
            result.error,
            Some(HandlerError::UnknownCondition { .. })
        ));
    }
}
