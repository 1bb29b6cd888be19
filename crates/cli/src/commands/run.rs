use std::path::Path;
use std::process;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ensura_runtime::{default_registry, Config, Runtime};

use super::load_and_compile;

pub(crate) fn run(file: &Path, interval: Duration, retries: u32) {
    let output = load_and_compile(file, false);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config {
        interval,
        max_retries: retries,
        ..Config::default()
    };
    let runtime = Runtime::new(output.plan, default_registry(), config);

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    let exit = rt.block_on(async {
        let cancel = CancellationToken::new();

        // ctrl-c requests a clean stop at the next step boundary.
        let signal_token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received, stopping");
                signal_token.cancel();
            }
        });

        tracing::info!(
            interval = ?interval,
            retries,
            "starting enforcement loop"
        );

        match runtime.run(&cancel).await {
            Ok(()) => 0,
            Err(err) => {
                tracing::error!(error = %err, "enforcement loop failed");
                1
            }
        }
    });

    process::exit(exit);
}
