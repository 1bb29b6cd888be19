use std::path::Path;
use std::process;

use tokio_util::sync::CancellationToken;

use ensura_runtime::{default_registry, Config, Runtime, StepStatus};

use super::load_and_compile;

pub(crate) fn run(file: &Path, json: bool) {
    let output = load_and_compile(file, json);

    let config = Config {
        dry_run: true,
        check_only: true,
        ..Config::default()
    };
    let runtime = Runtime::new(output.plan, default_registry(), config);

    let rt = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");
    let result = rt.block_on(runtime.check(&CancellationToken::new()));

    if json {
        let rendered = serde_json::to_string_pretty(&result.to_json())
            .unwrap_or_else(|err| format!("{{\"error\": \"serialization: {}\"}}", err));
        println!("{}", rendered);
    } else {
        println!(
            "Checked {} guarantees in {:?}",
            result.total_checks, result.duration
        );
        for step in &result.steps {
            let mark = match step.status {
                StepStatus::Satisfied => "ok",
                _ => "VIOLATED",
            };
            println!("  [{}] {}", mark, step.description);
            if step.status != StepStatus::Satisfied && !step.message.is_empty() {
                println!("        {}", step.message);
            }
        }
        if result.all_satisfied {
            println!("All guarantees satisfied.");
        } else {
            println!("{} violation(s) detected.", result.total_failures);
        }
    }

    if !result.all_satisfied {
        process::exit(1);
    }
}
