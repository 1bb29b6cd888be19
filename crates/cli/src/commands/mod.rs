pub mod check;
pub mod compile;
pub mod explain;
pub mod plan;
pub mod run;

use std::path::Path;
use std::process;

use ensura_core::{compile_source, CompileOutput, Diagnostic};

/// Read and compile a source file; on failure, report diagnostics to
/// stderr (structured when `json` is set) and exit 1. Warnings go to
/// stderr without failing the command.
pub(crate) fn load_and_compile(file: &Path, json: bool) -> CompileOutput {
    let source = match std::fs::read_to_string(file) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: failed to read {}: {}", file.display(), err);
            process::exit(1);
        }
    };

    let filename = file.to_string_lossy();
    match compile_source(&source, &filename) {
        Ok(output) => {
            for warning in &output.warnings {
                eprintln!("warning: {}", warning);
            }
            output
        }
        Err(diagnostics) => {
            report_diagnostics(&diagnostics, json);
            process::exit(1);
        }
    }
}

fn report_diagnostics(diagnostics: &[Diagnostic], json: bool) {
    if json {
        let values: Vec<serde_json::Value> =
            diagnostics.iter().map(Diagnostic::to_json_value).collect();
        let rendered = serde_json::to_string_pretty(&serde_json::json!({ "errors": values }))
            .unwrap_or_else(|err| format!("{{\"error\": \"serialization: {}\"}}", err));
        eprintln!("{}", rendered);
    } else {
        for diagnostic in diagnostics {
            eprintln!("{}", diagnostic);
        }
    }
}
