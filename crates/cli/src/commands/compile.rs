use std::path::Path;

use super::load_and_compile;

pub(crate) fn run(file: &Path, json: bool, graph: bool) {
    let output = load_and_compile(file, json);

    if graph {
        print!("{}", output.graph.to_dot());
        return;
    }

    if json {
        let rendered = serde_json::to_string_pretty(&output.plan.to_json())
            .unwrap_or_else(|err| format!("{{\"error\": \"serialization: {}\"}}", err));
        println!("{}", rendered);
        return;
    }

    println!("Compilation successful!");
    println!("  Guarantees:   {}", output.graph.nodes.len());
    println!("  Dependencies: {}", output.graph.edges.len());
    println!("  Plan steps:   {}", output.plan.steps.len());
}
