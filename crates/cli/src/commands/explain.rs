use std::path::Path;

use super::load_and_compile;

pub(crate) fn run(file: &Path, json: bool) {
    let output = load_and_compile(file, json);

    if json {
        let explanations: Vec<serde_json::Value> = output
            .plan
            .steps
            .iter()
            .map(|step| {
                let mut value = serde_json::json!({
                    "condition": step.stmt.condition,
                    "handler":   step.handler,
                    "args":      step.args,
                });
                if let Some(subject) = &step.stmt.subject {
                    value["subject"] = serde_json::json!(subject.canonical());
                }
                if step.stmt.is_implied {
                    value["implied"] = serde_json::json!(true);
                }
                if step.is_invariant {
                    value["invariant"] = serde_json::json!(true);
                }
                value
            })
            .collect();
        let rendered = serde_json::to_string_pretty(&explanations)
            .unwrap_or_else(|err| format!("{{\"error\": \"serialization: {}\"}}", err));
        println!("{}", rendered);
        return;
    }

    println!("Guarantee Explanations");
    println!("======================");
    println!();

    for (i, step) in output.plan.steps.iter().enumerate() {
        let mut marker = String::new();
        if step.is_invariant {
            marker.push_str(" [INVARIANT]");
        }
        if step.stmt.is_implied {
            marker.push_str(" [IMPLIED]");
        }

        println!("{}. {}{}", i + 1, step.description, marker);
        println!("   Handler: {}", step.handler);
        if !step.args.is_empty() {
            println!("   Arguments:");
            for (key, value) in &step.args {
                println!("     {}: {}", key, value);
            }
        }
        println!();
    }
}
