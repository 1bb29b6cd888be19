use std::path::Path;

use super::load_and_compile;

pub(crate) fn run(file: &Path, json: bool) {
    let output = load_and_compile(file, json);

    if json {
        let rendered = serde_json::to_string_pretty(&output.plan.to_json())
            .unwrap_or_else(|err| format!("{{\"error\": \"serialization: {}\"}}", err));
        println!("{}", rendered);
        return;
    }

    print!("{}", output.plan.render());
}
