use crate::cli::args::{OutputFormat, ValidateArgs};
use crate::exit_codes;
use qualify_core::engine::{lint_actions, ActionRegistry};
use qualify_core::errors::Diagnostic;
use qualify_core::protocol::{lint, ProtocolLoader};
use serde_json::json;

pub fn run(args: ValidateArgs) -> anyhow::Result<i32> {
    let mut loader = ProtocolLoader::new();
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    let mut summary = serde_json::Value::Null;

    match loader.load_path(&args.protocol) {
        Ok(protocol) => {
            diagnostics.extend(lint(&protocol));
            diagnostics.extend(lint_actions(&protocol, &ActionRegistry::with_builtins()));
            let digest = loader
                .cache()
                .entry(&protocol.key())
                .map(|e| e.digest.clone());
            summary = json!({
                "id": protocol.id,
                "version": protocol.version,
                "name": protocol.name,
                "category": protocol.category,
                "phases": protocol.phases.len(),
                "steps": protocol.step_count(),
                "acceptance_criteria": protocol.acceptance_criteria.len(),
                "digest": digest,
            });
        }
        Err(e) => diagnostics.push(Diagnostic::from(&e)),
    }

    let exit_code = if diagnostics.iter().any(Diagnostic::is_error) {
        exit_codes::CONFIG_ERROR
    } else {
        exit_codes::OK
    };

    match args.format {
        OutputFormat::Json => super::print_json(&json!({
            "file": args.protocol,
            "protocol": summary,
            "diagnostics": diagnostics,
            "exit_code": exit_code,
        }))?,
        OutputFormat::Text => print_text(&diagnostics, &summary),
    }
    Ok(exit_code)
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn print_text(diagnostics: &[Diagnostic], summary: &serde_json::Value) {
    for d in diagnostics {
        eprint!("{}", d.format_terminal());
    }
    let errors = diagnostics.iter().filter(|d| d.is_error()).count();
    let warnings = diagnostics.len() - errors;

    if errors > 0 {
        eprintln!(
            "✖ Validation failed ({} error{}, {} warning{})",
            errors,
            plural(errors),
            warnings,
            plural(warnings)
        );
        return;
    }
    if warnings > 0 {
        eprintln!(
            "⚠️  Validation passed with warnings ({} warning{})",
            warnings,
            plural(warnings)
        );
    } else {
        eprintln!("✔ Validation OK");
    }
    println!(
        "{}@{}: {} phases, {} steps, {} acceptance criteria",
        summary["id"].as_str().unwrap_or_default(),
        summary["version"].as_str().unwrap_or_default(),
        summary["phases"],
        summary["steps"],
        summary["acceptance_criteria"]
    );
}
