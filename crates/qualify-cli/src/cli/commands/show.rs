use crate::cli::args::{OutputFormat, ShowArgs};
use qualify_core::config::QualifyConfig;
use qualify_core::model::{QcCheckResult, TestRun};
use serde_json::json;

pub fn run(args: ShowArgs, cfg: &QualifyConfig) -> anyhow::Result<i32> {
    let store = super::open_store(&args.db, cfg)?;
    let run = match super::load_stored_run(&store, &args.run)? {
        Ok(run) => run,
        Err(code) => return Ok(code),
    };
    let qc = store.load_qc_results(&run.run_id)?;

    match args.format {
        OutputFormat::Json => super::print_json(&run_json(&run, &qc))?,
        OutputFormat::Text => print_run_text(&run, &qc),
    }
    Ok(crate::exit_codes::OK)
}

pub(crate) fn run_json(run: &TestRun, qc: &[QcCheckResult]) -> serde_json::Value {
    json!({
        "run": run,
        "progress_pct": run.progress_pct(),
        "qc": qc,
    })
}

fn mark(passed: Option<bool>) -> &'static str {
    match passed {
        Some(true) => "✔",
        Some(false) => "✖",
        None => "?",
    }
}

pub(crate) fn print_run_text(run: &TestRun, qc: &[QcCheckResult]) {
    println!(
        "run {}  {}@{}  specimen {}  operator {}",
        run.run_id, run.protocol_id, run.protocol_version, run.specimen_id, run.operator
    );
    println!(
        "status {}  result {}  progress {:.0}%",
        run.status,
        run.result,
        run.progress_pct()
    );
    if let Some(reason) = &run.status_reason {
        println!("reason: {}", reason);
    }

    println!("steps:");
    for s in &run.steps {
        print!("  {:<12} {:<12} {}", s.phase_id, s.step_id, s.status);
        if let Some(obs) = &s.observations {
            print!("  ({})", obs);
        }
        println!();
    }
    println!("measurements: {}", run.ledger.len());

    if !run.acceptance.is_empty() {
        println!("acceptance:");
        for a in &run.acceptance {
            let value = a
                .evaluated_value
                .as_ref()
                .map_or_else(|| "-".to_string(), |v| v.to_string());
            print!(
                "  {} {:<10} [{}] {} = {}",
                mark(a.passed),
                a.criterion_id,
                a.severity,
                a.parameter,
                value
            );
            if let Some(reason) = &a.failure_reason {
                print!("  {}", reason);
            }
            println!();
        }
    }

    if !qc.is_empty() {
        let failed = qc.iter().filter(|r| !r.passed).count();
        println!("qc: {} checks, {} failed", qc.len(), failed);
        for r in qc {
            println!(
                "  {} {:<28} [{}] {}",
                mark(Some(r.passed)),
                r.check_name,
                r.severity,
                r.message
            );
        }
    }
}
