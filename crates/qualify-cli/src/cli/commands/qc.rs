use crate::cli::args::{OutputFormat, QcArgs};
use crate::exit_codes;
use qualify_core::config::QualifyConfig;
use qualify_metrics::{run_qc_checks, worst_failure};

pub fn run(args: QcArgs, cfg: &QualifyConfig) -> anyhow::Result<i32> {
    let store = super::open_store(&args.db, cfg)?;
    let run = match super::load_stored_run(&store, &args.run)? {
        Ok(run) => run,
        Err(code) => return Ok(code),
    };
    let protocol = match super::protocol_for_run(&run, args.protocol.as_deref(), cfg) {
        Ok(p) => p,
        Err(code) => return Ok(code),
    };

    let results = match run_qc_checks(&run, &protocol, &cfg.qc_defaults()) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };
    store.save_qc_results(&run.run_id, &results)?;

    match args.format {
        OutputFormat::Json => super::print_json(&results)?,
        OutputFormat::Text => {
            for r in &results {
                println!(
                    "{} {:<28} [{}] {}",
                    if r.passed { "✔" } else { "✖" },
                    r.check_name,
                    r.severity,
                    r.message
                );
            }
        }
    }

    Ok(match worst_failure(&results) {
        Some(s) if s.is_blocking() => exit_codes::TEST_FAILED,
        _ => exit_codes::OK,
    })
}
