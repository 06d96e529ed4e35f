use crate::cli::args::{DegradationArgs, OutputFormat};
use crate::exit_codes;
use qualify_core::config::QualifyConfig;
use qualify_metrics::{
    analyze_degradation_with, degradation_points, DegradationOptions, StabilizationOptions,
};
use serde_json::json;

pub fn run(args: DegradationArgs, cfg: &QualifyConfig) -> anyhow::Result<i32> {
    let store = super::open_store(&args.db, cfg)?;
    let run = match super::load_stored_run(&store, &args.run)? {
        Ok(run) => run,
        Err(code) => return Ok(code),
    };

    let points = degradation_points(&run.ledger, &args.parameter);
    let options = DegradationOptions {
        baseline: args.baseline,
        stabilization: StabilizationOptions {
            window: args.window,
            threshold: args.threshold,
        },
    };

    let report = match analyze_degradation_with(&points, &options) {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!(
                run_id = %run.run_id,
                parameter = %args.parameter,
                error = %e,
                "degradation analysis failed"
            );
            match args.format {
                OutputFormat::Json => super::print_json(&json!({
                    "run_id": run.run_id,
                    "analysis_error": e,
                }))?,
                OutputFormat::Text => eprintln!("✖ {}", e),
            }
            return Ok(exit_codes::TEST_FAILED);
        }
    };

    match args.format {
        OutputFormat::Json => {
            super::print_json(&json!({ "run_id": run.run_id, "report": report }))?
        }
        OutputFormat::Text => {
            println!("baseline {:.3} ({:?})", report.baseline, report.baseline_source);
            for p in &report.points {
                println!(
                    "  {:>10.1} h  {:>10.3}  {:>7.3}%  {}",
                    p.elapsed_hours,
                    p.pmax,
                    p.degradation_pct,
                    p.measurement_type.as_str()
                );
            }
            println!(
                "max {:.3}%  final {:.3}%  rate {:.6} %/h (R² {:.3})",
                report.max_degradation_pct,
                report.final_degradation_pct,
                report.degradation_rate,
                report.rate_r_squared
            );
            let s = &report.stabilization;
            match s.onset_hours {
                Some(onset) => println!("stabilized since {:.1} h", onset),
                None if s.is_stabilized => println!("stabilized"),
                None => println!("not stabilized"),
            }
            let r = &report.recovery;
            if r.recovery_measured {
                println!(
                    "recovery {:.1}% (loss {:.3}, recovered {:.3})",
                    r.recovery_pct, r.power_loss, r.power_recovered
                );
            }
        }
    }
    Ok(exit_codes::OK)
}
