use crate::cli::args::{FlagArgs, FlagValue};
use crate::exit_codes;
use qualify_core::config::QualifyConfig;
use qualify_core::model::QualityFlag;
use qualify_metrics::run_qc_checks;

/// Flag a stored measurement, then re-evaluate acceptance and QC so the stored verdicts
/// reflect the new flag.
pub fn run(args: FlagArgs, cfg: &QualifyConfig) -> anyhow::Result<i32> {
    let store = super::open_store(&args.db, cfg)?;
    let mut run = match super::load_stored_run(&store, &args.run)? {
        Ok(run) => run,
        Err(code) => return Ok(code),
    };
    let protocol = match super::protocol_for_run(&run, args.protocol.as_deref(), cfg) {
        Ok(p) => p,
        Err(code) => return Ok(code),
    };

    let flag = match args.flag {
        FlagValue::Good => QualityFlag::Good,
        FlagValue::Suspect => QualityFlag::Suspect,
        FlagValue::Bad => QualityFlag::Bad,
    };
    let flagged = match run.flag_measurement(&args.measurement, flag, args.notes.clone()) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: {e}");
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    run.evaluate_acceptance(&protocol)?;
    let qc = run_qc_checks(&run, &protocol, &cfg.qc_defaults())?;
    store.save_run(&run)?;
    store.save_qc_results(&run.run_id, &qc)?;

    println!(
        "{} {} -> {}  (result {})",
        flagged.measurement_id,
        flagged.parameter,
        flagged.quality_flag.as_str(),
        run.result
    );
    Ok(exit_codes::OK)
}
