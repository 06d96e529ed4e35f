use crate::cli::args::{ListArgs, OutputFormat};
use qualify_core::config::QualifyConfig;

pub fn run(args: ListArgs, cfg: &QualifyConfig) -> anyhow::Result<i32> {
    let store = super::open_store(&args.db, cfg)?;
    let runs = store.list_runs()?;

    match args.format {
        OutputFormat::Json => super::print_json(&runs)?,
        OutputFormat::Text => {
            if runs.is_empty() {
                eprintln!("no runs stored");
            }
            for r in &runs {
                println!(
                    "{}  {}@{}  {:<12} {:<11} {:<13} {}",
                    r.run_id,
                    r.protocol_id,
                    r.protocol_version,
                    r.specimen_id,
                    r.status.as_str(),
                    r.result.as_str(),
                    r.created_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }
    }
    Ok(crate::exit_codes::OK)
}
