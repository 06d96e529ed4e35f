use super::args::*;
use crate::exit_codes;
use qualify_core::config::{load_config, QualifyConfig};
use qualify_core::errors::diagnostic::{codes, Diagnostic};
use qualify_core::model::{ProtocolDefinition, TestRun};
use qualify_core::protocol::ProtocolLoader;
use qualify_core::storage::Store;
use qualify_core::ProtocolError;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub mod degradation;
pub mod flag;
pub mod list;
pub mod qc;
pub mod run;
pub mod show;
pub mod validate;

const DEFAULT_CONFIG: &str = "qualify.yaml";

pub fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    let cfg = match load_settings(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(code) => return Ok(code),
    };

    match cli.cmd {
        Command::Validate(args) => validate::run(args),
        Command::Run(args) => run::run(args, &cfg),
        Command::Show(args) => show::run(args, &cfg),
        Command::List(args) => list::run(args, &cfg),
        Command::Qc(args) => qc::run(args, &cfg),
        Command::Degradation(args) => degradation::run(args, &cfg),
        Command::Flag(args) => flag::run(args, &cfg),
    }
}

/// Explicit `--config`, else `./qualify.yaml` when present, else built-in defaults.
/// A config that exists but cannot be used is reported and mapped to the exit code.
fn load_settings(explicit: Option<&Path>) -> Result<QualifyConfig, i32> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None if Path::new(DEFAULT_CONFIG).is_file() => PathBuf::from(DEFAULT_CONFIG),
        None => return Ok(QualifyConfig::default()),
    };
    load_config(&path).map_err(|e| {
        let diag = Diagnostic::new(codes::E_CFG_PARSE, format!("Failed to load config: {}", e))
            .with_source("config")
            .with_context(json!({ "file": path }));
        eprint!("{}", diag.format_terminal());
        exit_codes::CONFIG_ERROR
    })
}

pub(crate) fn open_store(db: &DbArgs, cfg: &QualifyConfig) -> anyhow::Result<Store> {
    let path = db.db.as_deref().unwrap_or(&cfg.database);
    let store = Store::open(path)?;
    store.init_schema()?;
    Ok(store)
}

pub(crate) fn report_protocol_error(err: &ProtocolError) -> i32 {
    eprint!("{}", Diagnostic::from(err).format_terminal());
    exit_codes::CONFIG_ERROR
}

/// Protocol for a stored run: the given file, else the configured protocols directory.
pub(crate) fn protocol_for_run(
    run: &TestRun,
    explicit: Option<&Path>,
    cfg: &QualifyConfig,
) -> Result<Arc<ProtocolDefinition>, i32> {
    let mut loader = ProtocolLoader::new();
    match explicit {
        Some(path) => loader
            .load_path(path)
            .map_err(|e| report_protocol_error(&e)),
        None => {
            let Some(dir) = cfg.protocols_dir.as_deref() else {
                eprintln!("error: no --protocol given and no protocols_dir configured");
                return Err(exit_codes::CONFIG_ERROR);
            };
            loader.load_dir(dir).map_err(|e| report_protocol_error(&e))?;
            loader
                .get(&run.protocol_id, &run.protocol_version)
                .ok_or_else(|| {
                    eprintln!(
                        "error: protocol {}@{} not found in {}",
                        run.protocol_id,
                        run.protocol_version,
                        dir.display()
                    );
                    exit_codes::CONFIG_ERROR
                })
        }
    }
}

pub(crate) fn load_stored_run(store: &Store, run_id: &str) -> anyhow::Result<Result<TestRun, i32>> {
    Ok(store.load_run(run_id)?.ok_or_else(|| {
        eprintln!("error: run '{}' not found", run_id);
        exit_codes::CONFIG_ERROR
    }))
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
