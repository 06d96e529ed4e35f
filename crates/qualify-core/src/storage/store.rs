use super::rows::{
    fmt_opt_ts, fmt_ts, json_at, label, opt_ts_at, row_to_measurement, row_to_phase, row_to_qc,
    row_to_step, row_to_summary, run_status_at, test_result_at, ts_at, value_columns,
    RunSummary, MEASUREMENT_COLUMNS, PHASE_COLUMNS, QC_COLUMNS, STEP_COLUMNS, SUMMARY_COLUMNS,
};
use crate::ledger::MeasurementLedger;
use crate::model::{QcCheckResult, TestRun};
use anyhow::Context;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Embedded run store. Cloning shares the connection.
#[derive(Clone)]
pub struct Store {
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite db {}", path.display()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory sqlite db")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store connection lock poisoned"))
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("enable foreign keys")?;
        conn.execute_batch(super::schema::DDL)
            .context("create schema")?;
        Ok(())
    }

    /// Upsert the whole run (phases, steps, ledger, acceptance) in one transaction.
    pub fn save_run(&self, run: &TestRun) -> anyhow::Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("begin transaction")?;

        tx.execute(
            "INSERT INTO runs(run_id, protocol_id, protocol_version, specimen_id, operator,
                parameters_json, status, result, status_reason, created_at, started_at,
                completed_at, acceptance_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(run_id) DO UPDATE SET
                protocol_id = excluded.protocol_id,
                protocol_version = excluded.protocol_version,
                specimen_id = excluded.specimen_id,
                operator = excluded.operator,
                parameters_json = excluded.parameters_json,
                status = excluded.status,
                result = excluded.result,
                status_reason = excluded.status_reason,
                created_at = excluded.created_at,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                acceptance_json = excluded.acceptance_json",
            params![
                run.run_id,
                run.protocol_id,
                run.protocol_version,
                run.specimen_id,
                run.operator,
                serde_json::to_string(&run.parameters)?,
                run.status.as_str(),
                run.result.as_str(),
                run.status_reason,
                fmt_ts(&run.created_at),
                fmt_opt_ts(&run.started_at),
                fmt_opt_ts(&run.completed_at),
                serde_json::to_string(&run.acceptance)?,
            ],
        )
        .context("upsert run")?;

        for table in ["phases", "steps", "measurements"] {
            tx.execute(
                &format!("DELETE FROM {} WHERE run_id = ?1", table),
                params![run.run_id],
            )
            .with_context(|| format!("clear {}", table))?;
        }

        insert_children(&tx, run)?;
        tx.commit().context("commit run")?;
        tracing::debug!(run_id = %run.run_id, measurements = run.ledger.len(), "run saved");
        Ok(())
    }

    /// Replace the stored QC results of a run.
    pub fn save_qc_results(&self, run_id: &str, results: &[QcCheckResult]) -> anyhow::Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("begin transaction")?;
        tx.execute("DELETE FROM qc_results WHERE run_id = ?1", params![run_id])
            .context("clear qc results")?;
        let evaluated_at = fmt_ts(&Utc::now());
        for (position, r) in results.iter().enumerate() {
            tx.execute(
                "INSERT INTO qc_results(run_id, position, check_name, category, passed, severity,
                    expected_json, actual_json, message, evaluated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    run_id,
                    position as i64,
                    r.check_name,
                    label(&r.category)?,
                    r.passed,
                    label(&r.severity)?,
                    serde_json::to_string(&r.expected_value)?,
                    serde_json::to_string(&r.actual_value)?,
                    r.message,
                    evaluated_at,
                ],
            )
            .with_context(|| format!("insert qc result '{}'", r.check_name))?;
        }
        tx.commit().context("commit qc results")?;
        Ok(())
    }

    pub fn load_run(&self, run_id: &str) -> anyhow::Result<Option<TestRun>> {
        let conn = self.lock()?;
        let run = conn
            .query_row(
                "SELECT run_id, protocol_id, protocol_version, specimen_id, operator,
                    parameters_json, status, result, status_reason, created_at, started_at,
                    completed_at, acceptance_json
                 FROM runs WHERE run_id = ?1",
                params![run_id],
                |row| {
                    Ok(TestRun {
                        run_id: row.get(0)?,
                        protocol_id: row.get(1)?,
                        protocol_version: row.get(2)?,
                        specimen_id: row.get(3)?,
                        operator: row.get(4)?,
                        parameters: json_at(row, 5)?,
                        status: run_status_at(row, 6)?,
                        result: test_result_at(row, 7)?,
                        status_reason: row.get(8)?,
                        created_at: ts_at(row, 9)?,
                        started_at: opt_ts_at(row, 10)?,
                        completed_at: opt_ts_at(row, 11)?,
                        phases: Vec::new(),
                        steps: Vec::new(),
                        ledger: MeasurementLedger::new(),
                        acceptance: json_at(row, 12)?,
                    })
                },
            )
            .optional()
            .context("load run")?;

        let Some(mut run) = run else {
            return Ok(None);
        };

        run.phases = query_all(
            &conn,
            &format!(
                "SELECT {} FROM phases WHERE run_id = ?1 ORDER BY position",
                PHASE_COLUMNS
            ),
            run_id,
            row_to_phase,
        )
        .context("load phases")?;
        run.steps = query_all(
            &conn,
            &format!(
                "SELECT {} FROM steps WHERE run_id = ?1 ORDER BY position",
                STEP_COLUMNS
            ),
            run_id,
            row_to_step,
        )
        .context("load steps")?;
        run.ledger = MeasurementLedger::from_entries(
            query_all(
                &conn,
                &format!(
                    "SELECT {} FROM measurements WHERE run_id = ?1 ORDER BY position",
                    MEASUREMENT_COLUMNS
                ),
                run_id,
                row_to_measurement,
            )
            .context("load measurements")?,
        );
        Ok(Some(run))
    }

    pub fn load_qc_results(&self, run_id: &str) -> anyhow::Result<Vec<QcCheckResult>> {
        let conn = self.lock()?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM qc_results WHERE run_id = ?1 ORDER BY position",
                QC_COLUMNS
            ),
            run_id,
            row_to_qc,
        )
        .context("load qc results")
    }

    /// All runs, newest first.
    pub fn list_runs(&self) -> anyhow::Result<Vec<RunSummary>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM runs ORDER BY created_at DESC, run_id",
            SUMMARY_COLUMNS
        ))?;
        let rows = stmt.query_map([], row_to_summary)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

fn insert_children(tx: &Transaction<'_>, run: &TestRun) -> anyhow::Result<()> {
    for (position, p) in run.phases.iter().enumerate() {
        tx.execute(
            "INSERT INTO phases(run_id, position, phase_id, status, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run.run_id,
                position as i64,
                p.phase_id,
                p.status.as_str(),
                fmt_opt_ts(&p.started_at),
                fmt_opt_ts(&p.completed_at),
            ],
        )
        .with_context(|| format!("insert phase '{}'", p.phase_id))?;
    }

    for (position, s) in run.steps.iter().enumerate() {
        tx.execute(
            "INSERT INTO steps(run_id, position, step_id, phase_id, sequence, action, status,
                pass_fail, observations, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                run.run_id,
                position as i64,
                s.step_id,
                s.phase_id,
                s.sequence,
                s.action,
                s.status.as_str(),
                s.pass_fail,
                s.observations,
                fmt_opt_ts(&s.started_at),
                fmt_opt_ts(&s.completed_at),
            ],
        )
        .with_context(|| format!("insert step '{}'", s.step_id))?;
    }

    for (position, m) in run.ledger.iter().enumerate() {
        let (kind, numeric, text, boolean, json) = value_columns(&m.value)?;
        tx.execute(
            "INSERT INTO measurements(measurement_id, run_id, position, parameter, value_kind,
                value_numeric, value_text, value_boolean, value_json, unit, timestamp, phase_id,
                step_id, measurement_type, quality_flag, notes, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                m.measurement_id,
                run.run_id,
                position as i64,
                m.parameter,
                kind,
                numeric,
                text,
                boolean,
                json,
                m.unit,
                fmt_ts(&m.timestamp),
                m.phase_id,
                m.step_id,
                m.measurement_type.as_str(),
                m.quality_flag.as_str(),
                m.notes,
                serde_json::to_string(&m.metadata)?,
            ],
        )
        .with_context(|| format!("insert measurement '{}'", m.measurement_id))?;
    }
    Ok(())
}

fn query_all<T>(
    conn: &Connection,
    sql: &str,
    run_id: &str,
    map: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> anyhow::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![run_id], map)?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}
