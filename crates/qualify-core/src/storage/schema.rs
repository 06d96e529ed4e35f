/// Measurement values are stored in tagged columns: `value_kind` names the kind and
/// exactly that kind's column is non-NULL.
pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  run_id TEXT PRIMARY KEY,
  protocol_id TEXT NOT NULL,
  protocol_version TEXT NOT NULL,
  specimen_id TEXT NOT NULL,
  operator TEXT NOT NULL,
  parameters_json TEXT NOT NULL,
  status TEXT NOT NULL,
  result TEXT NOT NULL,
  status_reason TEXT,
  created_at TEXT NOT NULL,
  started_at TEXT,
  completed_at TEXT,
  acceptance_json TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS phases (
  run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
  position INTEGER NOT NULL,
  phase_id TEXT NOT NULL,
  status TEXT NOT NULL,
  started_at TEXT,
  completed_at TEXT,
  PRIMARY KEY (run_id, phase_id)
);

CREATE TABLE IF NOT EXISTS steps (
  run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
  position INTEGER NOT NULL,
  step_id TEXT NOT NULL,
  phase_id TEXT NOT NULL,
  sequence INTEGER NOT NULL,
  action TEXT NOT NULL,
  status TEXT NOT NULL,
  pass_fail INTEGER,
  observations TEXT,
  started_at TEXT,
  completed_at TEXT,
  PRIMARY KEY (run_id, step_id)
);

CREATE TABLE IF NOT EXISTS measurements (
  measurement_id TEXT PRIMARY KEY,
  run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
  position INTEGER NOT NULL,
  parameter TEXT NOT NULL,
  value_kind TEXT NOT NULL CHECK (value_kind IN ('numeric', 'text', 'boolean', 'json')),
  value_numeric REAL,
  value_text TEXT,
  value_boolean INTEGER,
  value_json TEXT,
  unit TEXT,
  timestamp TEXT NOT NULL,
  phase_id TEXT,
  step_id TEXT,
  measurement_type TEXT NOT NULL,
  quality_flag TEXT NOT NULL,
  notes TEXT,
  metadata_json TEXT NOT NULL,
  CHECK ((value_kind = 'numeric') = (value_numeric IS NOT NULL)),
  CHECK ((value_kind = 'text') = (value_text IS NOT NULL)),
  CHECK ((value_kind = 'boolean') = (value_boolean IS NOT NULL)),
  CHECK ((value_kind = 'json') = (value_json IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_measurements_run ON measurements(run_id, position);

CREATE TABLE IF NOT EXISTS qc_results (
  run_id TEXT NOT NULL REFERENCES runs(run_id) ON DELETE CASCADE,
  position INTEGER NOT NULL,
  check_name TEXT NOT NULL,
  category TEXT NOT NULL,
  passed INTEGER NOT NULL,
  severity TEXT NOT NULL,
  expected_json TEXT NOT NULL,
  actual_json TEXT NOT NULL,
  message TEXT NOT NULL,
  evaluated_at TEXT NOT NULL,
  PRIMARY KEY (run_id, position)
);
"#;
