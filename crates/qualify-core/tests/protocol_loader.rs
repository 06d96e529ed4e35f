use qualify_core::errors::diagnostic::codes;
use qualify_core::protocol::{self, lint, parse, ProtocolFormat, ProtocolLoader};
use qualify_core::ProtocolError;
use std::fs;

const YAML: &str = r#"
id: MQT-10
version: 1.0.0
name: UV preconditioning
category: environmental
phases:
  - id: main
    steps:
      - { id: a, sequence: 2, action: measure }
      - { id: b, sequence: 1, action: expose, duration_hours: 15 }
measurement_specs:
  - { id: ms-1, parameter: pmax, unit: W, expected_count: 3 }
acceptance_criteria:
  - id: AC-1
    severity: critical
    threshold: { parameter: pmax, operator: between, value: [280, 320] }
"#;

fn schema_err(text: &str) -> ProtocolError {
    parse(text, ProtocolFormat::Yaml).unwrap_err()
}

#[test]
fn parses_yaml_with_unsorted_sequences() {
    let p = parse(YAML, ProtocolFormat::Yaml).unwrap();
    assert_eq!(p.key().to_string(), "MQT-10@1.0.0");
    assert_eq!(p.step_count(), 2);
    assert!(lint(&p).is_empty());
}

#[test]
fn sequence_gap_is_schema_error() {
    let text = YAML.replace("sequence: 2", "sequence: 3");
    assert!(matches!(schema_err(&text), ProtocolError::Schema { .. }));
}

#[test]
fn sequence_not_starting_at_one_is_schema_error() {
    let text = YAML.replace("sequence: 1", "sequence: 3");
    assert!(matches!(schema_err(&text), ProtocolError::Schema { .. }));
}

#[test]
fn duplicate_sequence_is_duplicate_id() {
    let text = YAML.replace("sequence: 2", "sequence: 1");
    match schema_err(&text) {
        ProtocolError::DuplicateId { kind, id, .. } => {
            assert_eq!(kind, "step sequence");
            assert_eq!(id, "1");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn duplicate_criterion_is_duplicate_id() {
    let text = format!(
        "{}  - id: AC-1\n    severity: info\n    threshold: {{ parameter: voc, operator: \">\", value: 1 }}\n",
        YAML
    );
    assert!(matches!(
        schema_err(&text),
        ProtocolError::DuplicateId { kind: "criterion", .. }
    ));
}

#[test]
fn bad_version_and_bad_range_are_schema_errors() {
    assert!(matches!(
        schema_err(&YAML.replace("version: 1.0.0", "version: v1")),
        ProtocolError::Schema { .. }
    ));
    assert!(matches!(
        schema_err(&YAML.replace("[280, 320]", "[320, 280]")),
        ProtocolError::Schema { .. }
    ));
    assert!(matches!(
        schema_err(&YAML.replace(
            "operator: between, value: [280, 320]",
            "operator: \">=\", value: high"
        )),
        ProtocolError::Schema { .. }
    ));
}

#[test]
fn missing_field_is_schema_error_and_bad_json_is_parse_error() {
    assert!(matches!(
        parse(r#"{"id": "x", "version": "1.0.0"}"#, ProtocolFormat::Json),
        Err(ProtocolError::Schema { .. })
    ));
    assert!(matches!(
        parse(r#"{"id": "x", "#, ProtocolFormat::Json),
        Err(ProtocolError::Parse { format: "JSON", .. })
    ));
}

#[test]
fn lint_reports_undeclared_parameter() {
    let text = YAML.replace("parameter: pmax, operator", "parameter: ff, operator");
    let p = parse(&text, ProtocolFormat::Yaml).unwrap();
    let diags = lint(&p);
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].code, codes::W_PROTO_UNDECLARED_PARAMETER);
    assert!(!diags[0].is_error());
}

#[test]
fn loader_caches_until_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mqt10.yaml");
    fs::write(&path, YAML).unwrap();

    let mut loader = ProtocolLoader::new();
    let first = loader.load_path(&path).unwrap();
    assert_eq!(loader.cache().len(), 1);

    fs::write(&path, YAML.replace("name: UV preconditioning", "name: UV test")).unwrap();
    let cached = loader.load_path(&path).unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &cached));
    assert_eq!(cached.name, "UV preconditioning");

    let reloaded = loader.reload(&path).unwrap();
    assert!(reloaded.changed);
    assert_eq!(reloaded.protocol.name, "UV test");
    assert_eq!(loader.get("MQT-10", "1.0.0").unwrap().name, "UV test");

    let again = loader.reload(&path).unwrap();
    assert!(!again.changed);
}

#[test]
fn reload_of_unchanged_file_reports_no_change() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mqt10.yaml");
    fs::write(&path, YAML).unwrap();

    let mut loader = ProtocolLoader::new();
    let first = loader.load_path(&path).unwrap();
    let digest = loader.cache().entry(&first.key()).unwrap().digest.clone();

    let outcome = loader.reload(&path).unwrap();
    assert!(!outcome.changed);
    assert_eq!(loader.cache().len(), 1);
    assert_eq!(loader.cache().entry(&first.key()).unwrap().digest, digest);
}

#[test]
fn reload_with_new_version_replaces_old_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mqt10.yaml");
    fs::write(&path, YAML).unwrap();

    let mut loader = ProtocolLoader::new();
    loader.load_path(&path).unwrap();

    fs::write(&path, YAML.replace("version: 1.0.0", "version: 1.1.0")).unwrap();
    let outcome = loader.reload(&path).unwrap();
    assert!(outcome.changed);
    assert_eq!(loader.cache().len(), 1);
    assert!(loader.get("MQT-10", "1.0.0").is_none());
    assert!(loader.get("MQT-10", "1.1.0").is_some());
}

#[test]
fn failed_reload_keeps_cached_entry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mqt10.yaml");
    fs::write(&path, YAML).unwrap();
    let mut loader = ProtocolLoader::new();
    loader.load_path(&path).unwrap();

    fs::write(&path, "id: [").unwrap();
    assert!(loader.reload(&path).is_err());
    assert!(loader.get("MQT-10", "1.0.0").is_some());
}

#[test]
fn load_dir_is_sorted_and_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("b.yaml"), YAML).unwrap();
    fs::write(
        dir.path().join("a.yml"),
        YAML.replace("id: MQT-10", "id: MQT-09"),
    )
    .unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let mut loader = ProtocolLoader::new();
    let loaded = loader.load_dir(dir.path()).unwrap();
    let ids: Vec<_> = loaded.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["MQT-09", "MQT-10"]);

    fs::write(dir.path().join("c.json"), "{").unwrap();
    let mut fresh = ProtocolLoader::new();
    assert!(fresh.load_dir(dir.path()).is_err());
}

#[test]
fn uncached_load_reads_json_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("p.json");
    let p = parse(YAML, ProtocolFormat::Yaml).unwrap();
    fs::write(&path, serde_json::to_string_pretty(&p).unwrap()).unwrap();
    assert_eq!(protocol::load(&path).unwrap(), p);
    assert!(matches!(
        protocol::load(&dir.path().join("missing.json")),
        Err(ProtocolError::Io { .. })
    ));
}
