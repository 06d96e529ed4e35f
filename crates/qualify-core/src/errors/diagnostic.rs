use super::ProtocolError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub code: String,
    pub severity: String,
    pub source: String,
    pub message: String,
    pub context: serde_json::Value,
    pub fix_steps: Vec<String>,
}

impl Diagnostic {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            severity: "error".into(),
            source: "unknown".into(),
            message: message.into(),
            context: serde_json::json!({}),
            fix_steps: vec![],
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = severity.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_fix_step(mut self, step: impl Into<String>) -> Self {
        self.fix_steps.push(step.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == "error"
    }

    pub fn format_terminal(&self) -> String {
        let icon = if self.severity == "warn" { "warn" } else { "error" };
        let mut s = format!("{} [{}] {}\n", icon, self.code, self.message);
        s.push_str(&format!("  source: {}\n", self.source));

        if self.context.as_object().is_some_and(|o| !o.is_empty()) {
            if let Ok(json) = serde_json::to_string_pretty(&self.context) {
                for line in json.lines() {
                    s.push_str(&format!("  {}\n", line));
                }
            }
        }

        if !self.fix_steps.is_empty() {
            s.push_str("\nFix:\n");
            for (i, step) in self.fix_steps.iter().enumerate() {
                s.push_str(&format!("  {}. {}\n", i + 1, step));
            }
        }
        s
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format_terminal())
    }
}

impl std::error::Error for Diagnostic {}

impl From<&ProtocolError> for Diagnostic {
    fn from(e: &ProtocolError) -> Self {
        match e {
            ProtocolError::Io { path, .. } => Diagnostic::new(codes::E_PROTO_READ, e.to_string())
                .with_source("protocol")
                .with_context(serde_json::json!({ "file": path }))
                .with_fix_step("Check that the protocol file exists and is readable"),
            ProtocolError::Parse { format, .. } => {
                Diagnostic::new(codes::E_PROTO_PARSE, e.to_string())
                    .with_source("protocol")
                    .with_context(serde_json::json!({ "format": format }))
            }
            ProtocolError::Schema { location, .. } => {
                Diagnostic::new(codes::E_PROTO_SCHEMA, e.to_string())
                    .with_source("protocol")
                    .with_context(serde_json::json!({ "location": location }))
            }
            ProtocolError::DuplicateId { kind, id, scope } => {
                Diagnostic::new(codes::E_PROTO_DUPLICATE, e.to_string())
                    .with_source("protocol")
                    .with_context(serde_json::json!({ "kind": kind, "id": id, "scope": scope }))
                    .with_fix_step(format!("Give every {} a unique identifier", kind))
            }
        }
    }
}

pub mod codes {
    // Errors (Exit 2)
    pub const E_PROTO_READ: &str = "E_PROTO_READ";
    pub const E_PROTO_PARSE: &str = "E_PROTO_PARSE";
    pub const E_PROTO_SCHEMA: &str = "E_PROTO_SCHEMA";
    pub const E_PROTO_DUPLICATE: &str = "E_PROTO_DUPLICATE";
    pub const E_CFG_PARSE: &str = "E_CFG_PARSE";

    // Warnings (Exit 0)
    pub const W_PROTO_UNDECLARED_PARAMETER: &str = "W_PROTO_UNDECLARED_PARAMETER";
    pub const W_PROTO_UNRESOLVED_ACTION: &str = "W_PROTO_UNRESOLVED_ACTION";
    pub const W_PROTO_NO_CRITERIA: &str = "W_PROTO_NO_CRITERIA";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_id_maps_to_duplicate_code() {
        let err = ProtocolError::DuplicateId {
            kind: "criterion",
            id: "AC-1".into(),
            scope: "protocol 'TC-200'".into(),
        };
        let diag = Diagnostic::from(&err);
        assert_eq!(diag.code, codes::E_PROTO_DUPLICATE);
        assert!(diag.is_error());
        assert_eq!(diag.context["id"], "AC-1");
        assert!(diag.format_terminal().contains("Fix:"));
    }
}
