//! Compiled JSON-schema validation for tool-call arguments.
//!
//! Each registered tool's `parameters` schema is compiled once; the
//! orchestrator validates raw LLM-provided arguments against it before
//! execution and reports structured error strings back to the model.

use serde_json::Value;

use wh_domain::error::{Error, Result};

pub struct ArgumentSchema {
    validator: jsonschema::Validator,
}

impl ArgumentSchema {
    /// Compile a JSON schema. Fails on malformed schemas at registration
    /// time, not at call time.
    pub fn compile(schema: &Value) -> Result<Self> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| Error::Validation(format!("invalid tool schema: {e}")))?;
        Ok(Self {
            validator,
        })
    }

    pub fn is_valid(&self, args: &Value) -> bool {
        self.validator.is_valid(args)
    }

    /// Validate arguments, returning every violation as a human-readable
    /// line.
    pub fn validate(&self, args: &Value) -> std::result::Result<(), Vec<String>> {
        let errors: Vec<String> = self.validator.iter_errors(args).map(|e| e.to_string()).collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exec_schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "timeout_sec": { "type": "integer", "minimum": 1 }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    #[test]
    fn accepts_conforming_arguments() {
        let schema = ArgumentSchema::compile(&exec_schema()).unwrap();
        assert!(schema.validate(&json!({ "command": "ls", "timeout_sec": 5 })).is_ok());
    }

    #[test]
    fn reports_missing_required_property() {
        let schema = ArgumentSchema::compile(&exec_schema()).unwrap();
        let errors = schema.validate(&json!({})).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("command")));
    }

    #[test]
    fn reports_type_mismatch() {
        let schema = ArgumentSchema::compile(&exec_schema()).unwrap();
        let errors = schema
            .validate(&json!({ "command": "ls", "timeout_sec": "soon" }))
            .unwrap_err();
        assert!(errors.iter().any(|e| e.contains("integer")), "{errors:?}");
    }

    #[test]
    fn rejects_malformed_schema_at_compile_time() {
        // A $ref to a missing $defs entry cannot compile.
        let bad = json!({ "type": "object", "$ref": "#/$defs/missing" });
        assert!(ArgumentSchema::compile(&bad).is_err());
    }
}
