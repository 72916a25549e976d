//! Policy document storage (`.mag/policy.json`).
//!
//! Loading validates in three layers: a structural walk that names the
//! missing or mistyped field path, the embedded JSON Schema, then the
//! semantic invariants in [`crate::core::invariants`]. Any failure on an
//! existing file is a [`ConfigurationError`]; callers treat it as fatal.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::Value;
use tracing::{debug, info};

use crate::core::invariants::validate_policy;
use crate::core::policy::{Operation, PolicySettings};
use crate::error::{ConfigurationError, ValidationError};

const POLICY_SCHEMA: &str = include_str!("../../schemas/policy.schema.json");

/// Load the policy document, writing defaults first if it does not exist.
pub fn load_or_create_policy(path: &Path) -> Result<PolicySettings> {
    if !path.exists() {
        let settings = PolicySettings::default();
        write_policy(path, &settings)?;
        info!(path = %path.display(), "wrote default policy");
        return Ok(settings);
    }
    load_policy(path)
}

/// Load and fully validate an existing policy document.
pub fn load_policy(path: &Path) -> Result<PolicySettings> {
    debug!(path = %path.display(), "loading policy");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read policy {}", path.display()))?;
    parse_policy(&contents).map_err(|errors| ConfigurationError::new(path, errors).into())
}

/// Parse policy JSON, returning every validation message on failure.
pub fn parse_policy(contents: &str) -> std::result::Result<PolicySettings, Vec<String>> {
    let value: Value =
        serde_json::from_str(contents).map_err(|err| vec![format!("Invalid JSON: {err}")])?;

    let structural = check_structure(&value);
    if !structural.is_empty() {
        return Err(structural);
    }
    let schema_errors = check_schema(&value).map_err(|err| vec![err.to_string()])?;
    if !schema_errors.is_empty() {
        return Err(schema_errors);
    }

    let settings: PolicySettings =
        serde_json::from_value(value).map_err(|err| vec![format!("Invalid policy: {err}")])?;
    let invariant_errors = validate_policy(&settings);
    if !invariant_errors.is_empty() {
        return Err(invariant_errors);
    }
    Ok(settings)
}

/// Validate invariants, then atomically write the document.
pub fn write_policy(path: &Path, settings: &PolicySettings) -> Result<()> {
    let errors = validate_policy(settings);
    if !errors.is_empty() {
        return Err(ValidationError::new(errors).into());
    }
    debug!(path = %path.display(), "writing policy");
    let mut buf = serde_json::to_string_pretty(settings).context("serialize policy")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

fn check_schema(value: &Value) -> Result<Vec<String>> {
    let schema: Value = serde_json::from_str(POLICY_SCHEMA).context("parse policy schema")?;
    let validator = validator_for(&schema).map_err(|err| anyhow!("invalid schema: {}", err))?;
    Ok(validator
        .iter_errors(value)
        .map(|err| format!("Schema violation: {err}"))
        .collect())
}

#[derive(Clone, Copy)]
enum Kind {
    Object,
    Array,
    String,
    Integer,
    Boolean,
}

impl Kind {
    fn name(self) -> &'static str {
        match self {
            Kind::Object => "object",
            Kind::Array => "array",
            Kind::String => "string",
            Kind::Integer => "integer",
            Kind::Boolean => "boolean",
        }
    }

    fn matches(self, value: &Value) -> bool {
        match self {
            Kind::Object => value.is_object(),
            Kind::Array => value.is_array(),
            Kind::String => value.is_string(),
            Kind::Integer => value.is_u64() || value.is_i64(),
            Kind::Boolean => value.is_boolean(),
        }
    }
}

/// Walk the document and name every missing or mistyped required field.
fn check_structure(root: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    let mut require = |parent: &Value, path: &str, key: &str, kind: Kind| -> bool {
        let ok = parent.get(key).is_some_and(|value| kind.matches(value));
        if !ok {
            errors.push(format!(
                "Missing or invalid '{path}' field (must be {})",
                kind.name()
            ));
        }
        ok
    };

    require(root, "version", "version", Kind::String);

    if require(root, "global", "global", Kind::Object) {
        let global = &root["global"];
        require(
            global,
            "global.blocked_extensions",
            "blocked_extensions",
            Kind::Array,
        );
        require(
            global,
            "global.max_file_size_mb",
            "max_file_size_mb",
            Kind::Integer,
        );
        require(global, "global.auto_backup", "auto_backup", Kind::Boolean);
    }

    if require(root, "tools", "tools", Kind::Object)
        && let Some(tools) = root["tools"].as_object()
    {
        for (tool, policy) in tools {
            if !require(&root["tools"], &format!("tools.{tool}"), tool, Kind::Object) {
                continue;
            }
            for op in Operation::ALL {
                let op_path = format!("tools.{tool}.{op}");
                if !require(policy, &op_path, op.as_str(), Kind::Object) {
                    continue;
                }
                let op_value = &policy[op.as_str()];
                require(
                    op_value,
                    &format!("{op_path}.allowed_directories"),
                    "allowed_directories",
                    Kind::Array,
                );
                require(
                    op_value,
                    &format!("{op_path}.confirmation_required"),
                    "confirmation_required",
                    Kind::Boolean,
                );
            }
        }
    }

    errors
}
