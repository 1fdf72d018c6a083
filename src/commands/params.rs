//! Command parameter schema and raw-argument conversion.
//!
//! Chat arguments arrive as raw strings; each declared parameter converts its
//! raw value into a typed JSON value before the handler sees it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};

use super::classify::CommandFailure;

// =============================================================================
// Parameter types
// =============================================================================

/// Parameter type for command options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Int,
    Float,
    Bool,
    Enum(Vec<String>),
    Optional(Box<ParamType>),
}

impl ParamType {
    /// Convert a raw argument string into a value of this type.
    pub fn convert(&self, raw: &str) -> Result<Value, String> {
        match self {
            ParamType::String => Ok(Value::String(raw.to_string())),
            ParamType::Int => raw
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("expected integer, got '{}'", raw)),
            ParamType::Float => {
                let parsed = raw
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| format!("expected number, got '{}'", raw))?;
                serde_json::Number::from_f64(parsed)
                    .map(Value::Number)
                    .ok_or_else(|| format!("expected finite number, got '{}'", raw))
            }
            ParamType::Bool => match raw.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("expected boolean, got '{}'", raw)),
            },
            ParamType::Enum(variants) => variants
                .iter()
                .find(|v| v.eq_ignore_ascii_case(raw.trim()))
                .map(|v| Value::String(v.clone()))
                .ok_or_else(|| {
                    format!(
                        "invalid value '{}', expected one of: {}",
                        raw,
                        variants.join(", ")
                    )
                }),
            ParamType::Optional(inner) => inner.convert(raw),
        }
    }

    /// Human-readable type name for help text.
    pub fn display_name(&self) -> String {
        match self {
            ParamType::String => "string".to_string(),
            ParamType::Int => "integer".to_string(),
            ParamType::Float => "number".to_string(),
            ParamType::Bool => "boolean".to_string(),
            ParamType::Enum(variants) => format!("enum({})", variants.join("|")),
            ParamType::Optional(inner) => format!("{}?", inner.display_name()),
        }
    }
}

// =============================================================================
// Parameter definition
// =============================================================================

/// A single parameter declared by a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDef {
    pub name: String,
    pub param_type: ParamType,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ParamDef {
    pub fn new(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: description.into(),
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn is_required(&self) -> bool {
        self.default.is_none() && !matches!(self.param_type, ParamType::Optional(_))
    }

    /// Usage fragment, e.g. `text: string` or `count?: integer`.
    pub fn usage(&self) -> String {
        let optional = if self.is_required() { "" } else { "?" };
        format!("{}{}: {}", self.name, optional, self.param_type.display_name())
    }
}

/// Convert named and positional raw arguments against a parameter list.
///
/// Positional values fill the declared parameters not given by name, in
/// declaration order. Every missing required parameter is reported at once;
/// after that the first unknown option or failed conversion wins. Missing
/// optional parameters get their default (or null).
pub(crate) fn bind_arguments(
    params: &[ParamDef],
    named: &HashMap<String, String>,
    positional: &[String],
) -> Result<Map<String, Value>, CommandFailure> {
    let mut raw: HashMap<&str, &str> = HashMap::new();
    let mut unknown: BTreeSet<&str> = BTreeSet::new();
    for (key, value) in named {
        match params.iter().find(|p| p.name.eq_ignore_ascii_case(key)) {
            Some(def) => {
                raw.insert(def.name.as_str(), value.as_str());
            }
            None => {
                unknown.insert(key.as_str());
            }
        }
    }

    let mut extra = positional.iter();
    for def in params {
        if raw.contains_key(def.name.as_str()) {
            continue;
        }
        match extra.next() {
            Some(value) => {
                raw.insert(def.name.as_str(), value.as_str());
            }
            None => break,
        }
    }
    if let Some(surplus) = extra.next() {
        return Err(CommandFailure::InvalidArgument {
            option: "positional".to_string(),
            reason: format!("unexpected positional argument '{}'", surplus),
        });
    }

    let missing: Vec<String> = params
        .iter()
        .filter(|p| p.is_required() && !raw.contains_key(p.name.as_str()))
        .map(|p| p.name.clone())
        .collect();
    if !missing.is_empty() {
        return Err(CommandFailure::MissingArguments(missing));
    }

    if let Some(option) = unknown.into_iter().next() {
        return Err(CommandFailure::InvalidArgument {
            option: option.to_string(),
            reason: "unknown option".to_string(),
        });
    }

    let mut bound = Map::new();
    for def in params {
        let value = match raw.get(def.name.as_str()) {
            Some(value) => def
                .param_type
                .convert(value)
                .map_err(|reason| CommandFailure::InvalidArgument {
                    option: def.name.clone(),
                    reason,
                })?,
            None => def.default.clone().unwrap_or(Value::Null),
        };
        bound.insert(def.name.clone(), value);
    }
    Ok(bound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn named(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn schema() -> Vec<ParamDef> {
        vec![
            ParamDef::new("target", ParamType::String, "Deploy target"),
            ParamDef::new("replicas", ParamType::Int, "Replica count").with_default(json!(1)),
            ParamDef::new("dry_run", ParamType::Optional(Box::new(ParamType::Bool)), "Dry run"),
            ParamDef::new(
                "env",
                ParamType::Enum(vec!["staging".to_string(), "prod".to_string()]),
                "Environment",
            ),
        ]
    }

    #[test]
    fn test_convert_scalars() {
        assert_eq!(ParamType::Int.convert(" 42 ").unwrap(), json!(42));
        assert_eq!(ParamType::Float.convert("2.5").unwrap(), json!(2.5));
        assert!(ParamType::Float.convert("NaN").is_err());
        assert!(ParamType::Int.convert("4.2").is_err());
    }

    #[test]
    fn test_convert_bool_spellings() {
        for raw in ["true", "YES", "on", "1"] {
            assert_eq!(ParamType::Bool.convert(raw).unwrap(), json!(true), "{}", raw);
        }
        for raw in ["false", "No", "OFF", "0"] {
            assert_eq!(ParamType::Bool.convert(raw).unwrap(), json!(false), "{}", raw);
        }
        assert!(ParamType::Bool.convert("maybe").is_err());
    }

    #[test]
    fn test_convert_enum_normalizes_case() {
        let ty = ParamType::Enum(vec!["staging".to_string(), "prod".to_string()]);
        assert_eq!(ty.convert("PROD").unwrap(), json!("prod"));
        let err = ty.convert("dev").unwrap_err();
        assert!(err.contains("staging, prod"));
    }

    #[test]
    fn test_is_required() {
        let params = schema();
        assert!(params[0].is_required());
        assert!(!params[1].is_required());
        assert!(!params[2].is_required());
        assert_eq!(params[2].usage(), "dry_run?: boolean?");
    }

    #[test]
    fn test_bind_fills_defaults() {
        let bound =
            bind_arguments(&schema(), &named(&[("target", "web"), ("env", "staging")]), &[]).unwrap();
        assert_eq!(bound["target"], json!("web"));
        assert_eq!(bound["replicas"], json!(1));
        assert_eq!(bound["dry_run"], Value::Null);
        assert_eq!(bound["env"], json!("staging"));
    }

    #[test]
    fn test_bind_reports_all_missing() {
        let err = bind_arguments(&schema(), &HashMap::new(), &[]).unwrap_err();
        match err {
            CommandFailure::MissingArguments(names) => assert_eq!(names, vec!["target", "env"]),
            other => panic!("unexpected failure: {:?}", other),
        }
    }

    #[test]
    fn test_bind_missing_wins_over_invalid() {
        let err = bind_arguments(&schema(), &named(&[("replicas", "many")]), &[]).unwrap_err();
        assert!(matches!(err, CommandFailure::MissingArguments(_)));
    }

    #[test]
    fn test_bind_conversion_failure_names_option() {
        let err = bind_arguments(
            &schema(),
            &named(&[("target", "web"), ("env", "staging"), ("replicas", "many")]),
            &[],
        )
        .unwrap_err();
        match err {
            CommandFailure::InvalidArgument { option, .. } => assert_eq!(option, "replicas"),
            other => panic!("unexpected failure: {:?}", other),
        }
    }

    #[test]
    fn test_bind_unknown_option_is_invalid() {
        let err = bind_arguments(
            &schema(),
            &named(&[("target", "web"), ("env", "prod"), ("colour", "red")]),
            &[],
        )
        .unwrap_err();
        match err {
            CommandFailure::InvalidArgument { option, reason } => {
                assert_eq!(option, "colour");
                assert_eq!(reason, "unknown option");
            }
            other => panic!("unexpected failure: {:?}", other),
        }
    }

    #[test]
    fn test_bind_positional_fills_unnamed_params() {
        let positional = vec!["web".to_string(), "3".to_string()];
        let bound = bind_arguments(&schema(), &named(&[("env", "prod")]), &positional).unwrap();
        assert_eq!(bound["target"], json!("web"));
        assert_eq!(bound["replicas"], json!(3));

        let too_many: Vec<String> = ["a", "1", "yes", "prod", "extra"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let err = bind_arguments(&schema(), &HashMap::new(), &too_many).unwrap_err();
        match err {
            CommandFailure::InvalidArgument { option, reason } => {
                assert_eq!(option, "positional");
                assert_eq!(reason, "unexpected positional argument 'extra'");
            }
            other => panic!("unexpected failure: {:?}", other),
        }
    }
}
