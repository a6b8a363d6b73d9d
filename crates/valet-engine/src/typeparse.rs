//! Typed argument parsing.
//!
//! Validates a raw token against a [`ParameterDef`] and produces a typed
//! [`ArgValue`]. Covers the base types, catalog-derived types with their
//! suffix checks, left-to-right union types, and comma-separated lists
//! with integer range expansion and first-occurrence dedup.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use regex::Regex;

use valet_schema::catalog::{ParameterDef, TypeCatalog};
use valet_types::{GROUP_SUFFIX, USER_SUFFIX};

/// Largest inclusive integer range a single `N-M` token may expand to.
const MAX_RANGE_SPAN: i64 = 1000;

/// A typed argument value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<ArgValue>),
}

impl ArgValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ArgValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ArgValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ArgValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ArgValue::Int(n) => Some(*n as f64),
            ArgValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ArgValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ArgValue]> {
        match self {
            ArgValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Convert a JSON default value from the catalog.
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ArgValue::Null,
            serde_json::Value::Bool(b) => ArgValue::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ArgValue::Int(i)
                } else {
                    ArgValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => ArgValue::Str(s.clone()),
            serde_json::Value::Array(items) => {
                ArgValue::List(items.iter().map(ArgValue::from_json).collect())
            }
            serde_json::Value::Object(_) => ArgValue::Str(value.to_string()),
        }
    }

    /// Render for user-facing text.
    pub fn render(&self) -> String {
        match self {
            ArgValue::Null => String::new(),
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Int(n) => n.to_string(),
            ArgValue::Float(f) => f.to_string(),
            ArgValue::Str(s) => s.clone(),
            ArgValue::List(items) => items
                .iter()
                .map(ArgValue::render)
                .collect::<Vec<_>>()
                .join(","),
        }
    }
}

/// Argument map produced by binding tokens against a syntax.
pub type ArgMap = BTreeMap<String, ArgValue>;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex"))
}

fn range_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(-?\d+)-(-?\d+)$").expect("static regex"))
}

/// Parse one raw token against a parameter definition.
pub fn parse_token(
    raw: &str,
    param: &ParameterDef,
    catalog: &TypeCatalog,
) -> Result<ArgValue, String> {
    if param.is_list {
        parse_list(raw, param, catalog)
    } else {
        parse_kind(raw, &param.kind, catalog)
    }
}

/// Value for an absent parameter: the declared default, `null` when
/// optional, otherwise an error.
pub fn missing_value(param: &ParameterDef) -> Result<ArgValue, String> {
    if let Some(default) = &param.default {
        return Ok(ArgValue::from_json(default));
    }
    if param.optional {
        return Ok(ArgValue::Null);
    }
    Err(format!("missing required parameter '{}'", param.name))
}

/// Parse a raw token against a (possibly union) type kind. Union
/// branches are attempted left to right; the first success wins.
pub fn parse_kind(raw: &str, kind: &str, catalog: &TypeCatalog) -> Result<ArgValue, String> {
    let mut last_error = None;
    for branch in kind.split('|') {
        match parse_scalar(raw, branch.trim(), catalog) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| format!("empty type '{kind}'")))
}

/// Parse a raw token against a single named type.
fn parse_scalar(raw: &str, name: &str, catalog: &TypeCatalog) -> Result<ArgValue, String> {
    match name {
        "int" => raw
            .parse::<i64>()
            .map(ArgValue::Int)
            .map_err(|_| format!("'{raw}' is not a whole number")),
        "float" => raw
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(ArgValue::Float)
            .ok_or_else(|| format!("'{raw}' is not a number")),
        "bool" => match raw.to_ascii_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Ok(ArgValue::Bool(true)),
            "false" | "no" | "off" | "0" => Ok(ArgValue::Bool(false)),
            _ => Err(format!("'{raw}' is not a yes/no value")),
        },
        "word" => {
            if raw.is_empty() || raw.contains(char::is_whitespace) {
                Err(format!("'{raw}' is not a single word"))
            } else {
                Ok(ArgValue::Str(raw.to_string()))
            }
        }
        "string" | "any" => Ok(ArgValue::Str(raw.to_string())),
        "*" => {
            if raw == "*" {
                Ok(ArgValue::Str(raw.to_string()))
            } else {
                Err(format!("'{raw}' is not *"))
            }
        }
        "date" => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map(|_| ArgValue::Str(raw.to_string()))
            .map_err(|_| format!("'{raw}' is not a date (YYYY-MM-DD)")),
        "time" => NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .map(|_| ArgValue::Str(raw.to_string()))
            .map_err(|_| format!("'{raw}' is not a time (HH:MM or HH:MM:SS)")),
        "datetime" => DateTime::parse_from_rfc3339(raw)
            .map(|_| ())
            .or_else(|_| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").map(|_| ())
            })
            .map(|()| ArgValue::Str(raw.to_string()))
            .map_err(|_| format!("'{raw}' is not an ISO-8601 date-time")),
        "email" => {
            if email_regex().is_match(raw) {
                Ok(ArgValue::Str(raw.to_string()))
            } else {
                Err(format!("'{raw}' is not an email address"))
            }
        }
        derived => {
            let def = catalog
                .get(derived)
                .ok_or_else(|| format!("unknown type '{derived}'"))?;
            let base = def
                .derived_from
                .as_deref()
                .ok_or_else(|| format!("type '{derived}' has no base"))?;
            let value = parse_scalar(raw, base, catalog)?;
            check_derived(raw, derived)?;
            Ok(value)
        }
    }
}

/// Type-specific checks applied after the base type validated.
fn check_derived(raw: &str, name: &str) -> Result<(), String> {
    match name {
        "GroupId" => {
            if raw.ends_with(GROUP_SUFFIX) {
                Ok(())
            } else {
                Err(format!("'{raw}' is not a group id (expected {GROUP_SUFFIX})"))
            }
        }
        "UserId" => {
            if raw.ends_with(USER_SUFFIX) {
                Ok(())
            } else {
                Err(format!("'{raw}' is not a user id (expected {USER_SUFFIX})"))
            }
        }
        // Role, Service, Command, Setting and any custom derivations only
        // require their base type's shape.
        _ => Ok(()),
    }
}

/// Split a raw list token on `,`, honouring backslash escapes of the
/// delimiter.
pub fn split_list(raw: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.next() {
                Some(',') => current.push(','),
                Some(other) => {
                    current.push('\\');
                    current.push(other);
                }
                None => current.push('\\'),
            },
            ',' => {
                items.push(std::mem::take(&mut current));
                continue;
            }
            other => current.push(other),
        }
    }
    items.push(current);
    items.retain(|item| !item.is_empty());
    items
}

/// Parse a comma-list token: split, expand integer ranges, parse each
/// item, dedup preserving first occurrence, then check length bounds.
fn parse_list(
    raw: &str,
    param: &ParameterDef,
    catalog: &TypeCatalog,
) -> Result<ArgValue, String> {
    let int_capable = param
        .kind
        .split('|')
        .any(|branch| catalog.base_of(branch.trim()) == Some("int"));

    let mut values: Vec<ArgValue> = Vec::new();
    for item in split_list(raw) {
        if int_capable {
            if let Some(caps) = range_regex().captures(&item) {
                let start: i64 = caps[1]
                    .parse()
                    .map_err(|_| format!("range bound in '{item}' overflows"))?;
                let end: i64 = caps[2]
                    .parse()
                    .map_err(|_| format!("range bound in '{item}' overflows"))?;
                let span = start.checked_sub(end).and_then(i64::checked_abs);
                if !matches!(span, Some(span) if span <= MAX_RANGE_SPAN) {
                    return Err(format!("range '{item}' spans more than {MAX_RANGE_SPAN} values"));
                }
                let range: Vec<i64> = if start <= end {
                    (start..=end).collect()
                } else {
                    (end..=start).rev().collect()
                };
                for n in range {
                    push_unique(&mut values, ArgValue::Int(n));
                }
                continue;
            }
        }
        push_unique(&mut values, parse_kind(&item, &param.kind, catalog)?);
    }

    if let Some(min) = param.min {
        if values.len() < min {
            return Err(format!("expected at least {min} item(s), got {}", values.len()));
        }
    }
    if let Some(max) = param.max {
        if values.len() > max {
            return Err(format!("expected at most {max} item(s), got {}", values.len()));
        }
    }

    Ok(ArgValue::List(values))
}

fn push_unique(values: &mut Vec<ArgValue>, value: ArgValue) {
    if !values.contains(&value) {
        values.push(value);
    }
}
