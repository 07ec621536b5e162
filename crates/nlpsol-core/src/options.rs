//! Backend options: an opaque typed mapping validated by each backend
//! against its own table of recognized keys.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::NlpError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Map(Options),
}

impl OptionValue {
    pub fn kind(&self) -> OptionType {
        match self {
            OptionValue::Bool(_) => OptionType::Bool,
            OptionValue::Int(_) => OptionType::Int,
            OptionValue::Float(_) => OptionType::Float,
            OptionValue::Str(_) => OptionType::Str,
            OptionValue::Map(_) => OptionType::Map,
        }
    }

    /// Parse the textual form used on command lines (`true`, `50`, `1e-6`,
    /// anything else is a string).
    pub fn parse_text(text: &str) -> OptionValue {
        let text = text.trim();
        if let Ok(b) = text.parse::<bool>() {
            OptionValue::Bool(b)
        } else if let Ok(i) = text.parse::<i64>() {
            OptionValue::Int(i)
        } else if let Ok(f) = text.parse::<f64>() {
            OptionValue::Float(f)
        } else {
            OptionValue::Str(text.to_string())
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(v) => write!(f, "{}", v),
            OptionValue::Int(v) => write!(f, "{}", v),
            OptionValue::Float(v) => write!(f, "{}", v),
            OptionValue::Str(v) => write!(f, "\"{}\"", v),
            OptionValue::Map(m) => write!(f, "{{{} entries}}", m.len()),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Int(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        OptionValue::Int(v as i64)
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Float(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::Str(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::Str(v)
    }
}

impl From<Options> for OptionValue {
    fn from(v: Options) -> Self {
        OptionValue::Map(v)
    }
}

/// String-keyed option mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options(BTreeMap<String, OptionValue>);

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<OptionValue>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<OptionValue>) {
        self.0.insert(key.to_string(), value.into());
    }

    /// Insert `key=value`; dotted keys (`qpsol_options.max_iter=10`)
    /// address nested maps.
    pub fn set_assignment(&mut self, assignment: &str) -> Result<(), NlpError> {
        let (key, value) = assignment.split_once('=').ok_or_else(|| NlpError::InvalidOption {
            backend: String::new(),
            key: assignment.to_string(),
            reason: "expected key=value".into(),
        })?;
        let value = OptionValue::parse_text(value);
        let mut path: Vec<&str> = key.trim().split('.').collect();
        let leaf = path.pop().unwrap_or_default();
        let mut target = self;
        for segment in path {
            let entry = target
                .0
                .entry(segment.to_string())
                .or_insert_with(|| OptionValue::Map(Options::new()));
            target = match entry {
                OptionValue::Map(m) => m,
                other => {
                    return Err(NlpError::InvalidOption {
                        backend: String::new(),
                        key: segment.to_string(),
                        reason: format!("already set to {}, cannot nest", other),
                    })
                }
            };
        }
        target.set(leaf, value);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.0.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<OptionValue> {
        self.0.remove(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &OptionValue)> {
        self.0.iter()
    }

    /// Entries of `other` override entries of `self`.
    pub fn merged(&self, other: &Options) -> Options {
        let mut out = self.clone();
        for (k, v) in other.iter() {
            out.0.insert(k.clone(), v.clone());
        }
        out
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            OptionValue::Float(v) => Some(*v),
            OptionValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key)? {
            OptionValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            OptionValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key)? {
            OptionValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn get_map(&self, key: &str) -> Option<&Options> {
        match self.get(key)? {
            OptionValue::Map(v) => Some(v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptionType {
    Bool,
    Int,
    Float,
    Str,
    Map,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptionType::Bool => "bool",
            OptionType::Int => "int",
            OptionType::Float => "float",
            OptionType::Str => "string",
            OptionType::Map => "map",
        };
        f.write_str(name)
    }
}

/// One recognized option of a backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OptionSpec {
    pub name: &'static str,
    pub kind: OptionType,
    pub description: &'static str,
    /// Allowed values for string options; empty means unrestricted.
    pub choices: &'static [&'static str],
}

impl OptionSpec {
    pub const fn new(name: &'static str, kind: OptionType, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            choices: &[],
        }
    }

    pub const fn with_choices(self, choices: &'static [&'static str]) -> Self {
        Self { choices, ..self }
    }
}

/// Reject keys not listed in `specs` and values of the wrong type.
/// Integers are accepted where floats are expected.
pub fn validate_options(backend: &str, specs: &[OptionSpec], options: &Options) -> Result<(), NlpError> {
    for (key, value) in options.iter() {
        let invalid = |reason: String| NlpError::InvalidOption {
            backend: backend.to_string(),
            key: key.clone(),
            reason,
        };
        let spec = specs
            .iter()
            .find(|s| s.name == key.as_str())
            .ok_or_else(|| invalid("not a recognized option".into()))?;
        let type_ok = value.kind() == spec.kind
            || (spec.kind == OptionType::Float && value.kind() == OptionType::Int);
        if !type_ok {
            return Err(invalid(format!("expected {}, got {}", spec.kind, value.kind())));
        }
        if let OptionValue::Str(s) = value {
            if !spec.choices.is_empty() && !spec.choices.contains(&s.as_str()) {
                return Err(invalid(format!(
                    "'{}' is not one of {:?}",
                    s, spec.choices
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPECS: &[OptionSpec] = &[
        OptionSpec::new("tol", OptionType::Float, "tolerance"),
        OptionSpec::new("max_iter", OptionType::Int, "iteration limit"),
        OptionSpec::new("hessian_approximation", OptionType::Str, "hessian")
            .with_choices(&["exact", "limited-memory"]),
        OptionSpec::new("qpsol_options", OptionType::Map, "sub-solver options"),
    ];

    #[test]
    fn test_validation() {
        let ok = Options::new()
            .with("tol", 1e-8)
            .with("max_iter", 100)
            .with("hessian_approximation", "exact");
        assert!(validate_options("ipm", SPECS, &ok).is_ok());

        // integer where a float is expected is fine
        assert!(validate_options("ipm", SPECS, &Options::new().with("tol", 1)).is_ok());

        let unknown = Options::new().with("tolerance", 1e-8);
        assert!(matches!(
            validate_options("ipm", SPECS, &unknown),
            Err(NlpError::InvalidOption { ref key, .. }) if key == "tolerance"
        ));

        let wrong_type = Options::new().with("max_iter", 1.5);
        assert!(validate_options("ipm", SPECS, &wrong_type).is_err());

        let bad_choice = Options::new().with("hessian_approximation", "bfgs");
        assert!(validate_options("ipm", SPECS, &bad_choice).is_err());
    }

    #[test]
    fn test_assignments() {
        let mut opts = Options::new();
        opts.set_assignment("tol=1e-6").unwrap();
        opts.set_assignment("max_iter=50").unwrap();
        opts.set_assignment("qpsol=clarabel").unwrap();
        opts.set_assignment("qpsol_options.max_iter=10").unwrap();
        assert_eq!(opts.get_f64("tol"), Some(1e-6));
        assert_eq!(opts.get_i64("max_iter"), Some(50));
        assert_eq!(opts.get_str("qpsol"), Some("clarabel"));
        assert_eq!(
            opts.get_map("qpsol_options").and_then(|m| m.get_i64("max_iter")),
            Some(10)
        );
        assert!(opts.set_assignment("no_equals_sign").is_err());
        assert!(opts.set_assignment("tol.inner=1").is_err());
    }

    #[test]
    fn test_merge_overrides() {
        let base = Options::new().with("tol", 1e-6).with("max_iter", 10);
        let merged = base.merged(&Options::new().with("tol", 1e-9));
        assert_eq!(merged.get_f64("tol"), Some(1e-9));
        assert_eq!(merged.get_i64("max_iter"), Some(10));
    }

    #[test]
    fn test_deserializes_from_toml() {
        let opts: Options = toml::from_str(
            r#"
            tol = 1e-8
            max_iter = 30
            warm_start_init_point = true
            qpsol = "active_set"
            [qpsol_options]
            max_iter = 5
            "#,
        )
        .unwrap();
        assert_eq!(opts.get_f64("tol"), Some(1e-8));
        assert_eq!(opts.get_i64("max_iter"), Some(30));
        assert_eq!(opts.get_bool("warm_start_init_point"), Some(true));
        assert!(opts.get_map("qpsol_options").is_some());
    }
}
