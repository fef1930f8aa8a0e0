//! Named numeric parameter sets and reconciliation.
//!
//! A [`ParameterSet`] preserves the remote model's parameter order and keeps
//! names unique. Values are validated numerics, not free-form strings; the
//! report boundary is where strings become `f64` or fail.
//!
//! [`reconcile`] is pure: it computes the add/remove/update lists and the
//! caller applies them to whatever it renders or stores.

use std::collections::BTreeMap;

use crate::error::ParameterError;

/// One named numeric parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
}

/// Ordered mapping of unique parameter names to numeric values. Insertion
/// order reflects the remote model's parameter order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSet {
    entries: Vec<Parameter>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a parameter. Updates keep the original position.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value,
            None => self.entries.push(Parameter { name, value }),
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.iter().find(|p| p.name == name).map(|p| p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build a set from a flat name→value report, validating every value as
    /// a finite number.
    pub fn from_report(report: &BTreeMap<String, String>) -> Result<Self, ParameterError> {
        let mut set = Self::new();
        for (name, raw) in report {
            let value: f64 = raw.trim().parse().map_err(|_| ParameterError::NonNumeric {
                name: name.clone(),
                value: raw.clone(),
            })?;
            if !value.is_finite() {
                return Err(ParameterError::NotFinite { name: name.clone() });
            }
            set.insert(name.clone(), value);
        }
        Ok(set)
    }
}

impl FromIterator<(String, f64)> for ParameterSet {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        let mut set = Self::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

/// The three operation lists a reconciliation produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Present remotely, absent locally. Remote order.
    pub to_add: Vec<Parameter>,
    /// Present locally, absent remotely. Local order.
    pub to_remove: Vec<String>,
    /// Present in both with a value change beyond epsilon. Remote order.
    pub to_update: Vec<Parameter>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty() && self.to_update.is_empty()
    }
}

/// Diff the remote parameter set against the current one.
///
/// Updates below `epsilon` are dropped so floating-point noise in the report
/// does not churn the caller's model.
pub fn reconcile(current: &ParameterSet, remote: &ParameterSet, epsilon: f64) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();

    for parameter in remote.iter() {
        match current.get(&parameter.name) {
            None => plan.to_add.push(parameter.clone()),
            Some(existing) if (existing - parameter.value).abs() > epsilon => {
                plan.to_update.push(parameter.clone());
            }
            Some(_) => {}
        }
    }
    for parameter in current.iter() {
        if !remote.contains(&parameter.name) {
            plan.to_remove.push(parameter.name.clone());
        }
    }
    plan
}

/// Parse a flat key/value report body.
///
/// Accepts either a JSON object of name→value (values may be numbers or
/// numeric strings) or plain `name=value` lines.
pub fn parse_report(body: &str) -> Result<BTreeMap<String, String>, crate::error::MetadataError> {
    let trimmed = body.trim();

    if trimmed.starts_with('{') {
        let value: serde_json::Value =
            serde_json::from_str(trimmed).map_err(|e| crate::error::MetadataError::MalformedReport {
                reason: e.to_string(),
            })?;
        let object = value
            .as_object()
            .ok_or_else(|| crate::error::MetadataError::MalformedReport {
                reason: "top-level JSON value is not an object".to_string(),
            })?;
        let mut report = BTreeMap::new();
        for (name, value) in object {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return Err(crate::error::MetadataError::MalformedReport {
                        reason: format!("value of '{}' is not scalar: {}", name, other),
                    });
                }
            };
            report.insert(name.clone(), rendered);
        }
        return Ok(report);
    }

    let mut report = BTreeMap::new();
    for line in trimmed.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once('=') else {
            return Err(crate::error::MetadataError::MalformedReport {
                reason: format!("line without '=': {}", line),
            });
        };
        report.insert(name.trim().to_string(), value.trim().to_string());
    }
    Ok(report)
}
