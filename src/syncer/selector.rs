//! # Label Selectors
//!
//! Parser and matcher for Kubernetes label selector strings, used for the
//! `key=value` form of the sync annotation.
//!
//! Supported requirements, comma separated:
//!
//! | Form               | Matches when                          |
//! |--------------------|---------------------------------------|
//! | `key=value`        | label present with that value         |
//! | `key==value`       | same as `=`                           |
//! | `key!=value`       | label absent or with another value    |
//! | `key in (a,b)`     | label present with one of the values  |
//! | `key notin (a,b)`  | label absent or with none of them     |
//! | `key`              | label present                         |
//! | `!key`             | label absent                          |
//!
//! An empty selector matches everything.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use thiserror::Error;

static SET_REQUIREMENT_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(?P<key>[^\s()!=,]+)\s+(?P<op>in|notin)\s*\((?P<values>[^()]*)\)$").ok()
});

const MAX_NAME_LEN: usize = 63;
const MAX_PREFIX_LEN: usize = 253;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("invalid label key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("invalid label value '{value}': {reason}")]
    InvalidValue { value: String, reason: String },
    #[error("malformed requirement '{requirement}': {reason}")]
    Syntax { requirement: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Operator {
    Equals,
    NotEquals,
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    key: String,
    operator: Operator,
    values: BTreeSet<String>,
}

impl Requirement {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn operator(&self) -> Operator {
        self.operator
    }

    #[must_use]
    pub fn values(&self) -> &BTreeSet<String> {
        &self.values
    }

    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        let value = labels.get(&self.key);
        match self.operator {
            Operator::Equals | Operator::In => value.is_some_and(|v| self.values.contains(v)),
            Operator::NotEquals | Operator::NotIn => !value.is_some_and(|v| self.values.contains(v)),
            Operator::Exists => value.is_some(),
            Operator::DoesNotExist => value.is_none(),
        }
    }

    fn parse(raw: &str) -> Result<Self, SelectorError> {
        let syntax = |reason: &str| SelectorError::Syntax {
            requirement: raw.to_string(),
            reason: reason.to_string(),
        };

        if let Some(key) = raw.strip_prefix('!') {
            let key = key.trim();
            validate_key(key)?;
            return Ok(Self::new(key, Operator::DoesNotExist, []));
        }

        if let Some(regex) = SET_REQUIREMENT_REGEX.as_ref() {
            if let Some(captures) = regex.captures(raw) {
                let key = &captures["key"];
                validate_key(key)?;
                let operator = if &captures["op"] == "in" {
                    Operator::In
                } else {
                    Operator::NotIn
                };
                let values = captures["values"]
                    .split(',')
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .map(|v| validate_value(v).map(|()| v.to_string()))
                    .collect::<Result<BTreeSet<_>, _>>()?;
                if values.is_empty() {
                    return Err(syntax("set requirement needs at least one value"));
                }
                return Ok(Self {
                    key: key.to_string(),
                    operator,
                    values,
                });
            }
        }

        let (key, operator, value) = if let Some((k, v)) = raw.split_once("!=") {
            (k, Operator::NotEquals, Some(v))
        } else if let Some((k, v)) = raw.split_once("==") {
            (k, Operator::Equals, Some(v))
        } else if let Some((k, v)) = raw.split_once('=') {
            (k, Operator::Equals, Some(v))
        } else {
            (raw, Operator::Exists, None)
        };

        let key = key.trim();
        validate_key(key)?;
        match value {
            Some(value) => {
                let value = value.trim();
                if value.contains('=') || value.contains('!') {
                    return Err(syntax("unexpected operator in value"));
                }
                validate_value(value)?;
                Ok(Self::new(key, operator, [value]))
            }
            None => Ok(Self::new(key, operator, [])),
        }
    }

    fn new<'a>(key: &str, operator: Operator, values: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            key: key.to_string(),
            operator,
            values: values.into_iter().map(str::to_string).collect(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let first = self.values.iter().next().map(String::as_str).unwrap_or("");
        let joined = || self.values.iter().cloned().collect::<Vec<_>>().join(",");
        match self.operator {
            Operator::Equals => write!(f, "{}={}", self.key, first),
            Operator::NotEquals => write!(f, "{}!={}", self.key, first),
            Operator::In => write!(f, "{} in ({})", self.key, joined()),
            Operator::NotIn => write!(f, "{} notin ({})", self.key, joined()),
            Operator::Exists => write!(f, "{}", self.key),
            Operator::DoesNotExist => write!(f, "!{}", self.key),
        }
    }
}

/// A parsed label selector; all requirements must match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let requirements = split_requirements(input)
            .map_err(|reason| SelectorError::Syntax {
                requirement: input.to_string(),
                reason,
            })?
            .into_iter()
            .map(|raw| Requirement::parse(&raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { requirements })
    }

    /// Selector requiring every label in `labels` with its exact value
    #[must_use]
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        Self {
            requirements: labels
                .iter()
                .map(|(k, v)| Requirement::new(k, Operator::Equals, [v.as_str()]))
                .collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    #[must_use]
    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    /// Match against optional object labels, absent meaning no labels
    #[must_use]
    pub fn matches_opt(&self, labels: Option<&BTreeMap<String, String>>) -> bool {
        match labels {
            Some(labels) => self.matches(labels),
            None => self.matches(&BTreeMap::new()),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts = self
            .requirements
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        write!(f, "{}", parts.join(","))
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Split on commas that are not inside a parenthesized value set
fn split_requirements(input: &str) -> Result<Vec<String>, String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;

    for c in input.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| "unbalanced ')'".to_string())?;
                current.push(c);
            }
            ',' if depth == 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    if depth != 0 {
        return Err("unbalanced '('".to_string());
    }
    parts.push(current);

    let trimmed = parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .collect::<Vec<_>>();
    if trimmed.len() == 1 && trimmed[0].is_empty() {
        return Ok(Vec::new());
    }
    if trimmed.iter().any(String::is_empty) {
        return Err("empty requirement".to_string());
    }
    Ok(trimmed)
}

fn is_name(s: &str) -> bool {
    let bytes = s.as_bytes();
    match (bytes.first(), bytes.last()) {
        (Some(first), Some(last)) => {
            first.is_ascii_alphanumeric()
                && last.is_ascii_alphanumeric()
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        }
        _ => false,
    }
}

fn is_dns_subdomain(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_PREFIX_LEN
        && s.split('.').all(|label| {
            let bytes = label.as_bytes();
            let alnum = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
            match (bytes.first(), bytes.last()) {
                (Some(first), Some(last)) => {
                    alnum(first) && alnum(last) && bytes.iter().all(|b| alnum(b) || *b == b'-')
                }
                _ => false,
            }
        })
}

fn validate_key(key: &str) -> Result<(), SelectorError> {
    let invalid = |reason: &str| SelectorError::InvalidKey {
        key: key.to_string(),
        reason: reason.to_string(),
    };

    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    if let Some(prefix) = prefix {
        if !is_dns_subdomain(prefix) {
            return Err(invalid("prefix must be a DNS subdomain"));
        }
    }
    if name.is_empty() {
        return Err(invalid("name part must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name part must be 63 characters or less"));
    }
    if !is_name(name) {
        return Err(invalid(
            "name part must consist of alphanumerics, '-', '_' or '.', starting and ending with an alphanumeric",
        ));
    }
    Ok(())
}

fn validate_value(value: &str) -> Result<(), SelectorError> {
    if value.is_empty() {
        return Ok(());
    }
    let invalid = |reason: &str| SelectorError::InvalidValue {
        value: value.to_string(),
        reason: reason.to_string(),
    };
    if value.len() > MAX_NAME_LEN {
        return Err(invalid("must be 63 characters or less"));
    }
    if !is_name(value) {
        return Err(invalid(
            "must consist of alphanumerics, '-', '_' or '.', starting and ending with an alphanumeric",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_subdomain_prefix() {
        assert!(is_dns_subdomain("kubed.appscode.com"));
        assert!(is_dns_subdomain("a-1.b"));
        assert!(!is_dns_subdomain("Kubed.com"));
        assert!(!is_dns_subdomain("-a.b"));
        assert!(!is_dns_subdomain("a..b"));
    }

    #[test]
    fn test_split_respects_parentheses() {
        assert_eq!(
            split_requirements("env in (a,b), tier").unwrap(),
            vec!["env in (a,b)", "tier"]
        );
        assert!(split_requirements("env in (a,b").is_err());
        assert!(split_requirements("a,,b").is_err());
        assert!(split_requirements("   ").unwrap().is_empty());
    }
}
