//! Description elements and typed attribute lookup
//!
//! An [`Element`] is an owned copy of one description node's tag and
//! attributes. The merge engine works on copies so that attribute
//! inheritance never touches the parsed tree.

use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttributeError {
    #[error("<{tag}> missing required '{name}' attribute")]
    Missing { tag: String, name: String },
    #[error("<{tag}> '{name}' attribute is invalid ('{value}')")]
    Invalid {
        tag: String,
        name: String,
        value: String,
    },
}

/// Tag plus attribute bag of a single description element
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    tag: String,
    attrs: BTreeMap<String, String>,
}

impl Element {
    /// Create an element with no attributes
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: BTreeMap::new(),
        }
    }

    /// Builder-style attribute setter, mostly useful in tests
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(name.into(), value.into());
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(|s| s.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attrs.contains_key(name)
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Copy every attribute present on `ancestor` but absent here.
    ///
    /// Explicit values on `self` always win.
    pub fn inherit_from(&mut self, ancestor: &Element) {
        for (name, value) in &ancestor.attrs {
            if !self.attrs.contains_key(name) {
                self.attrs.insert(name.clone(), value.clone());
            }
        }
    }

    /// Get a string attribute that must be present
    pub fn required(&self, name: &str) -> Result<&str, AttributeError> {
        self.attr(name).ok_or_else(|| AttributeError::Missing {
            tag: self.tag.clone(),
            name: name.to_string(),
        })
    }

    /// Get an optional integer attribute.
    ///
    /// Absent yields `Ok(None)`; present but unparseable (or out of range
    /// for `T`) is an error.
    pub fn int<T: TryFrom<u64>>(&self, name: &str) -> Result<Option<T>, AttributeError> {
        match self.attrs.get(name) {
            None => Ok(None),
            Some(raw) => parse_int(raw)
                .and_then(|v| T::try_from(v).ok())
                .map(Some)
                .ok_or_else(|| AttributeError::Invalid {
                    tag: self.tag.clone(),
                    name: name.to_string(),
                    value: raw.clone(),
                }),
        }
    }

    /// Get an integer attribute that must be present
    pub fn required_int<T: TryFrom<u64>>(&self, name: &str) -> Result<T, AttributeError> {
        self.int(name)?.ok_or_else(|| AttributeError::Missing {
            tag: self.tag.clone(),
            name: name.to_string(),
        })
    }

    /// Get an integer attribute, falling back to `default` when absent
    pub fn int_or<T: TryFrom<u64>>(&self, name: &str, default: T) -> Result<T, AttributeError> {
        Ok(self.int(name)?.unwrap_or(default))
    }

    /// Get a boolean attribute.
    ///
    /// Accepts `true`/`false`/`1`/`0`, trimmed and case-insensitive. Missing
    /// or unrecognised values give `default`.
    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        match self.attr(name).map(|v| v.trim().to_ascii_lowercase()) {
            Some(v) if v == "true" || v == "1" => true,
            Some(v) if v == "false" || v == "0" => false,
            _ => default,
        }
    }
}

/// Parse an integer written in decimal or with a `0x`, `0o` or `0b` prefix
pub fn parse_int(raw: &str) -> Option<u64> {
    let s = raw.trim();
    let s = s.strip_prefix('+').unwrap_or(s);
    let (digits, radix) = match s.get(..2) {
        Some("0x") | Some("0X") => (&s[2..], 16),
        Some("0o") | Some("0O") => (&s[2..], 8),
        Some("0b") | Some("0B") => (&s[2..], 2),
        _ => (s, 10),
    };
    let digits: String = digits.chars().filter(|&c| c != '_').collect();
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(&digits, radix).ok()
}
