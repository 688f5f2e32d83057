// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Label sets attached to log records.

use crate::config::{MAX_LABELS, MAX_LABEL_NAME_LEN, MAX_LABEL_VALUE_LEN};
use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered `name -> value` mapping. Names are unique.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeMap<String, String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a label set, rejecting repeated names.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = BTreeMap::new();
        for (k, v) in pairs {
            let k = k.into();
            if map.contains_key(&k) {
                return Err(ValidationError::DuplicateLabel(k));
            }
            map.insert(k, v.into());
        }
        Ok(Self(map))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Check count, name syntax and lengths.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.0.len() > MAX_LABELS {
            return Err(ValidationError::TooManyLabels { count: self.0.len(), max: MAX_LABELS });
        }
        for (name, value) in &self.0 {
            validate_name(name)?;
            if value.len() > MAX_LABEL_VALUE_LEN {
                return Err(ValidationError::LabelTooLong {
                    name: name.clone(),
                    len: value.len(),
                    max: MAX_LABEL_VALUE_LEN,
                });
            }
        }
        Ok(())
    }
}

// [A-Za-z_][A-Za-z0-9_]*
fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyLabelName);
    }
    if name.len() > MAX_LABEL_NAME_LEN {
        return Err(ValidationError::LabelTooLong {
            name: name.to_string(),
            len: name.len(),
            max: MAX_LABEL_NAME_LEN,
        });
    }
    let mut bytes = name.bytes();
    let first_ok = bytes
        .next()
        .map(|b| b.is_ascii_alphabetic() || b == b'_')
        .unwrap_or(false);
    if !first_ok || !bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(ValidationError::InvalidLabelName(name.to_string()));
    }
    Ok(())
}
