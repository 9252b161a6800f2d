//! Label sets and equality selectors
//!
//! A selector is a label set read as a conjunction of required `key=value`
//! pairs. Keys follow `^(prefix/)?name$`, where both parts are DNS-label-like
//! tokens; values use the same token grammar or are empty.

use std::collections::BTreeMap;

use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, ObjectValidation, Schema, SchemaObject, StringValidation};

use crate::{Error, Result};

/// Label set: label key to label value
pub type LabelSet = BTreeMap<String, String>;

/// Pattern every label key must match
pub const LABEL_KEY_PATTERN: &str =
    r"^((([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])/)?(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])$";

/// Pattern every label value must match
pub const LABEL_VALUE_PATTERN: &str = r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$";

/// Does `candidate` satisfy every `key=value` pair of `selector`?
///
/// A missing key or a differing value fails the match; an empty selector
/// matches everything.
pub fn matches(selector: &LabelSet, candidate: &LabelSet) -> bool {
    selector
        .iter()
        .all(|(key, value)| candidate.get(key) == Some(value))
}

/// Check a single token: alphanumeric ends, `-`, `_` or `.` inside.
fn is_token(s: &str) -> bool {
    let bytes = s.as_bytes();
    let (Some(first), Some(last)) = (bytes.first(), bytes.last()) else {
        return false;
    };
    first.is_ascii_alphanumeric()
        && last.is_ascii_alphanumeric()
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

/// Validate a label (or annotation) key
pub fn validate_key(key: &str) -> Result<()> {
    let valid = match key.split_once('/') {
        Some((prefix, name)) => is_token(prefix) && is_token(name),
        None => is_token(key),
    };
    if valid {
        Ok(())
    } else {
        Err(Error::validation_for(
            key,
            format!("label key must match {LABEL_KEY_PATTERN}"),
        ))
    }
}

/// Validate a label value (empty is allowed)
pub fn validate_value(value: &str) -> Result<()> {
    if value.is_empty() || is_token(value) {
        Ok(())
    } else {
        Err(Error::validation_for(
            value,
            format!("label value must match {LABEL_VALUE_PATTERN}"),
        ))
    }
}

/// Validate every entry of a label set or selector
pub fn validate(labels: &LabelSet) -> Result<()> {
    for (key, value) in labels {
        validate_key(key)?;
        validate_value(value)?;
    }
    Ok(())
}

/// Schema for a label set: a pattern-keyed map of pattern-checked strings
pub fn label_set_schema(_: &mut SchemaGenerator) -> Schema {
    let value = SchemaObject {
        instance_type: Some(InstanceType::String.into()),
        string: Some(Box::new(StringValidation {
            pattern: Some(LABEL_VALUE_PATTERN.to_string()),
            ..Default::default()
        })),
        ..Default::default()
    };
    let mut object = ObjectValidation::default();
    object
        .pattern_properties
        .insert(LABEL_KEY_PATTERN.to_string(), value.into());
    SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        object: Some(Box::new(object)),
        ..Default::default()
    }
    .into()
}
