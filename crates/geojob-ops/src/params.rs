//! Typed accessors over the opaque job input.

use crate::OperationError;
use serde_json::Value;

fn invalid(msg: impl Into<String>) -> OperationError {
    OperationError::InvalidInput(msg.into())
}

pub(crate) fn as_object(
    input: &Value,
) -> Result<&serde_json::Map<String, Value>, OperationError> {
    input
        .as_object()
        .ok_or_else(|| invalid("input must be a JSON object"))
}

pub(crate) fn number(input: &Value, field: &str) -> Result<Option<f64>, OperationError> {
    match as_object(input)?.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_f64()
            .filter(|x| x.is_finite())
            .map(Some)
            .ok_or_else(|| invalid(format!("`{field}` must be a finite number"))),
    }
}

pub(crate) fn required_number(input: &Value, field: &str) -> Result<f64, OperationError> {
    number(input, field)?.ok_or_else(|| invalid(format!("`{field}` is required")))
}

/// Non-empty array of finite numbers.
pub(crate) fn series(input: &Value, field: &str) -> Result<Vec<f64>, OperationError> {
    let values = as_object(input)?
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| invalid(format!("`{field}` must be an array of numbers")))?;
    if values.is_empty() {
        return Err(invalid(format!("`{field}` must not be empty")));
    }
    values
        .iter()
        .map(|v| {
            v.as_f64()
                .filter(|x| x.is_finite())
                .ok_or_else(|| invalid(format!("`{field}` contains a non-numeric value")))
        })
        .collect()
}

/// Two series of equal length.
pub(crate) fn paired_series(
    input: &Value,
    a: &str,
    b: &str,
) -> Result<(Vec<f64>, Vec<f64>), OperationError> {
    let left = series(input, a)?;
    let right = series(input, b)?;
    if left.len() != right.len() {
        return Err(invalid(format!(
            "`{a}` and `{b}` must have the same length ({} != {})",
            left.len(),
            right.len()
        )));
    }
    Ok((left, right))
}

pub(crate) fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 10_000.0).round() / 100.0
}
