//! Forgiving field deserializers for browser-submitted forms.
//!
//! The dashboard posts toggles as either JSON booleans or the strings
//! `"true"`/`"false"`, and numeric fields as either numbers or strings.
//! These helpers are used with `#[serde(deserialize_with = ...)]` and
//! never fail on a well-formed JSON value: unparseable input degrades to
//! the documented default instead.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Default upscale factor when the request omits or garbles it.
pub const DEFAULT_SCALE: f64 = 2.0;

/// Smallest accepted upscale factor.
pub const MIN_SCALE: f64 = 1.0;

/// Largest accepted upscale factor.
pub const MAX_SCALE: f64 = 4.0;

/// `true` only for JSON `true` or a case-insensitive `"true"` string.
pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    })
}

/// Upscale factor from a number or numeric string, normalised by
/// [`normalize_scale`].
pub fn scale<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(normalize_scale(value.as_ref().and_then(number_from)))
}

/// Port number from a number or numeric string. Zero, negative and
/// out-of-range values become `None` so the caller applies its default.
pub fn port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value
        .as_ref()
        .and_then(number_from)
        .filter(|p| p.fract() == 0.0 && *p > 0.0 && *p <= f64::from(u16::MAX))
        .map(|p| p as u16))
}

/// Default serde value for an absent upscale factor.
pub fn default_scale() -> f64 {
    DEFAULT_SCALE
}

/// Apply the default for missing, non-finite or non-positive input, then
/// clamp into `[MIN_SCALE, MAX_SCALE]`.
pub fn normalize_scale(raw: Option<f64>) -> f64 {
    match raw {
        Some(v) if v.is_finite() && v > 0.0 => v.clamp(MIN_SCALE, MAX_SCALE),
        _ => DEFAULT_SCALE,
    }
}

fn number_from(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
