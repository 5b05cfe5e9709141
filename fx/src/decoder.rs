//! Upstream response decoding.
//!
//! The converter endpoint has answered in two shapes over its lifetime:
//!
//! - a plain HTML fragment carrying `<span class=bld>0.8066 USD</span>`;
//! - a near-JSON object literal with bare keys,
//!   `{lhs: "1 U.S. dollar",rhs: "0.8066 Singapore dollars",error: "",icc: true}`,
//!   served as ISO-8859-1 with JavaScript hex escapes and, for very small or
//!   very large values, a `mantissa &#215; 10<sup>exp</sup>` notation.
//!
//! Both are handled by explicit parsers. The object literal is repaired into
//! JSON and handed to `serde_json`; nothing in a payload is ever evaluated.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

static PLAIN_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<span class=bld>(\d+\.?\d*) [A-Z]{3}</span>").expect("valid regex")
});

static PLAIN_BARE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?)\s+[A-Z]{3}\s*$").expect("valid regex"));

static NO_CONVERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Could not convert\.").expect("valid regex"));

static HEX_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\\x([0-9A-Fa-f]{2})").expect("valid regex"));

// String literals are matched first so keys are only quoted outside them.
static BARE_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:[^"\\]|\\.)*"|([{,]\s*)([A-Za-z_][A-Za-z0-9_]*)\s*:"#).expect("valid regex")
});

static SCIENTIFIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<mantissa>\d[\d,]*(?:\.\d+)?)(?:\s*(?:&#215;|&times;|×)\s*10\s*<sup>\s*(?P<exp>[-−]?\d+)\s*</sup>)?",
    )
    .expect("valid regex")
});

/// Why a payload did not yield a rate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload explicitly says no conversion is available.
    #[error("No conversion available")]
    NoConversion,

    /// The payload matches no recognized grammar.
    #[error("Unrecognized payload: {0}")]
    Unrecognized(String),
}

/// Turns one upstream payload into a rate.
pub trait ResponseDecoder: Send + Sync {
    /// Decode a raw payload.
    fn decode(&self, payload: &[u8]) -> Result<Decimal, DecodeError>;
}

/// Decoder for the HTML fragment grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainDecoder;

impl ResponseDecoder for PlainDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Decimal, DecodeError> {
        decode_plain(&normalize_charset(payload))
    }
}

/// Decoder for the near-JSON object grammar.
#[derive(Debug, Clone, Copy, Default)]
pub struct StructuredDecoder;

impl ResponseDecoder for StructuredDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Decimal, DecodeError> {
        decode_structured(&normalize_charset(payload))
    }
}

/// Picks the grammar from the payload's shape. This is the default decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoDecoder;

impl ResponseDecoder for AutoDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Decimal, DecodeError> {
        let text = normalize_charset(payload);
        if text.trim_start().starts_with('{') {
            decode_structured(&text)
        } else {
            decode_plain(&text)
        }
    }
}

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Interpret the payload as UTF-8, falling back to ISO-8859-1. A leading
/// byte order mark is dropped.
fn normalize_charset(payload: &[u8]) -> Cow<'_, str> {
    let payload = payload.strip_prefix(UTF8_BOM).unwrap_or(payload);
    match std::str::from_utf8(payload) {
        Ok(text) => Cow::Borrowed(text),
        // Every Latin-1 byte maps to the code point of the same value.
        Err(_) => Cow::Owned(payload.iter().map(|&b| b as char).collect()),
    }
}

fn decode_plain(text: &str) -> Result<Decimal, DecodeError> {
    if let Some(caps) = PLAIN_MARKER.captures(text) {
        return parse_positive(&caps[1]);
    }
    if NO_CONVERSION.is_match(text) {
        return Err(DecodeError::NoConversion);
    }
    if let Some(caps) = PLAIN_BARE.captures(text) {
        return parse_positive(&caps[1]);
    }

    debug!(len = text.len(), "Payload matched no plain grammar");
    Err(DecodeError::Unrecognized(
        "no rate marker in response".to_string(),
    ))
}

#[derive(Debug, Deserialize)]
struct StructuredResponse {
    #[serde(default)]
    rhs: String,
    #[serde(default)]
    error: serde_json::Value,
}

impl StructuredResponse {
    /// A non-empty error that is not `"0"` means upstream has no rate.
    fn signals_error(&self) -> bool {
        match &self.error {
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => {
                let s = s.trim();
                !s.is_empty() && s != "0"
            }
            serde_json::Value::Number(n) => n.as_f64().map_or(true, |v| v != 0.0),
            serde_json::Value::Bool(b) => *b,
            _ => true,
        }
    }
}

fn decode_structured(text: &str) -> Result<Decimal, DecodeError> {
    if NO_CONVERSION.is_match(text) {
        return Err(DecodeError::NoConversion);
    }

    let json = repair_object_literal(text);
    let response: StructuredResponse = serde_json::from_str(&json)
        .map_err(|e| DecodeError::Unrecognized(format!("malformed object: {}", e)))?;

    if response.signals_error() {
        debug!(error = %response.error, "Upstream reported conversion error");
        return Err(DecodeError::NoConversion);
    }

    let rhs = strip_nbsp(&response.rhs);
    let caps = SCIENTIFIC
        .captures(&rhs)
        .ok_or_else(|| DecodeError::Unrecognized(format!("no number in rhs {:?}", rhs)))?;

    let mantissa = parse_positive(&caps["mantissa"].replace(',', ""))?;
    match caps.name("exp") {
        Some(exp) => {
            let exp: i32 = exp
                .as_str()
                .replace('−', "-")
                .parse()
                .map_err(|_| DecodeError::Unrecognized(format!("bad exponent {:?}", exp.as_str())))?;
            scale_by_power_of_ten(mantissa, exp)
        }
        None => Ok(mantissa),
    }
}

/// Make the object literal valid JSON: hex escapes become unicode escapes and
/// bare keys are quoted.
fn repair_object_literal(text: &str) -> String {
    let escaped = HEX_ESCAPE.replace_all(text.trim(), |caps: &Captures| format!("\\u00{}", &caps[1]));
    BARE_KEY
        .replace_all(&escaped, |caps: &Captures| match (caps.get(1), caps.get(2)) {
            (Some(lead), Some(key)) => format!("{}\"{}\":", lead.as_str(), key.as_str()),
            _ => caps[0].to_string(),
        })
        .into_owned()
}

fn strip_nbsp(text: &str) -> String {
    text.replace('\u{a0}', "")
        .replace("&#160;", "")
        .replace("&nbsp;", "")
}

fn parse_positive(number: &str) -> Result<Decimal, DecodeError> {
    let value: Decimal = number
        .parse()
        .map_err(|_| DecodeError::Unrecognized(format!("not a decimal: {:?}", number)))?;
    if value <= Decimal::ZERO {
        return Err(DecodeError::Unrecognized(format!("non-positive rate {}", value)));
    }
    Ok(value)
}

/// Compute `mantissa * 10^exp` exactly. Results that would need rounding
/// to fit a `Decimal` are rejected.
pub(crate) fn scale_by_power_of_ten(mantissa: Decimal, exp: i32) -> Result<Decimal, DecodeError> {
    let out_of_range = || DecodeError::Unrecognized(format!("exponent {} out of range", exp));

    let digits = mantissa.mantissa();
    let scale = i64::from(mantissa.scale()) - i64::from(exp);

    let value = if scale >= 0 {
        // Fails rather than rounds past 28 decimal places.
        let scale = u32::try_from(scale).map_err(|_| out_of_range())?;
        Decimal::try_from_i128_with_scale(digits, scale).map_err(|_| out_of_range())?
    } else {
        let shift = u32::try_from(-scale).map_err(|_| out_of_range())?;
        let digits = 10i128
            .checked_pow(shift)
            .and_then(|factor| digits.checked_mul(factor))
            .ok_or_else(out_of_range)?;
        Decimal::try_from_i128_with_scale(digits, 0).map_err(|_| out_of_range())?
    };

    if value.is_zero() {
        return Err(out_of_range());
    }
    Ok(value)
}
