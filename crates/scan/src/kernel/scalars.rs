//! Scalar values used by predicates, partition values and file statistics.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use arrow_array::{
    new_null_array, ArrayRef, BooleanArray, Date32Array, Decimal128Array, Float64Array, Int64Array,
    StringArray, TimestampMicrosecondArray,
};
use arrow_schema::{DataType as ArrowDataType, TimeUnit};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use super::schema::PrimitiveType;
use crate::{DeltaResult, DeltaTableError};

/// A single typed value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    /// Null of any type
    Null,
    /// Boolean value
    Boolean(bool),
    /// Any integral value
    Long(i64),
    /// Any floating point value
    Double(f64),
    /// Unscaled value, precision and scale
    Decimal(i128, u8, i8),
    /// UTF-8 string
    String(String),
    /// Days since the unix epoch
    Date(i32),
    /// Microseconds since the unix epoch
    Timestamp(i64),
}

impl Scalar {
    /// Whether this is [`Scalar::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Parse the serialized form of a partition value.
    ///
    /// `None` (or a missing entry) denotes a null partition value.
    pub fn from_partition_value(value: Option<&str>, ty: &PrimitiveType) -> DeltaResult<Self> {
        let Some(raw) = value else {
            return Ok(Scalar::Null);
        };
        let invalid = || {
            DeltaTableError::generic(format!("Invalid partition value '{raw}' for type {ty}"))
        };
        let scalar = match ty {
            PrimitiveType::String => Scalar::String(raw.to_string()),
            // non-string partition values serialize null as an empty string
            _ if raw.is_empty() => Scalar::Null,
            PrimitiveType::Long
            | PrimitiveType::Integer
            | PrimitiveType::Short
            | PrimitiveType::Byte => Scalar::Long(raw.parse().map_err(|_| invalid())?),
            PrimitiveType::Float | PrimitiveType::Double => {
                Scalar::Double(raw.parse().map_err(|_| invalid())?)
            }
            PrimitiveType::Decimal(precision, scale) => Scalar::Decimal(
                parse_decimal(raw, *precision, *scale).ok_or_else(invalid)?,
                *precision,
                *scale,
            ),
            PrimitiveType::Boolean => Scalar::Boolean(match raw.to_ascii_lowercase().as_str() {
                "true" => true,
                "false" => false,
                _ => return Err(invalid()),
            }),
            PrimitiveType::Date => Scalar::Date(parse_date(raw).ok_or_else(invalid)?),
            PrimitiveType::Timestamp | PrimitiveType::TimestampNtz => {
                Scalar::Timestamp(parse_timestamp(raw).ok_or_else(invalid)?)
            }
            PrimitiveType::Binary => Scalar::String(raw.to_string()),
        };
        Ok(scalar)
    }

    /// Interpret a value of the JSON file statistics.
    ///
    /// Returns `None` for values that can not be used for pruning.
    pub fn from_stats_value(value: &serde_json::Value, ty: &PrimitiveType) -> Option<Self> {
        use serde_json::Value;
        match (ty, value) {
            (_, Value::Null) => Some(Scalar::Null),
            (
                PrimitiveType::Long
                | PrimitiveType::Integer
                | PrimitiveType::Short
                | PrimitiveType::Byte,
                Value::Number(n),
            ) => n.as_i64().map(Scalar::Long),
            (PrimitiveType::Float | PrimitiveType::Double, Value::Number(n)) => {
                n.as_f64().map(Scalar::Double)
            }
            (PrimitiveType::Decimal(precision, scale), Value::Number(n)) => {
                let raw = n.to_string();
                // floats beyond 15 significant digits no longer hold the written value
                if n.is_f64() && significant_digits(&raw) > 15 {
                    return None;
                }
                parse_decimal(&raw, *precision, *scale)
                    .map(|v| Scalar::Decimal(v, *precision, *scale))
            }
            (PrimitiveType::Boolean, Value::Bool(b)) => Some(Scalar::Boolean(*b)),
            (PrimitiveType::String, Value::String(s)) => Some(Scalar::String(s.clone())),
            (PrimitiveType::Date, Value::String(s)) => parse_date(s).map(Scalar::Date),
            (PrimitiveType::Timestamp | PrimitiveType::TimestampNtz, Value::String(s)) => {
                parse_timestamp(s).map(Scalar::Timestamp)
            }
            _ => None,
        }
    }

    /// Compare two non-null scalars of compatible types.
    pub fn compare(&self, other: &Scalar) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Boolean(a), Scalar::Boolean(b)) => a.partial_cmp(b),
            (Scalar::Long(a), Scalar::Long(b)) => a.partial_cmp(b),
            (Scalar::Double(a), Scalar::Double(b)) => a.partial_cmp(b),
            (Scalar::Decimal(a, _, sa), Scalar::Decimal(b, _, sb)) => {
                let scale = (*sa).max(*sb);
                rescale(*a, *sa, scale)?.partial_cmp(&rescale(*b, *sb, scale)?)
            }
            (Scalar::Decimal(a, _, sa), Scalar::Long(b)) => {
                let scale = (*sa).max(0);
                rescale(*a, *sa, scale)?.partial_cmp(&rescale(i128::from(*b), 0, scale)?)
            }
            (Scalar::Long(_), Scalar::Decimal(..)) => other.compare(self).map(Ordering::reverse),
            (Scalar::Decimal(a, _, s), Scalar::Double(b)) => {
                (*a as f64 / 10f64.powi(i32::from(*s))).partial_cmp(b)
            }
            (Scalar::Double(_), Scalar::Decimal(..)) => other.compare(self).map(Ordering::reverse),
            (Scalar::Long(a), Scalar::Double(b)) => (*a as f64).partial_cmp(b),
            (Scalar::Double(a), Scalar::Long(b)) => a.partial_cmp(&(*b as f64)),
            (Scalar::String(a), Scalar::String(b)) => a.partial_cmp(b),
            (Scalar::Date(a), Scalar::Date(b)) => a.partial_cmp(b),
            (Scalar::Timestamp(a), Scalar::Timestamp(b)) => a.partial_cmp(b),
            (Scalar::Date(_), Scalar::String(s)) => {
                self.compare(&Scalar::Date(parse_date(s)?))
            }
            (Scalar::String(s), Scalar::Date(_)) => Scalar::Date(parse_date(s)?).compare(other),
            (Scalar::Timestamp(_), Scalar::String(s)) => {
                self.compare(&Scalar::Timestamp(parse_timestamp(s)?))
            }
            (Scalar::String(s), Scalar::Timestamp(_)) => {
                Scalar::Timestamp(parse_timestamp(s)?).compare(other)
            }
            _ => None,
        }
    }

    /// The arrow type this scalar naturally maps to.
    pub fn data_type(&self) -> ArrowDataType {
        match self {
            Scalar::Null => ArrowDataType::Null,
            Scalar::Boolean(_) => ArrowDataType::Boolean,
            Scalar::Long(_) => ArrowDataType::Int64,
            Scalar::Double(_) => ArrowDataType::Float64,
            Scalar::Decimal(_, precision, scale) => ArrowDataType::Decimal128(*precision, *scale),
            Scalar::String(_) => ArrowDataType::Utf8,
            Scalar::Date(_) => ArrowDataType::Date32,
            Scalar::Timestamp(_) => ArrowDataType::Timestamp(TimeUnit::Microsecond, None),
        }
    }

    /// Array repeating this scalar `num_rows` times.
    pub fn to_array(&self, num_rows: usize) -> DeltaResult<ArrayRef> {
        let array: ArrayRef = match self {
            Scalar::Null => new_null_array(&ArrowDataType::Null, num_rows),
            Scalar::Boolean(v) => Arc::new(BooleanArray::from(vec![*v; num_rows])),
            Scalar::Long(v) => Arc::new(Int64Array::from_value(*v, num_rows)),
            Scalar::Double(v) => Arc::new(Float64Array::from_value(*v, num_rows)),
            Scalar::Decimal(v, precision, scale) => Arc::new(
                Decimal128Array::from_value(*v, num_rows)
                    .with_precision_and_scale(*precision, *scale)?,
            ),
            Scalar::String(v) => Arc::new(StringArray::from_iter_values(
                std::iter::repeat(v.as_str()).take(num_rows),
            )),
            Scalar::Date(v) => Arc::new(Date32Array::from_value(*v, num_rows)),
            Scalar::Timestamp(v) => Arc::new(TimestampMicrosecondArray::from_value(*v, num_rows)),
        };
        Ok(array)
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Scalar::Null => write!(f, "NULL"),
            Scalar::Boolean(v) => write!(f, "{v}"),
            Scalar::Long(v) => write!(f, "{v}"),
            Scalar::Double(v) => write!(f, "{v}"),
            Scalar::Decimal(v, _, scale) => f.write_str(&format_decimal(*v, *scale)),
            Scalar::String(v) => write!(f, "'{v}'"),
            Scalar::Date(v) => match NaiveDate::from_num_days_from_ce_opt(v + EPOCH_DAYS_FROM_CE) {
                Some(date) => write!(f, "DATE '{date}'"),
                None => write!(f, "DATE {v}"),
            },
            Scalar::Timestamp(v) => match DateTime::<Utc>::from_timestamp_micros(*v) {
                Some(ts) => write!(f, "TIMESTAMP '{}'", ts.naive_utc()),
                None => write!(f, "TIMESTAMP {v}"),
            },
        }
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Boolean(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Long(value.into())
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Long(value)
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Scalar::Double(value)
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::String(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::String(value)
    }
}

const EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn parse_date(raw: &str) -> Option<i32> {
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    Some(date.signed_duration_since(NaiveDate::default()).num_days() as i32)
}

/// Parse a decimal literal (optionally with exponent) into its unscaled value.
///
/// `None` if the value has more fractional digits than `scale` allows or does
/// not fit `precision`.
fn parse_decimal(raw: &str, precision: u8, scale: i8) -> Option<i128> {
    let raw = raw.trim();
    let (negative, unsigned) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };
    let (mantissa, exponent) = match unsigned.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (mantissa, exponent.parse::<i32>().ok()?),
        None => (unsigned, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let digits = int_part.chars().chain(frac_part.chars());
    let mut value = 0i128;
    // position of the decimal point relative to the last digit
    let mut shift = exponent - frac_part.len() as i32 + i32::from(scale);
    let mut dropped_nonzero = false;
    let total = int_part.len() + frac_part.len();
    for (idx, c) in digits.enumerate() {
        let digit = i128::from(c.to_digit(10)?);
        // digits right of the scale must be zero
        let remaining = (total - idx - 1) as i32;
        if shift + remaining < 0 {
            dropped_nonzero |= digit != 0;
            continue;
        }
        value = value.checked_mul(10)?.checked_add(digit)?;
    }
    if dropped_nonzero {
        return None;
    }
    if shift < 0 {
        // already dropped the trailing zeros skipped above
        shift = 0;
    }
    value = value.checked_mul(10i128.checked_pow(shift as u32)?)?;
    if value >= 10i128.checked_pow(u32::from(precision))? {
        return None;
    }
    Some(if negative { -value } else { value })
}

fn significant_digits(raw: &str) -> usize {
    let mantissa = raw.split(['e', 'E']).next().unwrap_or(raw);
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();
    digits.trim_start_matches('0').trim_end_matches('0').len()
}

fn rescale(value: i128, from: i8, to: i8) -> Option<i128> {
    let diff = u32::try_from(i32::from(to) - i32::from(from)).ok()?;
    value.checked_mul(10i128.checked_pow(diff)?)
}

fn format_decimal(value: i128, scale: i8) -> String {
    if scale <= 0 {
        return format!("{value}{}", "0".repeat(scale.unsigned_abs() as usize));
    }
    let scale = scale as usize;
    let digits = value.unsigned_abs().to_string();
    let digits = format!("{digits:0>width$}", width = scale + 1);
    let (int_part, frac_part) = digits.split_at(digits.len() - scale);
    let sign = if value < 0 { "-" } else { "" };
    format!("{sign}{int_part}.{frac_part}")
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc).timestamp_micros());
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d"]
        .iter()
        .find_map(|fmt| {
            NaiveDateTime::parse_from_str(raw, fmt).ok().or_else(|| {
                NaiveDate::parse_from_str(raw, fmt)
                    .ok()
                    .and_then(|d| d.and_hms_opt(0, 0, 0))
            })
        })
        .map(|ts| ts.and_utc().timestamp_micros())
}
