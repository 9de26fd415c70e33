//! Scalar values and the dtype lattice shared by the schema, expression and
//! chunk layers.

use std::cmp::Ordering;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};

/// One of the logical column types the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    Null,
    Bool,
    Int,
    Float,
    String,
    Date,
    Datetime,
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Dtype::Null => "null",
            Dtype::Bool => "bool",
            Dtype::Int => "int",
            Dtype::Float => "float",
            Dtype::String => "string",
            Dtype::Date => "date",
            Dtype::Datetime => "datetime",
        };
        f.write_str(s)
    }
}

/// Epoch used for `Dtype::Date`: day count, day 0 = 1970-01-01.
const DATE_EPOCH_DAYS: i64 = 0;

/// A single scalar, owned. Used for literal nodes and for aggregator running
/// state (e.g. current min/max).
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Day count since 1970-01-01.
    Date(i32),
    /// Nanoseconds since epoch, plus the number of sub-second digits that
    /// were present in the original literal (0..=9), preserved purely for
    /// display.
    Datetime(i64, u32),
}

impl Scalar {
    pub fn dtype(&self) -> Dtype {
        match self {
            Scalar::Bool(_) => Dtype::Bool,
            Scalar::Int(_) => Dtype::Int,
            Scalar::Float(_) => Dtype::Float,
            Scalar::String(_) => Dtype::String,
            Scalar::Date(_) => Dtype::Date,
            Scalar::Datetime(..) => Dtype::Datetime,
        }
    }

    /// Parse a value of the given dtype from its canonical text form.
    pub fn parse(dtype: Dtype, text: &str) -> Result<Scalar, String> {
        match dtype {
            Dtype::Null => Err("cannot parse a value of dtype null".to_string()),
            Dtype::Bool => text
                .parse::<bool>()
                .map(Scalar::Bool)
                .map_err(|e| e.to_string()),
            Dtype::Int => text
                .parse::<i64>()
                .map(Scalar::Int)
                .map_err(|e| e.to_string()),
            Dtype::Float => text
                .parse::<f64>()
                .map(Scalar::Float)
                .map_err(|e| e.to_string()),
            Dtype::String => Ok(Scalar::String(text.to_string())),
            Dtype::Date => {
                let d = NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|e| e.to_string())?;
                let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
                let days = (d - epoch).num_days() + DATE_EPOCH_DAYS;
                Ok(Scalar::Date(days as i32))
            }
            Dtype::Datetime => parse_datetime(text),
        }
    }

    /// Canonical text form, used both for `to_string()`/display and (for
    /// most dtypes) as the JSON literal's inner text.
    pub fn canonical_text(&self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => format_float(*f),
            Scalar::String(s) => s.clone(),
            Scalar::Date(days) => {
                let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
                let date = epoch + chrono::Duration::days(*days as i64);
                date.format("%Y-%m-%d").to_string()
            }
            Scalar::Datetime(nanos, precision) => format_datetime(*nanos, *precision),
        }
    }

    /// Total order across values of the same dtype. Nulls are handled by the
    /// caller (this operates on present values only).
    ///
    /// NaN sorts as greater than every other float including +infinity, and
    /// two NaNs compare equal only if bit-identical; this gives a genuine
    /// total order usable for both sorting and group-key hashing.
    pub fn total_cmp(&self, other: &Scalar) -> Ordering {
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
            (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
            (Scalar::Float(a), Scalar::Float(b)) => a.total_cmp(b),
            (Scalar::String(a), Scalar::String(b)) => a.cmp(b),
            (Scalar::Date(a), Scalar::Date(b)) => a.cmp(b),
            (Scalar::Datetime(a, _), Scalar::Datetime(b, _)) => a.cmp(b),
            _ => panic!("total_cmp called on mismatched scalar dtypes"),
        }
    }

    /// Equality used for grouping: NaN bit-patterns must match exactly for
    /// two floats to be considered the same group key.
    pub fn group_eq(&self, other: &Scalar) -> bool {
        match (self, other) {
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Int(a), Scalar::Int(b)) => a == b,
            (Scalar::Float(a), Scalar::Float(b)) => a.to_bits() == b.to_bits(),
            (Scalar::String(a), Scalar::String(b)) => a == b,
            (Scalar::Date(a), Scalar::Date(b)) => a == b,
            (Scalar::Datetime(a, _), Scalar::Datetime(b, _)) => a == b,
            _ => false,
        }
    }
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        return "NaN".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if f == f.trunc() && f.abs() < 1e15 {
        format!("{f:.1}")
    } else {
        // Rust's default float Display already produces the shortest
        // round-trippable representation.
        format!("{f}")
    }
}

fn parse_datetime(text: &str) -> Result<Scalar, String> {
    // Accept "YYYY-MM-DDTHH:MM:SS[.fraction]" (no timezone, per spec).
    let (main, frac) = match text.split_once('.') {
        Some((m, f)) => (m, Some(f)),
        None => (text, None),
    };
    let naive = NaiveDateTime::parse_from_str(main, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(main, "%Y-%m-%d %H:%M:%S"))
        .map_err(|e| e.to_string())?;
    let dt = Utc.from_utc_datetime(&naive);
    let mut nanos = dt.timestamp() * 1_000_000_000;

    let precision = match frac {
        Some(f) if !f.is_empty() => {
            let digits = f.len().min(9) as u32;
            let padded = format!("{f:0<9}");
            let frac_nanos: i64 = padded[..9].parse().map_err(|e: std::num::ParseIntError| e.to_string())?;
            nanos += frac_nanos;
            digits
        }
        _ => 0,
    };

    Ok(Scalar::Datetime(nanos, precision))
}

fn format_datetime(nanos: i64, precision: u32) -> String {
    let secs = nanos.div_euclid(1_000_000_000);
    let sub_nanos = nanos.rem_euclid(1_000_000_000) as u32;
    let dt = Utc.timestamp_opt(secs, sub_nanos).single().expect("valid timestamp");
    let base = dt.format("%Y-%m-%dT%H:%M:%S").to_string();
    if precision == 0 {
        base
    } else {
        let frac = format!("{sub_nanos:09}");
        format!("{base}.{}", &frac[..precision as usize])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_roundtrip() {
        let v = Scalar::parse(Dtype::Int, "42").unwrap();
        assert_eq!(v.canonical_text(), "42");
    }

    #[test]
    fn float_integral_keeps_one_decimal() {
        let v = Scalar::Float(3.0);
        assert_eq!(v.canonical_text(), "3.0");
    }

    #[test]
    fn datetime_roundtrip_preserves_precision() {
        let v = Scalar::parse(Dtype::Datetime, "2020-01-02T03:04:05.123").unwrap();
        assert_eq!(v.canonical_text(), "2020-01-02T03:04:05.123");
    }

    #[test]
    fn datetime_no_fraction() {
        let v = Scalar::parse(Dtype::Datetime, "2020-01-02T03:04:05").unwrap();
        assert_eq!(v.canonical_text(), "2020-01-02T03:04:05");
    }

    #[test]
    fn date_roundtrip() {
        let v = Scalar::parse(Dtype::Date, "2020-01-02").unwrap();
        assert_eq!(v.canonical_text(), "2020-01-02");
    }

    #[test]
    fn nan_group_eq_is_bitwise() {
        let a = Scalar::Float(f64::NAN);
        let b = Scalar::Float(f64::NAN);
        assert!(a.group_eq(&b));
        assert!(!Scalar::Float(1.0).group_eq(&Scalar::Float(f64::NAN)));
    }
}
