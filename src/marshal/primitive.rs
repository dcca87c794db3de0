//! Numbers, booleans and strings.
//!
//! Integers accept any numeric representation that lands in range after
//! truncation toward zero; out of range is a range error, never a wrap.
//! Going the other way, values that fit in 32 bits become `Int`, wider
//! 64-bit values become `BigInt` and wide `u32` values become `Number`.

use crate::context::{Context, HostState};
use crate::core::error::{ArgError, CallError};
use crate::engine::Value;

use super::{Fit, FromValue, ToValue};

/// Reads a string the way script `Number(text)` does; `None` where that
/// would be `NaN`.
fn parse_number(text: &str) -> Option<f64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }
    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0o", 8), ("0O", 8), ("0b", 2), ("0B", 2)] {
        if let Some(digits) = trimmed.strip_prefix(prefix) {
            return radix_number(digits, radix);
        }
    }
    let unsigned = trimmed.strip_prefix(|c| c == '+' || c == '-').unwrap_or(trimmed);
    if unsigned == "Infinity" {
        return Some(if trimmed.starts_with('-') {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        });
    }
    if !is_decimal_literal(unsigned) {
        return None;
    }
    trimmed.parse::<f64>().ok()
}

fn radix_number(digits: &str, radix: u32) -> Option<f64> {
    if digits.is_empty() {
        return None;
    }
    digits.chars().try_fold(0.0f64, |acc, c| {
        c.to_digit(radix).map(|d| acc * f64::from(radix) + f64::from(d))
    })
}

/// `digits [. digits] [e [+-] digits]`, or the same starting at the dot.
fn is_decimal_literal(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut at = 0;
    let digits = |at: &mut usize| {
        let start = *at;
        while *at < bytes.len() && bytes[*at].is_ascii_digit() {
            *at += 1;
        }
        *at - start
    };
    let mut mantissa = digits(&mut at);
    if bytes.get(at) == Some(&b'.') {
        at += 1;
        mantissa += digits(&mut at);
    }
    if mantissa == 0 {
        return false;
    }
    if matches!(bytes.get(at), Some(b'e' | b'E')) {
        at += 1;
        if matches!(bytes.get(at), Some(b'+' | b'-')) {
            at += 1;
        }
        if digits(&mut at) == 0 {
            return false;
        }
    }
    at == bytes.len()
}

fn integer_from(value: &Value, min: i128, max: i128, expected: &'static str) -> Result<i128, ArgError> {
    let wide = match value {
        Value::Int(i) => i128::from(*i),
        Value::BigInt(b) => *b,
        Value::Number(n) => truncate(*n).ok_or(ArgError::Range { expected })?,
        Value::Bool(b) => i128::from(*b),
        Value::Null => 0,
        Value::String(s) => {
            let n = parse_number(s).ok_or(ArgError::Type { expected })?;
            truncate(n).ok_or(ArgError::Range { expected })?
        }
        Value::Undefined | Value::Object(_) => return Err(ArgError::Type { expected }),
    };
    if (min..=max).contains(&wide) {
        Ok(wide)
    } else {
        Err(ArgError::Range { expected })
    }
}

fn truncate(n: f64) -> Option<i128> {
    n.is_finite().then(|| n.trunc() as i128)
}

fn integer_fit(value: &Value, min: i128, max: i128) -> Fit {
    let range = min..=max;
    match value {
        Value::Int(i) if range.contains(&i128::from(*i)) => Fit::Exact,
        Value::Number(n) => match truncate(*n) {
            Some(t) if range.contains(&t) && n.fract() == 0.0 => Fit::Exact,
            Some(t) if range.contains(&t) => Fit::Compatible,
            _ => Fit::Invalid,
        },
        Value::BigInt(b) if range.contains(b) => Fit::Compatible,
        Value::Bool(_) | Value::Null => Fit::Coercible,
        Value::String(s) => match parse_number(s).and_then(truncate) {
            Some(t) if range.contains(&t) => Fit::Coercible,
            _ => Fit::Invalid,
        },
        _ => Fit::Invalid,
    }
}

fn integer_to_value(wide: i128, big: bool) -> Value {
    match i32::try_from(wide) {
        Ok(small) => Value::Int(small),
        Err(_) if big => Value::BigInt(wide),
        Err(_) => Value::Number(wide as f64),
    }
}

macro_rules! impl_integer {
    ($($ty:ty => $expected:literal, $big:literal;)+) => {
        $(
            impl FromValue for $ty {
                fn from_value<S: HostState>(_ctx: &Context<S>, value: &Value) -> Result<Self, ArgError> {
                    integer_from(value, <$ty>::MIN as i128, <$ty>::MAX as i128, $expected).map(|wide| wide as $ty)
                }

                fn fit<S: HostState>(_ctx: &Context<S>, value: &Value) -> Fit {
                    integer_fit(value, <$ty>::MIN as i128, <$ty>::MAX as i128)
                }
            }

            impl ToValue for $ty {
                fn to_value<S: HostState>(self, _ctx: &Context<S>) -> Result<Value, CallError> {
                    Ok(integer_to_value(self as i128, $big))
                }
            }
        )+
    };
}

impl_integer! {
    i8 => "byte", false;
    u8 => "octet", false;
    i16 => "short", false;
    u16 => "unsigned short", false;
    i32 => "long", false;
    u32 => "unsigned long", false;
    i64 => "long long", true;
    u64 => "unsigned long long", true;
    isize => "long long", true;
    usize => "unsigned long long", true;
}

fn float_from(value: &Value, expected: &'static str) -> Result<f64, ArgError> {
    match value {
        Value::Int(i) => Ok(f64::from(*i)),
        Value::Number(n) => Ok(*n),
        Value::BigInt(b) => Ok(*b as f64),
        Value::Bool(b) => Ok(f64::from(u8::from(*b))),
        Value::Null => Ok(0.0),
        Value::String(s) => parse_number(s).ok_or(ArgError::Type { expected }),
        Value::Undefined | Value::Object(_) => Err(ArgError::Type { expected }),
    }
}

fn float_fit(value: &Value) -> Fit {
    match value {
        Value::Number(_) => Fit::Exact,
        Value::Int(_) | Value::BigInt(_) => Fit::Compatible,
        Value::Bool(_) | Value::Null => Fit::Coercible,
        Value::String(s) if parse_number(s).is_some() => Fit::Coercible,
        _ => Fit::Invalid,
    }
}

impl FromValue for f64 {
    fn from_value<S: HostState>(_ctx: &Context<S>, value: &Value) -> Result<Self, ArgError> {
        float_from(value, "double")
    }

    fn fit<S: HostState>(_ctx: &Context<S>, value: &Value) -> Fit {
        float_fit(value)
    }
}

impl FromValue for f32 {
    fn from_value<S: HostState>(_ctx: &Context<S>, value: &Value) -> Result<Self, ArgError> {
        let wide = float_from(value, "float")?;
        if wide.is_finite() && wide.abs() > f64::from(f32::MAX) {
            return Err(ArgError::Range { expected: "float" });
        }
        Ok(wide as f32)
    }

    fn fit<S: HostState>(_ctx: &Context<S>, value: &Value) -> Fit {
        float_fit(value)
    }
}

impl ToValue for f64 {
    fn to_value<S: HostState>(self, _ctx: &Context<S>) -> Result<Value, CallError> {
        Ok(Value::Number(self))
    }
}

impl ToValue for f32 {
    fn to_value<S: HostState>(self, _ctx: &Context<S>) -> Result<Value, CallError> {
        Ok(Value::Number(f64::from(self)))
    }
}

impl FromValue for bool {
    fn from_value<S: HostState>(_ctx: &Context<S>, value: &Value) -> Result<Self, ArgError> {
        Ok(value.truthy())
    }

    fn fit<S: HostState>(_ctx: &Context<S>, value: &Value) -> Fit {
        match value {
            Value::Bool(_) => Fit::Exact,
            _ => Fit::Coercible,
        }
    }
}

impl ToValue for bool {
    fn to_value<S: HostState>(self, _ctx: &Context<S>) -> Result<Value, CallError> {
        Ok(Value::Bool(self))
    }
}

impl FromValue for String {
    fn from_value<S: HostState>(ctx: &Context<S>, value: &Value) -> Result<Self, ArgError> {
        Ok(match value {
            Value::String(s) => s.to_string(),
            other => ctx.realm().display_string(other),
        })
    }

    fn fit<S: HostState>(_ctx: &Context<S>, value: &Value) -> Fit {
        match value {
            Value::String(_) => Fit::Exact,
            _ => Fit::Coercible,
        }
    }
}

impl ToValue for String {
    fn to_value<S: HostState>(self, _ctx: &Context<S>) -> Result<Value, CallError> {
        Ok(Value::string(self))
    }
}

impl ToValue for &str {
    fn to_value<S: HostState>(self, _ctx: &Context<S>) -> Result<Value, CallError> {
        Ok(Value::string(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_conversion() {
        let long = |v: &Value| integer_from(v, i32::MIN as i128, i32::MAX as i128, "long");
        assert_eq!(long(&Value::Int(-5)).unwrap(), -5);
        assert_eq!(long(&Value::Number(2.9)).unwrap(), 2);
        assert_eq!(long(&Value::Number(-2.9)).unwrap(), -2);
        assert_eq!(long(&Value::string(" 12 ")).unwrap(), 12);
        assert_eq!(long(&Value::Bool(true)).unwrap(), 1);
        assert!(matches!(long(&Value::Number(f64::NAN)), Err(ArgError::Range { .. })));
        assert!(matches!(long(&Value::Number(1e12)), Err(ArgError::Range { .. })));
        assert!(matches!(long(&Value::string("abc")), Err(ArgError::Type { .. })));
        assert!(matches!(long(&Value::Undefined), Err(ArgError::Type { .. })));

        let octet = |v: &Value| integer_from(v, 0, 255, "octet");
        assert!(matches!(octet(&Value::Int(256)), Err(ArgError::Range { expected: "octet" })));
        assert!(matches!(octet(&Value::Int(-1)), Err(ArgError::Range { .. })));
    }

    #[test]
    fn test_integer_fit() {
        let fit = |v: &Value| integer_fit(v, 0, 255);
        assert_eq!(fit(&Value::Int(7)), Fit::Exact);
        assert_eq!(fit(&Value::Number(7.0)), Fit::Exact);
        assert_eq!(fit(&Value::Number(7.5)), Fit::Compatible);
        assert_eq!(fit(&Value::BigInt(7)), Fit::Compatible);
        assert_eq!(fit(&Value::string("7")), Fit::Coercible);
        assert_eq!(fit(&Value::string("seven")), Fit::Invalid);
        assert_eq!(fit(&Value::Int(300)), Fit::Invalid);
    }

    #[test]
    fn test_wide_integers() {
        assert_eq!(integer_to_value(5, true), Value::Int(5));
        assert_eq!(integer_to_value(1 << 40, true), Value::BigInt(1 << 40));
        assert_eq!(
            integer_to_value(i128::from(u32::MAX), false),
            Value::Number(f64::from(u32::MAX))
        );
    }

    #[test]
    fn test_float_coercion() {
        assert_eq!(float_from(&Value::string(""), "double").unwrap(), 0.0);
        assert_eq!(float_from(&Value::string("1.5e2"), "double").unwrap(), 150.0);
        assert!(float_from(&Value::string("x"), "double").is_err());
        assert_eq!(float_from(&Value::string(" 0x10 "), "double").unwrap(), 16.0);
        assert_eq!(float_from(&Value::string("0b101"), "double").unwrap(), 5.0);
        assert_eq!(float_from(&Value::string(".5"), "double").unwrap(), 0.5);
        assert_eq!(float_from(&Value::string("-Infinity"), "double").unwrap(), f64::NEG_INFINITY);
        for rejected in ["inf", "infinity", "nan", "NaN", "-0x10", "0x", "1e", "1_000", "."] {
            assert!(float_from(&Value::string(rejected), "double").is_err(), "{rejected}");
        }
        assert_eq!(float_fit(&Value::Int(1)), Fit::Compatible);
        assert_eq!(float_fit(&Value::Undefined), Fit::Invalid);
    }
}
