//! Scalar - the payload carried by a Constant term.
//!
//! One runtime type discriminator per the data model: signed integer,
//! float, complex, a (truncated) arbitrary-precision integer, and
//! string. Arithmetic dispatches on this tag, retaining the original's
//! discipline of explicit promotion rules rather than host-language
//! operator overloading resolved at compile time (§9 "dynamic dispatch
//! in primitives").

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f64),
    Complex(f64, f64),
    BigInt(i128),
    Str(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Complex(re, im) => write!(f, "{}+{}i", re, im),
            Scalar::BigInt(v) => write!(f, "{}", v),
            Scalar::Str(v) => write!(f, "{}", v),
        }
    }
}

/// Error raised when an arithmetic or comparison operator is applied to
/// an incompatible pair of scalars (§7 "Reduction on non-applicable").
#[derive(Debug, Clone, PartialEq)]
pub struct NonNumeric(pub String);

impl Scalar {
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Complex(..) => "complex",
            Scalar::BigInt(_) => "bigint",
            Scalar::Str(_) => "string",
        }
    }

    /// Numeric promotion table: `Int op Int -> Int`, `Int op Float ->
    /// Float`, `Int op BigInt -> BigInt`, `Float op BigInt -> Float`
    /// (matching SPEC_FULL.md §3's promotion rules).
    pub fn add(&self, other: &Scalar) -> Result<Scalar, NonNumeric> {
        binary_numeric(self, other, "+", |a, b| a + b, |a, b| a + b, |a, b| a + b)
    }

    pub fn sub(&self, other: &Scalar) -> Result<Scalar, NonNumeric> {
        binary_numeric(self, other, "-", |a, b| a - b, |a, b| a - b, |a, b| a - b)
    }

    pub fn mul(&self, other: &Scalar) -> Result<Scalar, NonNumeric> {
        binary_numeric(self, other, "*", |a, b| a * b, |a, b| a * b, |a, b| a * b)
    }

    pub fn div(&self, other: &Scalar) -> Result<Scalar, NonNumeric> {
        binary_numeric(self, other, "/", |a, b| a / b, |a, b| a / b, |a, b| a / b)
    }

    pub fn eq_value(&self, other: &Scalar) -> Result<bool, NonNumeric> {
        match (self, other) {
            (Scalar::Str(a), Scalar::Str(b)) => Ok(a == b),
            (Scalar::Str(_), _) | (_, Scalar::Str(_)) => {
                Err(NonNumeric("cannot compare string with numeric".into()))
            }
            _ => {
                let (a, b) = promote_to_float(self, other)?;
                Ok(a == b)
            }
        }
    }

    pub fn lt(&self, other: &Scalar) -> Result<bool, NonNumeric> {
        let (a, b) = promote_to_float(self, other)?;
        Ok(a < b)
    }
}

fn promote_to_float(a: &Scalar, b: &Scalar) -> Result<(f64, f64), NonNumeric> {
    let fa = as_f64(a).ok_or_else(|| NonNumeric(format!("not numeric: {}", a.type_name())))?;
    let fb = as_f64(b).ok_or_else(|| NonNumeric(format!("not numeric: {}", b.type_name())))?;
    Ok((fa, fb))
}

fn as_f64(s: &Scalar) -> Option<f64> {
    match s {
        Scalar::Int(v) => Some(*v as f64),
        Scalar::Float(v) => Some(*v),
        Scalar::BigInt(v) => Some(*v as f64),
        _ => None,
    }
}

fn binary_numeric(
    a: &Scalar,
    b: &Scalar,
    op: &str,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
    big_op: impl Fn(i128, i128) -> i128,
) -> Result<Scalar, NonNumeric> {
    use Scalar::*;
    match (a, b) {
        (Int(x), Int(y)) => Ok(Int(int_op(*x, *y))),
        (Float(x), Float(y)) => Ok(Float(float_op(*x, *y))),
        (Int(x), Float(y)) | (Float(y), Int(x)) => Ok(Float(float_op(*x as f64, *y))),
        (BigInt(x), BigInt(y)) => Ok(BigInt(big_op(*x, *y))),
        (Int(x), BigInt(y)) | (BigInt(y), Int(x)) => Ok(BigInt(big_op(*x as i128, *y))),
        (Float(x), BigInt(y)) | (BigInt(y), Float(x)) => Ok(Float(float_op(*x, *y as f64))),
        (Complex(xr, xi), Complex(yr, yi)) if op == "+" => Ok(Complex(xr + yr, xi + yi)),
        (Complex(xr, xi), Complex(yr, yi)) if op == "-" => Ok(Complex(xr - yr, xi - yi)),
        (Complex(xr, xi), Complex(yr, yi)) if op == "*" => {
            Ok(Complex(xr * yr - xi * yi, xr * yi + xi * yr))
        }
        _ => Err(NonNumeric(format!(
            "cannot apply {} to {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Read a [`Scalar`] back out as a specific host type (§6.1 `compute<T>`:
/// "fully reduce and read primitive payload"). Kept narrow on purpose -
/// only the scalar shapes a test or embedder is likely to read back out
/// of a normal form.
impl TryFrom<&Scalar> for i64 {
    type Error = NonNumeric;
    fn try_from(s: &Scalar) -> Result<i64, NonNumeric> {
        match s {
            Scalar::Int(v) => Ok(*v),
            Scalar::BigInt(v) => Ok(*v as i64),
            Scalar::Float(v) => Ok(*v as i64),
            other => Err(NonNumeric(format!("expected int, got {}", other.type_name()))),
        }
    }
}

impl TryFrom<&Scalar> for i128 {
    type Error = NonNumeric;
    fn try_from(s: &Scalar) -> Result<i128, NonNumeric> {
        match s {
            Scalar::BigInt(v) => Ok(*v),
            Scalar::Int(v) => Ok(*v as i128),
            other => Err(NonNumeric(format!("expected bigint, got {}", other.type_name()))),
        }
    }
}

impl TryFrom<&Scalar> for f64 {
    type Error = NonNumeric;
    fn try_from(s: &Scalar) -> Result<f64, NonNumeric> {
        as_f64(s).ok_or_else(|| NonNumeric(format!("expected float, got {}", s.type_name())))
    }
}

impl TryFrom<&Scalar> for bool {
    type Error = NonNumeric;
    fn try_from(s: &Scalar) -> Result<bool, NonNumeric> {
        match s {
            Scalar::Int(v) => Ok(*v != 0),
            other => Err(NonNumeric(format!("expected int (as bool), got {}", other.type_name()))),
        }
    }
}

impl TryFrom<&Scalar> for String {
    type Error = NonNumeric;
    fn try_from(s: &Scalar) -> Result<String, NonNumeric> {
        match s {
            Scalar::Str(v) => Ok(v.clone()),
            other => Err(NonNumeric(format!("expected string, got {}", other.type_name()))),
        }
    }
}
