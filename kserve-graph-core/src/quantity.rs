//! Kubernetes resource quantity parsing.
//!
//! Quantities have the form `<signedNumber><suffix>` where the suffix is a binary SI suffix
//! (`Ki`, `Mi`, `Gi`, `Ti`, `Pi`, `Ei`), a decimal SI suffix (`n`, `u`, `m`, `k`, `M`, `G`, `T`,
//! `P`, `E`) or a decimal exponent (`e3`, `E-2`).

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use thiserror::Error;

/// An error from parsing a quantity string.
#[derive(Debug, Error, PartialEq)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,
    #[error("quantity {0:?} has no numeric part")]
    MissingNumber(String),
    #[error("quantity {0:?} has an invalid numeric part")]
    InvalidNumber(String),
    #[error("quantity {0:?} has an unknown suffix")]
    InvalidSuffix(String),
}

/// A parsed quantity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ParsedQuantity {
    /// The value in base units, e.g. cores or bytes.
    pub value: f64,
}

impl ParsedQuantity {
    /// Parse the given quantity string.
    pub fn parse(input: &str) -> Result<Self, QuantityError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(QuantityError::Empty);
        }

        let split = input
            .char_indices()
            .find(|(idx, c)| !(c.is_ascii_digit() || *c == '.' || ((*c == '+' || *c == '-') && *idx == 0)))
            .map(|(idx, _)| idx)
            .unwrap_or_else(|| input.len());
        let (number, suffix) = input.split_at(split);
        if !number.chars().any(|c| c.is_ascii_digit()) {
            return Err(QuantityError::MissingNumber(input.into()));
        }
        if number.matches('.').count() > 1 || number.ends_with('.') {
            return Err(QuantityError::InvalidNumber(input.into()));
        }
        let mantissa: f64 = number.parse().map_err(|_| QuantityError::InvalidNumber(input.into()))?;
        let multiplier = suffix_multiplier(suffix).ok_or_else(|| QuantityError::InvalidSuffix(input.into()))?;
        Ok(Self { value: mantissa * multiplier })
    }

    /// Check if this quantity is zero.
    pub fn is_zero(&self) -> bool {
        self.value == 0.0
    }
}

/// Parse the given k8s quantity.
pub fn parse(quantity: &Quantity) -> Result<ParsedQuantity, QuantityError> {
    ParsedQuantity::parse(&quantity.0)
}

/// Check that the given quantity string is well formed.
pub fn validate(input: &str) -> Result<Quantity, QuantityError> {
    ParsedQuantity::parse(input).map(|_| Quantity(input.trim().to_string()))
}

/// Check if the given quantity is a well formed non-zero value.
pub fn is_non_zero(quantity: &Quantity) -> bool {
    parse(quantity).map(|parsed| !parsed.is_zero()).unwrap_or(false)
}

fn suffix_multiplier(suffix: &str) -> Option<f64> {
    let multiplier = match suffix {
        "" => 1.0,
        "Ki" => 1024f64,
        "Mi" => 1024f64.powi(2),
        "Gi" => 1024f64.powi(3),
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        _ => {
            let exponent = suffix.strip_prefix('e').or_else(|| suffix.strip_prefix('E'))?;
            let exponent: i32 = exponent.parse().ok()?;
            10f64.powi(exponent)
        }
    };
    Some(multiplier)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_suffixes() {
        let cases: &[(&str, f64)] = &[
            ("1", 1.0),
            ("100m", 0.1),
            ("1.5", 1.5),
            ("2Gi", 2.0 * 1024f64.powi(3)),
            ("512Mi", 512.0 * 1024f64.powi(2)),
            ("1k", 1000.0),
            ("1e3", 1000.0),
            ("5E-1", 0.5),
            ("+3", 3.0),
        ];
        for (input, expected) in cases {
            let parsed = ParsedQuantity::parse(input).unwrap_or_else(|err| panic!("error parsing {}: {}", input, err));
            assert!((parsed.value - expected).abs() < 1e-9, "expected {} to be {} got {}", input, expected, parsed.value);
        }
    }

    #[test]
    fn rejects_malformed_quantities() {
        assert_eq!(ParsedQuantity::parse(""), Err(QuantityError::Empty));
        assert_eq!(ParsedQuantity::parse("Gi"), Err(QuantityError::MissingNumber("Gi".into())));
        assert_eq!(ParsedQuantity::parse("1.2.3"), Err(QuantityError::InvalidNumber("1.2.3".into())));
        assert_eq!(ParsedQuantity::parse("1Gb"), Err(QuantityError::InvalidSuffix("1Gb".into())));
        assert_eq!(ParsedQuantity::parse("abc"), Err(QuantityError::MissingNumber("abc".into())));
    }

    #[test]
    fn zero_detection() {
        assert!(!is_non_zero(&Quantity("0".into())));
        assert!(!is_non_zero(&Quantity("0Gi".into())));
        assert!(!is_non_zero(&Quantity("bogus".into())));
        assert!(is_non_zero(&Quantity("1".into())));
        assert!(is_non_zero(&Quantity("250m".into())));
    }
}
