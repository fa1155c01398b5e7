use crate::error::{InfraboxError, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;

/// Scale of a quantity suffix as powers of ten and two
fn suffix_scale(suffix: &str) -> Option<(i32, u32)> {
    let scale = match suffix {
        "" => (0, 0),
        "n" => (-9, 0),
        "u" => (-6, 0),
        "m" => (-3, 0),
        "k" => (3, 0),
        "M" => (6, 0),
        "G" => (9, 0),
        "T" => (12, 0),
        "P" => (15, 0),
        "E" => (18, 0),
        "Ki" => (0, 10),
        "Mi" => (0, 20),
        "Gi" => (0, 30),
        "Ti" => (0, 40),
        "Pi" => (0, 50),
        "Ei" => (0, 60),
        _ => {
            let exponent = suffix.strip_prefix(['e', 'E'])?;
            let digits = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            (exponent.parse::<i32>().ok()?, 0)
        }
    };
    Some(scale)
}

/// A quantity as `mantissa * 10^exp10 * 2^exp2`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Parsed {
    negative: bool,
    mantissa: i128,
    exp10: i32,
    exp2: u32,
}

/// Significant digits kept exactly; enough for any value an i64 can hold
const MAX_DIGITS: usize = 36;

fn parse_quantity(s: &str) -> Result<Parsed> {
    let (negative, rest) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let number_len = rest
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(rest.len());
    let (number, suffix) = rest.split_at(number_len);

    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(InfraboxError::invalid_quantity(s, "missing number"));
    }
    if fraction.contains('.') {
        return Err(InfraboxError::invalid_quantity(s, "more than one decimal point"));
    }

    let (exp10, exp2) = suffix_scale(suffix).ok_or_else(|| {
        InfraboxError::invalid_quantity(s, format!("unknown suffix '{}'", suffix))
    })?;

    let digits = format!("{}{}", whole, fraction);
    let digits = digits.trim_start_matches('0');
    if digits.len() > MAX_DIGITS {
        return Err(InfraboxError::invalid_quantity(s, "too many digits"));
    }
    let mantissa = if digits.is_empty() {
        0
    } else {
        digits
            .parse::<i128>()
            .map_err(|e| InfraboxError::invalid_quantity(s, e.to_string()))?
    };

    let fraction_len = i32::try_from(fraction.len())
        .map_err(|_| InfraboxError::invalid_quantity(s, "too many digits"))?;

    Ok(Parsed {
        negative,
        mantissa,
        exp10: exp10
            .checked_sub(fraction_len)
            .ok_or_else(|| InfraboxError::invalid_quantity(s, "exponent out of range"))?,
        exp2,
    })
}

/// Value of `s` in units of `10^-scale`, rounded up to the next integer
fn scaled_value(s: &str, scale: i32) -> Result<i64> {
    let parsed = parse_quantity(s)?;
    let out_of_range = || InfraboxError::invalid_quantity(s, "value out of range");

    let magnitude = parsed
        .mantissa
        .checked_mul(1i128 << parsed.exp2)
        .ok_or_else(out_of_range)?;
    let exponent = parsed.exp10.checked_add(scale).ok_or_else(out_of_range)?;

    let value = if magnitude == 0 {
        0
    } else if exponent >= 0 {
        let factor = 10i128
            .checked_pow(exponent.unsigned_abs())
            .ok_or_else(out_of_range)?;
        let value = magnitude.checked_mul(factor).ok_or_else(out_of_range)?;
        if parsed.negative {
            -value
        } else {
            value
        }
    } else {
        // Past 10^38 the divisor exceeds any mantissa we accept
        let divisor = 10i128.checked_pow(exponent.unsigned_abs());
        let (quotient, exact) = match divisor {
            Some(d) => (magnitude / d, magnitude % d == 0),
            None => (0, false),
        };
        match (parsed.negative, exact) {
            (false, true) => quotient,
            (false, false) => quotient + 1,
            (true, _) => -quotient,
        }
    };

    i64::try_from(value).map_err(|_| out_of_range())
}

/// CPU and memory limits of a job, as restated to the job container
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceQuantities {
    /// CPU in millicores (1000 = 1 core)
    pub cpu_millicores: i64,
    /// Memory in bytes
    pub memory_bytes: i64,
}

impl ResourceQuantities {
    /// Parse a CPU quantity into millicores, rounding up ("2", "500m", "0.5", "2k", "1e-1")
    pub fn parse_cpu(s: &str) -> Result<i64> {
        scaled_value(s, 3)
    }

    /// Parse a memory quantity into bytes, rounding up ("128Mi", "1Gi", "500M", "129e6")
    pub fn parse_memory(s: &str) -> Result<i64> {
        scaled_value(s, 0)
    }

    /// Read cpu and memory from a k8s resource map; both must be present
    pub fn from_k8s_resource_map(resources: &BTreeMap<String, Quantity>) -> Result<Self> {
        let cpu = resources
            .get("cpu")
            .ok_or_else(|| InfraboxError::missing_field("spec.resources.limits.cpu"))?;
        let memory = resources
            .get("memory")
            .ok_or_else(|| InfraboxError::missing_field("spec.resources.limits.memory"))?;

        Ok(Self {
            cpu_millicores: Self::parse_cpu(&cpu.0)?,
            memory_bytes: Self::parse_memory(&memory.0)?,
        })
    }

    /// Memory in whole mebibytes, rounded down
    pub fn memory_mib(&self) -> i64 {
        self.memory_bytes / 1024 / 1024
    }

    /// CPU formatted in canonical quantity form ("2", "500m")
    pub fn cpu_string(&self) -> String {
        if self.cpu_millicores % 1000 == 0 {
            (self.cpu_millicores / 1000).to_string()
        } else {
            format!("{}m", self.cpu_millicores)
        }
    }
}
