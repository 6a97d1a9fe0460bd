//! Money as integer cents (1/100 yuan). Stored and computed as `i64`, formatted only at the edges.

use crate::domain::DomainError;

pub type Cents = i64;

/// Formats cents as a decimal string with two fraction digits, e.g. `1999` -> `"19.99"`.
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

/// Parses a decimal amount (`"19.9"`, `"20"`, `"0.05"`) into cents.
/// More than two fraction digits is rejected rather than rounded.
pub fn parse_cents(input: &str) -> Result<Cents, DomainError> {
    let s = input.trim();
    let invalid = || DomainError::Validation(format!("invalid amount: '{}'", input));
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (whole, frac) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(invalid());
    }
    if frac.len() > 2
        || !whole.chars().all(|c| c.is_ascii_digit())
        || !frac.chars().all(|c| c.is_ascii_digit())
    {
        return Err(invalid());
    }
    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let frac_cents: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().map_err(|_| invalid())? * 10,
        _ => frac.parse().map_err(|_| invalid())?,
    };
    let cents = whole
        .checked_mul(100)
        .and_then(|v| v.checked_add(frac_cents))
        .ok_or_else(invalid)?;
    Ok(if negative { -cents } else { cents })
}

/// `amount * percent / 100` in cents, rounded half-up. `percent` is expressed in cents too (`1250` = 12.50%).
pub fn percent_of(amount: Cents, percent: Cents) -> Cents {
    // amount * (percent / 100) / 100 with half-up rounding on the final division by 10_000
    let num = amount as i128 * percent as i128;
    ((num + 5_000) / 10_000) as Cents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(1999), "19.99");
        assert_eq!(format_cents(-250), "-2.50");
    }

    #[test]
    fn test_parse_cents() {
        assert_eq!(parse_cents("19.99").unwrap(), 1999);
        assert_eq!(parse_cents("20").unwrap(), 2000);
        assert_eq!(parse_cents("0.5").unwrap(), 50);
        assert_eq!(parse_cents(".05").unwrap(), 5);
        assert_eq!(parse_cents(" 3.10 ").unwrap(), 310);
        assert_eq!(parse_cents("-1.25").unwrap(), -125);
    }

    #[test]
    fn test_parse_cents_rejects_garbage() {
        assert!(parse_cents("").is_err());
        assert!(parse_cents("1.234").is_err());
        assert!(parse_cents("abc").is_err());
        assert!(parse_cents("1,5").is_err());
        assert!(parse_cents(".").is_err());
    }

    #[test]
    fn test_percent_of_rounds_half_up() {
        // 15% of 19.99 = 2.9985 -> 3.00
        assert_eq!(percent_of(1999, 1500), 300);
        // 10% of 0.05 = 0.005 -> 0.01
        assert_eq!(percent_of(5, 1000), 1);
        // 100% of 50.00
        assert_eq!(percent_of(5000, 10000), 5000);
    }
}
