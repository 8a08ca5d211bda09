// src/normalize/salary.rs
//! Salary text parsing: ranges, single values, `k` suffixes, hourly/monthly
//! rates (annualized) and currency detection.

use once_cell::sync::OnceCell;
use regex::Regex;

/// Fixed full-time year used to annualize hourly rates.
pub const HOURS_PER_YEAR: f64 = 2080.0;
pub const MONTHS_PER_YEAR: f64 = 12.0;

#[derive(Debug, Clone, PartialEq)]
pub struct SalaryRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Period {
    Hourly,
    Monthly,
    Yearly,
}

impl Period {
    fn annual_factor(self) -> f64 {
        match self {
            Period::Hourly => HOURS_PER_YEAR,
            Period::Monthly => MONTHS_PER_YEAR,
            Period::Yearly => 1.0,
        }
    }
}

fn amount_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    // Grouped thousands ("120,000" / "120.000") first, then plain decimals.
    RE.get_or_init(|| {
        Regex::new(r"(?i)(\d{1,3}(?:[,.]\d{3})+|\d+(?:\.\d+)?)\s*(k\b)?").expect("amount regex")
    })
}

/// Parse one amount such as "120,000", "95k" or "45.50". `None` when no number is present.
pub fn parse_amount(text: &str) -> Option<f64> {
    let caps = amount_re().captures(text)?;
    amount_from(&caps)
}

fn amount_from(caps: &regex::Captures<'_>) -> Option<f64> {
    let digits = caps.get(1)?.as_str();
    let grouped = digits.len() > 4
        && digits
            .rsplit([',', '.'])
            .next()
            .is_some_and(|tail| tail.len() == 3)
        && digits.contains([',', '.']);
    let value: f64 = if grouped {
        digits.replace([',', '.'], "").parse().ok()?
    } else {
        digits.parse().ok()?
    };
    let value = if caps.get(2).is_some() { value * 1000.0 } else { value };
    (value.is_finite() && value > 0.0).then_some(value)
}

fn detect_currency(text: &str) -> Option<String> {
    if text.contains('$') {
        return Some("USD".to_string());
    }
    if text.contains('€') {
        return Some("EUR".to_string());
    }
    if text.contains('£') {
        return Some("GBP".to_string());
    }
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)\b(usd|eur|gbp|cad|aud|chf|inr|sek|nok|dkk|pln)\b").expect("iso currency regex")
    });
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// Pay period named in the text, if any.
fn detect_period(lower: &str) -> Option<Period> {
    static HOURLY: OnceCell<Regex> = OnceCell::new();
    static MONTHLY: OnceCell<Regex> = OnceCell::new();
    static YEARLY: OnceCell<Regex> = OnceCell::new();
    let hourly = HOURLY.get_or_init(|| {
        Regex::new(r"(/\s*(h|hr|hour)\b|per\s+hour|an\s+hour|\bhourly\b|\bph\b)").expect("hourly regex")
    });
    let monthly = MONTHLY.get_or_init(|| {
        Regex::new(r"(/\s*(mo|month)\b|per\s+month|a\s+month|\bmonthly\b)").expect("monthly regex")
    });
    let yearly = YEARLY.get_or_init(|| {
        Regex::new(r"(/\s*(yr|year)\b|per\s+(year|annum)|a\s+year|\bannual(ly)?\b|\byearly\b|\bp\.?a\.?\b)")
            .expect("yearly regex")
    });
    if hourly.is_match(lower) {
        Some(Period::Hourly)
    } else if monthly.is_match(lower) {
        Some(Period::Monthly)
    } else if yearly.is_match(lower) {
        Some(Period::Yearly)
    } else {
        None
    }
}

/// Drop benefit mentions whose digits are not pay ("401k match", "401(k)").
fn strip_benefits(lower: &str) -> String {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| Regex::new(r"\b401\s*\(?k\)?").expect("benefit regex"));
    re.replace_all(lower, " ").into_owned()
}

/// Put two optional bounds in ascending order (inverted input is swapped, not rejected).
pub fn ordered(min: Option<f64>, max: Option<f64>) -> (Option<f64>, Option<f64>) {
    match (min, max) {
        (Some(a), Some(b)) if a > b => (Some(b), Some(a)),
        other => other,
    }
}

/// Parse free-form salary text. Returns `None` when no amount can be found.
/// A lone amount only counts as pay when it carries a currency, a pay period
/// or a `k` suffix.
pub fn parse_salary(text: &str) -> Option<SalaryRange> {
    let lower = strip_benefits(&text.to_lowercase());
    let caps: Vec<regex::Captures<'_>> = amount_re()
        .captures_iter(&lower)
        .filter(|c| amount_from(c).is_some())
        .take(2)
        .collect();
    let first = amount_from(caps.first()?)?;
    let second = caps.get(1).and_then(amount_from);
    let period = detect_period(&lower);
    let currency = detect_currency(text);
    let factor = period.unwrap_or(Period::Yearly).annual_factor();

    let (min, max) = match second {
        Some(second) => (Some(first), Some(second)),
        None => {
            let k_suffix = caps[0].get(2).is_some();
            if currency.is_none() && period.is_none() && !k_suffix {
                return None;
            }
            let t = lower.trim_start();
            if t.starts_with("up to") || t.starts_with("max") || t.contains("up to ") {
                (None, Some(first))
            } else if t.starts_with("from") || t.starts_with("starting") || t.starts_with("min") || lower.contains('+') {
                (Some(first), None)
            } else {
                (Some(first), Some(first))
            }
        }
    };
    let (min, max) = ordered(min.map(|v| v * factor), max.map(|v| v * factor));

    Some(SalaryRange { min, max, currency })
}
