//! The `<n><d|w|m|y>` duration grammar used by `prune --older-than`.

use crate::error::CoreError;

const DAYS_PER_UNIT: &[(char, i64)] = &[('d', 1), ('w', 7), ('m', 30), ('y', 365)];
const MAX_DAYS: i64 = 36_500;

/// A parsed duration, stored as a day count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayDuration {
    pub days: i64,
}

/// Parse `<positive-integer><d|w|m|y>`, case-insensitive. Rejects zero,
/// negative, fractional, and combined units (e.g. `1y6m`); caps the
/// resulting day count at 36500.
pub fn parse(input: &str) -> Result<DayDuration, CoreError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CoreError::validation("empty duration"));
    }

    let lower = trimmed.to_ascii_lowercase();
    let (digits, unit_char) = lower.split_at(lower.len() - 1);
    let unit_char = unit_char
        .chars()
        .next()
        .ok_or_else(|| CoreError::validation("duration missing unit"))?;

    if digits.is_empty() {
        return Err(CoreError::validation(format!("duration {input:?} missing a count")));
    }
    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(CoreError::validation(format!(
            "duration {input:?} must be a positive integer followed by d, w, m, or y"
        )));
    }

    let count: i64 = digits
        .parse()
        .map_err(|_| CoreError::validation(format!("duration {input:?} count out of range")))?;
    if count <= 0 {
        return Err(CoreError::validation(format!("duration {input:?} must be positive")));
    }

    let multiplier = DAYS_PER_UNIT
        .iter()
        .find(|(c, _)| *c == unit_char)
        .map(|(_, m)| *m)
        .ok_or_else(|| CoreError::validation(format!("duration {input:?} has unknown unit {unit_char:?}")))?;

    let days = count.saturating_mul(multiplier).min(MAX_DAYS);
    Ok(DayDuration { days })
}

/// Render a [`DayDuration`] back to the canonical `<n>d` form.
///
/// Always renders in days: `parse(render(parse(s))) == parse(s)` holds for
/// every valid `s` because both sides normalise through the day count.
pub fn render(d: DayDuration) -> String {
    format!("{}d", d.days)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!(parse("1d").unwrap().days, 1);
        assert_eq!(parse("2w").unwrap().days, 14);
        assert_eq!(parse("3m").unwrap().days, 90);
        assert_eq!(parse("1y").unwrap().days, 365);
    }

    #[test]
    fn case_insensitive() {
        assert_eq!(parse("5D").unwrap().days, 5);
        assert_eq!(parse("1Y").unwrap().days, 365);
    }

    #[test]
    fn rejects_zero_and_negative() {
        assert!(parse("0d").is_err());
        assert!(parse("-1d").is_err());
    }

    #[test]
    fn rejects_fractional() {
        assert!(parse("3.5d").is_err());
    }

    #[test]
    fn rejects_combined_units() {
        assert!(parse("1y6m").is_err());
    }

    #[test]
    fn caps_at_36500_days() {
        assert_eq!(parse("101y").unwrap().days, MAX_DAYS);
    }

    #[test]
    fn rejects_missing_unit_or_count() {
        assert!(parse("d").is_err());
        assert!(parse("10").is_err());
        assert!(parse("").is_err());
    }

    #[test]
    fn render_round_trips_through_parse() {
        for s in ["1d", "2w", "3m", "1y"] {
            let parsed = parse(s).unwrap();
            let rendered = render(parsed);
            let reparsed = parse(&rendered).unwrap();
            assert_eq!(parsed, reparsed);
        }
    }
}
