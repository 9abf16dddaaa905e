//! ISO 8601 durations for window descriptors.
//!
//! Supports the fixed-length subset `PnW`, `PnD`, `PTnH`, `PTnM` and
//! `PTn[.f]S` (fractions on any component). Calendar units (years, months)
//! have no fixed length and are rejected. Durations must be positive.

use chrono::Duration;

use crate::error::{CoreError, Result};

const MS_PER_SECOND: i128 = 1_000;
const MS_PER_MINUTE: i128 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i128 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i128 = 24 * MS_PER_HOUR;
const MS_PER_WEEK: i128 = 7 * MS_PER_DAY;

/// Parses an ISO 8601 duration such as `PT1M` or `P1DT2H30M`.
///
/// # Errors
///
/// Returns `CoreError::InvalidDuration` for malformed input, calendar units,
/// or non-positive durations.
pub fn parse(value: &str) -> Result<Duration> {
    let invalid = |reason: &str| CoreError::invalid_duration(value, reason);

    let body = value.strip_prefix('P').ok_or_else(|| invalid("must start with 'P'"))?;
    if body.is_empty() {
        return Err(invalid("no components"));
    }

    let (date_part, time_part) = match body.split_once('T') {
        Some((_, "")) => return Err(invalid("empty time section")),
        Some((date, time)) => (date, Some(time)),
        None => (body, None),
    };

    let mut total = sum_components(value, date_part, &[('W', MS_PER_WEEK), ('D', MS_PER_DAY)])?;
    if let Some(time) = time_part {
        let time = sum_components(
            value,
            time,
            &[('H', MS_PER_HOUR), ('M', MS_PER_MINUTE), ('S', MS_PER_SECOND)],
        )?;
        total = total.checked_add(time).ok_or_else(|| invalid("duration overflows"))?;
    }

    if total <= 0 {
        return Err(invalid("duration must be positive"));
    }
    let millis = i64::try_from(total).map_err(|_| invalid("duration overflows"))?;
    Ok(Duration::milliseconds(millis))
}

/// Sums `<number><unit>` components whose units appear in `units` order.
fn sum_components(value: &str, section: &str, units: &[(char, i128)]) -> Result<i128> {
    let invalid = |reason: String| CoreError::invalid_duration(value, reason);

    let mut total: i128 = 0;
    let mut number = String::new();
    let mut next_unit = 0;

    for ch in section.chars() {
        if ch.is_ascii_digit() || ch == '.' {
            number.push(ch);
            continue;
        }

        let position = units[next_unit..]
            .iter()
            .position(|(unit, _)| *unit == ch)
            .ok_or_else(|| match ch {
                'Y' | 'M' if units[0].0 == 'W' => {
                    invalid("calendar units (years, months) are not supported".to_string())
                },
                _ => invalid(format!("unexpected designator '{ch}'")),
            })?;
        let (_, unit_ms) = units[next_unit + position];
        next_unit += position + 1;

        if number.is_empty() {
            return Err(invalid(format!("designator '{ch}' has no value")));
        }
        let millis = component_millis(&number, unit_ms).ok_or_else(|| {
            invalid(format!("invalid number {number:?}"))
        })?;
        total = total
            .checked_add(millis)
            .ok_or_else(|| invalid("duration overflows".to_string()))?;
        number.clear();
    }

    if !number.is_empty() {
        return Err(invalid(format!("value {number:?} has no designator")));
    }
    Ok(total)
}

fn component_millis(number: &str, unit_ms: i128) -> Option<i128> {
    let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }

    let whole: i128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut millis = whole.checked_mul(unit_ms)?;

    if !fraction.is_empty() {
        let digits = u32::try_from(fraction.len()).ok().filter(|d| *d <= 9)?;
        let fraction: i128 = fraction.parse().ok()?;
        millis = millis.checked_add(fraction * unit_ms / 10_i128.pow(digits))?;
    }
    Some(millis)
}

/// Formats a duration in canonical ISO 8601 form (`P1DT2H`, `PT30S`).
pub fn format(duration: Duration) -> String {
    let total = i128::from(duration.num_milliseconds().max(0));
    if total == 0 {
        return "PT0S".to_string();
    }

    let days = total / MS_PER_DAY;
    let hours = (total % MS_PER_DAY) / MS_PER_HOUR;
    let minutes = (total % MS_PER_HOUR) / MS_PER_MINUTE;
    let millis = total % MS_PER_MINUTE;

    let mut out = String::from("P");
    if days > 0 {
        out.push_str(&format!("{days}D"));
    }
    if hours == 0 && minutes == 0 && millis == 0 {
        return out;
    }

    out.push('T');
    if hours > 0 {
        out.push_str(&format!("{hours}H"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}M"));
    }
    if millis > 0 {
        let seconds = millis / MS_PER_SECOND;
        let fraction = millis % MS_PER_SECOND;
        if fraction == 0 {
            out.push_str(&format!("{seconds}S"));
        } else {
            let fraction = format!("{fraction:03}");
            out.push_str(&format!("{seconds}.{}S", fraction.trim_end_matches('0')));
        }
    }
    out
}
