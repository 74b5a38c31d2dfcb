//! Human time strings (`SS`, `M:SS`, `H:MM:SS`) to whole seconds and back.

use crate::{Error, Result};

/// Parse a time string into whole seconds.
///
/// Accepted shapes:
/// - `SS` (any number of seconds, e.g. `"75"`)
/// - `M:SS` (minutes unbounded, seconds below 60)
/// - `H:MM:SS` (minutes and seconds below 60)
///
/// A fractional part on the final component (`"1:02.5"`) is truncated. Anything else that
/// is not an ASCII digit is rejected, which covers signs and stray letters.
pub fn parse(text: &str) -> Result<u64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(Error::malformed_time(text, "empty"));
    }

    let parts: Vec<&str> = trimmed.split(':').collect();
    if parts.len() > 3 {
        return Err(Error::malformed_time(text, "too many ':' separated fields"));
    }

    let last = parts.len() - 1;
    let mut values = Vec::with_capacity(parts.len());
    for (i, part) in parts.iter().enumerate() {
        let whole = if i == last {
            strip_fraction(text, part)?
        } else {
            part
        };
        values.push(component(text, whole)?);
    }

    let total = match values.as_slice() {
        [s] => Some(*s),
        [m, s] => {
            bounded(text, *s, "seconds")?;
            m.checked_mul(60).and_then(|m| m.checked_add(*s))
        }
        [h, m, s] => {
            bounded(text, *m, "minutes")?;
            bounded(text, *s, "seconds")?;
            h.checked_mul(3600).and_then(|h| h.checked_add(m * 60 + s))
        }
        _ => return Err(Error::malformed_time(text, "unrecognised shape")),
    };
    total.ok_or_else(|| Error::malformed_time(text, "out of range"))
}

/// Render whole seconds as `H:MM:SS`.
pub fn format(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    format!("{h}:{m:02}:{s:02}")
}

fn strip_fraction<'a>(input: &str, part: &'a str) -> Result<&'a str> {
    match part.split_once('.') {
        None => Ok(part),
        Some((whole, frac)) => {
            if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return Err(Error::malformed_time(input, "bad fractional seconds"));
            }
            Ok(whole)
        }
    }
}

fn component(input: &str, part: &str) -> Result<u64> {
    if part.is_empty() {
        return Err(Error::malformed_time(input, "empty field"));
    }
    if !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::malformed_time(
            input,
            format!("'{part}' is not a non-negative integer"),
        ));
    }
    part.parse::<u64>()
        .map_err(|_| Error::malformed_time(input, format!("'{part}' is too large")))
}

fn bounded(input: &str, value: u64, field: &str) -> Result<()> {
    if value >= 60 {
        return Err(Error::malformed_time(
            input,
            format!("{field} must be below 60, got {value}"),
        ));
    }
    Ok(())
}
