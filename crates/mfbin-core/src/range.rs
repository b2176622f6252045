//! Compact range expressions such as `1-12,218,288`.
//!
//! Tokens are comma separated; each is a single integer or an inclusive
//! `lo-hi` pair. A reversed pair (`5-2`) is accepted and read as `2-5`.
//! Absent or blank input parses to an empty set so each call site can pick its
//! own default (usually every layer or every period, see [`parse_range_or_all`]).

use crate::domain::{DecodeError, DecodeResult};
use std::collections::BTreeSet;

/// Most values one expression may expand to.
pub const MAX_RANGE_VALUES: usize = 1_000_000;

pub fn parse_range(text: Option<&str>) -> DecodeResult<BTreeSet<i32>> {
    let mut result = BTreeSet::new();
    let Some(text) = text else {
        return Ok(result);
    };
    if text.trim().is_empty() {
        return Ok(result);
    }

    for token in text.split(',') {
        let (lo, hi) = parse_token(text, token)?;
        let span = (i64::from(hi) - i64::from(lo) + 1) as usize;
        if result.len().saturating_add(span) > MAX_RANGE_VALUES {
            return Err(DecodeError::invalid_argument(format!(
                "range '{text}' expands past {MAX_RANGE_VALUES} values at '{}'",
                token.trim()
            )));
        }
        result.extend(lo..=hi);
    }

    Ok(result)
}

/// Parses `text`, substituting `1..=upper` when nothing was requested.
pub fn parse_range_or_all(text: Option<&str>, upper: i32) -> DecodeResult<BTreeSet<i32>> {
    let parsed = parse_range(text)?;
    if parsed.is_empty() {
        return Ok((1..=upper).collect());
    }
    Ok(parsed)
}

fn parse_token(input: &str, token: &str) -> DecodeResult<(i32, i32)> {
    let trimmed = token.trim();
    let (lo, hi) = match trimmed.split_once('-') {
        Some((lo, hi)) => (parse_bound(input, token, lo)?, parse_bound(input, token, hi)?),
        None => {
            let value = parse_bound(input, token, trimmed)?;
            (value, value)
        }
    };
    Ok(if lo <= hi { (lo, hi) } else { (hi, lo) })
}

fn parse_bound(input: &str, token: &str, bound: &str) -> DecodeResult<i32> {
    let bound = bound.trim();
    if bound.is_empty() || !bound.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(invalid_token(input, token));
    }
    bound.parse::<i32>().map_err(|_| invalid_token(input, token))
}

fn invalid_token(input: &str, token: &str) -> DecodeError {
    DecodeError::InvalidRangeSyntax {
        input: input.to_string(),
        token: token.trim().to_string(),
    }
}
