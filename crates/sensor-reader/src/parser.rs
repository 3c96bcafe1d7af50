// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Raw payload parser
//!
//! Sensors publish readings as a bracketed, whitespace separated list of
//! integers, e.g. `"[12 34\n 56]"`. Spacing is not canonical and line breaks
//! may appear anywhere between values, so numbers are rebuilt from runs of
//! contiguous decimal digits rather than by splitting on a delimiter.
//!
//! Parsing is the first validation stage. The second one (fixed length) is
//! done by the consumer through [`Sample::with_len`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Number of values in a reading of the reference infrared sensor.
pub const DEFAULT_SAMPLE_LEN: usize = 64;

/// Rendering of the "no valid reading" state on the bus.
pub const NULL_SAMPLE_PLACEHOLDER: &str = "None";

/// Parse failures. Any of them discards the whole payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("numeric token '{0}' cannot be converted to an unsigned integer")]
    Token(String),

    #[error("payload is not valid UTF-8")]
    Encoding,
}

/// Length validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("sample has {actual} values, expected {expected}")]
pub struct LengthMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// A validated sensor reading of the configured fixed length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample(Vec<u32>);

impl Sample {
    /// Validate the length of a parsed sequence.
    pub fn with_len(values: Vec<u32>, expected: usize) -> Result<Self, LengthMismatch> {
        if values.len() == expected {
            Ok(Self(values))
        } else {
            Err(LengthMismatch {
                expected,
                actual: values.len(),
            })
        }
    }

    pub fn values(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_values(self) -> Vec<u32> {
        self.0
    }
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", value)?;
        }
        f.write_str("]")
    }
}

/// Textual rendering of an optional sample, as published on the bus.
pub fn render_sample(sample: Option<&Sample>) -> String {
    match sample {
        Some(sample) => sample.to_string(),
        None => NULL_SAMPLE_PLACEHOLDER.to_string(),
    }
}

/// Parse a raw textual array into its integer values.
///
/// Characters other than digits are skipped. A token that does not fit in
/// a `u32` fails the whole payload; partial results are never returned.
pub fn parse_raw_payload(raw: &str) -> Result<Vec<u32>, ParseError> {
    let body = raw.trim();
    let body = body.strip_prefix('[').unwrap_or(body);
    let body = body.strip_suffix(']').unwrap_or(body);
    let normalized = body.replace('\n', ",").replace("  ", ",");

    let mut values = Vec::new();
    let mut token = String::new();

    for c in normalized.chars().chain(std::iter::once(',')) {
        if c.is_ascii_digit() {
            token.push(c);
            continue;
        }
        if !token.is_empty() {
            let value = token
                .parse::<u32>()
                .map_err(|_| ParseError::Token(token.clone()))?;
            values.push(value);
            token.clear();
        }
    }

    Ok(values)
}

/// Parse raw payload bytes as received from the bus.
pub fn parse_payload_bytes(payload: &[u8]) -> Result<Vec<u32>, ParseError> {
    let text = std::str::from_utf8(payload).map_err(|_| ParseError::Encoding)?;
    parse_raw_payload(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_wrapped_payload() {
        assert_eq!(parse_raw_payload("[1 2\n 3]").unwrap(), vec![1, 2, 3]);
        assert_eq!(
            parse_raw_payload("[ 12  345\n  6 7890 ]").unwrap(),
            vec![12, 345, 6, 7890]
        );
    }

    #[test]
    fn test_parse_empty_array() {
        assert!(parse_raw_payload("[]").unwrap().is_empty());
        assert!(parse_raw_payload("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_skips_stray_characters() {
        assert_eq!(parse_raw_payload("x[1 2 3]").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_raw_payload("[1, 2,3];").unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_raw_payload("[4\t5 ,6]").unwrap(), vec![4, 5, 6]);
    }

    #[test]
    fn test_parse_overflow_discards_everything() {
        let err = parse_raw_payload("[1 2 99999999999 3]").unwrap_err();
        assert_eq!(err, ParseError::Token("99999999999".to_string()));
    }

    #[test]
    fn test_parse_invalid_utf8() {
        assert_eq!(
            parse_payload_bytes(&[b'[', 0xff, b']']),
            Err(ParseError::Encoding)
        );
        assert_eq!(parse_payload_bytes(b"[7 8]").unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_length_validation() {
        let values = parse_raw_payload("[1 2\n 3]").unwrap();
        let sample = Sample::with_len(values.clone(), 3).unwrap();
        assert_eq!(sample.values(), &[1, 2, 3]);

        let err = Sample::with_len(values, DEFAULT_SAMPLE_LEN).unwrap_err();
        assert_eq!(
            err,
            LengthMismatch {
                expected: 64,
                actual: 3
            }
        );
    }

    #[test]
    fn test_render_parse_round_trip() {
        for seed in 0u32..16 {
            let values: Vec<u32> = (0..DEFAULT_SAMPLE_LEN as u32)
                .map(|i| (i * 7919 + seed * 104_729) % 65_536)
                .collect();
            let sample = Sample::with_len(values, DEFAULT_SAMPLE_LEN).unwrap();

            let rendered = render_sample(Some(&sample));
            let reparsed = parse_raw_payload(&rendered).unwrap();
            assert_eq!(reparsed, sample.values());
        }
    }

    #[test]
    fn test_render_null_sample() {
        assert_eq!(render_sample(None), NULL_SAMPLE_PLACEHOLDER);
        let sample = Sample::with_len(vec![1, 22, 333], 3).unwrap();
        assert_eq!(sample.to_string(), "[1 22 333]");
    }
}
