//! Output table decoding
//!
//! Output pipes carry whitespace-separated numbers, one row per line.
//! `#` starts a comment (whole line or trailing), blank lines are skipped,
//! and Fortran double-precision exponents (`1.5D+03`) are accepted. Every
//! row must have the same number of fields.

use crate::types::Table;
use thiserror::Error;

/// Why a channel's bytes are not a table
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("output is not valid UTF-8 (at byte {0})")]
    Encoding(usize),

    #[error("line {line}: {token:?} is not a number")]
    InvalidNumber { line: usize, token: String },

    #[error("line {line}: expected {expected} columns, found {found}")]
    Ragged {
        line: usize,
        expected: usize,
        found: usize,
    },
}

fn parse_number(token: &str) -> Option<f64> {
    token.parse().ok().or_else(|| {
        if token.contains(['D', 'd']) {
            token.replace(['D', 'd'], "E").parse().ok()
        } else {
            None
        }
    })
}

/// Decode raw channel bytes into a table
///
/// Empty input (or input holding only comments) gives an empty table.
pub fn decode(bytes: &[u8]) -> Result<Table, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|e| DecodeError::Encoding(e.valid_up_to()))?;

    let mut columns: Option<usize> = None;
    let mut data = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("");
        let before = data.len();

        for token in line.split_whitespace() {
            let value = parse_number(token).ok_or_else(|| DecodeError::InvalidNumber {
                line: index + 1,
                token: token.to_string(),
            })?;
            data.push(value);
        }

        let found = data.len() - before;
        if found == 0 {
            continue;
        }
        match columns {
            None => columns = Some(found),
            Some(expected) if expected != found => {
                return Err(DecodeError::Ragged {
                    line: index + 1,
                    expected,
                    found,
                })
            }
            Some(_) => {}
        }
    }

    // Row widths were checked above
    Ok(Table::new(columns.unwrap_or(0), data).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_cls() {
        let bytes = b"    2   0.10E+04   0.25E+02\n    3   0.95E+03   0.31E+02\n";
        let table = decode(bytes).unwrap();
        assert_eq!(table.shape(), (2, 3));
        assert_eq!(table.get(0, 0), Some(2.0));
        assert_eq!(table.get(1, 1), Some(950.0));
    }

    #[test]
    fn test_decode_empty() {
        assert!(decode(b"").unwrap().is_empty());
        assert!(decode(b"\n  \n# only a comment\n").unwrap().is_empty());
    }

    #[test]
    fn test_decode_comments_and_fortran_exponents() {
        let bytes = b"# k  P(k)\n1.0D-04 2.5d+03 # trailing\n\n2.0D-04 2.6D+03\n";
        let table = decode(bytes).unwrap();
        assert_eq!(table.shape(), (2, 2));
        assert_eq!(table.get(0, 1), Some(2500.0));
        assert_eq!(table.get(1, 0), Some(2.0e-4));
    }

    #[test]
    fn test_decode_single_row_stays_two_dimensional() {
        let table = decode(b"2 1.0 3.0").unwrap();
        assert_eq!(table.shape(), (1, 3));
    }

    #[test]
    fn test_decode_ragged() {
        let err = decode(b"1 2 3\n4 5\n").unwrap_err();
        assert_eq!(
            err,
            DecodeError::Ragged {
                line: 2,
                expected: 3,
                found: 2
            }
        );
    }

    #[test]
    fn test_decode_garbage() {
        let err = decode(b"1 2\n3 ******\n").unwrap_err();
        assert!(matches!(err, DecodeError::InvalidNumber { line: 2, .. }));
        assert!(matches!(decode(&[0x31, 0x20, 0xff]), Err(DecodeError::Encoding(2))));
    }
}
