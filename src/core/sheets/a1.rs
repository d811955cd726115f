// A1 notation helpers.
//
// The adapter only needs enough of A1 to (a) build sheet-qualified ranges and
// (b) tell whether a block of values fits inside a bounded range before we
// spend an API call finding out.

use super::sheets_models::{Rows, SheetsError};

/// Google Sheets tops out at column ZZZ.
const MAX_COLUMN_LETTERS: usize = 3;

/// One side of a range. Either coordinate may be open (`A:A`, `3:5`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRef {
    pub column: Option<u32>,
    pub row: Option<u32>,
}

impl CellRef {
    fn parse(part: &str) -> Option<CellRef> {
        let part: String = part.trim().chars().filter(|c| *c != '$').collect();
        let split = part
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(part.len());
        let (letters, digits) = part.split_at(split);

        if letters.is_empty() && digits.is_empty() {
            return None;
        }
        if !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let column = if letters.is_empty() {
            None
        } else {
            Some(column_number(letters)?)
        };
        let row = if digits.is_empty() {
            None
        } else {
            match digits.parse::<u32>().ok()? {
                0 => return None,
                n => Some(n),
            }
        };

        Some(CellRef { column, row })
    }
}

/// A parsed A1 range such as `B2:D10`. A single cell (`C3`) is an anchor:
/// the API writes an arbitrarily sized block starting there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct A1Range {
    pub start: CellRef,
    pub end: Option<CellRef>,
}

impl A1Range {
    pub fn parse(input: &str) -> Result<Self, SheetsError> {
        let invalid = || SheetsError::InvalidArgument(format!("Invalid A1 range: '{}'", input));

        let mut parts = input.splitn(2, ':');
        let start = parts
            .next()
            .and_then(CellRef::parse)
            .ok_or_else(invalid)?;
        let end = match parts.next() {
            Some(part) => Some(CellRef::parse(part).ok_or_else(invalid)?),
            None => None,
        };

        if let Some(end) = end {
            let reversed = |a: Option<u32>, b: Option<u32>| matches!((a, b), (Some(a), Some(b)) if a > b);
            if reversed(start.column, end.column) || reversed(start.row, end.row) {
                return Err(invalid());
            }
        }

        Ok(A1Range { start, end })
    }

    /// 1-based column of the top-left cell.
    pub fn first_column(&self) -> u32 {
        self.start.column.unwrap_or(1)
    }

    /// 1-based row of the top-left cell.
    pub fn first_row(&self) -> u32 {
        self.start.row.unwrap_or(1)
    }

    /// Number of rows the range spans, `None` when open-ended.
    pub fn row_count(&self) -> Option<u32> {
        let end = self.end?;
        Some(end.row? - self.first_row() + 1)
    }

    /// Number of columns the range spans, `None` when open-ended.
    pub fn column_count(&self) -> Option<u32> {
        let end = self.end?;
        Some(end.column? - self.first_column() + 1)
    }

    /// Rejects a block of values that would spill past a bounded range.
    pub fn check_fits(&self, values: &Rows) -> Result<(), SheetsError> {
        if let Some(rows) = self.row_count() {
            if values.len() as u64 > rows as u64 {
                return Err(SheetsError::InvalidArgument(format!(
                    "Range spans {} row(s) but {} row(s) of data were supplied",
                    rows,
                    values.len()
                )));
            }
        }

        if let Some(columns) = self.column_count() {
            let widest = values.iter().map(Vec::len).max().unwrap_or(0);
            if widest as u64 > columns as u64 {
                return Err(SheetsError::InvalidArgument(format!(
                    "Range spans {} column(s) but a row of {} value(s) was supplied",
                    columns, widest
                )));
            }
        }

        Ok(())
    }
}

/// `"AB"` -> 28.
pub fn column_number(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > MAX_COLUMN_LETTERS {
        return None;
    }
    letters.chars().try_fold(0u32, |acc, c| {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        let digit = c.to_ascii_uppercase() as u32 - 'A' as u32 + 1;
        Some(acc * 26 + digit)
    })
}

/// 28 -> `"AB"`.
#[cfg(test)]
pub fn column_letters(mut number: u32) -> String {
    let mut letters = Vec::new();
    while number > 0 {
        let rem = (number - 1) % 26;
        letters.push((b'A' + rem as u8) as char);
        number = (number - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Builds `'Sheet Name'!A1:B2`. The sheet name is always quoted, which the API
/// accepts for every name and which keeps names like `Q1 2024` or `A1` unambiguous.
pub fn qualify(sheet: &str, range: Option<&str>) -> String {
    let quoted = format!("'{}'", sheet.replace('\'', "''"));
    match range {
        Some(range) if !range.trim().is_empty() => format!("{}!{}", quoted, range.trim()),
        _ => quoted,
    }
}

/// Inverse of [`qualify`]: splits a sheet-qualified range into sheet name and
/// optional A1 part. Accepts both quoted and bare sheet names.
#[cfg(test)]
pub fn split_qualified(full: &str) -> Result<(String, Option<String>), SheetsError> {
    let invalid = || SheetsError::InvalidArgument(format!("Invalid range: '{}'", full));

    let (sheet, rest) = if let Some(quoted) = full.strip_prefix('\'') {
        let mut name = String::new();
        let mut chars = quoted.char_indices().peekable();
        let mut close = None;
        while let Some((i, c)) = chars.next() {
            if c == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    name.push('\'');
                    chars.next();
                } else {
                    close = Some(i);
                    break;
                }
            } else {
                name.push(c);
            }
        }
        let close = close.ok_or_else(invalid)?;
        (name, &quoted[close + 1..])
    } else {
        match full.find('!') {
            Some(bang) => (full[..bang].to_string(), &full[bang..]),
            None => (full.to_string(), ""),
        }
    };

    if sheet.is_empty() {
        return Err(invalid());
    }

    let range = match rest.strip_prefix('!') {
        Some(range) if !range.is_empty() => Some(range.to_string()),
        Some(_) => return Err(invalid()),
        None if rest.is_empty() => None,
        None => return Err(invalid()),
    };

    Ok((sheet, range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_bounded_range() {
        let range = A1Range::parse("B2:D10").unwrap();
        assert_eq!(range.first_column(), 2);
        assert_eq!(range.first_row(), 2);
        assert_eq!(range.row_count(), Some(9));
        assert_eq!(range.column_count(), Some(3));
    }

    #[test]
    fn single_cell_is_an_open_anchor() {
        let range = A1Range::parse("C3").unwrap();
        assert_eq!(range.row_count(), None);
        assert_eq!(range.column_count(), None);
        assert!(range.check_fits(&vec![vec![json!(1); 50]; 50]).is_ok());
    }

    #[test]
    fn whole_column_ranges_bound_columns_only() {
        let range = A1Range::parse("A:C").unwrap();
        assert_eq!(range.row_count(), None);
        assert_eq!(range.column_count(), Some(3));
    }

    #[test]
    fn absolute_references_are_accepted() {
        let range = A1Range::parse("$A$1:$B$2").unwrap();
        assert_eq!(range.row_count(), Some(2));
    }

    #[test]
    fn rejects_malformed_ranges() {
        for bad in ["", ":", "A0", "1A", "B2:A1", "A1:B2:C3", "AAAA1"] {
            assert!(A1Range::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn shape_mismatch_is_invalid_argument() {
        let range = A1Range::parse("A1:B2").unwrap();

        let too_tall = vec![vec![json!(1)], vec![json!(2)], vec![json!(3)]];
        assert!(matches!(
            range.check_fits(&too_tall),
            Err(SheetsError::InvalidArgument(_))
        ));

        let too_wide = vec![vec![json!(1), json!(2), json!(3)]];
        assert!(range.check_fits(&too_wide).is_err());

        let fits = vec![vec![json!(1), json!(2)], vec![json!(3)]];
        assert!(range.check_fits(&fits).is_ok());
    }

    #[test]
    fn column_conversions_agree() {
        for (n, letters) in [(1, "A"), (26, "Z"), (27, "AA"), (28, "AB"), (702, "ZZ"), (703, "AAA")] {
            assert_eq!(column_letters(n), letters);
            assert_eq!(column_number(letters), Some(n));
        }
    }

    #[test]
    fn qualify_quotes_and_escapes_sheet_names() {
        assert_eq!(qualify("Sheet1", Some("A1:B2")), "'Sheet1'!A1:B2");
        assert_eq!(qualify("Bob's data", None), "'Bob''s data'");
        assert_eq!(qualify("Sheet1", Some("  ")), "'Sheet1'");
    }

    #[test]
    fn split_qualified_reverses_qualify() {
        let (sheet, range) = split_qualified(&qualify("Bob's data", Some("A1:C3"))).unwrap();
        assert_eq!(sheet, "Bob's data");
        assert_eq!(range.as_deref(), Some("A1:C3"));

        let (sheet, range) = split_qualified("Sheet1").unwrap();
        assert_eq!(sheet, "Sheet1");
        assert_eq!(range, None);

        assert!(split_qualified("'unterminated").is_err());
        assert!(split_qualified("Sheet1!").is_err());
    }
}
