//! Typed numeric rows and the delimited-record parser.
//!
//! A session's column arity is locked by the first row that parses. Later
//! rows must match it, or (under [`SchemaPolicy::Truncate`]) carry at least
//! that many fields and get cut down to size.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MonitorError, MonitorResult};

/// Default field delimiter for incoming records.
pub const DEFAULT_DELIMITER: char = ',';

/// Name of the column at `index` (zero-based): `col1`, `col2`, ...
pub fn column_name(index: usize) -> String {
    format!("col{}", index + 1)
}

/// An accepted observation: ordered numeric fields plus its position in the
/// session's accepted-row sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Row {
    seq: u64,
    values: Vec<f64>,
}

impl Row {
    pub fn new(seq: u64, values: Vec<f64>) -> Self {
        Self { seq, values }
    }

    /// Zero-based index of this row among all accepted rows of the session.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn arity(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, column: usize) -> Option<f64> {
        self.values.get(column).copied()
    }

    /// `(column name, value)` pairs in declared order.
    pub fn named(&self) -> impl Iterator<Item = (String, f64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (column_name(i), *v))
    }
}

/// What to do with a row whose arity disagrees with the locked schema.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaPolicy {
    /// Reject with `SchemaMismatch`.
    #[default]
    Strict,
    /// Keep the leading columns when the row is wider than the schema;
    /// narrower rows are still rejected.
    Truncate,
}

/// Turns raw delimited text into [`Row`]s and enforces the session schema.
#[derive(Clone, Debug)]
pub struct RowParser {
    delimiter: char,
    policy: SchemaPolicy,
    max_columns: Option<usize>,
    arity: Option<usize>,
    next_seq: u64,
}

impl RowParser {
    pub fn new(policy: SchemaPolicy) -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
            policy,
            max_columns: None,
            arity: None,
            next_seq: 0,
        }
    }

    /// Project every row onto its first `max` columns before the schema check.
    pub fn with_max_columns(mut self, max: Option<usize>) -> Self {
        self.max_columns = max.filter(|m| *m > 0);
        self
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Locked arity, once the first row has been accepted.
    pub fn arity(&self) -> Option<usize> {
        self.arity
    }

    /// Rows accepted so far.
    pub fn accepted(&self) -> u64 {
        self.next_seq
    }

    pub fn policy(&self) -> SchemaPolicy {
        self.policy
    }

    /// Parse one record. On error nothing about the parser changes.
    pub fn parse(&mut self, raw: &str) -> MonitorResult<Row> {
        let mut values = parse_fields(raw, self.delimiter)?;

        if let Some(max) = self.max_columns {
            if values.len() > max {
                warn!(
                    fields = values.len(),
                    kept = max,
                    "row wider than the configured column limit, keeping leading fields"
                );
                values.truncate(max);
            }
        }

        match self.arity {
            None => self.arity = Some(values.len()),
            Some(expected) if values.len() == expected => {}
            Some(expected) if self.policy == SchemaPolicy::Truncate && values.len() > expected => {
                warn!(
                    fields = values.len(),
                    expected,
                    "row wider than the session schema, truncating"
                );
                values.truncate(expected);
            }
            Some(expected) => {
                return Err(MonitorError::SchemaMismatch {
                    expected,
                    got: values.len(),
                })
            }
        }

        let row = Row::new(self.next_seq, values);
        self.next_seq += 1;
        Ok(row)
    }
}

fn parse_fields(raw: &str, delimiter: char) -> MonitorResult<Vec<f64>> {
    let parse_error = |reason: String| MonitorError::Parse {
        input: raw.to_string(),
        reason,
    };

    if raw.trim().is_empty() {
        return Err(parse_error("no fields".into()));
    }

    raw.split(delimiter)
        .enumerate()
        .map(|(i, field)| {
            let field = field.trim();
            if field.is_empty() {
                return Err(parse_error(format!("field {} is empty", i + 1)));
            }
            let value: f64 = field
                .parse()
                .map_err(|_| parse_error(format!("field {} is not numeric: {:?}", i + 1, field)))?;
            if !value.is_finite() {
                return Err(parse_error(format!("field {} is not finite", i + 1)));
            }
            Ok(value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_numeric_fields() {
        let mut parser = RowParser::new(SchemaPolicy::Strict);
        let row = parser.parse("1.5, 2,-3e2").unwrap();
        assert_eq!(row.values(), &[1.5, 2.0, -300.0]);
        assert_eq!(row.seq(), 0);
        assert_eq!(parser.arity(), Some(3));
    }

    #[test]
    fn named_columns_follow_declared_order() {
        let row = Row::new(0, vec![4.0, 5.0]);
        let named: Vec<_> = row.named().collect();
        assert_eq!(named, vec![("col1".to_string(), 4.0), ("col2".to_string(), 5.0)]);
    }

    #[test]
    fn rejects_malformed_input() {
        let mut parser = RowParser::new(SchemaPolicy::Strict);
        for raw in ["", "   ", "1,abc", "1,,2", "nan", "1,inf"] {
            let err = parser.parse(raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Parse, "input {:?}", raw);
        }
        // nothing was accepted, schema still open
        assert_eq!(parser.arity(), None);
        assert_eq!(parser.accepted(), 0);
    }

    #[test]
    fn schema_locks_on_first_row() {
        let mut parser = RowParser::new(SchemaPolicy::Strict);
        parser.parse("1,2,3").unwrap();
        let err = parser.parse("1,2").unwrap_err();
        assert!(matches!(
            err,
            MonitorError::SchemaMismatch {
                expected: 3,
                got: 2
            }
        ));
        let err = parser.parse("1,2,3,4").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);

        let row = parser.parse("4,5,6").unwrap();
        assert_eq!(row.seq(), 1);
    }

    #[test]
    fn truncate_policy_keeps_leading_columns() {
        let mut parser = RowParser::new(SchemaPolicy::Truncate);
        parser.parse("1,2").unwrap();
        let row = parser.parse("3,4,5").unwrap();
        assert_eq!(row.values(), &[3.0, 4.0]);
        assert!(parser.parse("9").is_err());
    }

    #[test]
    fn max_columns_projects_every_row() {
        let mut parser = RowParser::new(SchemaPolicy::Truncate).with_max_columns(Some(1));
        let row = parser.parse("7,8,9").unwrap();
        assert_eq!(row.values(), &[7.0]);
        assert_eq!(parser.arity(), Some(1));
        let row = parser.parse("1,2").unwrap();
        assert_eq!(row.values(), &[1.0]);
    }

    #[test]
    fn custom_delimiter() {
        let mut parser = RowParser::new(SchemaPolicy::Strict).with_delimiter(';');
        let row = parser.parse("1;2").unwrap();
        assert_eq!(row.arity(), 2);
    }
}
