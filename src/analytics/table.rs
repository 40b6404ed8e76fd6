// src/analytics/table.rs

use serde::Serialize;
use std::fmt;

use crate::model::Value;

/// Ephemeral result of one metric query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl ResultTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of column `name`, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&Value>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }
}

/// Aligned plain-text rendering, one header line plus one line per row.
impl fmt::Display for ResultTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|r| r.iter().map(ToString::to_string).collect())
            .collect();
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                cells
                    .iter()
                    .map(|r| r[i].len())
                    .chain(std::iter::once(c.len()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let line = |f: &mut fmt::Formatter<'_>, vals: &[String]| -> fmt::Result {
            let padded: Vec<String> = vals
                .iter()
                .zip(&widths)
                .map(|(v, w)| format!("{v:<w$}"))
                .collect();
            writeln!(f, "{}", padded.join("  ").trim_end())
        };

        line(f, &self.columns)?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        line(f, &rule)?;
        if cells.is_empty() {
            writeln!(f, "(no rows)")?;
        }
        for row in &cells {
            line(f, row)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_aligned_columns() {
        let t = ResultTable {
            name: "t".into(),
            columns: vec!["region".into(), "total".into()],
            rows: vec![
                vec![Value::from("A"), Value::from(15.0)],
                vec![Value::from("BC"), Value::Null],
            ],
        };
        let text = t.to_string();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "region  total");
        assert_eq!(lines[1], "------  -----");
        assert_eq!(lines[2], "A       15");
        assert_eq!(lines[3], "BC      null");
    }

    #[test]
    fn empty_table_says_so() {
        let t = ResultTable {
            name: "t".into(),
            columns: vec!["region".into()],
            rows: vec![],
        };
        assert!(t.to_string().contains("(no rows)"));
        assert_eq!(t.column("region"), Some(vec![]));
    }
}
