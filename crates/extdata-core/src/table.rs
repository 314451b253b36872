//! Column-oriented result table and its row-oriented view.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Column name → ordered row values. Every column has the same length.
///
/// Tables are built incrementally by connectors and parsers through
/// [`TableBuilder`], which enforces the equal-length invariant on
/// [`TableBuilder::finish`]. Once handed out, a table is only read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Table {
    columns: BTreeMap<String, Vec<String>>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from columns that must already have equal length.
    /// Returns `None` if they do not.
    pub fn from_columns<I, K>(columns: I) -> Option<Self>
    where
        I: IntoIterator<Item = (K, Vec<String>)>,
        K: Into<String>,
    {
        let columns: BTreeMap<String, Vec<String>> = columns
            .into_iter()
            .map(|(name, values)| (name.into(), values))
            .collect();

        let mut lengths = columns.values().map(Vec::len);
        if let Some(first) = lengths.next() {
            if lengths.any(|len| len != first) {
                return None;
            }
        }

        Some(Self { columns })
    }

    pub fn column(&self, name: &str) -> Option<&[String]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn value(&self, name: &str, row: usize) -> Option<&str> {
        self.columns
            .get(name)
            .and_then(|values| values.get(row))
            .map(String::as_str)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.columns
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.columns.values().next().map_or(0, Vec::len)
    }

    /// No columns at all, or columns without rows.
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    /// Derive the row-oriented view. The table is not modified.
    pub fn rows(&self) -> RowView {
        RowView::from_table(self)
    }

    pub fn into_columns(self) -> BTreeMap<String, Vec<String>> {
        self.columns
    }
}

/// Incremental, possibly ragged, column accumulator.
#[derive(Debug, Clone, Default)]
pub struct TableBuilder {
    columns: BTreeMap<String, Vec<String>>,
}

impl TableBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a set of initial values.
    pub fn with_initial(initial: &Table) -> Self {
        Self {
            columns: initial.columns.clone(),
        }
    }

    /// Ensure a column exists, even if it never receives a value.
    pub fn declare(&mut self, column: &str) {
        self.columns.entry(column.to_owned()).or_default();
    }

    pub fn push(&mut self, column: &str, value: impl Into<String>) {
        self.columns
            .entry(column.to_owned())
            .or_default()
            .push(value.into());
    }

    /// Append values to a column, keeping whatever it already holds.
    pub fn append<I>(&mut self, column: &str, values: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.columns
            .entry(column.to_owned())
            .or_default()
            .extend(values);
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn len_of(&self, column: &str) -> usize {
        self.columns.get(column).map_or(0, Vec::len)
    }

    /// Close the table. Shorter columns are padded with empty strings up to
    /// the longest one so that every row index is defined for every column.
    pub fn finish(mut self) -> Table {
        let rows = self.columns.values().map(Vec::len).max().unwrap_or(0);
        for values in self.columns.values_mut() {
            values.resize(rows, String::new());
        }
        Table {
            columns: self.columns,
        }
    }
}

/// Row-oriented, read-only derivation of a [`Table`].
///
/// `rows[i]` maps every column to its value at row `i`. When the table has
/// exactly one row, `common` additionally exposes each column as a scalar,
/// so single-row results can be addressed by name without an index. Both
/// views come from the same table and therefore always agree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowView {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub common: BTreeMap<String, String>,
    pub rows: Vec<BTreeMap<String, String>>,
}

impl RowView {
    pub fn from_table(table: &Table) -> Self {
        let row_count = table.row_count();
        let mut rows: Vec<BTreeMap<String, String>> = vec![BTreeMap::new(); row_count];
        let mut common = BTreeMap::new();

        for (column, values) in table.columns() {
            if values.len() == 1 {
                common.insert(column.to_owned(), values[0].clone());
            }
            for (row, value) in rows.iter_mut().zip(values) {
                row.insert(column.to_owned(), value.clone());
            }
        }

        Self { common, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Scalar access for single-row results.
    pub fn common_value(&self, column: &str) -> Option<&str> {
        self.common.get(column).map(String::as_str)
    }

    /// Re-aggregate rows by column. Inverse of [`RowView::from_table`] for
    /// any table that has at least one row.
    pub fn to_table(&self) -> Table {
        let mut builder = TableBuilder::new();
        for row in &self.rows {
            for (column, value) in row {
                builder.push(column, value.clone());
            }
        }
        builder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    fn sample() -> Table {
        Table::from_columns([
            ("name", strings(&["Ada", "Grace", "Linus"])),
            ("year", strings(&["1815", "1906", "1969"])),
        ])
        .expect("equal lengths")
    }

    #[test]
    fn from_columns_rejects_ragged_input() {
        let ragged = Table::from_columns([("a", strings(&["1", "2"])), ("b", strings(&["1"]))]);
        assert!(ragged.is_none());
    }

    #[test]
    fn builder_pads_short_columns() {
        let mut builder = TableBuilder::new();
        builder.append("a", strings(&["1", "2", "3"]));
        builder.push("b", "x");
        builder.declare("c");

        let table = builder.finish();
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.column("b"), Some(strings(&["x", "", ""]).as_slice()));
        assert_eq!(table.column("c"), Some(strings(&["", "", ""]).as_slice()));
    }

    #[test]
    fn row_view_has_one_record_per_row_with_every_column() {
        let table = sample();
        let view = table.rows();

        assert_eq!(view.len(), 3);
        for row in &view.rows {
            assert_eq!(row.len(), table.column_count());
        }
        assert_eq!(view.rows[1]["name"], "Grace");
        assert!(view.common.is_empty());
    }

    #[test]
    fn round_trip_recovers_table() {
        let table = sample();
        assert_eq!(table.rows().to_table(), table);
    }

    #[test]
    fn single_row_columns_are_exposed_as_common_values() {
        let table = Table::from_columns([
            ("title", strings(&["Report"])),
            ("count", strings(&["12"])),
        ])
        .expect("equal lengths");
        let view = table.rows();

        assert_eq!(view.len(), 1);
        for column in ["title", "count"] {
            assert_eq!(view.common_value(column), Some(view.rows[0][column].as_str()));
        }
    }

    #[test]
    fn empty_table_yields_empty_view() {
        let view = Table::new().rows();
        assert!(view.is_empty());
        assert!(view.common.is_empty());
    }
}
