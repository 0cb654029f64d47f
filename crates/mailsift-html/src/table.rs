//! Table row extraction.

use scraper::{ElementRef, Html, Selector};

/// One row of cell text taken from an HTML table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct TableRow {
    cells: Vec<String>,
}

impl TableRow {
    /// Creates a row from already extracted cell text.
    #[must_use]
    pub const fn new(cells: Vec<String>) -> Self {
        Self { cells }
    }

    /// Cell text in column order.
    #[must_use]
    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    /// Number of cells in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns true if the row had no `<th>`/`<td>` elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Consumes the row, returning its cells.
    #[must_use]
    pub fn into_cells(self) -> Vec<String> {
        self.cells
    }
}

impl<S: Into<String>> FromIterator<S> for TableRow {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

/// Extracts the rows of the first `<table>` in `html`, in document order.
///
/// Each `<tr>` becomes one [`TableRow`] (rows without cells are kept as
/// empty rows) and each `<th>`/`<td>` one cell holding its trimmed text
/// content. Rows of tables nested inside a cell belong to the nested table,
/// not to the first one; their text still counts towards the enclosing cell.
///
/// Returns an empty vector when the document has no table. Never fails:
/// malformed markup is repaired the way browsers repair it.
#[must_use]
pub fn extract_rows(html: &str) -> Vec<TableRow> {
    let document = Html::parse_document(html);

    let Ok(table_selector) = Selector::parse("table") else {
        return Vec::new();
    };
    let Some(table) = document.select(&table_selector).next() else {
        return Vec::new();
    };

    let mut rows = Vec::new();
    collect_within(table, &["tr"], &mut rows);

    rows.into_iter()
        .map(|row| {
            let mut cells = Vec::new();
            collect_within(row, &["th", "td"], &mut cells);
            cells.into_iter().map(cell_text).collect()
        })
        .collect()
}

/// Collects descendants of `parent` named in `wanted`, without descending
/// into matches or into nested tables.
fn collect_within<'a>(parent: ElementRef<'a>, wanted: &[&str], out: &mut Vec<ElementRef<'a>>) {
    for child in parent.children().filter_map(ElementRef::wrap) {
        let name = child.value().name();
        if wanted.contains(&name) {
            out.push(child);
        } else if name != "table" {
            collect_within(child, wanted, out);
        }
    }
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}
