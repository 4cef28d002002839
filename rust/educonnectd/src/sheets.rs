use calamine::{open_workbook_auto_from_rs, Data, Reader};
use std::collections::{HashMap, HashSet};
use std::io::Cursor;

pub const RESULTS_SHEET: &str = "results";
pub const SUMMARIES_SHEET: &str = "summaries";

#[derive(Debug, thiserror::Error)]
pub enum SheetError {
    #[error("unreadable spreadsheet: {0}")]
    Open(#[from] calamine::Error),
    #[error("sheet {sheet:?} has more than one {column:?} column")]
    DuplicateColumn { sheet: String, column: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Cell {
    fn from_data(d: &Data) -> Option<Cell> {
        match d {
            Data::Empty => None,
            Data::Int(i) => Some(Cell::Int(*i)),
            Data::Float(f) => Some(Cell::Float(*f)),
            Data::Bool(b) => Some(Cell::Bool(*b)),
            Data::String(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| Cell::Text(s.to_string()))
            }
            Data::DateTime(dt) => Some(Cell::Float(dt.as_f64())),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Some(Cell::Text(s.clone())),
            Data::Error(e) => Some(Cell::Text(format!("{e:?}"))),
        }
    }

    fn describe(&self) -> String {
        match self {
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
            Cell::Text(s) => format!("{s:?}"),
            Cell::Bool(b) => b.to_string(),
        }
    }
}

/// Column value that could not be read as the requested type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("column {column}: expected {expected}, got {got}")]
pub struct CellTypeError {
    pub column: String,
    pub expected: &'static str,
    pub got: String,
}

/// One data row keyed by lower-cased header name. Blank cells are absent.
#[derive(Debug, Clone, Default)]
pub struct SheetRow {
    /// 1-based row number as shown by spreadsheet programs.
    pub line: usize,
    pub cells: HashMap<String, Cell>,
}

impl SheetRow {
    fn type_err(&self, column: &str, expected: &'static str, cell: &Cell) -> CellTypeError {
        CellTypeError {
            column: column.to_string(),
            expected,
            got: cell.describe(),
        }
    }

    pub fn int(&self, column: &str) -> Result<Option<i64>, CellTypeError> {
        let Some(cell) = self.cells.get(column) else {
            return Ok(None);
        };
        let v = match cell {
            Cell::Int(i) => Some(*i),
            Cell::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(*f as i64),
            Cell::Text(s) => s
                .parse::<i64>()
                .ok()
                .or_else(|| {
                    s.parse::<f64>()
                        .ok()
                        .filter(|f| f.is_finite() && f.fract() == 0.0)
                        .map(|f| f as i64)
                }),
            _ => None,
        };
        v.map(Some)
            .ok_or_else(|| self.type_err(column, "an integer", cell))
    }

    pub fn number(&self, column: &str) -> Result<Option<f64>, CellTypeError> {
        let Some(cell) = self.cells.get(column) else {
            return Ok(None);
        };
        let v = match cell {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) if f.is_finite() => Some(*f),
            Cell::Text(s) => s.parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        };
        v.map(Some)
            .ok_or_else(|| self.type_err(column, "a number", cell))
    }

    pub fn text(&self, column: &str) -> Option<String> {
        self.cells.get(column).map(|cell| match cell {
            Cell::Text(s) => s.clone(),
            Cell::Int(i) => i.to_string(),
            Cell::Float(f) => f.to_string(),
            Cell::Bool(b) => b.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct WorkbookRows {
    pub results: Vec<SheetRow>,
    pub summaries: Vec<SheetRow>,
}

/// Decodes XLSX/XLS/ODS bytes into the `results` and `summaries` row-sets.
/// A missing sheet decodes to an empty row-set.
pub fn decode_workbook(bytes: &[u8]) -> Result<WorkbookRows, SheetError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
    let names = workbook.sheet_names();

    let mut read = |wanted: &str| -> Result<Vec<SheetRow>, SheetError> {
        let Some(name) = names
            .iter()
            .find(|n| n.trim().eq_ignore_ascii_case(wanted))
        else {
            return Ok(Vec::new());
        };
        let range = workbook.worksheet_range(name)?;
        rows_from_range(name, &range)
    };

    let results = read(RESULTS_SHEET)?;
    let summaries = read(SUMMARIES_SHEET)?;
    tracing::debug!(
        results = results.len(),
        summaries = summaries.len(),
        "spreadsheet decoded"
    );
    Ok(WorkbookRows { results, summaries })
}

fn rows_from_range(
    sheet: &str,
    range: &calamine::Range<Data>,
) -> Result<Vec<SheetRow>, SheetError> {
    // Ranges start at the first used cell, not necessarily A1.
    let first_line = range.start().map(|(r, _)| r as usize + 1).unwrap_or(1);
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(Vec::new());
    };
    let columns: Vec<Option<String>> = header
        .iter()
        .map(|d| match Cell::from_data(d) {
            Some(Cell::Text(s)) => Some(s.to_ascii_lowercase()),
            Some(other) => Some(other.describe()),
            None => None,
        })
        .collect();

    // Header names are case-insensitive, so "Score" and "score" collide.
    let mut seen = HashSet::new();
    if let Some(column) = columns.iter().flatten().find(|c| !seen.insert(c.as_str())) {
        return Err(SheetError::DuplicateColumn {
            sheet: sheet.to_string(),
            column: column.clone(),
        });
    }

    Ok(rows
        .enumerate()
        .filter_map(|(i, cells)| {
            let cells: HashMap<String, Cell> = columns
                .iter()
                .zip(cells.iter())
                .filter_map(|(col, d)| Some((col.clone()?, Cell::from_data(d)?)))
                .collect();
            (!cells.is_empty()).then(|| SheetRow {
                line: first_line + i + 1,
                cells,
            })
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_xlsxwriter::Workbook;

    fn xlsx(build: impl FnOnce(&mut Workbook)) -> Vec<u8> {
        let mut wb = Workbook::new();
        build(&mut wb);
        wb.save_to_buffer().expect("xlsx buffer")
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(decode_workbook(b"not a spreadsheet").is_err());
    }

    #[test]
    fn missing_sheets_decode_empty() {
        let bytes = xlsx(|wb| {
            let ws = wb.add_worksheet();
            ws.set_name("notes").expect("name");
            ws.write_string(0, 0, "hello").expect("write");
        });
        let rows = decode_workbook(&bytes).expect("decode");
        assert!(rows.results.is_empty());
        assert!(rows.summaries.is_empty());
    }

    #[test]
    fn headers_colliding_case_insensitively_are_rejected() {
        let bytes = xlsx(|wb| {
            let ws = wb.add_worksheet();
            ws.set_name("results").expect("name");
            ws.write_string(0, 0, "student_id").expect("h");
            ws.write_string(0, 1, "Score").expect("h");
            ws.write_string(0, 2, "score").expect("h");
            ws.write_number(1, 0, 1.0).expect("c");
            ws.write_number(1, 1, 40.0).expect("c");
            ws.write_number(1, 2, 90.0).expect("c");
        });
        match decode_workbook(&bytes) {
            Err(SheetError::DuplicateColumn { sheet, column }) => {
                assert_eq!(sheet, "results");
                assert_eq!(column, "score");
            }
            other => panic!("expected duplicate column error, got {other:?}"),
        }
    }

    #[test]
    fn rows_are_keyed_by_header_and_coerced() {
        let bytes = xlsx(|wb| {
            let ws = wb.add_worksheet();
            ws.set_name("Results").expect("name");
            ws.write_string(0, 0, "Student_ID").expect("h");
            ws.write_string(0, 1, "subject_code").expect("h");
            ws.write_string(0, 2, "score").expect("h");
            ws.write_number(1, 0, 5.0).expect("c");
            ws.write_string(1, 1, " MATH ").expect("c");
            ws.write_string(1, 2, "88.5").expect("c");
            // row 3 left blank
            ws.write_string(3, 0, "7").expect("c");
            ws.write_string(3, 2, "n/a").expect("c");
        });
        let rows = decode_workbook(&bytes).expect("decode").results;
        assert_eq!(rows.len(), 2);

        assert_eq!(rows[0].line, 2);
        assert_eq!(rows[0].int("student_id"), Ok(Some(5)));
        assert_eq!(rows[0].text("subject_code").as_deref(), Some("MATH"));
        assert_eq!(rows[0].number("score"), Ok(Some(88.5)));

        assert_eq!(rows[1].line, 4);
        assert_eq!(rows[1].int("student_id"), Ok(Some(7)));
        assert_eq!(rows[1].text("subject_code"), None);
        let err = rows[1].number("score").expect_err("n/a is not a number");
        assert_eq!(err.column, "score");
    }
}
