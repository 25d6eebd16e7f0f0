//! Spreadsheet loading. Workbooks are read once into plain text grids;
//! everything downstream works on cell text only.

use calamine::{open_workbook_auto, Data, Reader};
use std::path::Path;

use super::sheet::SheetData;
use crate::error::ConvertError;

/// Reads every sheet of the workbook into a [`SheetData`] grid.
///
/// Cell coordinates in the grids are absolute: a sheet whose used range
/// starts at C3 still addresses that cell as (2, 2).
pub fn load_sheets(path: &Path) -> Result<Vec<SheetData>, ConvertError> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|e| ConvertError::io(path, format!("could not open workbook: {e}")))?;

    let names = workbook.sheet_names().to_vec();
    let mut sheets = Vec::with_capacity(names.len());
    for name in names {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| ConvertError::io(path, format!("could not read sheet '{name}': {e}")))?;

        let (row_offset, col_offset) = match range.start() {
            Some((r, c)) => (r as usize, c as usize),
            None => (0, 0),
        };

        let mut cells: Vec<Vec<String>> = Vec::new();
        for (r, row) in range.rows().enumerate() {
            while cells.len() < row_offset + r {
                cells.push(Vec::new());
            }
            let mut line = vec![String::new(); col_offset];
            line.extend(row.iter().map(cell_text));
            cells.push(line);
        }
        sheets.push(SheetData::new(name, cells));
    }
    Ok(sheets)
}

/// Formats a cell as the text the scripts see. Formula cells contribute
/// their cached computed value; whole floats drop the fraction.
fn cell_text(data: &Data) -> String {
    match data {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => float_text(*f),
        Data::Bool(b) => b.to_string(),
        Data::Error(_) => String::new(),
        Data::DateTime(dt) => float_text(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
    }
}

fn float_text(f: f64) -> String {
    if f.is_finite() && f == f.trunc() && f.abs() < 1e15 {
        format!("{}", f as i64)
    } else {
        f.to_string()
    }
}
