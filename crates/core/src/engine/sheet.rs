//! Sheet grids and the positional schema blocks read from them.

use thiserror::Error;

use super::{COLUMN_BLOCK_LABEL, SHEET_MARKER};

/// One sheet as a text grid with absolute coordinates.
#[derive(Debug, Clone)]
pub struct SheetData {
    pub name: String,
    cells: Vec<Vec<String>>,
}

impl SheetData {
    pub fn new(name: impl Into<String>, cells: Vec<Vec<String>>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    /// Cell text at (row, col); out-of-range reads are blank.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.cells
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Index of the last physical row.
    pub fn last_row(&self) -> usize {
        self.cells.len().saturating_sub(1)
    }

    pub fn width(&self, row: usize) -> usize {
        self.cells.get(row).map(Vec::len).unwrap_or(0)
    }

    pub fn row_is_blank(&self, row: usize) -> bool {
        match self.cells.get(row) {
            Some(cells) => cells.iter().all(|c| c.trim().is_empty()),
            None => true,
        }
    }

    pub fn first_nonblank_row(&self) -> Option<usize> {
        (0..self.cells.len()).find(|&r| !self.row_is_blank(r))
    }

    /// Whether this sheet opted in to conversion: the first non-blank
    /// row carries the marker in its first cell.
    pub fn is_marked(&self) -> bool {
        self.first_nonblank_row()
            .map(|r| self.cell(r, 0) == SHEET_MARKER)
            .unwrap_or(false)
    }
}

/// Sheet-level settings read from the two-row key/value block under the
/// marker. Unrecognized keys are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSheetConfig {
    /// First data row, 1-based.
    pub first_data_row: u32,
    /// Row holding column titles, 1-based; 0 or negative disables titles.
    pub title_row: i64,
    /// Output file stem.
    pub output_name: String,
    /// Column whose converted value keys each row; empty means
    /// sequential keys.
    pub row_key: String,
    /// Output extension.
    pub output_format: String,
    /// Script body run once over the assembled rows.
    pub overall_validation: Option<String>,
}

/// One column of the schema block.
#[derive(Debug, Clone, PartialEq)]
pub struct RawColumnConfig {
    pub cell_index: usize,
    pub name: String,
    pub type_src: String,
    pub validate_src: Option<String>,
    pub post_process_src: Option<String>,
    pub title: Option<String>,
}

impl RawColumnConfig {
    /// Columns whose name starts with `_` feed validation but are
    /// excluded from the output rows.
    pub fn is_internal(&self) -> bool {
        self.name.starts_with('_')
    }
}

/// Schema block problems. These are structural: the sheet layout itself
/// is wrong, before any script runs.
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    #[error("sheet has no content")]
    EmptySheet,

    #[error("invalid value '{value}' for setting '{key}'")]
    InvalidSetting { key: String, value: String },

    #[error("no row labeled '{0}' was found below the settings block")]
    MissingColumnBlock(&'static str),

    #[error("column '{0}' is declared more than once")]
    DuplicateColumn(String),
}

/// Reads the sheet settings block. Returns the settings and the row the
/// marker was found on.
pub fn parse_sheet_config(
    sheet: &SheetData,
    default_name: &str,
) -> Result<(RawSheetConfig, usize), SchemaError> {
    let marker_row = sheet.first_nonblank_row().ok_or(SchemaError::EmptySheet)?;

    let mut config = RawSheetConfig {
        first_data_row: 8,
        title_row: -1,
        output_name: default_name.to_string(),
        row_key: String::new(),
        output_format: "lua".to_string(),
        overall_validation: None,
    };

    let width = sheet.width(marker_row).max(sheet.width(marker_row + 1));
    for col in 1..width {
        let key = sheet.cell(marker_row, col).trim();
        let value = sheet.cell(marker_row + 1, col);
        match key {
            "first_data_row" => {
                config.first_data_row = parse_setting(key, value)?;
            }
            "title_row" => {
                config.title_row = parse_setting(key, value)?;
            }
            "output_name" if !value.trim().is_empty() => {
                config.output_name = value.trim().to_string();
            }
            "row_key" => {
                config.row_key = value.trim().to_string();
            }
            "output_format" if !value.trim().is_empty() => {
                config.output_format = value.trim().to_string();
            }
            "overall_validation" if !value.trim().is_empty() => {
                config.overall_validation = Some(value.to_string());
            }
            _ => {}
        }
    }
    Ok((config, marker_row))
}

fn parse_setting<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, SchemaError> {
    value
        .trim()
        .parse()
        .map_err(|_| SchemaError::InvalidSetting {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Locates the column block and reads one [`RawColumnConfig`] per named
/// column.
///
/// The block starts at the first row below the settings whose first cell
/// is the block label; that row holds names, the three rows below hold
/// the type, validation and post-process scripts. Titles come from the
/// configured title row.
pub fn parse_column_configs(
    sheet: &SheetData,
    config: &RawSheetConfig,
    marker_row: usize,
) -> Result<Vec<RawColumnConfig>, SchemaError> {
    let header_row = (marker_row + 2..=sheet.last_row())
        .find(|&r| sheet.cell(r, 0).trim() == COLUMN_BLOCK_LABEL)
        .ok_or(SchemaError::MissingColumnBlock(COLUMN_BLOCK_LABEL))?;

    let width = (header_row..header_row + 4)
        .map(|r| sheet.width(r))
        .max()
        .unwrap_or(0);

    let mut columns: Vec<RawColumnConfig> = Vec::new();
    for col in 1..width {
        let name = sheet.cell(header_row, col).trim();
        if name.is_empty() {
            continue;
        }
        if columns.iter().any(|c| c.name == name) {
            return Err(SchemaError::DuplicateColumn(name.to_string()));
        }

        let type_src = sheet.cell(header_row + 1, col).trim();
        let title = if config.title_row > 0 {
            let text = sheet.cell(config.title_row as usize - 1, col).trim();
            (!text.is_empty()).then(|| text.to_string())
        } else {
            None
        };

        columns.push(RawColumnConfig {
            cell_index: col,
            name: name.to_string(),
            type_src: if type_src.is_empty() {
                "string".to_string()
            } else {
                type_src.to_string()
            },
            validate_src: nonblank(sheet.cell(header_row + 2, col)),
            post_process_src: nonblank(sheet.cell(header_row + 3, col)),
            title,
        });
    }
    Ok(columns)
}

fn nonblank(text: &str) -> Option<String> {
    (!text.trim().is_empty()).then(|| text.to_string())
}
