//! Error types shared across the conversion pipeline.

use std::fmt;
use std::path::PathBuf;

/// What went wrong during a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Workbook or sheet layout does not match the expected structure.
    Structural,
    /// A cell could not be coerced by its column type script.
    TypeParse,
    /// A validation script rejected a value or the assembled rows.
    Validation,
    /// The configured row key column produced no value.
    MissingKey,
    /// Two rows produced the same key.
    DuplicateKey,
    /// A script raised an error while running.
    ScriptRuntime,
    /// Reading the input or writing the output failed.
    Io,
    /// The job was cancelled before it finished.
    Cancelled,
}

/// Where in the input an error occurred. All parts are optional;
/// a file-level error carries none of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub sheet: Option<String>,
    pub row: Option<u32>,
    pub column: Option<String>,
}

impl Location {
    pub fn sheet(name: impl Into<String>) -> Self {
        Self {
            sheet: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn at_row(mut self, row: u32) -> Self {
        self.row = Some(row);
        self
    }

    pub fn at_column(mut self, column: impl Into<String>) -> Self {
        self.column = Some(column.into());
        self
    }
}

/// A located conversion failure.
///
/// Renders as `[file #sheet row N col NAME]: message`, with the
/// interpreter traceback appended on its own lines when present.
#[derive(Debug, Clone)]
pub struct ConvertError {
    pub kind: ErrorKind,
    pub file: PathBuf,
    pub location: Location,
    pub message: String,
    pub traceback: Option<String>,
}

impl ConvertError {
    pub fn new(
        kind: ErrorKind,
        file: impl Into<PathBuf>,
        location: Location,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            file: file.into(),
            location,
            message: message.into(),
            traceback: None,
        }
    }

    pub fn structural(file: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Structural, file, Location::default(), message)
    }

    pub fn io(file: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, file, Location::default(), message)
    }

    pub fn cancelled(file: impl Into<PathBuf>) -> Self {
        Self::new(
            ErrorKind::Cancelled,
            file,
            Location::default(),
            "conversion cancelled",
        )
    }

    pub fn missing_key(file: impl Into<PathBuf>, location: Location) -> Self {
        Self::new(
            ErrorKind::MissingKey,
            file,
            location,
            "row key evaluated to nil",
        )
    }

    pub fn duplicate_key(file: impl Into<PathBuf>, location: Location, key: &str) -> Self {
        Self::new(
            ErrorKind::DuplicateKey,
            file,
            location,
            format!("duplicate row key '{key}'"),
        )
    }

    pub fn with_traceback(mut self, traceback: Option<String>) -> Self {
        self.traceback = traceback;
        self
    }

    fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.file.display().to_string())
    }
}

impl fmt::Display for ConvertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}", self.file_name())?;
        if let Some(sheet) = &self.location.sheet {
            write!(f, " #{sheet}")?;
        }
        if let Some(row) = self.location.row {
            write!(f, " row {row}")?;
        }
        if let Some(column) = &self.location.column {
            write!(f, " col {column}")?;
        }
        write!(f, "]: {}", self.message)?;
        if let Some(traceback) = &self.traceback {
            write!(f, "\n{traceback}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConvertError {}

/// Several located failures reported together, in input order.
#[derive(Debug, Clone)]
pub struct AggregateError {
    pub errors: Vec<ConvertError>,
}

impl AggregateError {
    pub fn new(errors: Vec<ConvertError>) -> Self {
        Self { errors }
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_level_error_rendering() {
        let err = ConvertError::structural("/data/in/items.xlsx", "no marked sheets");
        assert_eq!(err.to_string(), "[items.xlsx]: no marked sheets");
    }

    #[test]
    fn test_fully_located_error_rendering() {
        let err = ConvertError::new(
            ErrorKind::TypeParse,
            "/data/in/items.xlsx",
            Location::sheet("Sheet1").at_row(12).at_column("price"),
            "expected a number, got 'abc'",
        );
        assert_eq!(
            err.to_string(),
            "[items.xlsx #Sheet1 row 12 col price]: expected a number, got 'abc'"
        );
    }

    #[test]
    fn test_traceback_appended_on_own_line() {
        let err = ConvertError::new(
            ErrorKind::ScriptRuntime,
            "tables.xlsx",
            Location::sheet("Main").at_row(3),
            "attempt to index a nil value",
        )
        .with_traceback(Some("stack traceback:\n\t[string]:1".to_string()));
        let rendered = err.to_string();
        assert!(rendered.starts_with("[tables.xlsx #Main row 3]: attempt to index a nil value\n"));
        assert!(rendered.contains("stack traceback:"));
    }

    #[test]
    fn test_partial_location() {
        let err = ConvertError::new(
            ErrorKind::Validation,
            "a.xlsx",
            Location::default().at_row(5),
            "bad",
        );
        assert_eq!(err.to_string(), "[a.xlsx row 5]: bad");
    }

    #[test]
    fn test_aggregate_preserves_order() {
        let agg = AggregateError::new(vec![
            ConvertError::structural("a.xlsx", "first"),
            ConvertError::structural("b.xlsx", "second"),
        ]);
        assert_eq!(agg.to_string(), "[a.xlsx]: first\n[b.xlsx]: second");
    }
}
