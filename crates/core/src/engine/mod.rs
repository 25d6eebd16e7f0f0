//! Conversion engine: turns one input file into its serialized output.
//!
//! An engine instance is built per job with a fresh script runtime and
//! runs synchronously; callers put it on a blocking worker thread.

mod rows;
mod serialize;
mod sheet;
mod workbook;

pub use rows::{ColumnPipeline, ColumnProgram};
pub use serialize::to_lua_literal;
pub use sheet::{
    parse_column_configs, parse_sheet_config, RawColumnConfig, RawSheetConfig, SchemaError,
    SheetData,
};
pub use workbook::load_sheets;

use mlua::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{ConvertError, ErrorKind, Location};
use crate::script::{ScriptError, ScriptRuntime};

/// Enum definitions file; also the only convertible non-spreadsheet name.
pub const ENUM_SCRIPT_NAME: &str = "__enums.lua";
/// Output of the enum job, written next to the inputs.
pub const ENUM_OUTPUT_NAME: &str = "enums.lua";
/// Directory-wide validation script.
pub const VALIDATE_ALL_SCRIPT: &str = "__validate_all.lua";
/// Directory utility script, exposed to sheet scripts as global `util`.
pub const UTIL_SCRIPT: &str = "__util.lua";
/// Script producing the enum job's exported table.
pub const EXPORT_ENUMS_SCRIPT: &str = "export_enums.lua";

const SPREADSHEET_EXTENSIONS: &[&str] = &[".xls", ".xlsx"];
const TEMP_FILE_MARKER: char = '~';

/// Marker cell identifying a convertible sheet.
pub(crate) const SHEET_MARKER: &str = "config";
/// Label of the row opening the column block.
pub(crate) const COLUMN_BLOCK_LABEL: &str = "columns";

/// Whether a directory entry takes part in conversion.
pub fn is_convertible(name: &str) -> bool {
    if name == ENUM_SCRIPT_NAME {
        return true;
    }
    if name.starts_with(TEMP_FILE_MARKER) {
        return false;
    }
    let lower = name.to_lowercase();
    SPREADSHEET_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

/// What kind of work a file maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Evaluate the enum definitions and write the exported table.
    Enums,
    /// Convert the marked sheets of a workbook.
    Tabular,
}

/// One file to convert, with the directory pair it belongs to.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub path: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl ConversionJob {
    pub fn kind(&self) -> JobKind {
        let is_enums = self
            .path
            .file_name()
            .map(|n| n == ENUM_SCRIPT_NAME)
            .unwrap_or(false);
        if is_enums {
            JobKind::Enums
        } else {
            JobKind::Tabular
        }
    }
}

/// Runs one conversion job to completion.
pub struct ConversionEngine {
    job: ConversionJob,
    runtime: ScriptRuntime,
}

impl ConversionEngine {
    /// Builds the engine with a fresh runtime resolving scripts from the
    /// output directory first, then the input directory.
    pub fn new(job: ConversionJob) -> Result<Self, ConvertError> {
        let runtime = ScriptRuntime::new(vec![job.output_dir.clone(), job.input_dir.clone()])
            .map_err(|e| script_file_error(&job.path, e))?;
        Ok(Self { job, runtime })
    }

    /// Runs the job, reporting progress in `[0, 1]`.
    pub fn run(&self, progress: &mut dyn FnMut(f64)) -> Result<(), ConvertError> {
        progress(0.0);
        match self.job.kind() {
            JobKind::Enums => {
                self.load_enum_definitions()?;
                self.run_enum_job()?;
            }
            JobKind::Tabular => {
                // A broken enums file fails its own job, not this one;
                // cells that need a missing group fail individually.
                if let Err(e) = self.load_enum_definitions() {
                    warn!(file = %self.job.path.display(), error = %e, "enum definitions failed to load");
                }
                self.run_tabular_job(progress)?;
            }
        }
        progress(1.0);
        Ok(())
    }

    /// Evaluates the enum definitions, if present, into global `__ENUMS`.
    fn load_enum_definitions(&self) -> Result<(), ConvertError> {
        let enums_path = self.job.input_dir.join(ENUM_SCRIPT_NAME);
        match self.runtime.eval_named(ENUM_SCRIPT_NAME) {
            Ok(Some(value)) => self
                .runtime
                .set_global("__ENUMS", value)
                .map_err(|e| script_file_error(&enums_path, e)),
            Ok(None) => Ok(()),
            Err(e) => Err(script_file_error(&enums_path, e)),
        }
    }

    fn run_enum_job(&self) -> Result<(), ConvertError> {
        let exported = match self
            .runtime
            .eval_named(EXPORT_ENUMS_SCRIPT)
            .map_err(|e| script_file_error(&self.job.path, e))?
        {
            Some(value) => value,
            // No export script: emit the definitions as loaded.
            None => self
                .runtime
                .lua()
                .globals()
                .get("__ENUMS")
                .unwrap_or(Value::Nil),
        };
        let exported = match exported {
            Value::Nil => Value::Table(
                self.runtime
                    .lua()
                    .create_table()
                    .map_err(|e| script_file_error(&self.job.path, ScriptError::from(e)))?,
            ),
            other => other,
        };

        let literal = to_lua_literal(&exported)
            .map_err(|e| script_file_error(&self.job.path, e))?;
        let content = format!("-- {ENUM_SCRIPT_NAME}\nreturn {literal}\n");
        let target = self.job.input_dir.join(ENUM_OUTPUT_NAME);
        std::fs::write(&target, content).map_err(|e| {
            ConvertError::io(
                &self.job.path,
                format!("could not write '{}': {e}", target.display()),
            )
        })?;
        debug!(target = %target.display(), "wrote enum definitions");
        Ok(())
    }

    fn run_tabular_job(&self, progress: &mut dyn FnMut(f64)) -> Result<(), ConvertError> {
        self.load_util()?;

        let sheets = load_sheets(&self.job.path)?;
        let marked: Vec<&SheetData> = sheets.iter().filter(|s| s.is_marked()).collect();
        if marked.is_empty() {
            return Err(ConvertError::structural(
                &self.job.path,
                format!("no sheet is marked '{SHEET_MARKER}'"),
            ));
        }

        let stem = self
            .job
            .path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let include_sheet_name = marked.len() > 1;
        let count = marked.len() as f64;

        for (i, sheet) in marked.iter().enumerate() {
            let (config, marker_row) =
                parse_sheet_config(sheet, &stem).map_err(|e| self.schema_error(sheet, e))?;
            let columns = parse_column_configs(sheet, &config, marker_row)
                .map_err(|e| self.schema_error(sheet, e))?;

            let mut sheet_progress = |p: f64| progress((i as f64 + p) / count);
            let rendered = rows::render_sheet(
                &self.runtime,
                &self.job.path,
                sheet,
                &config,
                columns,
                include_sheet_name,
                &mut sheet_progress,
            )?;

            let target = self
                .job
                .output_dir
                .join(format!("{}.{}", config.output_name, config.output_format));
            std::fs::write(&target, rendered).map_err(|e| {
                ConvertError::io(
                    &self.job.path,
                    format!("could not write '{}': {e}", target.display()),
                )
            })?;
            debug!(target = %target.display(), sheet = %sheet.name, "wrote converted sheet");
        }
        Ok(())
    }

    /// Binds `<input>/__util.lua`, when present, to global `util`.
    fn load_util(&self) -> Result<(), ConvertError> {
        let util_path = self.job.input_dir.join(UTIL_SCRIPT);
        if !util_path.is_file() {
            return Ok(());
        }
        let value = self
            .runtime
            .eval_file(&util_path)
            .map_err(|e| script_file_error(&util_path, e))?;
        self.runtime
            .set_global("util", value)
            .map_err(|e| script_file_error(&util_path, e))
    }

    fn schema_error(&self, sheet: &SheetData, e: SchemaError) -> ConvertError {
        ConvertError::new(
            ErrorKind::Structural,
            &self.job.path,
            Location::sheet(&sheet.name),
            e.to_string(),
        )
    }
}

fn script_file_error(file: &Path, e: ScriptError) -> ConvertError {
    ConvertError::new(
        ErrorKind::ScriptRuntime,
        file,
        Location::default(),
        e.message.clone(),
    )
    .with_traceback(e.traceback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_convertible() {
        assert!(is_convertible("__enums.lua"));
        assert!(is_convertible("items.xlsx"));
        assert!(is_convertible("LEGACY.XLS"));
        assert!(!is_convertible("~items.xlsx"));
        assert!(!is_convertible("notes.txt"));
        assert!(!is_convertible("other.lua"));
        assert!(!is_convertible("xlsx"));
    }

    #[test]
    fn test_job_kind() {
        let job = ConversionJob {
            path: PathBuf::from("/in/__enums.lua"),
            input_dir: PathBuf::from("/in"),
            output_dir: PathBuf::from("/out"),
        };
        assert_eq!(job.kind(), JobKind::Enums);
        let job = ConversionJob {
            path: PathBuf::from("/in/items.xlsx"),
            ..job
        };
        assert_eq!(job.kind(), JobKind::Tabular);
    }

    #[test]
    fn test_enum_job_writes_exported_table() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(
            input.path().join(ENUM_SCRIPT_NAME),
            "return { color = { red = 1, blue = 2 } }",
        )
        .unwrap();

        let engine = ConversionEngine::new(ConversionJob {
            path: input.path().join(ENUM_SCRIPT_NAME),
            input_dir: input.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
        })
        .unwrap();
        engine.run(&mut |_| {}).unwrap();

        let written = std::fs::read_to_string(input.path().join(ENUM_OUTPUT_NAME)).unwrap();
        assert!(written.starts_with("-- __enums.lua\nreturn {"));
        assert!(written.contains("red = 1"));
    }

    #[test]
    fn test_enum_job_custom_export_script() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(
            input.path().join(ENUM_SCRIPT_NAME),
            "return { size = { small = 1 } }",
        )
        .unwrap();
        std::fs::write(
            input.path().join(EXPORT_ENUMS_SCRIPT),
            "return { exported = __ENUMS.size.small }",
        )
        .unwrap();

        let engine = ConversionEngine::new(ConversionJob {
            path: input.path().join(ENUM_SCRIPT_NAME),
            input_dir: input.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
        })
        .unwrap();
        engine.run(&mut |_| {}).unwrap();

        let written = std::fs::read_to_string(input.path().join(ENUM_OUTPUT_NAME)).unwrap();
        assert!(written.contains("exported = 1"));
    }

    #[test]
    fn test_enum_job_without_definitions_writes_empty_table() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        // The record exists but the file was deleted in between.
        let engine = ConversionEngine::new(ConversionJob {
            path: input.path().join(ENUM_SCRIPT_NAME),
            input_dir: input.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
        })
        .unwrap();
        engine.run(&mut |_| {}).unwrap();
        let written = std::fs::read_to_string(input.path().join(ENUM_OUTPUT_NAME)).unwrap();
        assert_eq!(written, "-- __enums.lua\nreturn {}\n");
    }

    #[test]
    fn test_broken_enum_definitions_fail_the_job() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(input.path().join(ENUM_SCRIPT_NAME), "return nil .. 1").unwrap();

        let engine = ConversionEngine::new(ConversionJob {
            path: input.path().join(ENUM_SCRIPT_NAME),
            input_dir: input.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
        })
        .unwrap();
        let err = engine.run(&mut |_| {}).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ScriptRuntime);
        assert!(err.to_string().starts_with("[__enums.lua]:"));
    }

    #[test]
    fn test_tabular_job_on_unreadable_workbook_is_io_error() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        std::fs::write(input.path().join("broken.xlsx"), "not a workbook").unwrap();

        let engine = ConversionEngine::new(ConversionJob {
            path: input.path().join("broken.xlsx"),
            input_dir: input.path().to_path_buf(),
            output_dir: output.path().to_path_buf(),
        })
        .unwrap();
        let err = engine.run(&mut |_| {}).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Io);
    }
}
