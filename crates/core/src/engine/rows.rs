//! Row conversion: runs the compiled column scripts over the data rows
//! of one sheet and renders the keyed output table.

use mlua::{Function, Table, Value};
use std::path::Path;

use super::serialize::to_lua_literal;
use super::sheet::{RawColumnConfig, RawSheetConfig, SheetData};
use crate::error::{ConvertError, ErrorKind, Location};
use crate::script::{ScriptError, ScriptRuntime, ValidationOutcome};

/// The per-cell stages of a column, in the order they run.
pub trait ColumnPipeline {
    /// Coerces cell text into a value.
    fn parse(&self, text: &str) -> Result<Value, ScriptError>;
    /// Checks a parsed value against the raw parsed row.
    fn validate(&self, value: &Value, row: &Table) -> Result<ValidationOutcome, ScriptError>;
    /// Transforms a parsed value into its output form.
    fn post_process(&self, value: Value, row: &Table) -> Result<Value, ScriptError>;
}

/// A column's scripts compiled once and reused for every row.
pub struct ColumnProgram<'a> {
    runtime: &'a ScriptRuntime,
    pub config: RawColumnConfig,
    parse: Function,
    validate: Option<Function>,
    post_process: Option<Function>,
}

impl<'a> ColumnProgram<'a> {
    pub fn compile(
        runtime: &'a ScriptRuntime,
        config: RawColumnConfig,
    ) -> Result<Self, ScriptError> {
        let parse = runtime.compile_type(&config.type_src)?;
        let validate = config
            .validate_src
            .as_deref()
            .map(|body| runtime.compile_cell_callback(&format!("validate:{}", config.name), body))
            .transpose()?;
        let post_process = config
            .post_process_src
            .as_deref()
            .map(|body| runtime.compile_cell_callback(&format!("post:{}", config.name), body))
            .transpose()?;
        Ok(Self {
            runtime,
            config,
            parse,
            validate,
            post_process,
        })
    }
}

impl ColumnPipeline for ColumnProgram<'_> {
    fn parse(&self, text: &str) -> Result<Value, ScriptError> {
        let arg = Value::String(self.runtime.lua().create_string(text)?);
        self.runtime.call_traced(&self.parse, vec![arg])
    }

    fn validate(&self, value: &Value, row: &Table) -> Result<ValidationOutcome, ScriptError> {
        let Some(validate) = &self.validate else {
            return Ok(ValidationOutcome::Pass);
        };
        let result = self
            .runtime
            .call_traced(validate, vec![value.clone(), Value::Table(row.clone())])?;
        Ok(ValidationOutcome::from_value(&result))
    }

    fn post_process(&self, value: Value, row: &Table) -> Result<Value, ScriptError> {
        let Some(post_process) = &self.post_process else {
            return Ok(value);
        };
        self.runtime
            .call_traced(post_process, vec![value, Value::Table(row.clone())])
    }
}

/// Converts one sheet to its serialized form.
///
/// Blank rows are skipped but still advance progress. Any located
/// failure aborts the whole sheet.
pub fn render_sheet(
    runtime: &ScriptRuntime,
    file: &Path,
    sheet: &SheetData,
    config: &RawSheetConfig,
    columns: Vec<RawColumnConfig>,
    include_sheet_name: bool,
    progress: &mut dyn FnMut(f64),
) -> Result<String, ConvertError> {
    let locate = |row: Option<u32>, column: Option<&str>| {
        let mut location = Location::sheet(&sheet.name);
        if let Some(row) = row {
            location = location.at_row(row);
        }
        if let Some(column) = column {
            location = location.at_column(column);
        }
        location
    };
    let script_error = |kind: ErrorKind, location: Location, e: ScriptError| {
        ConvertError::new(kind, file, location, e.message.clone()).with_traceback(e.traceback)
    };
    let internal_error = |e: mlua::Error| {
        ConvertError::new(
            ErrorKind::ScriptRuntime,
            file,
            locate(None, None),
            e.to_string(),
        )
    };

    let mut programs = Vec::with_capacity(columns.len());
    for column in columns {
        let name = column.name.clone();
        let program = ColumnProgram::compile(runtime, column).map_err(|e| {
            script_error(ErrorKind::ScriptRuntime, locate(None, Some(&name)), e)
        })?;
        programs.push(program);
    }

    let overall = config
        .overall_validation
        .as_deref()
        .map(|body| runtime.compile_rows_callback("overall_validation", body))
        .transpose()
        .map_err(|e| script_error(ErrorKind::ScriptRuntime, locate(None, None), e))?;

    let lua = runtime.lua();
    let rows = lua.create_table().map_err(internal_error)?;

    let first = config.first_data_row.saturating_sub(1) as usize;
    let last = sheet.last_row();
    let total = (last + 2).saturating_sub(first).max(1) as f64;
    let mut processed = 0usize;
    let mut inserted: i64 = 0;

    for r in first..=last {
        processed += 1;
        if sheet.row_is_blank(r) {
            progress(processed as f64 / total);
            continue;
        }
        let display_row = r as u32 + 1;

        let raw_row = lua.create_table().map_err(internal_error)?;
        let mut parsed = Vec::with_capacity(programs.len());
        for program in &programs {
            let text = sheet.cell(r, program.config.cell_index);
            let value = program.parse(text).map_err(|e| {
                script_error(
                    ErrorKind::TypeParse,
                    locate(Some(display_row), Some(&program.config.name)),
                    e,
                )
            })?;
            raw_row
                .raw_set(program.config.name.as_str(), value.clone())
                .map_err(internal_error)?;
            parsed.push(value);
        }

        for (program, value) in programs.iter().zip(&parsed) {
            let location = locate(Some(display_row), Some(&program.config.name));
            match program.validate(value, &raw_row) {
                Ok(ValidationOutcome::Pass) => {}
                Ok(ValidationOutcome::Fail(message)) => {
                    return Err(ConvertError::new(
                        ErrorKind::Validation,
                        file,
                        location,
                        message.unwrap_or_else(|| "validation failed".to_string()),
                    ));
                }
                Err(e) => return Err(script_error(ErrorKind::ScriptRuntime, location, e)),
            }
        }

        let out_row = lua.create_table().map_err(internal_error)?;
        for (program, value) in programs.iter().zip(&parsed) {
            if program.config.is_internal() {
                continue;
            }
            let value = program.post_process(value.clone(), &raw_row).map_err(|e| {
                script_error(
                    ErrorKind::ScriptRuntime,
                    locate(Some(display_row), Some(&program.config.name)),
                    e,
                )
            })?;
            out_row
                .raw_set(program.config.name.as_str(), value)
                .map_err(internal_error)?;
        }

        let key: Value = if config.row_key.is_empty() {
            Value::Integer(inserted + 1)
        } else {
            out_row
                .raw_get(config.row_key.as_str())
                .map_err(internal_error)?
        };
        if key.is_nil() {
            return Err(ConvertError::missing_key(
                file,
                locate(Some(display_row), Some(&config.row_key)),
            ));
        }
        if rows.contains_key(key.clone()).map_err(internal_error)? {
            return Err(ConvertError::duplicate_key(
                file,
                locate(Some(display_row), Some(&config.row_key)),
                &key_text(&key),
            ));
        }
        rows.raw_set(key, out_row).map_err(internal_error)?;
        inserted += 1;
        progress(processed as f64 / total);
    }

    if let Some(overall) = overall {
        let result = runtime
            .call_traced(&overall, vec![Value::Table(rows.clone())])
            .map_err(|e| script_error(ErrorKind::ScriptRuntime, locate(None, None), e))?;
        match ValidationOutcome::from_value(&result) {
            ValidationOutcome::Pass => {}
            ValidationOutcome::Fail(message) => {
                return Err(ConvertError::new(
                    ErrorKind::Validation,
                    file,
                    locate(None, None),
                    message.unwrap_or_else(|| "overall validation failed".to_string()),
                ));
            }
        }
    }

    let literal = to_lua_literal(&Value::Table(rows))
        .map_err(|e| script_error(ErrorKind::ScriptRuntime, locate(None, None), e))?;

    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file.display().to_string());
    let mut out = format!("-- {file_name}");
    if include_sheet_name {
        out.push(' ');
        out.push_str(&sheet.name);
    }
    out.push('\n');
    for program in &programs {
        if program.config.is_internal() {
            continue;
        }
        if let Some(title) = &program.config.title {
            out.push_str(&format!("-- {}: {title}\n", program.config.name));
        }
    }
    out.push_str("return ");
    out.push_str(&literal);
    out.push('\n');
    Ok(out)
}

fn key_text(key: &Value) -> String {
    match key {
        Value::Integer(i) => i.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.to_string_lossy().to_string(),
        Value::Boolean(b) => b.to_string(),
        other => other.type_name().to_string(),
    }
}
