//! Directory-wide validation.

use chrono::Local;
use std::path::Path;
use tracing::info;

use crate::engine::{ENUM_SCRIPT_NAME, UTIL_SCRIPT, VALIDATE_ALL_SCRIPT};
use crate::script::{ScriptError, ScriptRuntime, ValidationOutcome};

/// Status while a validation run is in flight.
pub const VALIDATION_RUNNING: &str = "P ...";

/// Runs `__validate_all.lua` for the directory pair and returns the
/// status string: `S <timestamp>` on success, `E <message>` on failure.
/// An absent script counts as success.
///
/// This blocks on script execution; callers run it on a worker thread.
pub fn run_validate_all(input_dir: &Path, output_dir: &Path) -> String {
    match run_script(input_dir, output_dir) {
        Ok(ValidationOutcome::Pass) => {
            format!("S {}", Local::now().format("%Y-%m-%dT%H:%M:%S"))
        }
        Ok(ValidationOutcome::Fail(message)) => {
            format!("E {}", message.unwrap_or_else(|| "validation failed".to_string()))
        }
        Err(e) => match e.traceback {
            Some(traceback) => format!("E {}\n{traceback}", e.message),
            None => format!("E {}", e.message),
        },
    }
}

fn run_script(input_dir: &Path, output_dir: &Path) -> Result<ValidationOutcome, ScriptError> {
    // The validation script is read from the input directory only; the
    // resolver (which lets the output dir shadow) serves `require` calls.
    let script_path = input_dir.join(VALIDATE_ALL_SCRIPT);
    if !script_path.is_file() {
        return Ok(ValidationOutcome::Pass);
    }

    let runtime = ScriptRuntime::new(vec![output_dir.to_path_buf(), input_dir.to_path_buf()])?;

    if let Some(enums) = runtime.eval_named(ENUM_SCRIPT_NAME)? {
        runtime.set_global("__ENUMS", enums)?;
    }
    let util_path = input_dir.join(UTIL_SCRIPT);
    if util_path.is_file() {
        let util = runtime.eval_file(&util_path)?;
        runtime.set_global("util", util)?;
    }

    let printed = runtime.capture_print()?;
    let result = runtime.eval_file(&script_path)?;

    if let Ok(buffer) = printed.lock() {
        if !buffer.is_empty() {
            info!(output = %buffer.trim_end(), "validation script output");
        }
    }

    Ok(ValidationOutcome::from_value(&result))
}

/// Whether a status string reports a pass.
pub(super) fn is_success(status: &str) -> bool {
    status.starts_with('S')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn dirs() -> (TempDir, TempDir) {
        (TempDir::new().unwrap(), TempDir::new().unwrap())
    }

    #[test]
    fn test_absent_script_is_success() {
        let (input, output) = dirs();
        let status = run_validate_all(input.path(), output.path());
        assert!(status.starts_with("S "));
        assert!(is_success(&status));
    }

    #[test]
    fn test_truthy_result_is_success() {
        let (input, output) = dirs();
        std::fs::write(input.path().join(VALIDATE_ALL_SCRIPT), "return true").unwrap();
        let status = run_validate_all(input.path(), output.path());
        assert!(status.starts_with("S "));
    }

    #[test]
    fn test_string_result_is_failure_message() {
        let (input, output) = dirs();
        std::fs::write(
            input.path().join(VALIDATE_ALL_SCRIPT),
            "return 'totals do not add up'",
        )
        .unwrap();
        let status = run_validate_all(input.path(), output.path());
        assert_eq!(status, "E totals do not add up");
    }

    #[test]
    fn test_falsy_result_is_generic_failure() {
        let (input, output) = dirs();
        std::fs::write(input.path().join(VALIDATE_ALL_SCRIPT), "return false").unwrap();
        let status = run_validate_all(input.path(), output.path());
        assert_eq!(status, "E validation failed");
    }

    #[test]
    fn test_script_error_includes_traceback() {
        let (input, output) = dirs();
        std::fs::write(input.path().join(VALIDATE_ALL_SCRIPT), "error('boom')").unwrap();
        let status = run_validate_all(input.path(), output.path());
        assert!(status.starts_with("E "));
        assert!(status.contains("boom"));
        assert!(status.contains("traceback"));
    }

    #[test]
    fn test_script_sees_enums_and_util() {
        let (input, output) = dirs();
        std::fs::write(
            input.path().join(ENUM_SCRIPT_NAME),
            "return { kind = { a = 1 } }",
        )
        .unwrap();
        std::fs::write(
            input.path().join(UTIL_SCRIPT),
            "return { double = function(n) return n * 2 end }",
        )
        .unwrap();
        std::fs::write(
            input.path().join(VALIDATE_ALL_SCRIPT),
            "return util.double(__ENUMS.kind.a) == 2",
        )
        .unwrap();
        let status = run_validate_all(input.path(), output.path());
        assert!(status.starts_with("S "), "unexpected status: {status}");
    }

    #[test]
    fn test_input_dir_script_not_shadowed_by_output_dir() {
        let (input, output) = dirs();
        std::fs::write(input.path().join(VALIDATE_ALL_SCRIPT), "return 'from input'").unwrap();
        std::fs::write(output.path().join(VALIDATE_ALL_SCRIPT), "return true").unwrap();
        let status = run_validate_all(input.path(), output.path());
        assert_eq!(status, "E from input");
    }
}
