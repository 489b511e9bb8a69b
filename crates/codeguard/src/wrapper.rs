//! Wrapper script generation
//!
//! Turns target code into a self-contained Python script that runs the code
//! in a fresh namespace and reports the outcome as a single result line on
//! stdout. See [`crate::record`] for the reading side of the protocol.

use std::fmt;

use crate::record::RESULT_MARKER;

/// Maximum number of characters of the target's own output kept in the record
pub const MAX_CAPTURED_OUTPUT: usize = 4096;

/// Name the target code is compiled under, as shown in tracebacks
pub const CODE_FILENAME: &str = "<codeguard>";

/// A generated runnable script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrapperScript(String);

impl WrapperScript {
    /// Build the wrapper for `code`
    ///
    /// Deterministic: the same code always yields the same script.
    pub fn build(code: &str) -> Self {
        let code_literal = encode_literal(code);
        let marker_literal = encode_literal(RESULT_MARKER);
        let filename_literal = encode_literal(CODE_FILENAME);

        Self(format!(
            r#"import contextlib as _cg_contextlib
import io as _cg_io
import json as _cg_json
import sys as _cg_sys
import traceback as _cg_traceback

_cg_stdout = _cg_sys.stdout
_cg_code = {code_literal}
_cg_result = {{"success": False, "output": "", "error": None, "error_type": None, "traceback": None}}
_cg_buffer = _cg_io.StringIO()
try:
    with _cg_contextlib.redirect_stdout(_cg_buffer), _cg_contextlib.redirect_stderr(_cg_buffer):
        exec(compile(_cg_code, {filename_literal}, "exec"), {{"__name__": "__main__", "__builtins__": __builtins__}})
    _cg_result["success"] = True
except BaseException as _cg_exc:
    _cg_result["error_type"] = type(_cg_exc).__name__
    _cg_result["error"] = str(_cg_exc)
    _cg_result["traceback"] = _cg_traceback.format_exc()
_cg_result["output"] = _cg_buffer.getvalue()[-{MAX_CAPTURED_OUTPUT}:]
_cg_stdout.write({marker_literal} + _cg_json.dumps(_cg_result) + "\n")
_cg_stdout.flush()
"#
        ))
    }

    /// Script text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for WrapperScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encode text as a double-quoted string literal
///
/// A JSON string literal is also a valid Python string literal: quotes and
/// backslashes are escaped, control characters (line breaks included) become
/// `\n`-style or `\uXXXX` escapes, and nothing else is special. The literal
/// therefore always occupies a single line and cannot terminate early.
pub fn encode_literal(text: &str) -> String {
    // Serializing a &str to JSON cannot fail
    serde_json::to_string(text).unwrap_or_else(|_| String::from("\"\""))
}
