//! Deterministic Lua literal serialization.
//!
//! Table entries are emitted in a fixed order (array part first, then
//! remaining integer keys ascending, then string keys sorted), so
//! converting unchanged input always produces byte-identical output.

use mlua::{Table, Value};

use crate::script::ScriptError;

const MAX_DEPTH: usize = 64;

const LUA_KEYWORDS: &[&str] = &[
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function", "goto", "if",
    "in", "local", "nil", "not", "or", "repeat", "return", "then", "true", "until", "while",
];

/// Serializes a value to Lua source that evaluates back to it.
pub fn to_lua_literal(value: &Value) -> Result<String, ScriptError> {
    let mut out = String::new();
    write_value(&mut out, value, 0, 0)?;
    Ok(out)
}

fn write_value(
    out: &mut String,
    value: &Value,
    indent: usize,
    depth: usize,
) -> Result<(), ScriptError> {
    if depth > MAX_DEPTH {
        return Err(ScriptError::new("value nesting is too deep to serialize"));
    }
    match value {
        Value::Nil => out.push_str("nil"),
        Value::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Integer(i) => out.push_str(&i.to_string()),
        Value::Number(n) => write_number(out, *n)?,
        Value::String(s) => {
            let text = s.to_str().map_err(ScriptError::from)?;
            write_quoted(out, &text);
        }
        Value::Table(table) => write_table(out, table, indent, depth)?,
        other => {
            return Err(ScriptError::new(format!(
                "cannot serialize a {} value",
                other.type_name()
            )))
        }
    }
    Ok(())
}

fn write_number(out: &mut String, n: f64) -> Result<(), ScriptError> {
    if !n.is_finite() {
        return Err(ScriptError::new("cannot serialize a non-finite number"));
    }
    if n == n.trunc() {
        out.push_str(&format!("{n:.1}"));
    } else {
        out.push_str(&n.to_string());
    }
    Ok(())
}

fn write_quoted(out: &mut String, text: &str) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\{}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_table(
    out: &mut String,
    table: &Table,
    indent: usize,
    depth: usize,
) -> Result<(), ScriptError> {
    let mut int_keys: Vec<(i64, Value)> = Vec::new();
    let mut str_keys: Vec<(String, Value)> = Vec::new();

    for pair in table.clone().pairs::<Value, Value>() {
        let (key, value) = pair?;
        match key {
            Value::Integer(i) => int_keys.push((i, value)),
            Value::Number(n) if n == n.trunc() && n.is_finite() => {
                int_keys.push((n as i64, value))
            }
            Value::String(s) => {
                str_keys.push((s.to_str().map_err(ScriptError::from)?.to_string(), value))
            }
            other => {
                return Err(ScriptError::new(format!(
                    "cannot serialize a table keyed by {}",
                    other.type_name()
                )))
            }
        }
    }

    if int_keys.is_empty() && str_keys.is_empty() {
        out.push_str("{}");
        return Ok(());
    }

    int_keys.sort_by_key(|(k, _)| *k);
    str_keys.sort_by(|(a, _), (b, _)| a.cmp(b));

    // Leading keys 1..n are the array part and need no explicit key.
    let mut array_len = 0;
    for (i, (key, _)) in int_keys.iter().enumerate() {
        if *key == i as i64 + 1 {
            array_len = i + 1;
        } else {
            break;
        }
    }

    out.push_str("{\n");
    let pad = "  ".repeat(indent + 1);
    for (i, (key, value)) in int_keys.iter().enumerate() {
        out.push_str(&pad);
        if i >= array_len {
            out.push_str(&format!("[{key}] = "));
        }
        write_value(out, value, indent + 1, depth + 1)?;
        out.push_str(",\n");
    }
    for (key, value) in &str_keys {
        out.push_str(&pad);
        if is_identifier(key) {
            out.push_str(key);
            out.push_str(" = ");
        } else {
            out.push('[');
            write_quoted(out, key);
            out.push_str("] = ");
        }
        write_value(out, value, indent + 1, depth + 1)?;
        out.push_str(",\n");
    }
    out.push_str(&"  ".repeat(indent));
    out.push('}');
    Ok(())
}

fn is_identifier(key: &str) -> bool {
    if key.is_empty() || LUA_KEYWORDS.contains(&key) {
        return false;
    }
    let mut chars = key.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
