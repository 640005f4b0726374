// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Crucible Contributors

//! Custom-tool pipeline: turn a single annotated function into a typed
//! tool schema, and bridge typed arguments into a worker-side driver.
//!
//! The source must declare exactly one top-level function with annotated
//! parameters and a documentation block. Annotations map onto JSON
//! Schema fragments; anything unmappable rejects the tool up front
//! rather than failing at execution time.

use crucible_core::Error;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Path the driver reads its JSON arguments from inside the worker.
pub const DRIVER_ARGS_PATH: &str = "/tmp/.tool_args.json";
/// Path the driver writes the serialized return value to.
pub const DRIVER_OUT_PATH: &str = "/tmp/.tool_out.json";
/// Exit code reserved by the driver for a return value that does not
/// serialize to JSON.
pub const DRIVER_SERIALIZE_EXIT: i32 = 17;

/// Enumerated types that may appear as parameter annotations.
#[derive(Debug, Clone, Default)]
pub struct EnumRegistry {
    enums: HashMap<String, Vec<String>>,
}

impl EnumRegistry {
    pub fn register(&mut self, name: impl Into<String>, values: Vec<String>) {
        self.enums.insert(name.into(), values);
    }

    fn get(&self, name: &str) -> Option<&Vec<String>> {
        self.enums.get(name)
    }
}

/// A parsed custom tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolSpec {
    pub tool_name: String,
    pub tool_description: String,
    /// Draft-07 object schema for the tool input.
    pub input_schema: Value,
}

/// Parse `source` into a tool spec.
pub fn parse_tool(source: &str, enums: &EnumRegistry) -> Result<ToolSpec, Error> {
    let signature = extract_signature(source)?;
    let doc = extract_docstring(source);

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for param in &signature.params {
        let mut fragment = schema_for_annotation(&param.annotation, enums)?;
        if let Some(desc) = doc.params.get(&param.name) {
            if let Value::Object(map) = &mut fragment {
                map.insert("description".to_string(), Value::String(desc.clone()));
            }
        }
        if !param.optional {
            required.push(Value::String(param.name.clone()));
        }
        properties.insert(param.name.clone(), fragment);
    }

    let input_schema = json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "type": "object",
        "properties": Value::Object(properties),
        "required": required,
        "additionalProperties": false,
    });

    let mut tool_description = doc.description;
    if let Some(returns) = doc.returns {
        if !tool_description.is_empty() {
            tool_description.push('\n');
        }
        tool_description.push_str("Returns: ");
        tool_description.push_str(&returns);
    }

    Ok(ToolSpec { tool_name: signature.name, tool_description, input_schema })
}

/// Validate a tool input document against a parsed schema.
pub fn validate_input(schema: &Value, input: &Value) -> Result<(), Error> {
    let validator = jsonschema::validator_for(schema)
        .map_err(|e| Error::invalid_tool(format!("unusable tool schema: {}", e)))?;
    if let Err(violation) = validator.validate(input) {
        return Err(Error::invalid_argument(format!("tool input rejected: {}", violation)));
    }
    Ok(())
}

/// Build the worker-side driver: load arguments, call the tool, persist
/// the JSON-serialized return value. A value `json` cannot encode exits
/// with the reserved code so the broker can tell serialization failure
/// apart from a tool raising.
pub fn driver_program(source: &str, tool_name: &str) -> String {
    format!(
        "import json, sys\n\n{source}\n\nwith open({args:?}) as _f:\n    _args = json.load(_f)\n_result = {name}(**_args)\ntry:\n    _out = json.dumps(_result)\nexcept (TypeError, ValueError) as _e:\n    sys.stderr.write(str(_e))\n    sys.exit({code})\nwith open({out:?}, 'w') as _f:\n    _f.write(_out)\n",
        source = source,
        args = DRIVER_ARGS_PATH,
        name = tool_name,
        out = DRIVER_OUT_PATH,
        code = DRIVER_SERIALIZE_EXIT,
    )
}

struct Signature {
    name: String,
    params: Vec<Param>,
}

struct Param {
    name: String,
    annotation: String,
    optional: bool,
}

struct Docstring {
    description: String,
    params: HashMap<String, String>,
    returns: Option<String>,
}

/// Locate the single top-level `def` and parse its parameter list.
fn extract_signature(source: &str) -> Result<Signature, Error> {
    let mut headers: Vec<(usize, &str)> = Vec::new();
    for (idx, line) in source.lines().enumerate() {
        if line.starts_with("def ") || line.starts_with("async def ") {
            headers.push((idx, line));
        }
    }
    let (start, _) = match headers.as_slice() {
        [only] => *only,
        [] => return Err(Error::invalid_tool("no top-level function definition found")),
        _ => return Err(Error::invalid_tool("expected exactly one top-level function")),
    };

    // The signature may span lines; accumulate until the parens close.
    let mut signature = String::new();
    let mut depth: i32 = 0;
    let mut complete = false;
    for line in source.lines().skip(start) {
        for c in line.chars() {
            signature.push(c);
            match c {
                '(' | '[' => depth += 1,
                ')' | ']' => depth -= 1,
                ':' if depth == 0 => {
                    complete = true;
                    break;
                }
                _ => {}
            }
        }
        if complete {
            break;
        }
        signature.push(' ');
    }
    if !complete {
        return Err(Error::invalid_tool("unterminated function signature"));
    }

    let header = signature.trim_start_matches("async ").trim_start_matches("def ").trim();
    let open = header
        .find('(')
        .ok_or_else(|| Error::invalid_tool("function signature has no parameter list"))?;
    let name = header[..open].trim().to_string();
    if name.is_empty()
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        || name.starts_with(|c: char| c.is_ascii_digit())
    {
        return Err(Error::invalid_tool(format!("invalid function name: {:?}", name)));
    }
    let close = header
        .rfind(')')
        .ok_or_else(|| Error::invalid_tool("function signature has no closing paren"))?;
    let params_src = &header[open + 1..close];

    let mut params = Vec::new();
    for piece in split_top_level(params_src) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        if piece.starts_with('*') {
            return Err(Error::invalid_tool("variadic parameters are not supported"));
        }
        let (decl, default) = match split_once_top_level(piece, '=') {
            Some((d, v)) => (d.trim(), Some(v.trim())),
            None => (piece, None),
        };
        let (pname, annotation) = match split_once_top_level(decl, ':') {
            Some((n, a)) => (n.trim(), a.trim()),
            None => {
                return Err(Error::invalid_tool(format!(
                    "parameter {:?} has no type annotation",
                    decl
                )))
            }
        };
        let (annotation, optional_type) = match strip_generic(annotation, "Optional") {
            Some(inner) => (inner, true),
            None => (annotation, false),
        };
        params.push(Param {
            name: pname.to_string(),
            annotation: annotation.to_string(),
            optional: optional_type || default.is_some(),
        });
    }
    Ok(Signature { name, params })
}

/// Map one annotation to a JSON Schema fragment.
fn schema_for_annotation(annotation: &str, enums: &EnumRegistry) -> Result<Value, Error> {
    let annotation = annotation.trim();
    if let Some(values) = enums.get(annotation) {
        return Ok(json!({"type": "string", "enum": values}));
    }
    if let Some(inner) = strip_generic(annotation, "List")
        .or_else(|| strip_generic(annotation, "list"))
    {
        return Ok(json!({"type": "array", "items": schema_for_annotation(inner, enums)?}));
    }
    if let Some(_inner) = strip_generic(annotation, "Dict")
        .or_else(|| strip_generic(annotation, "dict"))
    {
        return Ok(json!({"type": "object"}));
    }
    match annotation {
        "str" => Ok(json!({"type": "string"})),
        "int" => Ok(json!({"type": "integer"})),
        "float" => Ok(json!({"type": "number"})),
        "bool" => Ok(json!({"type": "boolean"})),
        "list" | "List" => Ok(json!({"type": "array"})),
        "dict" | "Dict" => Ok(json!({"type": "object"})),
        other => Err(Error::invalid_tool(format!("unmappable parameter type: {:?}", other))),
    }
}

/// `Name[inner]` → `inner`, for one generic wrapper.
fn strip_generic<'a>(annotation: &'a str, name: &str) -> Option<&'a str> {
    let rest = annotation.strip_prefix(name)?.trim_start();
    let inner = rest.strip_prefix('[')?.strip_suffix(']')?;
    Some(inner.trim())
}

/// Split on commas at bracket depth zero.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth: i32 = 0;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth -= 1,
            ',' if depth == 0 => {
                pieces.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    pieces.push(&s[start..]);
    pieces
}

/// First occurrence of `sep` at bracket depth zero.
fn split_once_top_level(s: &str, sep: char) -> Option<(&str, &str)> {
    let mut depth: i32 = 0;
    for (i, c) in s.char_indices() {
        match c {
            '[' | '(' => depth += 1,
            ']' | ')' => depth -= 1,
            c if c == sep && depth == 0 => return Some((&s[..i], &s[i + c.len_utf8()..])),
            _ => {}
        }
    }
    None
}

/// Pull the docstring apart into description, `:param name:` map and
/// `:return:` text. Missing pieces are simply empty.
fn extract_docstring(source: &str) -> Docstring {
    let mut doc = Docstring { description: String::new(), params: HashMap::new(), returns: None };
    let Some(body) = docstring_body(source) else {
        return doc;
    };

    enum Section {
        Description,
        Param(String),
        Returns,
    }
    let mut section = Section::Description;
    let mut description_lines: Vec<String> = Vec::new();
    for raw in body.lines() {
        let line = raw.trim();
        if let Some(rest) = line.strip_prefix(":param ") {
            if let Some((name, text)) = rest.split_once(':') {
                let name = name.trim().to_string();
                doc.params.insert(name.clone(), text.trim().to_string());
                section = Section::Param(name);
                continue;
            }
        }
        if let Some(text) =
            line.strip_prefix(":return:").or_else(|| line.strip_prefix(":returns:"))
        {
            doc.returns = Some(text.trim().to_string());
            section = Section::Returns;
            continue;
        }
        if line.starts_with(':') {
            // Unknown field (e.g. :raises:); swallow it.
            section = Section::Description;
            continue;
        }
        match &section {
            Section::Description => description_lines.push(line.to_string()),
            Section::Param(name) => {
                if !line.is_empty() {
                    if let Some(text) = doc.params.get_mut(name) {
                        text.push(' ');
                        text.push_str(line);
                    }
                }
            }
            Section::Returns => {
                if !line.is_empty() {
                    if let Some(text) = doc.returns.as_mut() {
                        text.push(' ');
                        text.push_str(line);
                    }
                }
            }
        }
    }
    while description_lines.last().is_some_and(|l| l.is_empty()) {
        description_lines.pop();
    }
    doc.description = description_lines.join("\n").trim().to_string();
    doc
}

/// The raw text between the first pair of triple quotes after the
/// signature, if any.
fn docstring_body(source: &str) -> Option<String> {
    for delim in ["\"\"\"", "'''"] {
        if let Some(open) = source.find(delim) {
            let after = &source[open + delim.len()..];
            if let Some(close) = after.find(delim) {
                return Some(after[..close].to_string());
            }
        }
    }
    None
}

#[cfg(test)]
#[path = "tool_tests.rs"]
mod tests;
