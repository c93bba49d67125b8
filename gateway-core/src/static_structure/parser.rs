//! A small recursive-descent scanner over the constrained tool-calling DSL.
//!
//! The snippets this builder parses are not general JavaScript: they are a
//! fixed shape (`const x = await mcp.ns.action({...})`, `if`/`for-of`/
//! `while`/`do-while` around more of the same). Rather than pull in a JS/AST
//! crate for that narrow grammar, this follows the teacher's `epistemic`
//! modules' approach to unstructured text: compiled `regex::Regex` patterns
//! for the recognizable shapes, with a hand-rolled balanced-bracket scanner
//! doing the structural splitting regex alone can't (regex isn't
//! context-free, and nested `{}`/`()`/strings need real bracket matching).

use super::types::{ArgumentRef, LoopType};
use crate::error::{Error, Result};
use crate::tool::ToolId;
use regex::Regex;
use std::collections::HashMap;

/// One parsed statement, before flattening into [`super::types::StaticStructure`].
#[derive(Debug, Clone)]
pub enum Stmt {
    Task {
        binding: Option<String>,
        tool: ToolId,
        arguments: HashMap<String, ArgumentRef>,
    },
    If {
        condition: String,
        then_body: Vec<Stmt>,
        else_body: Option<Vec<Stmt>>,
    },
    Loop {
        loop_type: LoopType,
        /// `for (const <binding> of <condition>)`'s loop variable; `None`
        /// for `while`/`do-while`.
        binding: Option<String>,
        condition: String,
        body: Vec<Stmt>,
    },
}

/// Parse a full snippet into a sequence of top-level statements.
pub fn parse_statements(code: &str) -> Result<Vec<Stmt>> {
    let bytes = code.as_bytes();
    let mut i = 0;
    let mut stmts = Vec::new();
    while i < bytes.len() {
        skip_trivia(bytes, &mut i);
        if i >= bytes.len() {
            break;
        }
        let (stmt, next) = parse_one(code, bytes, i)?;
        stmts.push(stmt);
        i = next;
    }
    Ok(stmts)
}

fn parse_one(code: &str, bytes: &[u8], start: usize) -> Result<(Stmt, usize)> {
    let mut i = start;
    skip_trivia(bytes, &mut i);
    if matches_keyword(bytes, i, "if") {
        return parse_if(code, bytes, i);
    }
    if matches_keyword(bytes, i, "for") {
        return parse_for(code, bytes, i);
    }
    if matches_keyword(bytes, i, "while") {
        return parse_while(code, bytes, i);
    }
    if matches_keyword(bytes, i, "do") {
        return parse_do_while(code, bytes, i);
    }
    parse_task_statement(code, bytes, i)
}

fn matches_keyword(bytes: &[u8], i: usize, kw: &str) -> bool {
    let kw_bytes = kw.as_bytes();
    if i + kw_bytes.len() > bytes.len() || &bytes[i..i + kw_bytes.len()] != kw_bytes {
        return false;
    }
    let after = i + kw_bytes.len();
    after >= bytes.len() || !is_ident_char(bytes[after])
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn skip_trivia(bytes: &[u8], i: &mut usize) {
    loop {
        while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
            *i += 1;
        }
        if *i < bytes.len() && bytes[*i] == b';' {
            *i += 1;
            continue;
        }
        break;
    }
}

/// Scan forward from an opening bracket at `start` to the index just past
/// its matching close, respecting nested brackets and quoted strings.
fn skip_group(bytes: &[u8], start: usize) -> Result<usize> {
    let open = bytes[start];
    let close = match open {
        b'(' => b')',
        b'{' => b'}',
        b'[' => b']',
        _ => return Err(Error::invalid_argument("expected an opening bracket")),
    };
    let mut depth = 0usize;
    let mut i = start;
    let mut in_string: Option<u8> = None;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(quote) = in_string {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'\'' | b'"' | b'`' => in_string = Some(c),
            b'(' | b'{' | b'[' if c == open => depth += 1,
            _ if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i + 1);
                }
            }
            _ => {}
        }
        i += 1;
    }
    Err(Error::invalid_argument(format!(
        "unbalanced '{}' starting at byte {start}",
        open as char
    )))
}

/// Find the index of the statement-terminating top-level `;`, or end of
/// input if the (final) statement omits it.
fn find_stmt_end(bytes: &[u8], start: usize) -> Result<usize> {
    let mut i = start;
    let mut in_string: Option<u8> = None;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(quote) = in_string {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'\'' | b'"' | b'`' => {
                in_string = Some(c);
                i += 1;
            }
            b'(' | b'{' | b'[' => i = skip_group(bytes, i)?,
            b';' => return Ok(i),
            _ => i += 1,
        }
    }
    Ok(bytes.len())
}

static TASK_RE_SRC: &str =
    r"(?s)^(?:const|let|var)\s+(?P<binding>[A-Za-z_][A-Za-z0-9_]*)\s*=\s*await\s+mcp\.(?P<ns>[A-Za-z_][A-Za-z0-9_]*)\.(?P<action>[A-Za-z_][A-Za-z0-9_]*)\s*\((?P<args>.*)\)\s*$";
static BARE_TASK_RE_SRC: &str =
    r"(?s)^await\s+mcp\.(?P<ns>[A-Za-z_][A-Za-z0-9_]*)\.(?P<action>[A-Za-z_][A-Za-z0-9_]*)\s*\((?P<args>.*)\)\s*$";

fn parse_task_statement(code: &str, bytes: &[u8], start: usize) -> Result<(Stmt, usize)> {
    let end = find_stmt_end(bytes, start)?;
    let text = code[start..end].trim();
    let next = (end + 1).min(bytes.len());

    let task_re = Regex::new(TASK_RE_SRC).expect("static regex is valid");
    if let Some(caps) = task_re.captures(text) {
        let tool = ToolId::new(&caps["ns"], &caps["action"]);
        let arguments = parse_object_literal(caps.name("args").map_or("", |m| m.as_str()))?;
        return Ok((
            Stmt::Task {
                binding: Some(caps["binding"].to_string()),
                tool,
                arguments,
            },
            next,
        ));
    }

    let bare_re = Regex::new(BARE_TASK_RE_SRC).expect("static regex is valid");
    if let Some(caps) = bare_re.captures(text) {
        let tool = ToolId::new(&caps["ns"], &caps["action"]);
        let arguments = parse_object_literal(caps.name("args").map_or("", |m| m.as_str()))?;
        return Ok((
            Stmt::Task {
                binding: None,
                tool,
                arguments,
            },
            next,
        ));
    }

    Err(Error::invalid_argument(format!(
        "statement is not a recognized tool call: `{text}`"
    )))
}

fn parse_if(code: &str, bytes: &[u8], start: usize) -> Result<(Stmt, usize)> {
    let mut i = start + 2; // past "if"
    skip_ws(bytes, &mut i);
    if i >= bytes.len() || bytes[i] != b'(' {
        return Err(Error::invalid_argument("expected `(` after `if`"));
    }
    let cond_end = skip_group(bytes, i)?;
    let condition = code[i + 1..cond_end - 1].trim().to_string();
    i = cond_end;
    skip_ws(bytes, &mut i);
    if i >= bytes.len() || bytes[i] != b'{' {
        return Err(Error::invalid_argument("expected `{` after `if (...)`"));
    }
    let body_end = skip_group(bytes, i)?;
    let then_body = parse_statements(&code[i + 1..body_end - 1])?;
    i = body_end;

    let mut save = i;
    skip_ws(bytes, &mut save);
    let mut else_body = None;
    if matches_keyword(bytes, save, "else") {
        let mut j = save + 4;
        skip_ws(bytes, &mut j);
        if j >= bytes.len() || bytes[j] != b'{' {
            return Err(Error::invalid_argument("expected `{` after `else`"));
        }
        let else_end = skip_group(bytes, j)?;
        else_body = Some(parse_statements(&code[j + 1..else_end - 1])?);
        i = else_end;
    }

    Ok((
        Stmt::If {
            condition,
            then_body,
            else_body,
        },
        i,
    ))
}

fn parse_for(code: &str, bytes: &[u8], start: usize) -> Result<(Stmt, usize)> {
    let mut i = start + 3; // past "for"
    skip_ws(bytes, &mut i);
    if i >= bytes.len() || bytes[i] != b'(' {
        return Err(Error::invalid_argument("expected `(` after `for`"));
    }
    let header_end = skip_group(bytes, i)?;
    let header = code[i + 1..header_end - 1].trim();

    let for_of_re =
        Regex::new(r"^(?:const|let)\s+(?P<binding>[A-Za-z_][A-Za-z0-9_]*)\s+of\s+(?P<iter>.+)$")
            .expect("static regex is valid");
    let caps = for_of_re
        .captures(header)
        .ok_or_else(|| Error::invalid_argument(format!("unsupported `for` header: `{header}`")))?;

    i = header_end;
    skip_ws(bytes, &mut i);
    if i >= bytes.len() || bytes[i] != b'{' {
        return Err(Error::invalid_argument("expected `{` after `for (...)`"));
    }
    let body_end = skip_group(bytes, i)?;
    let body = parse_statements(&code[i + 1..body_end - 1])?;

    Ok((
        Stmt::Loop {
            loop_type: LoopType::ForOf,
            binding: Some(caps["binding"].to_string()),
            condition: caps["iter"].trim().to_string(),
            body,
        },
        body_end,
    ))
}

fn parse_while(code: &str, bytes: &[u8], start: usize) -> Result<(Stmt, usize)> {
    let mut i = start + 5; // past "while"
    skip_ws(bytes, &mut i);
    if i >= bytes.len() || bytes[i] != b'(' {
        return Err(Error::invalid_argument("expected `(` after `while`"));
    }
    let cond_end = skip_group(bytes, i)?;
    let condition = code[i + 1..cond_end - 1].trim().to_string();
    i = cond_end;
    skip_ws(bytes, &mut i);
    if i >= bytes.len() || bytes[i] != b'{' {
        return Err(Error::invalid_argument("expected `{` after `while (...)`"));
    }
    let body_end = skip_group(bytes, i)?;
    let body = parse_statements(&code[i + 1..body_end - 1])?;

    Ok((
        Stmt::Loop {
            loop_type: LoopType::While,
            binding: None,
            condition,
            body,
        },
        body_end,
    ))
}

fn parse_do_while(code: &str, bytes: &[u8], start: usize) -> Result<(Stmt, usize)> {
    let mut i = start + 2; // past "do"
    skip_ws(bytes, &mut i);
    if i >= bytes.len() || bytes[i] != b'{' {
        return Err(Error::invalid_argument("expected `{` after `do`"));
    }
    let body_end = skip_group(bytes, i)?;
    let body = parse_statements(&code[i + 1..body_end - 1])?;
    i = body_end;
    skip_ws(bytes, &mut i);
    if !matches_keyword(bytes, i, "while") {
        return Err(Error::invalid_argument("expected `while` after `do { ... }`"));
    }
    i += 5;
    skip_ws(bytes, &mut i);
    if i >= bytes.len() || bytes[i] != b'(' {
        return Err(Error::invalid_argument("expected `(` after `do { ... } while`"));
    }
    let cond_end = skip_group(bytes, i)?;
    let condition = code[i + 1..cond_end - 1].trim().to_string();
    i = cond_end;
    skip_ws(bytes, &mut i);
    if i < bytes.len() && bytes[i] == b';' {
        i += 1;
    }

    Ok((
        Stmt::Loop {
            loop_type: LoopType::DoWhile,
            binding: None,
            condition,
            body,
        },
        i,
    ))
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

/// Parse a `{ key: value, ... }` object literal into argument references.
///
/// A value is a `PriorResult` reference if it looks like `identifier.path`
/// or a bare `identifier` that isn't a JS literal keyword; a `Parameter`
/// reference if it's `params.name`; otherwise a `Literal` (JSON-parsed).
fn parse_object_literal(src: &str) -> Result<HashMap<String, ArgumentRef>> {
    let src = src.trim();
    let mut out = HashMap::new();
    if src.is_empty() {
        return Ok(out);
    }
    let bytes = src.as_bytes();
    for entry in split_top_level(bytes, src, 0, bytes.len(), b',')? {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let (key, value) = entry
            .split_once(':')
            .ok_or_else(|| Error::invalid_argument(format!("malformed object entry `{entry}`")))?;
        let key = key.trim().trim_matches(|c| c == '\'' || c == '"');
        out.insert(key.to_string(), parse_argument_value(value.trim())?);
    }
    Ok(out)
}

/// Split `bytes[start..end]` on a top-level `sep`, respecting nested
/// brackets and quoted strings.
fn split_top_level(
    bytes: &[u8],
    src: &str,
    start: usize,
    end: usize,
    sep: u8,
) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut piece_start = start;
    let mut i = start;
    let mut in_string: Option<u8> = None;
    while i < end {
        let c = bytes[i];
        if let Some(quote) = in_string {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == quote {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'\'' | b'"' | b'`' => {
                in_string = Some(c);
                i += 1;
            }
            b'(' | b'{' | b'[' => i = skip_group(bytes, i)?,
            _ if c == sep => {
                parts.push(src[piece_start..i].to_string());
                i += 1;
                piece_start = i;
            }
            _ => i += 1,
        }
    }
    parts.push(src[piece_start..end].to_string());
    Ok(parts)
}

fn parse_argument_value(value: &str) -> Result<ArgumentRef> {
    if let Some(rest) = value.strip_prefix("params.") {
        return Ok(ArgumentRef::Parameter {
            name: rest.to_string(),
        });
    }

    let ident_path_re = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
        .expect("static regex is valid");
    if ident_path_re.is_match(value) && !matches!(value, "true" | "false" | "null") {
        let mut parts = value.split('.');
        let var = parts.next().unwrap().to_string();
        let path: Vec<String> = parts.map(str::to_string).collect();
        return Ok(ArgumentRef::PriorResult { var, path });
    }

    let json_value: serde_json::Value = if value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2
    {
        serde_json::Value::String(value[1..value.len() - 1].to_string())
    } else {
        serde_json::from_str(value)
            .map_err(|e| Error::invalid_argument(format!("cannot parse argument `{value}`: {e}")))?
    };
    Ok(ArgumentRef::Literal { value: json_value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_task_assignment() {
        let stmts =
            parse_statements("const c = await mcp.fs.read_file({path:'config.json'});").unwrap();
        assert_eq!(stmts.len(), 1);
        match &stmts[0] {
            Stmt::Task {
                binding,
                tool,
                arguments,
            } => {
                assert_eq!(binding.as_deref(), Some("c"));
                assert_eq!(tool.to_string(), "fs:read_file");
                match &arguments["path"] {
                    ArgumentRef::Literal { value } => {
                        assert_eq!(value, &serde_json::json!("config.json"));
                    }
                    other => panic!("expected literal, got {other:?}"),
                }
            }
            other => panic!("expected task, got {other:?}"),
        }
    }

    #[test]
    fn parses_bare_task_without_binding() {
        let stmts = parse_statements("await mcp.gh.create_issue({title:'bug'});").unwrap();
        assert_eq!(stmts.len(), 1);
        assert!(matches!(&stmts[0], Stmt::Task { binding: None, .. }));
    }

    #[test]
    fn parses_prior_result_reference() {
        let code = "const c = await mcp.fs.read_file({path:'config.json'});\n\
                     const d = await mcp.fs.write_file({path: c.path, data: c});";
        let stmts = parse_statements(code).unwrap();
        assert_eq!(stmts.len(), 2);
        match &stmts[1] {
            Stmt::Task { arguments, .. } => {
                assert_eq!(
                    arguments["path"],
                    ArgumentRef::PriorResult {
                        var: "c".to_string(),
                        path: vec!["path".to_string()]
                    }
                );
                assert_eq!(
                    arguments["data"],
                    ArgumentRef::PriorResult {
                        var: "c".to_string(),
                        path: vec![]
                    }
                );
            }
            other => panic!("expected task, got {other:?}"),
        }
    }

    #[test]
    fn parses_if_else_with_nested_tasks() {
        let code = r#"
            if (params.dryRun) {
                await mcp.fs.read_file({path:'a.json'});
            } else {
                await mcp.fs.write_file({path:'a.json'});
            }
        "#;
        let stmts = parse_statements(code).unwrap();
        assert_eq!(stmts.len(), 1);
        match &stmts[0] {
            Stmt::If {
                then_body,
                else_body,
                ..
            } => {
                assert_eq!(then_body.len(), 1);
                assert_eq!(else_body.as_ref().unwrap().len(), 1);
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn parses_for_of_loop() {
        let code = "for (const item of params.files) { await mcp.fs.read_file({path: item}); }";
        let stmts = parse_statements(code).unwrap();
        match &stmts[0] {
            Stmt::Loop {
                loop_type,
                binding,
                body,
                ..
            } => {
                assert_eq!(*loop_type, LoopType::ForOf);
                assert_eq!(binding.as_deref(), Some("item"));
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected loop, got {other:?}"),
        }
    }

    #[test]
    fn rejects_unrecognized_statement() {
        assert!(parse_statements("someRandomCall();").is_err());
    }
}
