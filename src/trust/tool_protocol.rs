//! Text-based tool-call wire protocol.
//!
//! The agent's LLM providers already speak native JSON-schema function
//! calling (see [`crate::agent::providers`]'s `ToolCall`/`ToolSchema`).
//! This module is a second, text-embedded calling convention for models
//! that emit tool invocations inline in their prose instead of a
//! structured function-call field:
//!
//! ```text
//! ::TOOL read_file(path="src/main.rs")::
//! ::bash("ls -la")::            // fallback form, name must already be registered
//! ```
//!
//! Parsing is permissive by design (models are inconsistent about
//! quoting and the `TOOL` keyword); argument decoding falls back through
//! three tiers before giving up. Every result is sanitized and wrapped
//! before going back into the model's context — see [`crate::agent::sanitize`].

use std::collections::HashMap;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::agent::wrap_tool_output;
use crate::agent::tools::Tool;
use crate::trust::ErrorKind;

static TOOL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)::TOOL\s+(\w+)\((.*?)\)\s*::").unwrap());
static TOOL_RE_FALLBACK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)::(\w+)\((.*?)\)\s*::").unwrap());

/// A tool invocation extracted from model output, not yet executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCall {
    pub name: String,
    pub args_str: String,
}

/// Find every `::TOOL name(args)::` (or, failing that, `::name(args)::`
/// where `name` is already registered) occurrence in `text`.
pub fn parse_tool_calls(text: &str, known_tools: &[&str]) -> Vec<ParsedCall> {
    let primary: Vec<ParsedCall> = TOOL_RE
        .captures_iter(text)
        .map(|c| ParsedCall {
            name: c[1].to_string(),
            args_str: c[2].trim().to_string(),
        })
        .collect();
    if !primary.is_empty() {
        return primary;
    }

    TOOL_RE_FALLBACK
        .captures_iter(text)
        .filter(|c| known_tools.contains(&&c[1]))
        .map(|c| ParsedCall {
            name: c[1].to_string(),
            args_str: c[2].trim().to_string(),
        })
        .collect()
}

/// Decoded argument list: positional values in written order, plus any
/// keyword values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedArgs {
    pub positional: Vec<Value>,
    pub keyword: HashMap<String, Value>,
}

/// Split a literal-expression argument list on top-level commas — commas
/// inside a quoted string or bracketed value don't count.
fn split_top_level(args_str: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut in_string: Option<char> = None;
    let mut escaped = false;
    let mut current = String::new();

    for ch in args_str.chars() {
        if let Some(quote) = in_string {
            current.push(ch);
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == quote {
                in_string = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' => {
                in_string = Some(ch);
                current.push(ch);
            }
            '[' | '{' | '(' => {
                depth += 1;
                current.push(ch);
            }
            ']' | '}' | ')' => {
                depth -= 1;
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() || !parts.is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

static KEYWORD_ARG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*=(?!=)\s*(.*)$").unwrap());

/// Normalize a single-quoted literal to double-quoted so `serde_json`
/// (this crate's stand-in for `ast.literal_eval`) can parse it.
fn requote(token: &str) -> String {
    let t = token.trim();
    if t.len() >= 2 && t.starts_with('\'') && t.ends_with('\'') {
        let inner = &t[1..t.len() - 1];
        let escaped = inner.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}\"", escaped)
    } else {
        t.to_string()
    }
}

fn parse_literal(token: &str) -> Option<Value> {
    let requoted = requote(token);
    serde_json::from_str(&requoted).ok()
}

/// Decode a raw argument string into positional and keyword values.
///
/// Three tiers, same fallback order as the wire protocol's Python
/// ancestor:
/// 1. Whole string as a bare positional-literal list (`"a", 10, true`).
/// 2. Per-token split supporting `key=value` keyword args mixed with
///    positional ones.
/// 3. Last resort: the entire string becomes one positional string arg.
pub fn decode_args(args_str: &str) -> DecodedArgs {
    if args_str.trim().is_empty() {
        return DecodedArgs::default();
    }

    // Tier 1: try the whole thing as a JSON array.
    let wrapped = format!("[{}]", requote_all(args_str));
    if let Ok(Value::Array(values)) = serde_json::from_str::<Value>(&wrapped) {
        return DecodedArgs { positional: values, keyword: HashMap::new() };
    }

    // Tier 2: per-token split, keyword-aware.
    let tokens = split_top_level(args_str);
    if !tokens.is_empty() {
        let mut positional = Vec::new();
        let mut keyword = HashMap::new();
        let mut all_parsed = true;
        for tok in &tokens {
            if let Some(caps) = KEYWORD_ARG_RE.captures(tok) {
                match parse_literal(&caps[2]) {
                    Some(v) => {
                        keyword.insert(caps[1].to_string(), v);
                    }
                    None => {
                        all_parsed = false;
                        break;
                    }
                }
            } else {
                match parse_literal(tok) {
                    Some(v) => positional.push(v),
                    None => {
                        all_parsed = false;
                        break;
                    }
                }
            }
        }
        if all_parsed {
            return DecodedArgs { positional, keyword };
        }
    }

    // Tier 3: treat the whole string as one string argument.
    DecodedArgs { positional: vec![Value::String(args_str.to_string())], keyword: HashMap::new() }
}

/// Requote every top-level single-quoted token in a comma list, leaving
/// nested structure otherwise untouched. Used only by tier 1's
/// whole-string attempt.
fn requote_all(args_str: &str) -> String {
    split_top_level(args_str)
        .into_iter()
        .map(|t| requote(&t))
        .collect::<Vec<_>>()
        .join(",")
}

/// The positional-parameter order for each built-in tool, since
/// `serde_json::Map` does not preserve the declaration order of a
/// `ToolSchema`'s `properties` object. New tools must add an entry here
/// to support positional (non-keyword) call syntax.
fn positional_params(tool_name: &str) -> &'static [&'static str] {
    match tool_name {
        "bash" => &["command", "timeout_ms"],
        "read_file" => &["path"],
        "write_file" => &["path", "content"],
        "edit_file" => &["path", "old_string", "new_string"],
        "memory_search" => &["query"],
        "memory_get" => &["path"],
        "web_fetch" => &["url"],
        _ => &[],
    }
}

/// Build the JSON arguments object a [`Tool::execute`] call expects from
/// decoded positional/keyword values.
pub fn args_to_json(tool_name: &str, decoded: &DecodedArgs) -> Value {
    let mut map = serde_json::Map::new();
    let params = positional_params(tool_name);
    for (i, value) in decoded.positional.iter().enumerate() {
        if let Some(param_name) = params.get(i) {
            map.insert(param_name.to_string(), value.clone());
        }
    }
    for (k, v) in &decoded.keyword {
        map.insert(k.clone(), v.clone());
    }
    Value::Object(map)
}

/// Outcome of dispatching a single parsed call against a registered tool.
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub ok: bool,
    pub data: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Execute `call` against `tool`, decoding its argument string first and
/// enforcing `timeout`. Never panics on malformed arguments or tool
/// errors — both become an `ok: false` result the model can see and
/// react to.
pub async fn dispatch(
    tool: &dyn Tool,
    call: &ParsedCall,
    timeout: Duration,
) -> DispatchResult {
    let start = std::time::Instant::now();
    let decoded = decode_args(&call.args_str);
    let arguments = args_to_json(&call.name, &decoded).to_string();

    match tokio::time::timeout(timeout, tool.execute(&arguments)).await {
        Ok(Ok(output)) => DispatchResult {
            ok: true,
            data: Some(output),
            error: None,
            duration_ms: start.elapsed().as_millis() as u64,
        },
        Ok(Err(e)) => DispatchResult {
            ok: false,
            data: None,
            error: Some(e.to_string()),
            duration_ms: start.elapsed().as_millis() as u64,
        },
        Err(_) => DispatchResult {
            ok: false,
            data: None,
            error: Some(ErrorKind::Timeout(timeout.as_secs()).to_string()),
            duration_ms: start.elapsed().as_millis() as u64,
        },
    }
}

/// Format a dispatch result for reinjection into the model's context:
/// sanitized, wrapped in `[TOOL_RESULT ...]` tags, with cognitive
/// anchors attached for read-family and git-output tools.
pub fn format_result(tool_name: &str, result: &DispatchResult) -> String {
    let body = if result.ok {
        serde_json::json!({"ok": true, "data": result.data.clone().unwrap_or_default(), "duration_ms": result.duration_ms})
    } else {
        serde_json::json!({"ok": false, "error": result.error.clone().unwrap_or_default(), "duration_ms": result.duration_ms})
    };
    let json_text = body.to_string();
    let wrapped = wrap_tool_output(tool_name, &json_text, None);
    format!("[TOOL_RESULT {}]\n{}\n[/TOOL_RESULT]", tool_name, wrapped.content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_primary_form() {
        let calls = parse_tool_calls(r#"::TOOL bash("ls -la")::"#, &["bash"]);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "bash");
        assert_eq!(calls[0].args_str, "\"ls -la\"");
    }

    #[test]
    fn parses_fallback_form_only_for_known_tools() {
        let text = r#"::bash("ls")::"#;
        assert_eq!(parse_tool_calls(text, &["bash"]).len(), 1);
        assert_eq!(parse_tool_calls(text, &["read_file"]).len(), 0);
    }

    #[test]
    fn primary_form_wins_even_when_fallback_also_matches() {
        let text = r#"::TOOL bash("ls")::"#;
        let calls = parse_tool_calls(text, &["bash"]);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "bash");
    }

    #[test]
    fn decodes_positional_args() {
        let decoded = decode_args("\"src/main.rs\"");
        assert_eq!(decoded.positional, vec![Value::String("src/main.rs".into())]);
        assert!(decoded.keyword.is_empty());
    }

    #[test]
    fn decodes_keyword_args() {
        let decoded = decode_args(r#"path="src/main.rs", old_string="foo", new_string="bar""#);
        assert_eq!(decoded.positional.len(), 0);
        assert_eq!(decoded.keyword.get("path"), Some(&Value::String("src/main.rs".into())));
        assert_eq!(decoded.keyword.get("new_string"), Some(&Value::String("bar".into())));
    }

    #[test]
    fn decodes_mixed_positional_and_keyword() {
        let decoded = decode_args(r#""*.py", limit=20"#);
        assert_eq!(decoded.positional, vec![Value::String("*.py".into())]);
        assert_eq!(decoded.keyword.get("limit"), Some(&Value::Number(20.into())));
    }

    #[test]
    fn empty_args_decode_to_empty() {
        let decoded = decode_args("");
        assert!(decoded.positional.is_empty());
        assert!(decoded.keyword.is_empty());
    }

    #[test]
    fn unparseable_args_fall_back_to_single_string() {
        let decoded = decode_args("not valid ( at all, still unbalanced");
        assert_eq!(decoded.positional.len(), 1);
        assert!(matches!(&decoded.positional[0], Value::String(_)));
    }

    #[test]
    fn args_to_json_maps_positional_by_declared_order() {
        let decoded = decode_args(r#""src/main.rs", "new content""#);
        let json = args_to_json("write_file", &decoded);
        assert_eq!(json["path"], Value::String("src/main.rs".into()));
        assert_eq!(json["content"], Value::String("new content".into()));
    }

    #[test]
    fn args_to_json_keyword_overrides_by_name_not_position() {
        let decoded = decode_args(r#"content="new content", path="src/main.rs""#);
        let json = args_to_json("write_file", &decoded);
        assert_eq!(json["path"], Value::String("src/main.rs".into()));
        assert_eq!(json["content"], Value::String("new content".into()));
    }

    #[test]
    fn single_quoted_strings_are_requoted() {
        let decoded = decode_args("'hello world'");
        assert_eq!(decoded.positional, vec![Value::String("hello world".into())]);
    }

    #[test]
    fn format_result_wraps_in_tool_result_tags() {
        let result = DispatchResult { ok: true, data: Some("42".into()), error: None, duration_ms: 3 };
        let formatted = format_result("memory_search", &result);
        assert!(formatted.starts_with("[TOOL_RESULT memory_search]"));
        assert!(formatted.trim_end().ends_with("[/TOOL_RESULT]"));
    }

    #[test]
    fn format_result_adds_read_family_anchor() {
        let result = DispatchResult { ok: true, data: Some("fn main() {}".into()), error: None, duration_ms: 1 };
        let formatted = format_result("read_file", &result);
        assert!(formatted.contains("untrusted data retrieved from the workspace"));
    }
}
