//! Handoff condition evaluation: `${name}` substitution, normalization, and
//! boolean evaluation via `evalexpr`.
//!
//! Grammar accepted: comparisons (`==`, `!=`, `>`, `<`, `>=`, `<=`) over
//! string/number/bool atoms, combined with `&&`/`||` (word forms `and`/`or`
//! accepted) and parentheses. Bare identifiers are treated as string literals,
//! so `${status} == done` compares the substituted value against `"done"`.
//! Evaluation has no side effects and fails safe to `false`.

use serde_json::Value;

/// Renders a context value as an expression literal: strings quoted, numbers
/// and booleans bare. Missing values render as the empty string literal.
fn render_literal(value: Option<Value>) -> String {
    match value {
        Some(Value::String(s)) => quote(&s),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Null) | None => "\"\"".to_string(),
        // Compound values compare by their JSON text.
        Some(other) => quote(&other.to_string()),
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Replaces `${name}` references using `lookup`, rendering typed literals.
pub fn substitute(template: &str, lookup: &dyn Fn(&str) -> Option<Value>) -> String {
    substitute_with(template, lookup, render_literal)
}

/// Replaces `${name}` references with the value's plain text (for prompts, not
/// expressions). Missing values become empty.
pub fn substitute_raw(template: &str, lookup: &dyn Fn(&str) -> Option<Value>) -> String {
    substitute_with(template, lookup, |value| match value {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    })
}

fn substitute_with(
    template: &str,
    lookup: &dyn Fn(&str) -> Option<Value>,
    render: impl Fn(Option<Value>) -> String,
) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        rest = &rest[start + 2..];
        match rest.find('}') {
            Some(end) => {
                let name = &rest[..end];
                out.push_str(&render(lookup(name)));
                rest = &rest[end + 1..];
            }
            None => {
                // Unterminated reference; keep the raw text.
                out.push_str("${");
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Rewrites the expression into evalexpr's dialect: `and`/`or` become
/// `&&`/`||` and bare identifiers become string literals. String literals and
/// numbers pass through untouched.
fn normalize(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut chars = expr.char_indices().peekable();
    while let Some(&(i, c)) = chars.peek() {
        if c == '"' {
            // Copy the string literal verbatim, honoring escapes.
            chars.next();
            out.push('"');
            let mut escaped = false;
            for (_, c) in chars.by_ref() {
                out.push(c);
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    break;
                }
            }
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            let mut end = i;
            while let Some(&(j, c)) = chars.peek() {
                if c.is_ascii_alphanumeric() || c == '_' {
                    end = j + c.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            match &expr[start..end] {
                "and" => out.push_str("&&"),
                "or" => out.push_str("||"),
                word @ ("true" | "false") => out.push_str(word),
                word => out.push_str(&quote(word)),
            }
        } else if c.is_ascii_digit() {
            while let Some(&(_, c)) = chars.peek() {
                if c.is_ascii_digit() || c == '.' {
                    out.push(c);
                    chars.next();
                } else {
                    break;
                }
            }
        } else {
            out.push(c);
            chars.next();
        }
    }
    out
}

/// Substitutes and evaluates a condition template. Any failure (syntax error,
/// type mismatch, undefined name) yields `false`.
pub fn evaluate(template: &str, lookup: &dyn Fn(&str) -> Option<Value>) -> bool {
    let substituted = substitute(template, lookup);
    let normalized = normalize(&substituted);
    match evalexpr::eval_boolean(&normalized) {
        Ok(result) => result,
        Err(e) => {
            tracing::debug!(template, %e, "condition evaluated to false");
            false
        }
    }
}
