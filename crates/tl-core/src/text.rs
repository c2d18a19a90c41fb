use std::sync::OnceLock;

use regex::Regex;

/// Canonical lookup key: trimmed, interior whitespace collapsed, case-folded.
pub fn canonical_key(name: &str) -> String {
    display_key(name).to_lowercase()
}

/// Case-preserving canonical form: trimmed, interior whitespace collapsed.
/// Used when a variable name must be materialized as a program identifier.
pub fn display_key(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn var_token_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\{\{([^{}]+)\}\}|\{([^{}]+)\}").expect("var token regex must compile")
    })
}

/// `{{name}}` tokens inside a function declaration are its parameters.
pub fn function_param_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("param regex must compile"))
}

/// Argument tokens inside a function call's text: quoted strings, bracketed
/// literals, and variable references. Bare words are not arguments.
pub fn function_input_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"'[^']*'|"[^"]*"|\[[^\[\]]*\]|\{\{[^{}]+\}\}|\{[^{}]+\}"#)
            .expect("function input regex must compile")
    })
}

pub fn identifier_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("identifier regex must compile")
    })
}

/// Reserved words that may never be materialized as expression-block
/// identifiers, even when a variable name would otherwise qualify.
pub const RESERVED_WORDS: &[&str] = &[
    "do", "if", "in", "for", "let", "new", "try", "var", "case", "else", "enum", "eval", "null",
    "this", "true", "void", "with", "await", "break", "catch", "class", "const", "false", "super",
    "throw", "while", "yield", "delete", "export", "import", "public", "return", "static",
    "switch", "typeof", "default", "extends", "finally", "package", "private", "continue",
    "debugger", "function", "arguments", "interface", "protected", "implements", "instanceof",
];

/// Whether `name` can be surfaced directly as an identifier inside an
/// expression block. Everything else is reachable only through the getter
/// helpers.
pub fn is_expression_identifier(name: &str) -> bool {
    identifier_regex().is_match(name) && !RESERVED_WORDS.contains(&name)
}

pub fn is_string_literal(token: &str) -> bool {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = REGEX.get_or_init(|| {
        Regex::new(r#"^('[^']*'|"[^"]*"|\[[^\[\]]*\])$"#).expect("literal regex must compile")
    });
    regex.is_match(token.trim())
}

pub fn is_var_reference(token: &str) -> bool {
    let token = token.trim();
    var_token_regex()
        .find(token)
        .map(|m| m.start() == 0 && m.end() == token.len())
        .unwrap_or(false)
}

/// Splits a whole-token variable reference into (name, is_local).
pub fn parse_var_reference(token: &str) -> (String, bool) {
    let token = token.trim();
    if let Some(inner) = token.strip_prefix("{{").and_then(|t| t.strip_suffix("}}")) {
        (inner.trim().to_string(), true)
    } else {
        let inner = token
            .strip_prefix('{')
            .and_then(|t| t.strip_suffix('}'))
            .unwrap_or(token);
        (inner.trim().to_string(), false)
    }
}

/// Removes one level of surrounding `'…'`, `"…"`, or `[…]`.
pub fn strip_quotes(text: &str) -> String {
    let trimmed = text.trim();
    if is_string_literal(trimmed) {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        trimmed.to_string()
    }
}

/// Applies standard escape sequences. Unknown escapes keep the escaped
/// character, which also covers `\{` and `\}`.
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
