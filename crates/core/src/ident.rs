//! Identifier sanitizing and quoting for generated SQL.
//!
//! Sink table names are derived from tenant display names, and dynamic field
//! ids become column names. Every tenant-controlled value that reaches
//! generated SQL passes through one of these helpers.

/// Collapses an arbitrary display string into a safe table-name fragment.
///
/// Output is lowercase `[a-z0-9_]` only: runs of any other characters become
/// a single underscore, leading and trailing underscores are trimmed.
/// Deterministic, so repeated runs target the same physical table without a
/// persisted name mapping. Idempotent: `sanitize(sanitize(x)) == sanitize(x)`.
pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;

    for c in name.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c);
        } else {
            pending_sep = true;
        }
    }

    out.trim_matches('_').to_string()
}

/// Quotes a column or table identifier, doubling embedded quotes.
pub fn quote_ident(id: &str) -> String {
    format!("\"{}\"", id.replace('"', "\"\""))
}

/// Quotes a value as a ClickHouse string literal.
pub fn quote_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_collapses_and_trims() {
        assert_eq!(sanitize("Acme Corp (EU)"), "acme_corp_eu");
        assert_eq!(sanitize("  Q3 -- NPS Survey!  "), "q3_nps_survey");
        assert_eq!(sanitize("___already_safe___"), "already_safe");
        assert_eq!(sanitize("日本語"), "");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for input in ["Acme Corp (EU)", "a-_b", "MiXeD 123", "--", ""] {
            let once = sanitize(input);
            assert_eq!(sanitize(&once), once, "not idempotent for {:?}", input);
        }
    }

    #[test]
    fn test_sanitize_output_alphabet() {
        let out = sanitize("We’re №1! (really)");
        assert!(out.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'));
        assert!(!out.starts_with('_'));
        assert!(!out.ends_with('_'));
    }

    #[test]
    fn test_quote_ident_doubles_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_quote_str_escapes() {
        assert_eq!(quote_str("hello"), "'hello'");
        assert_eq!(quote_str("it's"), "'it\\'s'");
        assert_eq!(quote_str("back\\slash"), "'back\\\\slash'");
    }
}
