//! Filename-safe token normalization

/// Returns true for characters allowed to survive sanitization
fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Normalize free-form text into an upper-case token of `[A-Z0-9-_]`.
///
/// Every run of disallowed characters becomes a single `-`, repeated `-`
/// collapse into one, and leading/trailing `-` are dropped. Empty input (or
/// input with nothing usable) yields an empty string.
pub fn sanitize_and_upper(text: &str) -> String {
    let mut out = String::with_capacity(text.len());

    for c in text.trim().chars() {
        let c = if is_name_char(c) { c } else { '-' };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c.to_ascii_uppercase());
    }

    out.trim_matches('-').to_string()
}
