//! Escaping of claim keys so that a nested key path can be flattened into a single attribute name and split
//! back without ambiguity, even when keys contain the separator or backslashes.

/// Joins the escaped keys of a path into an attribute name
pub const SEPARATOR: char = '.';

const BACKSLASH: char = '\\';

/// Prefix every backslash and every occurrence of `sep` with a backslash.
pub fn escape(s: &str, sep: char) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        if c == BACKSLASH || c == sep {
            escaped.push(BACKSLASH);
        }
        escaped.push(c);
    }
    escaped
}

/// Inverse of [`escape`]. A backslash makes the next character literal, a lone trailing backslash is kept.
pub fn unescape(s: &str, sep: char) -> String {
    let mut unescaped = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == BACKSLASH {
            match chars.next() {
                Some(n) if n == BACKSLASH || n == sep => unescaped.push(n),
                Some(n) => {
                    unescaped.push(c);
                    unescaped.push(n);
                }
                None => unescaped.push(c),
            }
        } else {
            unescaped.push(c);
        }
    }
    unescaped
}

/// Split `s` at every `sep` that is preceded by an even number of consecutive backslashes. The parts are
/// returned still escaped.
pub fn escaped_split(s: &str, sep: char) -> Vec<&str> {
    debug_assert_ne!(sep, BACKSLASH);
    let mut parts = Vec::new();
    let mut last_split = 0;
    let mut backslashes = 0usize;
    for (i, c) in s.char_indices() {
        if c == sep && backslashes % 2 == 0 {
            parts.push(&s[last_split..i]);
            last_split = i + c.len_utf8();
            backslashes = 0;
        } else if c == BACKSLASH {
            backslashes += 1;
        } else {
            backslashes = 0;
        }
    }
    parts.push(&s[last_split..]);
    parts
}

/// Split an attribute name into its unescaped keys.
pub fn split_path(name: &str) -> Vec<String> {
    escaped_split(name, SEPARATOR)
        .into_iter()
        .map(|p| unescape(p, SEPARATOR))
        .collect()
}

/// Join `key` to an already escaped `prefix`. An empty prefix denotes the root.
pub fn join_path(prefix: &str, key: &str) -> String {
    let key = escape(key, SEPARATOR);
    if prefix.is_empty() {
        key
    } else {
        let mut name = String::with_capacity(prefix.len() + key.len() + 1);
        name.push_str(prefix);
        name.push(SEPARATOR);
        name.push_str(&key);
        name
    }
}
