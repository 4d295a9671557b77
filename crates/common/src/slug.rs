//! Slug helpers for identifiers derived from user-visible names.

/// Lowercase `input`, replace every non-alphanumeric run with a single `-`,
/// trim leading/trailing dashes, and cap the result at `max_len` characters.
///
/// Returns an empty string when nothing survives; callers fall back to an
/// id-derived slug in that case.
pub fn slugify(input: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_len));
    let mut last_dash = true;
    for ch in input.chars() {
        if out.len() >= max_len {
            break;
        }
        if ch.is_ascii_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
