//! Filename-safe tokens for titles and group keys.

/// Substitutions applied, in order, to every character of a title.
const SUBSTITUTIONS: &[(char, &str)] = &[
    ('/', "-"),
    ('\\', "-"),
    (':', "-"),
    ('|', "-"),
    ('&', "And"),
    (',', ""),
    ('[', ""),
    (']', ""),
    ('?', ""),
    ('*', ""),
    ('"', ""),
    ('<', ""),
    ('>', ""),
];

/// Token used when a title sanitizes to nothing.
const EMPTY_TOKEN: &str = "untitled";

/// Turn a document title into a single path segment.
///
/// Whitespace runs become one `_`, so `"SDK Page 1"` yields `SDK_Page_1`
/// and groups under the `SDK` bundle key.
pub fn sanitize_for_filename(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut pending_space = false;

    for ch in title.trim().chars() {
        if ch.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push('_');
            pending_space = false;
        }
        match SUBSTITUTIONS.iter().find(|(from, _)| *from == ch) {
            Some((_, to)) => out.push_str(to),
            None if ch.is_control() => {}
            None => out.push(ch),
        }
    }

    let trimmed = out.trim_matches('.');
    if trimmed.is_empty() {
        EMPTY_TOKEN.to_string()
    } else {
        trimmed.to_string()
    }
}
