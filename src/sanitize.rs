//! Overlay text sanitization
//! Neutralizes characters that carry meaning in drawtext option values.

/// Escaped in this order. The backslash goes first so the escapes added for
/// later characters are not escaped a second time.
const ESCAPE_ORDER: [char; 7] = ['\\', '\'', '"', ':', '[', ']', '%'];

/// Make raw text safe to embed as an overlay value.
///
/// Newlines become spaces and carriage returns are dropped. Any other control
/// character is passed through untouched: a slightly odd caption is better
/// than a failed job.
pub fn sanitize_for_overlay(raw: &str) -> String {
    let mut text = raw.replace('\r', "").replace('\n', " ");
    for special in ESCAPE_ORDER {
        text = text.replace(special, &format!("\\{}", special));
    }
    text
}
