//! Logging helpers that keep device output on a single process-log line.

const DEVICE_TEXT_PREVIEW: usize = 120;

/// Render a decoded device chunk on one line: `\r`, `\n`, `\t` and other
/// control bytes become escapes. Long bursts are cut after
/// `DEVICE_TEXT_PREVIEW` chars.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(DEVICE_TEXT_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= DEVICE_TEXT_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Lowercase hex of at most `max` leading bytes, with `..` when cut.
pub fn hex_preview(data: &[u8], max: usize) -> String {
    let shown = &data[..data.len().min(max)];
    let mut out = hex::encode(shown);
    if data.len() > max {
        out.push_str("..");
    }
    out
}
