use std::fmt::Write;

#[cfg(feature = "harness")]
pub mod fixture;

/// Escape control characters and quotes for single-line failure messages.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ch if ch < ' ' => {
                let _ = write!(&mut out, "\\u{{{:02X}}}", ch as u32);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Describe the first differing line of two traces with two lines of
/// context on either side.
pub fn diff_lines(expected: &[String], actual: &[String]) -> String {
    const MISSING: &str = "<missing>";
    let max = expected.len().max(actual.len());
    let line = |lines: &[String], idx: usize| lines.get(idx).map_or(MISSING, String::as_str).to_string();
    let mut out = String::new();
    match (0..max).find(|&idx| line(expected, idx) != line(actual, idx)) {
        Some(first) => {
            let start = first.saturating_sub(2);
            let end = (first + 3).min(max);
            let _ = writeln!(&mut out, "first mismatch at line {}:", first + 1);
            for idx in start..end {
                let marker = if idx == first { ">" } else { " " };
                let _ = writeln!(&mut out, "{marker} {:>4}  expected: {}", idx + 1, line(expected, idx));
                let _ = writeln!(&mut out, "{marker} {:>4}    actual: {}", idx + 1, line(actual, idx));
            }
        }
        None => {
            let _ = writeln!(&mut out, "traces are identical");
        }
    }
    let _ = writeln!(
        &mut out,
        "expected {} lines, actual {} lines",
        expected.len(),
        actual.len()
    );
    out
}
