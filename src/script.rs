//! Render a payload as a Python `struct.pack` fragment.

use std::fmt::Write as _;

use crate::emit::{Line, Payload};

#[derive(Debug, Clone)]
pub struct ScriptOptions {
    /// Emit the `from struct import pack` / `p = b''` preamble.
    pub header: bool,
    /// Name of the payload variable.
    pub var: String,
    /// Append `# comment` to lines that carry one.
    pub comments: bool,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            header: true,
            var: "p".into(),
            comments: true,
        }
    }
}

/// One statement per payload line, in emission order.
///
/// String blocks without a comment are annotated with their own text.
pub fn render(payload: &Payload, opts: &ScriptOptions) -> String {
    let mut out = String::new();
    if opts.header {
        out.push_str("#!/usr/bin/env python3\n");
        out.push_str("from struct import pack\n\n");
        let _ = writeln!(out, "{} = b''", opts.var);
        out.push('\n');
    }
    for line in payload.lines() {
        let stmt = statement(line);
        let comment = match line {
            Line::Bytes {
                bytes,
                comment: None,
            } => Some(printable(bytes)),
            _ => line.comment().map(str::to_string),
        };
        let _ = match comment {
            Some(c) if opts.comments => writeln!(out, "{} += {} # {}", opts.var, stmt, c),
            _ => writeln!(out, "{} += {}", opts.var, stmt),
        };
    }
    out
}

fn statement(line: &Line) -> String {
    match line {
        Line::Word { value, width: 8, .. } => format!(r#"pack("<Q", 0x{:016x})"#, value),
        Line::Word { value, .. } => format!(r#"pack("<I", 0x{:08x})"#, value),
        Line::Bytes { bytes, .. } => bytes_literal(bytes),
    }
}

/// Python `b"..."` literal for `bytes`.
pub fn bytes_literal(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() + 3);
    s.push_str("b\"");
    for &b in bytes {
        match b {
            b'"' => s.push_str("\\\""),
            b'\\' => s.push_str("\\\\"),
            0x20..=0x7e => s.push(b as char),
            _ => {
                let _ = write!(s, "\\x{:02x}", b);
            }
        }
    }
    s.push('"');
    s
}

/// Block text for a comment, non-printable bytes shown as `.`.
fn printable(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if (0x20..=0x7e).contains(&b) { b as char } else { '.' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::{Emitter, Section, Sections};

    fn payload(width: usize) -> Payload {
        let sections = Sections {
            data: 0x080e_c060,
            got: 0x080e_bff4,
        };
        let mut em = Emitter::new(width, sections).unwrap();
        em.word(0x0806_0001, Some("pop %edx ; ret")).unwrap();
        em.section_addr(Section::Data, 4).unwrap();
        em.string(b"/bin", None).unwrap();
        em.padding(1);
        em.finish()
    }

    #[test]
    fn renders_x86_fragment() {
        let script = render(&payload(4), &ScriptOptions::default());
        let lines: Vec<_> = script.lines().collect();
        assert!(lines.contains(&"from struct import pack"));
        assert!(lines.contains(&"p = b''"));
        assert!(lines.contains(&r#"p += pack("<I", 0x08060001) # pop %edx ; ret"#));
        assert!(lines.contains(&r#"p += pack("<I", 0x080ec064) # @ .data + 4"#));
        assert!(lines.contains(&r#"p += b"/bin" # /bin"#));
        assert!(lines.contains(&r#"p += b"AAAA" # padding"#));
    }

    #[test]
    fn renders_quad_words() {
        let opts = ScriptOptions {
            header: false,
            var: "rop".into(),
            comments: false,
        };
        let script = render(&payload(8), &opts);
        let first = script.lines().next().unwrap();
        assert_eq!(first, r#"rop += pack("<Q", 0x0000000008060001)"#);
        assert!(script.contains("rop += b\"/binAAAA\"\n"));
        assert!(!script.contains('#'));
    }

    #[test]
    fn escapes_non_printable() {
        assert_eq!(bytes_literal(b"\x31\xc0\"\\a"), r#"b"1\xc0\"\\a""#);
        assert_eq!(bytes_literal(b"\x00\n"), r#"b"\x00\x0a""#);
        assert_eq!(printable(b"/b\x00n"), "/b.n");
    }
}
