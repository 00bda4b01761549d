use ariadne::{Color, Label, Report, ReportKind, Source};
use rill::RillError;
use std::io::Write;
use std::ops::Range;

/// Converts a byte span to a character span for ariadne
fn byte_to_char_span(source: &str, byte_span: &Range<usize>) -> Range<usize> {
    let start = source[..byte_span.start.min(source.len())].chars().count();
    let end = source[..byte_span.end.min(source.len())].chars().count();
    start..end
}

/// Renders a RillError against its source text. Errors without a span
/// (i/o, program images) fall back to a plain line.
pub fn report_error<W: Write>(
    error: &RillError,
    source: &str,
    filename: Option<&str>,
    mut writer: W,
) {
    let name = filename.unwrap_or("");

    match error.span() {
        Some(span) => {
            let char_span = byte_to_char_span(source, &span);
            Report::build(ReportKind::Error, (name, char_span.clone()))
                .with_message(error.to_string())
                .with_label(
                    Label::new((name, char_span))
                        .with_message(error.detail())
                        .with_color(Color::Red),
                )
                .finish()
                .write((name, Source::from(source)), &mut writer)
                .ok();
        }
        None => {
            writeln!(writer, "error: {}", error.detail()).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill::{RuntimeErrorKind, ScopeErrorKind};

    /// Helper to strip ANSI escape codes so assertions see plain text
    fn strip_ansi(s: &str) -> String {
        let mut result = String::new();
        let mut in_escape = false;
        for c in s.chars() {
            if c == '\x1b' {
                in_escape = true;
            } else if in_escape {
                if c == 'm' {
                    in_escape = false;
                }
            } else {
                result.push(c);
            }
        }
        result
    }

    fn render(error: &RillError, source: &str) -> String {
        let mut output = Vec::new();
        report_error(error, source, None, &mut output);
        strip_ansi(&String::from_utf8(output).unwrap())
    }

    #[test]
    fn byte_to_char_span_ascii_unchanged() {
        let source = "hello world";
        assert_eq!(byte_to_char_span(source, &(0..5)), 0..5);
        assert_eq!(byte_to_char_span(source, &(6..11)), 6..11);
    }

    #[test]
    fn byte_to_char_span_converts_utf8() {
        // 'é' is 2 bytes, 1 char
        let source = "aé";
        assert_eq!(byte_to_char_span(source, &(0..1)), 0..1);
        assert_eq!(byte_to_char_span(source, &(0..3)), 0..2);
        assert_eq!(byte_to_char_span(source, &(1..3)), 1..2);
    }

    #[test]
    fn byte_to_char_span_clamps_to_source_length() {
        let source = "hi";
        assert_eq!(byte_to_char_span(source, &(0..100)), 0..2);
    }

    #[test]
    fn scan_error_shows_offending_character() {
        let error = RillError::Scan {
            message: "unexpected character '@'".to_string(),
            span: 6..7,
        };
        let result = render(&error, "print @");
        assert!(result.contains("@"));
        assert!(result.contains("unexpected character"));
    }

    #[test]
    fn scope_error_shows_detail() {
        let error = RillError::Scope {
            kind: ScopeErrorKind::UnusedLocalVariable,
            message: "local variable 'x' is never used".to_string(),
            span: 6..7,
        };
        let result = render(&error, "{ var x = 1; }");
        assert!(result.contains("never used"));
    }

    #[test]
    fn runtime_error_shows_detail() {
        let error = RillError::Runtime {
            kind: RuntimeErrorKind::TypeMismatch,
            message: "operands must be Numbers, got Number and String".to_string(),
            span: 8..9,
        };
        let result = render(&error, "print 1 + \"one\";");
        assert!(result.contains("runtime error"));
        assert!(result.contains("operands must be Numbers"));
    }

    #[test]
    fn io_error_prints_a_plain_line() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: RillError = io_err.into();
        let result = render(&error, "");
        assert!(result.contains("file not found"));
    }
}
