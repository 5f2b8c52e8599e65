/// Utility functions for formatting readings, addresses and responses
use time::{format_description, OffsetDateTime};

/// Column width of the response viewer
const VIEWER_LINE_WIDTH: usize = 31;

/// Format a timestamp for human-readable logging
///
/// Converts an OffsetDateTime to DD.MM.YYYY - HH:MM:SS format
/// Falls back to default string representation if formatting fails.
pub fn format_datetime(dt: &OffsetDateTime) -> String {
    match format_description::parse("[day].[month].[year] - [hour]:[minute]:[second]") {
        Ok(format) => dt.format(&format).unwrap_or_else(|_| dt.to_string()),
        Err(_) => dt.to_string(),
    }
}

/// Format a reading as fixed two-decimal text, e.g. 21.5 -> "21.50"
pub fn format_fixed2(value: f32) -> String {
    format!("{:.2}", value)
}

/// Colon separated upper-case hex, most significant byte first
pub fn format_mac(address: &[u8]) -> String {
    address
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Format a raw response for the text viewer
///
/// Breaks the text after `{` and `,`, closes `}` on its own line, indents
/// nested objects by one space per level, strips quotes and wraps long lines.
/// An empty response is replaced by a placeholder message.
pub fn format_response(message: &str) -> String {
    if message.is_empty() {
        return "No data in payload".to_string();
    }

    let mut out = String::with_capacity(message.len() * 2);
    let mut indent: usize = 0;
    let mut column: usize = 0;

    let newline = |out: &mut String, column: &mut usize, spaces: usize| {
        out.push('\n');
        out.extend(std::iter::repeat(' ').take(spaces));
        *column = spaces;
    };

    for c in message.chars() {
        match c {
            '"' => continue,
            '{' => {
                out.push(c);
                indent += 1;
                newline(&mut out, &mut column, indent);
            }
            ',' => {
                out.push(c);
                newline(&mut out, &mut column, indent);
            }
            '}' => {
                indent = indent.saturating_sub(1);
                newline(&mut out, &mut column, indent);
                out.push(c);
                column += 1;
            }
            '\n' => newline(&mut out, &mut column, 0),
            ' ' if column == 0 => continue,
            _ => {
                if column >= VIEWER_LINE_WIDTH {
                    newline(&mut out, &mut column, 0);
                }
                out.push(c);
                column += 1;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn fixed_two_decimals() {
        assert_eq!(format_fixed2(21.5), "21.50");
        assert_eq!(format_fixed2(-3.0), "-3.00");
        assert_eq!(format_fixed2(100.0), "100.00");
    }

    #[test]
    fn mac_is_colon_separated_hex() {
        assert_eq!(
            format_mac(&[0x00, 0x1A, 0xFF, 0x10, 0x02, 0xAB]),
            "00:1A:FF:10:02:AB"
        );
    }

    #[test]
    fn datetime_format() {
        let dt = datetime!(2024-03-09 07:05:01 UTC);
        assert_eq!(format_datetime(&dt), "09.03.2024 - 07:05:01");
    }

    #[test]
    fn response_is_broken_into_lines() {
        let formatted = format_response(r#"{"bt":"21.3","co":"415"}"#);
        assert_eq!(formatted, "{\n bt:21.3,\n co:415\n}");
    }

    #[test]
    fn long_lines_wrap() {
        let text = "a".repeat(40);
        let formatted = format_response(&text);
        let lines: Vec<&str> = formatted.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), 31);
        assert_eq!(lines[1].len(), 9);
    }

    #[test]
    fn empty_response_placeholder() {
        assert_eq!(format_response(""), "No data in payload");
    }
}
