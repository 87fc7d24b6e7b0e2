//! Line-oriented M3U8 scanner.
//!
//! Playlists are a sequence of lines: tags (`#NAME` or `#NAME:VALUE`), URI
//! lines, and blanks. The lexer classifies lines and supports exactly one
//! line of pushback, which the master parser uses when the line after a
//! variant tag turns out to be another tag.

use std::collections::HashMap;

/// One meaningful playlist line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Line<'a> {
    /// A `#NAME` or `#NAME:VALUE` line. `value` is empty when no `:` is present.
    Tag { name: &'a str, value: &'a str },
    /// Any non-blank line not starting with `#`.
    Uri(&'a str),
}

pub struct TagLexer<'a> {
    lines: std::str::Lines<'a>,
    pushback: Option<Line<'a>>,
}

impl<'a> TagLexer<'a> {
    pub fn new(data: &'a str) -> Self {
        Self {
            lines: data.lines(),
            pushback: None,
        }
    }

    /// Next meaningful line, skipping blanks.
    pub fn next_line(&mut self) -> Option<Line<'a>> {
        if let Some(line) = self.pushback.take() {
            return Some(line);
        }
        for raw in self.lines.by_ref() {
            let line = raw.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix('#') {
                let (name, value) = match rest.split_once(':') {
                    Some((name, value)) => (name, value),
                    None => (rest, ""),
                };
                return Some(Line::Tag { name, value });
            }
            return Some(Line::Uri(line));
        }
        None
    }

    /// Push one line back; the next `next_line` call returns it again.
    pub fn rewind(&mut self, line: Line<'a>) {
        debug_assert!(self.pushback.is_none(), "single-line pushback only");
        self.pushback = Some(line);
    }
}

/// Parse a tag value as a comma-separated attribute list.
///
/// Grammar: `KEY=VALUE[,KEY=VALUE...]`; values may be double-quoted, and a
/// comma inside quotes does not split. Whitespace around keys is trimmed and
/// quotes are stripped from values. Malformed tails are dropped silently and
/// whatever parsed up to that point is returned.
pub fn parse_attributes(tag_value: &str) -> HashMap<String, String> {
    let mut attribs = HashMap::new();
    let bytes = tag_value.as_bytes();
    let mut offset = 0;

    while offset < bytes.len() {
        let Some(eq) = tag_value[offset..].find('=').map(|p| offset + p) else {
            break;
        };

        let name = tag_value[offset..eq].trim();

        // Scan to the next comma outside double quotes
        let mut in_quotes = false;
        let mut end = eq + 1;
        while end < bytes.len() {
            match bytes[end] {
                b'"' => in_quotes = !in_quotes,
                b',' if !in_quotes => break,
                _ => {}
            }
            end += 1;
        }

        let mut value = tag_value[eq + 1..end].trim();
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }

        if !name.is_empty() {
            attribs.insert(name.to_string(), value.to_string());
        }
        offset = end + 1;
    }

    attribs
}
