//! `key=value` properties text.
//!
//! Decoding follows the familiar properties conventions:
//!
//! - `#` and `!` start comment lines; blank lines are skipped
//! - the key ends at the first unescaped `=`, `:` or whitespace
//! - a line ending in an odd number of backslashes continues on the next line
//! - `\t`, `\n`, `\r`, `\f`, `\uXXXX` and `\<char>` escapes are recognized
//!
//! Every value decodes to a string, in declaration order. Encoding writes one
//! `key=value` line per property, flattening nested values to dotted keys and
//! escaping only what the decoder needs. A document already in that canonical
//! shape encodes back byte for byte.

use std::fmt::Write as _;

use confer_types::{flatten, scalar_text, Properties, Value};

use crate::error::{FormatError, FormatResult};
use crate::processor::{document_text, has_extension, Processor};

const FORMAT: &str = "properties";

/// Whitespace that separates keys from values and indents lines.
const BLANKS: [char; 3] = [' ', '\t', '\x0c'];

/// Processor for `.properties` documents.
#[derive(Clone, Copy, Debug, Default)]
pub struct PropertiesProcessor;

impl Processor for PropertiesProcessor {
    fn name(&self) -> &'static str {
        FORMAT
    }

    fn matches(&self, file_name: &str) -> bool {
        has_extension(file_name, &["properties"])
    }

    fn decode(&self, data: &[u8]) -> FormatResult<Properties> {
        let text = document_text(FORMAT, data)?;
        let mut properties = Properties::new();
        for line in logical_lines(text) {
            let (raw_key, raw_value) = split_key_value(&line);
            let key = unescape(raw_key)?;
            let value = unescape(raw_value)?;
            properties.insert(key, Value::String(value));
        }
        Ok(properties)
    }

    fn encode(&self, properties: &Properties) -> FormatResult<Vec<u8>> {
        let mut out = String::new();
        for (key, value) in flatten(properties) {
            let text = scalar_text(&value).ok_or_else(|| {
                FormatError::encode(FORMAT, format!("value of {key:?} is not a scalar"))
            })?;
            escape_into(&mut out, &key, true);
            out.push('=');
            escape_into(&mut out, &text, false);
            out.push('\n');
        }
        Ok(out.into_bytes())
    }
}

/// Join continuation lines and drop comments and blank lines.
fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current: Option<String> = None;

    for physical in text.lines() {
        let stripped = physical.trim_start_matches(BLANKS);
        let mut line = match current.take() {
            Some(pending) => pending,
            None => {
                if stripped.is_empty() || stripped.starts_with(['#', '!']) {
                    continue;
                }
                String::new()
            }
        };

        let trailing = stripped.len() - stripped.trim_end_matches('\\').len();
        if trailing % 2 == 1 {
            line.push_str(&stripped[..stripped.len() - 1]);
            current = Some(line);
        } else {
            line.push_str(stripped);
            lines.push(line);
        }
    }

    if let Some(pending) = current {
        lines.push(pending);
    }
    lines
}

/// Split a logical line into its raw (still escaped) key and value.
fn split_key_value(line: &str) -> (&str, &str) {
    let mut key_end = line.len();
    let mut escaped = false;
    for (idx, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' | ' ' | '\t' | '\x0c' => {
                key_end = idx;
                break;
            }
            _ => {}
        }
    }

    let mut rest = line[key_end..].trim_start_matches(BLANKS);
    if let Some(after) = rest.strip_prefix(['=', ':']) {
        rest = after.trim_start_matches(BLANKS);
    }
    (&line[..key_end], rest)
}

fn unescape(raw: &str) -> FormatResult<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some('u') => {
                let mut code = read_code_unit(&mut chars)?;
                if (0xD800..0xDC00).contains(&code) {
                    let low = match (chars.next(), chars.next()) {
                        (Some('\\'), Some('u')) => read_code_unit(&mut chars)?,
                        _ => {
                            return Err(FormatError::decode(
                                FORMAT,
                                "unpaired surrogate in \\u escape",
                            ))
                        }
                    };
                    if !(0xDC00..0xE000).contains(&low) {
                        return Err(FormatError::decode(FORMAT, "invalid low surrogate"));
                    }
                    code = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                }
                let ch = char::from_u32(code).ok_or_else(|| {
                    FormatError::decode(FORMAT, format!("invalid code point U+{code:04X}"))
                })?;
                out.push(ch);
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    Ok(out)
}

fn read_code_unit(chars: &mut std::str::Chars<'_>) -> FormatResult<u32> {
    let digits: String = chars.by_ref().take(4).collect();
    if digits.len() != 4 {
        return Err(FormatError::decode(FORMAT, "truncated \\u escape"));
    }
    u32::from_str_radix(&digits, 16)
        .map_err(|_| FormatError::decode(FORMAT, format!("malformed \\u escape: {digits}")))
}

fn escape_into(out: &mut String, text: &str, is_key: bool) {
    for (idx, c) in text.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            ' ' if is_key || idx == 0 => out.push_str("\\ "),
            '=' | ':' if is_key => {
                out.push('\\');
                out.push(c);
            }
            '#' | '!' if is_key && idx == 0 => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() || c == '\u{feff}' => {
                let _ = write!(out, "\\u{:04X}", c as u32);
            }
            c => out.push(c),
        }
    }
}
