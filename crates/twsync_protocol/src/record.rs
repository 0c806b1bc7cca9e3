//! Task mutation records and their line encoding.
//!
//! One record is one body line:
//!
//! ```text
//! <id> TAB <marker> ( TAB <name> ":" <value> )* LF
//! ```
//!
//! Every field is escaped with a backslash: `\\`, `\t`, `\:`, `\n`, `\r`.
//! A field consisting of exactly `\-` is the absent marker: an attribute
//! to delete, or a record without a modification marker. An empty field is
//! an explicit empty string.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};

/// Separates the fields of a record line.
pub const RECORD_DELIMITER: char = '\t';

/// Separates an attribute name from its value.
pub const KEY_VALUE_SEPARATOR: char = ':';

/// Introduces an escape sequence.
pub const ESCAPE: char = '\\';

/// Field content that stands for "no value".
pub const ABSENT_MARKER: &str = "\\-";

/// One task mutation.
///
/// A record carries a stable task identifier, an ordered list of attribute
/// changes and an opaque modification marker. An attribute whose value is
/// `None` is deleted; a record with no attributes deletes the whole task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    id: String,
    attributes: Vec<(String, Option<String>)>,
    marker: Option<String>,
}

impl Record {
    /// Creates a record for `id` with no attribute changes.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: Vec::new(),
            marker: None,
        }
    }

    /// Creates a record that deletes the task `id`.
    pub fn deletion(id: impl Into<String>) -> Self {
        Self::new(id)
    }

    /// Sets an attribute value.
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, Some(value.into()));
        self
    }

    /// Marks an attribute for deletion.
    pub fn with_removed_attribute(mut self, name: impl Into<String>) -> Self {
        self.set(name, None);
        self
    }

    /// Sets the modification marker.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    /// Sets or replaces an attribute, keeping its original position.
    pub fn set(&mut self, name: impl Into<String>, value: Option<String>) {
        let name = name.into();
        match self.attributes.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Replaces the modification marker.
    pub fn set_marker(&mut self, marker: Option<String>) {
        self.marker = marker;
    }

    /// Returns the task identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the attribute changes in order.
    pub fn attributes(&self) -> &[(String, Option<String>)] {
        &self.attributes
    }

    /// Looks up an attribute change.
    ///
    /// The outer `Option` says whether the record mentions the attribute,
    /// the inner one whether it sets or deletes it.
    pub fn attribute(&self, name: &str) -> Option<Option<&str>> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_deref())
    }

    /// Returns the modification marker.
    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    /// Returns true if this record deletes the whole task.
    pub fn is_deletion(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Appends the encoded line, terminator included.
    pub(crate) fn write_line(&self, out: &mut String) -> CodecResult<()> {
        if self.id.is_empty() {
            return Err(CodecError::encoding("record identifier must not be empty"));
        }
        escape_into(out, &self.id);
        out.push(RECORD_DELIMITER);
        write_optional(out, self.marker.as_deref());
        for (name, value) in &self.attributes {
            if name.is_empty() {
                return Err(CodecError::encoding(format!(
                    "record '{}' has an attribute with an empty name",
                    self.id
                )));
            }
            out.push(RECORD_DELIMITER);
            escape_into(out, name);
            out.push(KEY_VALUE_SEPARATOR);
            write_optional(out, value.as_deref());
        }
        out.push('\n');
        Ok(())
    }

    /// Parses one body line without its terminator.
    pub(crate) fn parse_line(line: &str) -> CodecResult<Self> {
        let mut scanner = FieldScanner::new(line);

        let (id, stop) = scanner.next_field()?;
        let id = match id {
            Some(id) if !id.is_empty() => id,
            _ => return Err(CodecError::malformed("record identifier is missing")),
        };
        match stop {
            Stop::Delimiter => {}
            Stop::Separator => {
                return Err(CodecError::malformed(format!(
                    "unescaped separator in identifier of record '{id}'"
                )))
            }
            Stop::End => {
                return Err(CodecError::malformed(format!(
                    "record '{id}' is missing its marker field"
                )))
            }
        }

        let (marker, mut stop) = scanner.next_field()?;
        if stop == Stop::Separator {
            return Err(CodecError::malformed(format!(
                "unescaped separator in marker of record '{id}'"
            )));
        }

        let mut attributes = Vec::new();
        while stop == Stop::Delimiter {
            let (name, name_stop) = scanner.next_field()?;
            let name = match (name, name_stop) {
                (Some(name), Stop::Separator) if !name.is_empty() => name,
                _ => {
                    return Err(CodecError::malformed(format!(
                        "record '{id}' has an attribute without a name and separator"
                    )))
                }
            };
            let (value, value_stop) = scanner.next_field()?;
            if value_stop == Stop::Separator {
                return Err(CodecError::malformed(format!(
                    "unescaped separator in value of attribute '{name}' of record '{id}'"
                )));
            }
            attributes.push((name, value));
            stop = value_stop;
        }

        Ok(Self {
            id,
            attributes,
            marker,
        })
    }
}

fn escape_into(out: &mut String, field: &str) {
    for ch in field.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            ':' => out.push_str("\\:"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
}

fn write_optional(out: &mut String, field: Option<&str>) {
    match field {
        Some(text) => escape_into(out, text),
        None => out.push_str(ABSENT_MARKER),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stop {
    Delimiter,
    Separator,
    End,
}

/// Forward-only scanner over the fields of one record line.
struct FieldScanner<'a> {
    chars: std::str::Chars<'a>,
}

impl<'a> FieldScanner<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            chars: line.chars(),
        }
    }

    /// Reads up to the next unescaped delimiter or separator.
    ///
    /// Returns `None` for the absent marker.
    fn next_field(&mut self) -> CodecResult<(Option<String>, Stop)> {
        let mut text = String::new();
        let mut absent = false;

        loop {
            let Some(ch) = self.chars.next() else {
                return Ok((finish(text, absent), Stop::End));
            };
            match ch {
                RECORD_DELIMITER => return Ok((finish(text, absent), Stop::Delimiter)),
                KEY_VALUE_SEPARATOR => return Ok((finish(text, absent), Stop::Separator)),
                '\n' | '\r' => {
                    return Err(CodecError::malformed("unescaped line break in record"));
                }
                ESCAPE => {
                    if absent {
                        return Err(CodecError::malformed(
                            "absent marker must be the whole field",
                        ));
                    }
                    match self.chars.next() {
                        Some('\\') => text.push('\\'),
                        Some('t') => text.push('\t'),
                        Some(':') => text.push(':'),
                        Some('n') => text.push('\n'),
                        Some('r') => text.push('\r'),
                        Some('-') if text.is_empty() => absent = true,
                        Some(other) => {
                            return Err(CodecError::malformed(format!(
                                "unknown escape sequence '\\{other}' in record"
                            )))
                        }
                        None => {
                            return Err(CodecError::malformed("dangling escape at end of record"))
                        }
                    }
                }
                c => {
                    if absent {
                        return Err(CodecError::malformed(
                            "absent marker must be the whole field",
                        ));
                    }
                    text.push(c);
                }
            }
        }
    }
}

fn finish(text: String, absent: bool) -> Option<String> {
    if absent {
        None
    } else {
        Some(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_of(record: &Record) -> String {
        let mut out = String::new();
        record.write_line(&mut out).unwrap();
        out
    }

    fn parse(line: &str) -> CodecResult<Record> {
        Record::parse_line(line.strip_suffix('\n').unwrap_or(line))
    }

    #[test]
    fn simple_record_line() {
        let record = Record::new("T1").with_attribute("description", "buy milk");
        assert_eq!(line_of(&record), "T1\t\\-\tdescription:buy milk\n");
    }

    #[test]
    fn deletion_record_line() {
        let record = Record::deletion("T1");
        assert_eq!(line_of(&record), "T1\t\\-\n");
        assert!(parse("T1\t\\-").unwrap().is_deletion());
    }

    #[test]
    fn absent_and_empty_values_are_distinct() {
        let record = Record::new("T1")
            .with_attribute("project", "")
            .with_removed_attribute("due");
        let line = line_of(&record);
        assert_eq!(line, "T1\t\\-\tproject:\tdue:\\-\n");

        let parsed = parse(&line).unwrap();
        assert_eq!(parsed.attribute("project"), Some(Some("")));
        assert_eq!(parsed.attribute("due"), Some(None));
        assert_eq!(parsed, record);
    }

    #[test]
    fn reserved_characters_round_trip() {
        let record = Record::new("id:with\ttab")
            .with_marker("7")
            .with_attribute("a:b", "x\ty:z\\w\nline\rcr")
            .with_attribute("literal", "\\-");
        let line = line_of(&record);
        assert_eq!(parse(&line).unwrap(), record);
    }

    #[test]
    fn set_replaces_existing_attribute() {
        let mut record = Record::new("T1")
            .with_attribute("a", "1")
            .with_attribute("b", "2");
        record.set("a", None);
        assert_eq!(
            record.attributes(),
            &[("a".to_string(), None), ("b".to_string(), Some("2".to_string()))]
        );
    }

    #[test]
    fn rejects_unescaped_separator_in_value() {
        let err = parse("T1\t\\-\tdescription:a:b").unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
    }

    #[test]
    fn rejects_unknown_escape() {
        let err = parse("T1\t\\-\tdescription:a\\qb").unwrap_err();
        assert!(matches!(err, CodecError::Malformed { .. }));
    }

    #[test]
    fn rejects_dangling_escape() {
        assert!(parse("T1\t\\-\tdescription:abc\\").is_err());
    }

    #[test]
    fn rejects_raw_carriage_return() {
        assert!(parse("T1\t\\-\tdescription:a\rb").is_err());
    }

    #[test]
    fn rejects_missing_marker_field() {
        assert!(parse("T1").is_err());
    }

    #[test]
    fn rejects_attribute_without_separator() {
        assert!(parse("T1\t\\-\tdescription").is_err());
    }

    #[test]
    fn rejects_text_after_absent_marker() {
        assert!(parse("T1\t\\-x").is_err());
        assert!(parse("T1\t\\-\tdue:\\-\\n").is_err());
    }

    #[test]
    fn rejects_empty_identifier() {
        assert!(parse("\t\\-").is_err());
        let mut out = String::new();
        assert!(Record::new("").write_line(&mut out).is_err());
    }
}
