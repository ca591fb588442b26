//! Message header as seen by IMAP: an ordered list of fields that keeps the
//! raw (possibly folded) text of each field, so that `BODY[HEADER]` and
//! `BODY[HEADER.FIELDS (..)]` can be served byte for byte.

use anyhow::{anyhow, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    name: String,
    value: String,
    raw: String,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        let (name, value) = (name.into(), value.into());
        let raw = format!("{}: {}\r\n", name, value);
        Self { name, value, raw }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unfolded value, leading and trailing whitespace removed.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The field as it was received, continuation lines included, CRLF
    /// terminated.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    fields: Vec<HeaderField>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the header section of a message. Parsing stops at the first
    /// empty line; lines that are neither a field nor a continuation are
    /// kept in the raw text of the previous field.
    pub fn parse(text: &str) -> Self {
        let mut fields: Vec<HeaderField> = vec![];
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if line.is_empty() {
                break;
            }

            let folded = line.starts_with(' ') || line.starts_with('\t');
            if !folded {
                if let Some((name, value)) = line.split_once(':') {
                    if is_field_name(name) {
                        fields.push(HeaderField {
                            name: name.to_string(),
                            value: value.trim().to_string(),
                            raw: format!("{}\r\n", line),
                        });
                        continue;
                    }
                }
            }

            match fields.last_mut() {
                Some(field) => {
                    if folded {
                        field.value.push(' ');
                        field.value.push_str(line.trim());
                    }
                    field.raw.push_str(line);
                    field.raw.push_str("\r\n");
                }
                None => tracing::debug!(line = %line, "dropping header garbage"),
            }
        }
        Self { fields }
    }

    pub fn push(&mut self, field: HeaderField) {
        self.fields.push(field);
    }

    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    /// First value of the field `name`, compared case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    /// Full header section, blank separator line included.
    pub fn raw(&self) -> String {
        let mut raw = self.fields.iter().map(|f| f.raw.as_str()).collect::<String>();
        raw.push_str("\r\n");
        raw
    }

    /// Render only the fields named in `names` (or all the others when
    /// `exclude` is set), followed by the blank separator line.
    pub fn select(&self, names: &[String], exclude: bool) -> String {
        let mut raw = self
            .fields
            .iter()
            .filter(|f| names.iter().any(|n| n.eq_ignore_ascii_case(&f.name)) != exclude)
            .map(|f| f.raw.as_str())
            .collect::<String>();
        raw.push_str("\r\n");
        raw
    }
}

/// Split a RFC 5322 message into its header and its body text.
pub fn parse_message(bytes: &[u8]) -> Result<(Header, String)> {
    let msg = eml_codec::parse_message(bytes)
        .or(Err(anyhow!("Could not parse e-mail message")))?
        .1;
    let header = Header::parse(&String::from_utf8_lossy(msg.raw_headers));
    let body = String::from_utf8_lossy(msg.raw_body).into_owned();
    Ok((header, body))
}

fn is_field_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|c| c > 0x20 && c < 0x7f && c != b':')
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "From: Bob Robert <bob@example.tld>\r\n\
To: Alice Malice <alice@example.tld>\r\n\
Subject: a subject\r\n    on two lines\r\n\
Bad entry\r\n\
X-Unknown: something\r\n\
\r\n\
Subject: this is the body\r\n";

    #[test]
    fn test_parse_unfolds_values() {
        let header = Header::parse(HEADER);
        let names = header.fields().iter().map(|f| f.name()).collect::<Vec<_>>();
        assert_eq!(names, vec!["From", "To", "Subject", "X-Unknown"]);
        assert_eq!(header.get("subject"), Some("a subject on two lines"));
        assert_eq!(header.get("cc"), None);
    }

    #[test]
    fn test_raw_keeps_folding() {
        let header = Header::parse(HEADER);
        let raw = header.raw();
        assert!(raw.contains("Subject: a subject\r\n    on two lines\r\nBad entry\r\n"));
        assert!(raw.ends_with("X-Unknown: something\r\n\r\n"));
    }

    #[test]
    fn test_select_fields() {
        let header = Header::parse(HEADER);
        let only = header.select(&["FROM".into(), "x-unknown".into()], false);
        assert_eq!(
            only,
            "From: Bob Robert <bob@example.tld>\r\nX-Unknown: something\r\n\r\n"
        );

        let not = header.select(&["subject".into(), "from".into(), "x-unknown".into()], true);
        assert_eq!(not, "To: Alice Malice <alice@example.tld>\r\n\r\n");
    }

    #[test]
    fn test_lf_only_lines() {
        let header = Header::parse("A: 1\nB: 2\n\nbody");
        assert_eq!(header.raw(), "A: 1\r\nB: 2\r\n\r\n");
    }

    #[test]
    fn test_parse_message() {
        let (header, body) =
            parse_message(b"Subject: hello\r\nFrom: a@b.c\r\n\r\nworld\r\n").unwrap();
        assert_eq!(header.get("Subject"), Some("hello"));
        assert!(body.starts_with("world"));
    }
}
