//! LDIF text format for entries
//!
//! ```text
//! dn: <dn>
//! <attr>: <value>
//! <attr>:: <base64 value>
//!  <continuation of the previous line>
//! ```
//!
//! Records are separated by blank lines; lines starting with `#` are
//! comments.

use crate::entry::Entry;
use crate::error::{Error, Result};
use crate::types::Dn;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// Parse every record in `text`
pub fn parse_entries(text: &str) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut record: Vec<(usize, String)> = Vec::new();

    for (line_no, line) in unfold(text) {
        if line.is_empty() {
            if !record.is_empty() {
                entries.push(parse_record(&record)?);
                record.clear();
            }
            continue;
        }
        record.push((line_no, line));
    }
    if !record.is_empty() {
        entries.push(parse_record(&record)?);
    }
    Ok(entries)
}

/// Parse exactly one record
pub fn parse_entry(text: &str) -> Result<Entry> {
    let mut entries = parse_entries(text)?;
    match entries.len() {
        1 => Ok(entries.remove(0)),
        n => Err(Error::ldif(0, format!("expected one entry, found {n}"))),
    }
}

/// Render an entry as one LDIF record (without the trailing blank line)
#[must_use]
pub fn write_entry(entry: &Entry) -> String {
    let mut out = String::new();
    put_line(&mut out, "dn", entry.dn().as_str().as_bytes());
    for attr in entry.attributes() {
        for value in &attr.values {
            put_line(&mut out, &attr.name, value);
        }
    }
    out
}

fn put_line(out: &mut String, name: &str, value: &[u8]) {
    match std::str::from_utf8(value) {
        Ok(s) if is_safe_string(s) => {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(s);
        }
        _ => {
            out.push_str(name);
            out.push_str(":: ");
            out.push_str(&STANDARD.encode(value));
        }
    }
    out.push('\n');
}

/// RFC 2849 SAFE-STRING: no leading space, colon or '<', no trailing space,
/// printable ASCII only
fn is_safe_string(s: &str) -> bool {
    if s.starts_with([' ', ':', '<']) || s.ends_with(' ') {
        return false;
    }
    s.bytes().all(|b| (0x20..0x7f).contains(&b))
}

/// Join continuation lines and drop comments, keeping the line number of
/// each logical line's start
fn unfold(text: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();
    let mut in_comment = false;

    for (idx, raw) in text.lines().enumerate() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        if let Some(cont) = raw.strip_prefix(' ') {
            if in_comment {
                continue;
            }
            if let Some((_, last)) = lines.last_mut() {
                last.push_str(cont);
                continue;
            }
        }
        in_comment = raw.starts_with('#');
        if !in_comment {
            lines.push((idx + 1, raw.to_string()));
        }
    }
    lines
}

fn parse_record(lines: &[(usize, String)]) -> Result<Entry> {
    let mut entry: Option<Entry> = None;

    for (line_no, line) in lines {
        let (name, value) = parse_line(*line_no, line)?;
        if name.eq_ignore_ascii_case("dn") {
            if entry.is_some() {
                return Err(Error::ldif(*line_no, "entry has multiple DNs"));
            }
            let raw = String::from_utf8(value)
                .map_err(|_| Error::ldif(*line_no, "DN is not valid UTF-8"))?;
            let dn = Dn::parse(&raw).map_err(|e| Error::ldif(*line_no, e.to_string()))?;
            entry = Some(Entry::new(dn));
            continue;
        }
        match entry.as_mut() {
            Some(e) => e.add_value(name, value),
            None => return Err(Error::ldif(*line_no, "attribute before dn line")),
        }
    }

    let first = lines.first().map_or(0, |(n, _)| *n);
    entry.ok_or_else(|| Error::ldif(first, "entry has no dn"))
}

fn parse_line(line_no: usize, line: &str) -> Result<(&str, Vec<u8>)> {
    let colon = line
        .find(':')
        .ok_or_else(|| Error::ldif(line_no, "missing ':'"))?;
    let name = line[..colon].trim();
    if name.is_empty() {
        return Err(Error::ldif(line_no, "empty attribute name"));
    }
    let rest = &line[colon + 1..];
    if let Some(encoded) = rest.strip_prefix(':') {
        let value = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::ldif(line_no, format!("bad base64 value: {e}")))?;
        Ok((name, value))
    } else {
        Ok((name, rest.trim_start().as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEOPLE: &str = "\
# organizational unit
dn: ou=people
objectClass: organizationalUnit
ou: people

dn: cn=alice,ou=people
objectClass: person
cn: Alice
description: a long
  wrapped value
userPassword:: c2VjcmV0
";

    #[test]
    fn test_parse_entries() {
        let entries = parse_entries(PEOPLE).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].dn().normalized(), "ou=people");

        let alice = &entries[1];
        assert_eq!(alice.dn().normalized(), "cn=alice,ou=people");
        assert_eq!(alice.values("description"), &[b"a long wrapped value".to_vec()]);
        assert_eq!(alice.values("userPassword"), &[b"secret".to_vec()]);
    }

    #[test]
    fn test_write_entry_encodes_unsafe_values() {
        let entry = parse_entry("dn: cn=bob\ncn: Bob\ndescription:: IGxlYWRpbmc=\n").unwrap();
        let text = write_entry(&entry);
        assert_eq!(text, "dn: cn=bob\ncn: Bob\ndescription:: IGxlYWRpbmc=\n");
        assert_eq!(parse_entry(&text).unwrap(), entry);
    }

    #[test]
    fn test_multiple_dns_rejected() {
        let err = parse_entry("dn: cn=a\ndn: cn=b\n").unwrap_err();
        assert!(err.to_string().contains("multiple DNs"));
    }

    #[test]
    fn test_missing_dn_rejected() {
        assert!(parse_entry("cn: orphan\n").is_err());
    }

    #[test]
    fn test_invalid_dn_reports_line() {
        let err = parse_entry("# header\ndn: people\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_entry_requires_single_record() {
        assert!(parse_entry(PEOPLE).is_err());
        assert!(parse_entry("").is_err());
    }
}
