//! Entity repair for feed XML.
//!
//! Plenty of real feeds emit bare ampersands or HTML named entities inside
//! XML, which strict parsers reject. [`sanitize`] rewrites every `&` so the
//! document only contains references an XML parser understands.

use std::fmt::Write;

const XML_ENTITIES: &[&str] = &["amp", "lt", "gt", "quot", "apos"];

const HTML_ENTITIES: &[(&str, u32)] = &[
    ("nbsp", 160),
    ("ndash", 8211),
    ("mdash", 8212),
    ("hellip", 8230),
    ("copy", 169),
    ("reg", 174),
    ("trade", 8482),
    ("rsquo", 8217),
    ("lsquo", 8216),
    ("rdquo", 8221),
    ("ldquo", 8220),
];

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

enum Reference<'a> {
    /// `#123;` or `#x1F;`, with its byte length
    Numeric(usize),
    /// `name;`, without the semicolon
    Named(&'a str),
}

/// Repairs entity references so the text parses as XML.
///
/// - the five XML entities and numeric references pass through
/// - mapped HTML entities become numeric references (`&nbsp;` -> `&#160;`)
/// - any other `&` is escaped as `&amp;`
///
/// CDATA sections are copied verbatim.
pub fn sanitize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + raw.len() / 16);
    let mut rest = raw;

    while let Some(pos) = rest.find(|c| c == '&' || c == '<') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        if rest.starts_with(CDATA_OPEN) {
            let end = rest
                .find(CDATA_CLOSE)
                .map(|i| i + CDATA_CLOSE.len())
                .unwrap_or(rest.len());
            out.push_str(&rest[..end]);
            rest = &rest[end..];
            continue;
        }

        if let Some(after) = rest.strip_prefix('<') {
            out.push('<');
            rest = after;
            continue;
        }

        let after = &rest[1..];
        let consumed = repair_reference(after, &mut out);
        rest = &after[consumed..];
    }

    out.push_str(rest);
    out
}

/// Writes the repaired form of whatever follows an `&` and returns how many
/// bytes of `after` were consumed.
fn repair_reference(after: &str, out: &mut String) -> usize {
    match parse_reference(after) {
        Some(Reference::Numeric(len)) => {
            out.push('&');
            out.push_str(&after[..len]);
            len
        }
        Some(Reference::Named(name)) if XML_ENTITIES.contains(&name) => {
            out.push('&');
            out.push_str(name);
            out.push(';');
            name.len() + 1
        }
        Some(Reference::Named(name)) => match html_entity_code(name) {
            Some(code) => {
                let _ = write!(out, "&#{};", code);
                name.len() + 1
            }
            None => {
                out.push_str("&amp;");
                0
            }
        },
        None => {
            out.push_str("&amp;");
            0
        }
    }
}

fn parse_reference(after: &str) -> Option<Reference<'_>> {
    let bytes = after.as_bytes();

    if bytes.first() == Some(&b'#') {
        let hex = matches!(bytes.get(1), Some(b'x') | Some(b'X'));
        let start = if hex { 2 } else { 1 };
        let digits = bytes[start..]
            .iter()
            .take_while(|b| {
                if hex {
                    b.is_ascii_hexdigit()
                } else {
                    b.is_ascii_digit()
                }
            })
            .count();
        let end = start + digits;
        if digits > 0 && bytes.get(end) == Some(&b';') {
            return Some(Reference::Numeric(end + 1));
        }
        return None;
    }

    if !bytes.first()?.is_ascii_alphabetic() {
        return None;
    }
    let len = bytes.iter().take_while(|b| b.is_ascii_alphanumeric()).count();
    if bytes.get(len) == Some(&b';') {
        Some(Reference::Named(&after[..len]))
    } else {
        None
    }
}

fn html_entity_code(name: &str) -> Option<u32> {
    HTML_ENTITIES
        .iter()
        .find(|(entity, _)| *entity == name)
        .map(|(_, code)| *code)
}
