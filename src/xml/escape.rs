use std::borrow::Cow;

/// Resolve a predefined entity or character reference (without `&` and `;`).
pub(crate) fn resolve_entity(entity: &str) -> Option<char> {
    match entity {
        "apos" => return Some('\''),
        "quot" => return Some('"'),
        "lt" => return Some('<'),
        "gt" => return Some('>'),
        "amp" => return Some('&'),
        _ => {}
    }

    let code = if let Some(hex) = entity.strip_prefix("#x") {
        u32::from_str_radix(hex, 16).ok()?
    } else if let Some(dec) = entity.strip_prefix('#') {
        dec.parse::<u32>().ok()?
    } else {
        return None;
    };
    char::from_u32(code).filter(|&c| is_xml_char(c))
}

fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
}

/// Expand references in a raw attribute value and normalize its whitespace.
///
/// Only the predefined entities and character references are recognised;
/// anything else is an undeclared entity.
pub(crate) fn unescape_attribute(raw: &str) -> Result<Cow<'_, str>, String> {
    if !raw.contains(['&', '<', '\t', '\n', '\r']) {
        return Ok(Cow::Borrowed(raw));
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find(['&', '<', '\t', '\n', '\r']) {
        out.push_str(&rest[..pos]);
        let c = rest.as_bytes()[pos];
        match c {
            b'<' => return Err("'<' is not allowed in attribute values".to_string()),
            b'&' => {
                let after = &rest[pos + 1..];
                let end = after
                    .find(';')
                    .ok_or_else(|| "unterminated entity reference in attribute value".to_string())?;
                let name = &after[..end];
                let resolved = resolve_entity(name)
                    .ok_or_else(|| format!("reference to undeclared entity '&{name};'"))?;
                out.push(resolved);
                rest = &after[end + 1..];
                continue;
            }
            _ => out.push(' '),
        }
        rest = &rest[pos + 1..];
    }
    out.push_str(rest);
    Ok(Cow::Owned(out))
}

/// Escape text content for serialization.
pub fn escape_text(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Escape an attribute value for serialization inside double quotes.
pub fn escape_attribute(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"', '\n', '\t']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\n' => out.push_str("&#10;"),
            '\t' => out.push_str("&#9;"),
            c => out.push(c),
        }
    }
    Cow::Owned(out)
}
