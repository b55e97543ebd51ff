// Character references: escaping for the restricted renderer and decoding for plain text

use regex::Regex;
use std::sync::OnceLock;

static ENTITY_PATTERN: OnceLock<Regex> = OnceLock::new();

fn entity_pattern() -> &'static Regex {
    ENTITY_PATTERN.get_or_init(|| {
        Regex::new(r"^&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});")
            .expect("Invalid entity pattern")
    })
}

/// Named references the renderer understands natively
const PASSTHROUGH: [&str; 4] = ["lt", "gt", "amp", "quot"];

fn named(name: &str) -> Option<char> {
    let c = match name {
        "lt" => '<',
        "gt" => '>',
        "amp" => '&',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => '\u{a0}',
        "ensp" => '\u{2002}',
        "emsp" => '\u{2003}',
        "thinsp" => '\u{2009}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "sbquo" => '\u{201a}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        "bdquo" => '\u{201e}',
        "laquo" => '\u{ab}',
        "raquo" => '\u{bb}',
        "hellip" => '\u{2026}',
        "bull" => '\u{2022}',
        "middot" => '\u{b7}',
        "copy" => '\u{a9}',
        "reg" => '\u{ae}',
        "trade" => '\u{2122}',
        "deg" => '\u{b0}',
        "plusmn" => '\u{b1}',
        "times" => '\u{d7}',
        "divide" => '\u{f7}',
        "euro" => '\u{20ac}',
        "pound" => '\u{a3}',
        "yen" => '\u{a5}',
        "cent" => '\u{a2}',
        "sect" => '\u{a7}',
        "para" => '\u{b6}',
        "larr" => '\u{2190}',
        "rarr" => '\u{2192}',
        "uarr" => '\u{2191}',
        "darr" => '\u{2193}',
        _ => return None,
    };
    Some(c)
}

fn numeric(body: &str) -> Option<char> {
    let code = match body.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => body.parse::<u32>().ok()?,
    };
    char::from_u32(code).filter(|c| *c != '\0')
}

/// Match a character reference at the start of `s`; returns (body, byte length)
fn reference_at(s: &str) -> Option<(&str, usize)> {
    let m = entity_pattern().captures(s)?;
    let whole = m.get(0)?;
    let body = m.get(1)?;
    Some((body.as_str(), whole.end()))
}

/// Escape raw text for the renderer
///
/// `<` and `>` become references, a bare `&` becomes `&amp;`. Numeric
/// references and `&lt; &gt; &amp; &quot;` pass through, other known named
/// references are decoded, unknown ones are escaped.
pub fn escape_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(c) = rest.chars().next() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => {
                if let Some((body, len)) = reference_at(rest) {
                    let passthrough = match body.strip_prefix('#') {
                        Some(num) => numeric(num).is_some(),
                        None => PASSTHROUGH.contains(&body),
                    };
                    if passthrough {
                        out.push_str(&rest[..len]);
                        rest = &rest[len..];
                        continue;
                    }
                    if let Some(decoded) = named(body) {
                        out.push(decoded);
                        rest = &rest[len..];
                        continue;
                    }
                }
                out.push_str("&amp;");
            }
            other => out.push(other),
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Decode every known reference; unknown ones are left as written
pub fn decode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    while let Some(c) = rest.chars().next() {
        if c == '&' {
            if let Some((body, len)) = reference_at(rest) {
                let decoded = match body.strip_prefix('#') {
                    Some(num) => numeric(num),
                    None => named(body),
                };
                if let Some(decoded) = decoded {
                    out.push(decoded);
                    rest = &rest[len..];
                    continue;
                }
            }
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Escape a decoded attribute value for a double-quoted attribute
pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

/// Number of visible characters in renderer-escaped text
///
/// Each character reference counts as one character.
pub fn visible_chars(escaped: &str) -> usize {
    let mut count = 0;
    let mut rest = escaped;
    while let Some(c) = rest.chars().next() {
        count += 1;
        let step = if c == '&' {
            reference_at(rest).map(|(_, len)| len).unwrap_or(1)
        } else {
            c.len_utf8()
        };
        rest = &rest[step..];
    }
    count
}

/// Byte offset of the end of the first `n` visible characters
pub fn visible_prefix_end(escaped: &str, n: usize) -> usize {
    let mut rest = escaped;
    let mut offset = 0;
    for _ in 0..n {
        let Some(c) = rest.chars().next() else {
            break;
        };
        let step = if c == '&' {
            reference_at(rest).map(|(_, len)| len).unwrap_or(1)
        } else {
            c.len_utf8()
        };
        offset += step;
        rest = &rest[step..];
    }
    offset
}
