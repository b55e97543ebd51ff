// Tag balancer
// Push-down stack over canonical inline tags; output is always LIFO-closed.

use super::entities::{decode, escape_attr, escape_text};
use super::lexer::{Tag, Token};
use std::fmt::Write as _;

/// Canonical inline tags the restricted renderer accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineTag {
    Bold,
    Italic,
    Underline,
    Strike,
    Code,
    Pre,
    Link,
}

impl InlineTag {
    /// Fold a tag name (and its synonyms) into the canonical tag
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "b" | "strong" => Some(InlineTag::Bold),
            "i" | "em" => Some(InlineTag::Italic),
            "u" | "ins" => Some(InlineTag::Underline),
            "s" | "strike" | "del" => Some(InlineTag::Strike),
            "code" => Some(InlineTag::Code),
            "pre" => Some(InlineTag::Pre),
            "a" => Some(InlineTag::Link),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InlineTag::Bold => "b",
            InlineTag::Italic => "i",
            InlineTag::Underline => "u",
            InlineTag::Strike => "s",
            InlineTag::Code => "code",
            InlineTag::Pre => "pre",
            InlineTag::Link => "a",
        }
    }
}

const LINK_SCHEMES: [&str; 4] = ["http://", "https://", "tg://", "mailto:"];

/// Normalized link target, or `None` when the link must not be emitted
pub fn link_target(tag: &Tag) -> Option<String> {
    let href = decode(tag.attr("href")?.trim());
    let lower = href.to_ascii_lowercase();
    if !LINK_SCHEMES
        .iter()
        .any(|scheme| lower.starts_with(scheme) && lower.len() > scheme.len())
    {
        return None;
    }
    let mut normalized = String::with_capacity(href.len());
    for c in href.chars() {
        if c.is_whitespace() {
            normalized.push_str("%20");
        } else {
            normalized.push(c);
        }
    }
    Some(normalized)
}

struct Frame {
    tag: InlineTag,
    /// False when the opener was suppressed; its closer is then consumed silently
    emitted: bool,
}

/// Balance inline tokens into well-formed markup
pub fn balance(tokens: &[Token]) -> String {
    let mut out = String::new();
    let mut stack: Vec<Frame> = Vec::new();

    for token in tokens {
        match token {
            Token::Text(text) => out.push_str(&escape_text(text)),
            Token::Open(tag) => {
                if tag.self_closing {
                    continue;
                }
                let Some(inline) = InlineTag::from_name(&tag.name) else {
                    continue;
                };
                let href = match inline {
                    InlineTag::Link => link_target(tag),
                    _ => None,
                };
                let allowed = opener_allowed(&stack, inline)
                    && (inline != InlineTag::Link || href.is_some());

                if allowed {
                    match href {
                        Some(href) => {
                            let _ = write!(out, "<a href=\"{}\">", escape_attr(&href));
                        }
                        None => {
                            let _ = write!(out, "<{}>", inline.name());
                        }
                    }
                }
                stack.push(Frame {
                    tag: inline,
                    emitted: allowed,
                });
            }
            Token::Close(name) => {
                let Some(inline) = InlineTag::from_name(name) else {
                    continue;
                };
                if stack.last().map(|frame| frame.tag) != Some(inline) {
                    continue;
                }
                if let Some(frame) = stack.pop() {
                    if frame.emitted {
                        let _ = write!(out, "</{}>", inline.name());
                    }
                }
            }
        }
    }

    while let Some(frame) = stack.pop() {
        if frame.emitted {
            let _ = write!(out, "</{}>", frame.tag.name());
        }
    }
    out
}

/// No duplicate nesting, and nothing opens inside code or pre except code in pre
fn opener_allowed(stack: &[Frame], tag: InlineTag) -> bool {
    let open = |wanted: InlineTag| stack.iter().any(|f| f.emitted && f.tag == wanted);
    if open(tag) {
        return false;
    }
    if open(InlineTag::Code) {
        return false;
    }
    if open(InlineTag::Pre) {
        return tag == InlineTag::Code;
    }
    true
}
