// Markup sanitizer for renderers that accept a small inline tag subset
//
// sanitize = tokenize -> block pass -> balancer -> whitespace pass.
// The output only contains b, i, u, s, code, pre and a[href], is always
// balanced, and sanitizing it again changes nothing.

pub mod balancer;
pub mod blocks;
pub mod entities;
pub mod lexer;

pub use balancer::InlineTag;
pub use lexer::{tokenize, Tag, Token};

/// Ellipsis appended to truncated text
pub const ELLIPSIS: &str = "...";

/// Sanitize arbitrary rich text into balanced markup over the inline whitelist
pub fn sanitize(input: &str) -> String {
    let tokens = blocks::flatten(lexer::tokenize(input));
    let balanced = balancer::balance(&tokens);
    normalize_whitespace(&balanced)
}

/// Normalize line endings and collapse redundant whitespace
///
/// Runs of spaces and tabs collapse to one space, every line is trimmed,
/// consecutive blank lines collapse to one and blank lines at both ends go.
pub fn normalize_whitespace(input: &str) -> String {
    let unified = input.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<String> = Vec::new();
    let mut previous_blank = true;

    for line in unified.split('\n') {
        let mut collapsed = String::with_capacity(line.len());
        let mut in_space = false;
        for c in line.chars() {
            if c == ' ' || c == '\t' {
                in_space = true;
                continue;
            }
            if in_space && !collapsed.is_empty() {
                collapsed.push(' ');
            }
            in_space = false;
            collapsed.push(c);
        }

        let blank = collapsed.is_empty();
        if blank && previous_blank {
            continue;
        }
        previous_blank = blank;
        lines.push(collapsed);
    }

    while lines.last().map(|l| l.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n")
}

/// Visible length of sanitized markup: tags excluded, each entity counts once
pub fn visible_len(markup: &str) -> usize {
    lexer::tokenize(markup)
        .iter()
        .map(|token| match token {
            Token::Text(text) => entities::visible_chars(text),
            _ => 0,
        })
        .sum()
}

/// Result of fitting text into a length limit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncated {
    pub text: String,
    pub truncated: bool,
}

impl Truncated {
    fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            truncated: false,
        }
    }
}

fn ellipsis_only(limit: usize) -> Truncated {
    Truncated {
        text: ELLIPSIS.chars().take(limit).collect(),
        truncated: true,
    }
}

/// Fit sanitized markup into `limit` visible characters
///
/// Keeps the first `limit - 3` visible characters, trims trailing
/// whitespace, appends `...` and re-balances the open tags.
pub fn truncate(markup: &str, limit: usize) -> Truncated {
    if visible_len(markup) <= limit {
        return Truncated::unchanged(markup);
    }
    let keep = limit.saturating_sub(ELLIPSIS.len());
    if keep == 0 {
        return ellipsis_only(limit);
    }

    let mut prefix = String::with_capacity(markup.len());
    let mut remaining = keep;
    for token in lexer::tokenize(markup) {
        if remaining == 0 {
            break;
        }
        match token {
            Token::Text(text) => {
                let visible = entities::visible_chars(&text);
                if visible <= remaining {
                    prefix.push_str(&text);
                    remaining -= visible;
                } else {
                    let end = entities::visible_prefix_end(&text, remaining);
                    prefix.push_str(&text[..end]);
                    remaining = 0;
                }
            }
            Token::Open(tag) => {
                if let Some(inline) = InlineTag::from_name(&tag.name) {
                    match balancer::link_target(&tag) {
                        Some(href) if inline == InlineTag::Link => {
                            prefix.push_str(&format!(
                                "<a href=\"{}\">",
                                entities::escape_attr(&href)
                            ));
                        }
                        _ => prefix.push_str(&format!("<{}>", inline.name())),
                    }
                }
            }
            Token::Close(name) => {
                prefix.push_str(&format!("</{}>", name));
            }
        }
    }

    let trimmed = prefix.trim_end();
    Truncated {
        text: sanitize(&format!("{}{}", trimmed, ELLIPSIS)),
        truncated: true,
    }
}

/// Fit plain text into `limit` characters with the same ellipsis policy
pub fn truncate_plain(text: &str, limit: usize) -> Truncated {
    if text.chars().count() <= limit {
        return Truncated::unchanged(text);
    }
    let keep = limit.saturating_sub(ELLIPSIS.len());
    if keep == 0 {
        return ellipsis_only(limit);
    }
    let prefix: String = text.chars().take(keep).collect();
    Truncated {
        text: format!("{}{}", prefix.trim_end(), ELLIPSIS),
        truncated: true,
    }
}

/// Render sanitized markup as plain text
///
/// Tags are removed, entities decoded, and links rendered as `text (url)`
/// unless the text already is the url.
pub fn to_plain_text(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut links: Vec<Option<(String, usize)>> = Vec::new();

    for token in lexer::tokenize(markup) {
        match token {
            Token::Text(text) => out.push_str(&entities::decode(&text)),
            Token::Open(tag) if tag.name == "a" && !tag.self_closing => {
                let target = balancer::link_target(&tag).map(|href| (href, out.len()));
                links.push(target);
            }
            Token::Close(name) if name == "a" => {
                if let Some(Some((href, start))) = links.pop() {
                    let label = out[start..].trim().to_string();
                    if label != href {
                        if label.is_empty() {
                            out.push_str(&href);
                        } else {
                            out.push_str(&format!(" ({})", href));
                        }
                    }
                }
            }
            _ => {}
        }
    }
    out
}
