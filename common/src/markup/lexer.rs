// Markup tokenizer
// Single left-to-right scan; anything that is not a well-formed tag is text.

/// Opening tag with lowercased name and raw attribute values
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub self_closing: bool,
}

impl Tag {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Raw text, entities not decoded
    Text(String),
    Open(Tag),
    Close(String),
}

/// Split markup into tokens
///
/// Comments, doctype declarations and processing instructions are dropped.
/// CDATA sections become text. A `<` that does not start a well-formed tag is
/// kept as literal text.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut text = String::new();
    let mut pos = 0;

    while pos < input.len() {
        let rest = &input[pos..];
        let Some(lt) = rest.find('<') else {
            text.push_str(rest);
            break;
        };
        text.push_str(&rest[..lt]);
        pos += lt;
        let rest = &input[pos..];

        if let Some(after) = rest.strip_prefix("<!--") {
            pos += 4 + after.find("-->").map(|end| end + 3).unwrap_or(after.len());
            continue;
        }
        if let Some(after) = rest.strip_prefix("<![CDATA[") {
            let end = after.find("]]>").unwrap_or(after.len());
            text.push_str(&after[..end]);
            pos += 9 + (end + 3).min(after.len());
            continue;
        }
        if rest.starts_with("<!") || rest.starts_with("<?") {
            pos += rest.find('>').map(|end| end + 1).unwrap_or(rest.len());
            continue;
        }

        match parse_tag(rest) {
            Some((token, consumed)) => {
                if !text.is_empty() {
                    tokens.push(Token::Text(std::mem::take(&mut text)));
                }
                tokens.push(token);
                pos += consumed;
            }
            None => {
                text.push('<');
                pos += 1;
            }
        }
    }

    if !text.is_empty() {
        tokens.push(Token::Text(text));
    }
    tokens
}

/// Parse a tag at the start of `input` (which begins with `<`)
fn parse_tag(input: &str) -> Option<(Token, usize)> {
    let bytes = input.as_bytes();
    let mut pos = 1;
    let closing = bytes.get(pos) == Some(&b'/');
    if closing {
        pos += 1;
    }

    let name_len = tag_name_len(&bytes[pos..]);
    if name_len == 0 {
        return None;
    }
    let name = input[pos..pos + name_len].to_ascii_lowercase();
    pos += name_len;

    if closing {
        pos = skip_whitespace(bytes, pos);
        return (bytes.get(pos) == Some(&b'>')).then(|| (Token::Close(name), pos + 1));
    }

    let mut attrs = Vec::new();
    let mut self_closing = false;
    loop {
        pos = skip_whitespace(bytes, pos);
        match bytes.get(pos)? {
            b'>' => {
                pos += 1;
                break;
            }
            b'/' => {
                if bytes.get(pos + 1) == Some(&b'>') {
                    self_closing = true;
                    pos += 2;
                    break;
                }
                pos += 1;
            }
            _ => {
                let start = pos;
                while pos < bytes.len()
                    && !bytes[pos].is_ascii_whitespace()
                    && !matches!(bytes[pos], b'/' | b'>' | b'=')
                {
                    pos += 1;
                }
                let key = input[start..pos].to_ascii_lowercase();
                pos = skip_whitespace(bytes, pos);

                let mut value = String::new();
                if bytes.get(pos) == Some(&b'=') {
                    pos = skip_whitespace(bytes, pos + 1);
                    match bytes.get(pos)? {
                        quote @ (b'"' | b'\'') => {
                            let close = input[pos + 1..].find(*quote as char)?;
                            value = input[pos + 1..pos + 1 + close].to_string();
                            pos += close + 2;
                        }
                        _ => {
                            let start = pos;
                            while pos < bytes.len()
                                && !bytes[pos].is_ascii_whitespace()
                                && bytes[pos] != b'>'
                            {
                                pos += 1;
                            }
                            value = input[start..pos].to_string();
                        }
                    }
                }
                if !key.is_empty() {
                    attrs.push((key, value));
                }
            }
        }
    }

    Some((
        Token::Open(Tag {
            name,
            attrs,
            self_closing,
        }),
        pos,
    ))
}

fn tag_name_len(bytes: &[u8]) -> usize {
    match bytes.first() {
        Some(first) if first.is_ascii_alphabetic() => bytes
            .iter()
            .take_while(|b| b.is_ascii_alphanumeric() || **b == b'-')
            .count(),
        _ => 0,
    }
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}
