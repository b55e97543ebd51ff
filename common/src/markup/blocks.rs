// Block structure pass
// Rewrites block elements into a newline grammar; inline tags pass through untouched.

use super::lexer::{Tag, Token};

/// Indent unit per nesting level beyond the first (two no-break spaces)
pub const LIST_INDENT: &str = "\u{a0}\u{a0}";
pub const BULLET: &str = "\u{2022} ";

const CONTAINERS: [&str; 14] = [
    "div",
    "section",
    "article",
    "header",
    "footer",
    "blockquote",
    "nav",
    "aside",
    "main",
    "figure",
    "figcaption",
    "table",
    "tr",
    "hr",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Break,
    Paragraph,
    Heading,
    Container,
    List { ordered: bool },
    Item,
}

fn classify(name: &str) -> Option<Block> {
    match name {
        "br" => Some(Block::Break),
        "p" => Some(Block::Paragraph),
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => Some(Block::Heading),
        "ul" => Some(Block::List { ordered: false }),
        "ol" => Some(Block::List { ordered: true }),
        "li" => Some(Block::Item),
        other if CONTAINERS.contains(&other) => Some(Block::Container),
        _ => None,
    }
}

fn is_block_token(token: &Token) -> bool {
    match token {
        Token::Open(tag) => classify(&tag.name).is_some(),
        Token::Close(name) => classify(name).is_some(),
        Token::Text(_) => false,
    }
}

fn is_blank(text: &str) -> bool {
    text.chars().all(|c| matches!(c, ' ' | '\t' | '\n' | '\r'))
}

/// Boundary strength requested between blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Boundary {
    None,
    Line,
    Blank,
}

struct Flattener {
    out: Vec<Token>,
    pending: Boundary,
    /// One counter per open list; `None` for unordered lists
    lists: Vec<Option<u32>>,
    /// A list marker was just written and no content followed yet
    at_item_start: bool,
}

impl Flattener {
    fn request(&mut self, boundary: Boundary) {
        if self.at_item_start {
            return;
        }
        self.pending = self.pending.max(boundary);
    }

    /// Emit the pending boundary ahead of any inline openers written since the
    /// last content, so the break never lands inside those tags
    fn flush(&mut self) {
        let breaks = match self.pending {
            Boundary::None => "",
            Boundary::Line => "\n",
            Boundary::Blank => "\n\n",
        };
        self.pending = Boundary::None;
        if breaks.is_empty() {
            return;
        }

        let openers = self
            .out
            .iter()
            .rev()
            .take_while(|token| matches!(token, Token::Open(_)))
            .count();
        let at = self.out.len() - openers;
        if at == 0 {
            return;
        }
        if let Token::Text(text) = &mut self.out[at - 1] {
            text.push_str(breaks);
            return;
        }
        self.out.insert(at, Token::Text(breaks.to_string()));
    }

    fn push_text(&mut self, text: &str) {
        if let Some(Token::Text(last)) = self.out.last_mut() {
            last.push_str(text);
        } else {
            self.out.push(Token::Text(text.to_string()));
        }
    }

    fn paragraph_boundary(&self) -> Boundary {
        if self.lists.is_empty() {
            Boundary::Blank
        } else {
            Boundary::Line
        }
    }

    fn open(&mut self, tag: Tag, block: Block) {
        match block {
            Block::Break => {
                self.flush();
                self.push_text("\n");
            }
            Block::Paragraph => {
                let boundary = self.paragraph_boundary();
                self.request(boundary);
            }
            Block::Heading => {
                self.request(Boundary::Blank);
                self.flush();
                self.out.push(Token::Open(Tag {
                    name: "b".to_string(),
                    attrs: Vec::new(),
                    self_closing: false,
                }));
            }
            Block::Container => self.request(Boundary::Line),
            Block::List { ordered } => {
                self.request(Boundary::Line);
                if !tag.self_closing {
                    self.lists.push(ordered.then_some(0));
                }
            }
            Block::Item => {
                self.at_item_start = false;
                self.request(Boundary::Line);
                self.flush();
                let depth = self.lists.len().max(1);
                let marker = match self.lists.last_mut() {
                    Some(Some(counter)) => {
                        *counter += 1;
                        format!("{}. ", counter)
                    }
                    _ => BULLET.to_string(),
                };
                let indent = LIST_INDENT.repeat(depth - 1);
                self.push_text(&format!("{}{}", indent, marker));
                self.at_item_start = true;
            }
        }
    }

    fn close(&mut self, block: Block) {
        match block {
            Block::Break => {}
            Block::Paragraph => {
                let boundary = self.paragraph_boundary();
                self.request(boundary);
            }
            Block::Heading => {
                self.out.push(Token::Close("b".to_string()));
                self.request(Boundary::Blank);
            }
            Block::Container | Block::Item => self.request(Boundary::Line),
            Block::List { .. } => {
                self.lists.pop();
                self.request(Boundary::Line);
            }
        }
    }
}

/// Replace block elements with newlines and list markers
///
/// Whitespace-only text next to a block tag is dropped, so source
/// indentation between blocks never turns into extra lines.
pub fn flatten(tokens: Vec<Token>) -> Vec<Token> {
    let block_at: Vec<bool> = tokens.iter().map(is_block_token).collect();
    let mut flattener = Flattener {
        out: Vec::with_capacity(tokens.len()),
        pending: Boundary::None,
        lists: Vec::new(),
        at_item_start: false,
    };

    for (index, token) in tokens.into_iter().enumerate() {
        match token {
            Token::Text(text) => {
                let next_is_block = block_at.get(index + 1).copied().unwrap_or(false);
                let prev_is_block = index > 0 && block_at[index - 1];
                if is_blank(&text) && (next_is_block || prev_is_block) {
                    continue;
                }
                flattener.flush();
                flattener.push_text(&text);
                flattener.at_item_start = false;
            }
            Token::Open(tag) => match classify(&tag.name) {
                Some(block) => flattener.open(tag, block),
                None => {
                    flattener.flush();
                    flattener.out.push(Token::Open(tag));
                    flattener.at_item_start = false;
                }
            },
            Token::Close(name) => match classify(&name) {
                Some(block) => flattener.close(block),
                None => flattener.out.push(Token::Close(name)),
            },
        }
    }

    flattener.out
}
