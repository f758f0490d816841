//! Tokenizer for formula expressions.

/// Source position, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

impl Position {
    pub const START: Position = Position { line: 1, column: 1 };
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// Identifier, uppercased.
    Ident(String),
    /// Numeric literal, raw text. Validated by the parser so a bad literal
    /// becomes a diagnostic instead of a lexing failure.
    Number(String),
    LParen,
    RParen,
    Comma,
    Colon,
    /// Any character outside the grammar.
    Unexpected(char),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Position,
}

impl Token {
    /// Short human description used in diagnostics.
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::Number(raw) => format!("number '{raw}'"),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::Unexpected(c) => format!("unexpected character '{c}'"),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_number_start(c: char) -> bool {
    c.is_ascii_digit() || c == '.' || c == '-' || c == '+'
}

/// Split `input` into tokens. Whitespace is skipped; nothing fails here.
///
/// Number tokens greedily take every alphanumeric, `.`, `_` and exponent
/// sign that follows, so `0.6.1` or `7abc` arrive at the parser as one
/// malformed literal rather than as a number followed by an identifier.
pub fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    let mut line = 1u32;
    let mut column = 1u32;

    while let Some(&c) = chars.peek() {
        let pos = Position { line, column };

        if c == '\n' {
            chars.next();
            line += 1;
            column = 1;
            continue;
        }
        if c.is_whitespace() {
            chars.next();
            column += 1;
            continue;
        }

        if is_ident_start(c) {
            let mut text = String::new();
            while let Some(&c) = chars.peek() {
                if !is_ident_continue(c) {
                    break;
                }
                text.push(c);
                chars.next();
                column += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Ident(text.to_uppercase()),
                pos,
            });
            continue;
        }

        if is_number_start(c) {
            let mut text = String::new();
            text.push(c);
            chars.next();
            column += 1;
            while let Some(&c) = chars.peek() {
                let exponent_sign =
                    (c == '-' || c == '+') && matches!(text.chars().last(), Some('e' | 'E'));
                if !(c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign) {
                    break;
                }
                text.push(c);
                chars.next();
                column += 1;
            }
            tokens.push(Token {
                kind: TokenKind::Number(text),
                pos,
            });
            continue;
        }

        let kind = match c {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            other => TokenKind::Unexpected(other),
        };
        chars.next();
        column += 1;
        tokens.push(Token { kind, pos });
    }

    tokens
}
