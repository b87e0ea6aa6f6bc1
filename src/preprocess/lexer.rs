//! Tokenizer for C source text, tracking the physical lines each token spans.

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TokenKind {
    Identifier,
    Number,
    String,
    Char,
    Punct,
    Other,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Spelling with line splices removed.
    pub text: String,
    /// Physical line of the first character, 1-based.
    pub line: usize,
    /// Physical line of the last character.
    pub end_line: usize,
    /// First token of a logical line.
    pub starts_line: bool,
}

impl Token {
    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }
}

const PUNCTUATORS: [&str; 24] = [
    "...", "<<=", ">>=", "->", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||", "*=", "/=", "%=",
    "+=", "-=", "&=", "^=", "|=", "##", "::",
];

struct Lexer {
    /// Characters after splicing, each with its physical line.
    chars: Vec<(char, usize)>,
    pos: usize,
}

impl Lexer {
    fn new(text: &str) -> Self {
        let mut chars = Vec::with_capacity(text.len());
        let mut line = 1;
        let mut iter = text.chars().peekable();
        while let Some(c) = iter.next() {
            match c {
                '\\' if iter.peek() == Some(&'\n') => {
                    iter.next();
                    line += 1;
                }
                '\\' if iter.peek() == Some(&'\r') => {
                    iter.next();
                    if iter.peek() == Some(&'\n') {
                        iter.next();
                    }
                    line += 1;
                }
                '\r' => {}
                '\n' => {
                    chars.push(('\n', line));
                    line += 1;
                }
                _ => chars.push((c, line)),
            }
        }
        Self { chars, pos: 0 }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|&(c, _)| c)
    }

    fn line(&self) -> usize {
        self.chars.get(self.pos).map(|&(_, l)| l).unwrap_or(0)
    }

    /// Skip whitespace and comments. Returns whether a line break outside a comment was seen.
    fn skip_blank(&mut self) -> bool {
        let mut newline = false;
        while let Some(c) = self.peek(0) {
            match c {
                '\n' => {
                    newline = true;
                    self.pos += 1;
                }
                c if c.is_whitespace() => self.pos += 1,
                '/' if self.peek(1) == Some('/') => {
                    while self.peek(0).is_some_and(|c| c != '\n') {
                        self.pos += 1;
                    }
                }
                '/' if self.peek(1) == Some('*') => {
                    self.pos += 2;
                    while let Some(c) = self.peek(0) {
                        if c == '*' && self.peek(1) == Some('/') {
                            self.pos += 2;
                            break;
                        }
                        self.pos += 1;
                    }
                    if self.peek(0).is_none() {
                        break;
                    }
                }
                _ => break,
            }
        }
        newline
    }

    fn next_token(&mut self, starts_line: bool) -> Option<Token> {
        let c = self.peek(0)?;
        let start = self.pos;
        let line = self.line();

        let kind = if c.is_ascii_alphabetic() || c == '_' || c == '$' {
            while self.peek(0).is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$') {
                self.pos += 1;
            }
            TokenKind::Identifier
        } else if c.is_ascii_digit() || (c == '.' && self.peek(1).is_some_and(|d| d.is_ascii_digit())) {
            self.pos += 1;
            while let Some(c) = self.peek(0) {
                if matches!(c, 'e' | 'E' | 'p' | 'P') && matches!(self.peek(1), Some('+') | Some('-')) {
                    self.pos += 2;
                } else if c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '\'' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            TokenKind::Number
        } else if c == '"' || c == '\'' {
            self.pos += 1;
            while let Some(d) = self.peek(0) {
                match d {
                    '\\' => self.pos += 2,
                    '\n' => break,
                    _ if d == c => {
                        self.pos += 1;
                        break;
                    }
                    _ => self.pos += 1,
                }
            }
            self.pos = self.pos.min(self.chars.len());
            if c == '"' {
                TokenKind::String
            } else {
                TokenKind::Char
            }
        } else if let Some(p) = PUNCTUATORS.iter().find(|p| self.looking_at(p)) {
            self.pos += p.chars().count();
            TokenKind::Punct
        } else {
            self.pos += 1;
            if c.is_ascii_punctuation() {
                TokenKind::Punct
            } else {
                TokenKind::Other
            }
        };

        let text: String = self.chars[start..self.pos].iter().map(|&(c, _)| c).collect();
        let end_line = self.chars[self.pos - 1].1;
        Some(Token {
            kind,
            text,
            line,
            end_line,
            starts_line,
        })
    }

    fn looking_at(&self, s: &str) -> bool {
        s.chars().enumerate().all(|(i, c)| self.peek(i) == Some(c))
    }
}

/// Split `text` into preprocessing tokens. Comments and whitespace are dropped.
pub fn tokenize(text: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(text);
    let mut tokens = Vec::new();
    let mut starts_line = true;
    loop {
        if lexer.skip_blank() {
            starts_line = true;
        }
        match lexer.next_token(starts_line) {
            Some(token) => tokens.push(token),
            None => return tokens,
        }
        starts_line = false;
    }
}

/// Group tokens into logical lines.
pub fn logical_lines(tokens: &[Token]) -> Vec<&[Token]> {
    let mut lines = Vec::new();
    let mut start = 0;
    for i in 1..=tokens.len() {
        if i == tokens.len() || tokens[i].starts_line {
            if start < i {
                lines.push(&tokens[start..i]);
            }
            start = i;
        }
    }
    lines
}

/// Spelling of `tokens`, separated by single spaces.
pub fn spell(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join(" ")
}
