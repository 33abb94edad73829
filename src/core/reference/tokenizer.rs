//! Formula tokenizer for reference extraction
//!
//! Converts spreadsheet formula text like `=SUM('Cash Flow'!$B$2:$B$9) * Rate`
//! into a flat token stream. The tokenizer never aborts: characters it cannot
//! place are reported as [`TokenizeError`]s and skipped, so the parser can still
//! recover every reference that is readable.

use std::iter::Peekable;
use std::str::Chars;

/// A token in a formula expression
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// A numeric literal (e.g., 123, 45.67, 1.5e10)
    Number(f64),
    /// A double-quoted string literal
    Text(String),
    /// Bare word: cell coordinate, column/row part, function or defined name
    Word(String),
    /// Sheet qualifier including the `!` (`Sheet2!` or `'My Sheet'!`), unquoted
    SheetPrefix(String),
    /// Error literal such as `#REF!` or `#N/A`
    ErrorLiteral(String),
    /// Bracketed segment: structured reference selector or external workbook index
    Bracketed(String),
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
    Comma,
    Semicolon,
    Colon,
    /// Arithmetic, comparison, concatenation and percent operators
    Operator(String),
}

/// Error during tokenization
#[derive(Debug, Clone, PartialEq)]
pub struct TokenizeError {
    pub message: String,
    pub position: usize,
}

impl TokenizeError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl std::fmt::Display for TokenizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Tokenize error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for TokenizeError {}

/// Tokenizer for formula expressions
pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    position: usize,
    errors: Vec<TokenizeError>,
}

impl<'a> Tokenizer<'a> {
    /// Create a new tokenizer for the given formula string
    pub fn new(formula: &'a str) -> Self {
        let formula = formula.trim_start();
        let formula = formula.strip_prefix('=').unwrap_or(formula);
        Self {
            chars: formula.chars().peekable(),
            position: 0,
            errors: Vec::new(),
        }
    }

    /// Tokenize the entire formula. Returns the readable tokens and any errors met.
    pub fn tokenize(mut self) -> (Vec<Token>, Vec<TokenizeError>) {
        let mut tokens = Vec::new();

        while let Some(token) = self.next_token() {
            if let Some(token) = token {
                tokens.push(token);
            }
        }

        (tokens, self.errors)
    }

    /// Next token. `None` at end of input, `Some(None)` when a character was skipped.
    fn next_token(&mut self) -> Option<Option<Token>> {
        self.skip_whitespace();

        let c = self.peek()?;
        let token = match c {
            '"' => self.read_string(),
            '\'' => self.read_quoted_sheet(),
            '#' => Some(self.read_error_literal()),
            '[' => self.read_bracketed(),

            '(' => self.single(Token::OpenParen),
            ')' => self.single(Token::CloseParen),
            '{' => self.single(Token::OpenBrace),
            '}' => self.single(Token::CloseBrace),
            ',' => self.single(Token::Comma),
            ';' => self.single(Token::Semicolon),
            ':' => self.single(Token::Colon),

            '+' | '-' | '*' | '/' | '^' | '&' | '%' | '=' => {
                self.advance();
                Some(Token::Operator(c.to_string()))
            }
            '<' => Some(self.read_less_than_operator()),
            '>' => Some(self.read_greater_than_operator()),

            // Implicit intersection marker carries no reference information
            '@' => {
                self.advance();
                None
            }

            c if c.is_ascii_digit() || c == '.' => self.read_number(),
            c if c.is_alphabetic() || c == '_' || c == '$' || c == '\\' => {
                Some(self.read_word())
            }

            c => {
                let position = self.position;
                self.advance();
                self.errors.push(TokenizeError::new(
                    format!("Unexpected character: '{}'", c),
                    position,
                ));
                None
            }
        };
        Some(token)
    }

    fn single(&mut self, token: Token) -> Option<Token> {
        self.advance();
        Some(token)
    }

    /// Peek at the next character without consuming it
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    /// Advance to the next character
    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c.is_some() {
            self.position += 1;
        }
        c
    }

    /// Skip whitespace characters
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Read characters up to a closing quote, handling doubled-quote escapes.
    /// Returns `None` when the input ends first.
    fn read_quoted(&mut self, quote: char) -> Option<String> {
        self.advance(); // consume opening quote
        let mut value = String::new();

        loop {
            match self.advance() {
                None => return None,
                Some(c) if c == quote => {
                    if self.peek() == Some(quote) {
                        value.push(quote);
                        self.advance();
                    } else {
                        return Some(value);
                    }
                }
                Some(c) => value.push(c),
            }
        }
    }

    /// Read a string literal
    fn read_string(&mut self) -> Option<Token> {
        let start_pos = self.position;
        match self.read_quoted('"') {
            Some(value) => Some(Token::Text(value)),
            None => {
                self.errors
                    .push(TokenizeError::new("Unterminated string literal", start_pos));
                None
            }
        }
    }

    /// Read a quoted sheet name; must be followed by `!`
    fn read_quoted_sheet(&mut self) -> Option<Token> {
        let start_pos = self.position;
        let Some(name) = self.read_quoted('\'') else {
            self.errors
                .push(TokenizeError::new("Unterminated quoted sheet name", start_pos));
            return None;
        };
        if self.peek() == Some('!') {
            self.advance();
            Some(Token::SheetPrefix(name))
        } else {
            self.errors.push(TokenizeError::new(
                format!("Quoted name '{}' is not followed by '!'", name),
                start_pos,
            ));
            None
        }
    }

    /// Read an error literal (`#REF!`, `#DIV/0!`, `#N/A`, `#NAME?`)
    fn read_error_literal(&mut self) -> Token {
        let mut literal = String::new();
        literal.push(self.advance().unwrap_or('#'));

        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '/' {
                literal.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if let Some(c @ ('!' | '?')) = self.peek() {
            literal.push(c);
            self.advance();
        }

        Token::ErrorLiteral(literal.to_ascii_uppercase())
    }

    /// Read a bracketed segment, keeping nested brackets of structured references
    fn read_bracketed(&mut self) -> Option<Token> {
        let start_pos = self.position;
        self.advance(); // consume '['
        let mut depth = 1;
        let mut content = String::new();

        while let Some(c) = self.advance() {
            match c {
                '[' => depth += 1,
                ']' => {
                    depth -= 1;
                    if depth == 0 {
                        return Some(Token::Bracketed(content));
                    }
                }
                // Escape character inside structured reference column names
                '\'' => {
                    if let Some(next) = self.advance() {
                        content.push(next);
                    }
                    continue;
                }
                _ => {}
            }
            content.push(c);
        }

        self.errors
            .push(TokenizeError::new("Unterminated '[' segment", start_pos));
        None
    }

    /// Read a number (integer, decimal, or scientific notation)
    fn read_number(&mut self) -> Option<Token> {
        let start_pos = self.position;
        let mut num_str = String::new();

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '.' {
                num_str.push(c);
                self.advance();
            } else {
                break;
            }
        }

        // Exponent part (e.g., 1.5e10, 2E-5)
        if let Some(c @ ('e' | 'E')) = self.peek() {
            num_str.push(c);
            self.advance();
            if let Some(sign @ ('+' | '-')) = self.peek() {
                num_str.push(sign);
                self.advance();
            }
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    num_str.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        match num_str.parse::<f64>() {
            Ok(n) => Some(Token::Number(n)),
            Err(_) => {
                self.errors.push(TokenizeError::new(
                    format!("Invalid number: {}", num_str),
                    start_pos,
                ));
                None
            }
        }
    }

    /// Read a word; a trailing `!` turns it into a sheet prefix
    fn read_word(&mut self) -> Token {
        let mut word = String::new();

        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || matches!(c, '_' | '.' | '$' | '\\' | '?') {
                word.push(c);
                self.advance();
            } else {
                break;
            }
        }

        if self.peek() == Some('!') {
            self.advance();
            return Token::SheetPrefix(word);
        }

        Token::Word(word)
    }

    /// Read operators starting with '<'
    fn read_less_than_operator(&mut self) -> Token {
        self.advance(); // consume '<'

        match self.peek() {
            Some('=') => {
                self.advance();
                Token::Operator("<=".to_string())
            }
            Some('>') => {
                self.advance();
                Token::Operator("<>".to_string())
            }
            _ => Token::Operator("<".to_string()),
        }
    }

    /// Read operators starting with '>'
    fn read_greater_than_operator(&mut self) -> Token {
        self.advance(); // consume '>'

        match self.peek() {
            Some('=') => {
                self.advance();
                Token::Operator(">=".to_string())
            }
            _ => Token::Operator(">".to_string()),
        }
    }
}

/// Convenience function to tokenize a formula string
pub fn tokenize(formula: &str) -> (Vec<Token>, Vec<TokenizeError>) {
    Tokenizer::new(formula).tokenize()
}
