//! Scanner: converts a source buffer into a finite sequence of tokens.
//!
//! The scanner is a pure function of its own state `{ start, current, line }`
//! and produces one token per call to [`Scanner::scan_token`]. It never
//! allocates a hammer heap object and is restartable - nothing about it
//! depends on prior tokens, only on cursor position in the buffer.
//!
//! [`scan_all`] drives the scanner to completion, producing the token
//! buffer the parser consumes (always beginning with `Sof` and ending with
//! `Eof`) plus any lexical diagnostics collected along the way.

use hammer_base::{Diagnostics, Span, SpannedError};

use crate::token::{keyword_kind, Token, TokenKind};

/// Characters that may appear in a maximal-munch glyph operator run.
const GLYPH_CHARS: &[u8] = b"+-*/^%:$|.><@#?!~&=\\";

fn is_glyph_char(b: u8) -> bool {
    GLYPH_CHARS.contains(&b)
}

fn is_alpha(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_alnum(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_digit(b: u8) -> bool {
    b.is_ascii_digit()
}

/// Looks up a glyph run against the fixed operator table.
///
/// Returns `None` for any lexeme that does not name a known operator; the
/// caller treats that case as [`TokenKind::Custom`].
fn fixed_operator(lexeme: &str) -> Option<TokenKind> {
    use TokenKind::*;
    Some(match lexeme {
        "+" => Plus,
        "-" => Minus,
        "*" => Star,
        "/" => Slash,
        "%" => Percent,
        "^" => Caret,
        "=" => Equal,
        ":" => Colon,
        "<<" => LShift,
        "." => Dot,
        ".." => DotDot,
        "==" => EqualEqual,
        "!=" => BangEqual,
        "<" => Less,
        ">" => Greater,
        "<=" => LessEqual,
        ">=" => GreaterEqual,
        "!" => Bang,
        "?" => Question,
        "|>" => PipeGreater,
        "$" => Dollar,
        "=>" => FatArrow,
        "|" => Pipe,
        _ => return None,
    })
}

/// A restartable, allocation-free tokenizer over a source buffer.
pub struct Scanner<'a> {
    source: &'a str,
    bytes: &'a [u8],
    start: usize,
    current: usize,
    line: u32,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Scanner {
            source,
            bytes: source.as_bytes(),
            start: 0,
            current: 0,
            line: 1,
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.bytes.len()
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.bytes[self.current]
        }
    }

    fn peek_at(&self, offset: usize) -> u8 {
        let idx = self.current + offset;
        if idx >= self.bytes.len() {
            0
        } else {
            self.bytes[idx]
        }
    }

    fn advance(&mut self) -> u8 {
        let b = self.bytes[self.current];
        self.current += 1;
        b
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.bytes[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn lexeme(&self) -> &'a str {
        &self.source[self.start..self.current]
    }

    fn make(&self, kind: TokenKind) -> (Token, Option<String>) {
        (
            Token::new(kind, self.start, self.current - self.start, self.line),
            None,
        )
    }

    fn error(&self, message: impl Into<String>) -> (Token, Option<String>) {
        (
            Token::new(TokenKind::Error, self.start, self.current - self.start, self.line),
            Some(message.into()),
        )
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.current += 1;
                }
                b'\n' => {
                    self.line += 1;
                    self.current += 1;
                }
                b'/' if self.peek_at(1) == b'/' => {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.current += 1;
                    }
                }
                _ => break,
            }
        }
    }

    /// Scans and returns the next token, plus an error message when the
    /// token's kind is [`TokenKind::Error`].
    pub fn scan_token(&mut self) -> (Token, Option<String>) {
        self.skip_whitespace_and_comments();
        self.start = self.current;

        if self.is_at_end() {
            return self.make(TokenKind::Eof);
        }

        let b = self.advance();

        if b == b'f' && self.peek() == b'"' {
            self.current += 1;
            return self.string(true);
        }
        if is_alpha(b) {
            return self.identifier();
        }
        if is_digit(b) {
            return self.number();
        }

        match b {
            b'"' => self.string(false),
            b'\'' => self.char_literal(),
            b'`' => self.glyph_literal(),
            b'(' => self.make(TokenKind::LParen),
            b')' => self.make(TokenKind::RParen),
            b'[' => self.make(TokenKind::LBracket),
            b']' => self.make(TokenKind::RBracket),
            b'{' => self.make(TokenKind::LBrace),
            b'}' => self.make(TokenKind::RBrace),
            b',' => self.make(TokenKind::Comma),
            b';' => self.make(TokenKind::Semicolon),
            _ if is_glyph_char(b) => self.glyph_run(),
            _ => self.error(format!("unexpected character '{}'", b as char)),
        }
    }

    fn identifier(&mut self) -> (Token, Option<String>) {
        while is_alnum(self.peek()) {
            self.current += 1;
        }
        let lexeme = self.lexeme();
        match keyword_kind(lexeme) {
            Some(kind) => self.make(kind),
            None => self.make(TokenKind::Identifier),
        }
    }

    fn number(&mut self) -> (Token, Option<String>) {
        while is_digit(self.peek()) {
            self.current += 1;
        }

        let mut is_float = false;

        if self.peek() == b'.' && is_digit(self.peek_at(1)) {
            is_float = true;
            self.current += 1;
            while is_digit(self.peek()) {
                self.current += 1;
            }
        }

        if self.peek() == b'e' || self.peek() == b'E' {
            let save = self.current;
            self.current += 1;
            if self.peek() == b'+' || self.peek() == b'-' {
                self.current += 1;
            }
            if is_digit(self.peek()) {
                is_float = true;
                while is_digit(self.peek()) {
                    self.current += 1;
                }
            } else {
                self.current = save;
                return self.error("malformed exponent in numeric literal");
            }
        }

        if is_float {
            self.make(TokenKind::Float)
        } else {
            self.make(TokenKind::Integer)
        }
    }

    fn string(&mut self, format: bool) -> (Token, Option<String>) {
        loop {
            if self.is_at_end() {
                return self.error("unterminated string literal");
            }
            let b = self.peek();
            if b == b'"' {
                self.current += 1;
                break;
            }
            if b == b'\n' {
                return self.error("unterminated string literal");
            }
            if b == b'\\' {
                self.current += 1;
                if self.is_at_end() {
                    return self.error("unterminated string literal");
                }
                let esc = self.advance();
                let valid = match esc {
                    b'\\' | b'"' | b'n' | b't' | b'b' | b'f' => true,
                    b'\n' if format => {
                        self.line += 1;
                        true
                    }
                    _ => false,
                };
                if !valid {
                    return self.error(format!("invalid escape sequence '\\{}'", esc as char));
                }
                continue;
            }
            self.current += 1;
        }
        self.make(if format {
            TokenKind::FormatStr
        } else {
            TokenKind::Str
        })
    }

    fn char_literal(&mut self) -> (Token, Option<String>) {
        if self.is_at_end() {
            return self.error("unterminated char literal");
        }
        if self.peek() == b'\\' {
            self.current += 1;
            if self.is_at_end() {
                return self.error("unterminated char literal");
            }
            let esc = self.advance();
            let valid = matches!(esc, b'\\' | b'\'' | b'n' | b't' | b'b' | b'f');
            if !valid {
                return self.error(format!("invalid escape sequence '\\{}'", esc as char));
            }
        } else {
            self.current += 1;
        }
        if self.peek() != b'\'' {
            return self.error("char literal must contain exactly one character");
        }
        self.current += 1;
        self.make(TokenKind::Char)
    }

    fn glyph_literal(&mut self) -> (Token, Option<String>) {
        if !is_glyph_char(self.peek()) {
            return self.error("expected glyph character after '`'");
        }
        while is_glyph_char(self.peek()) {
            self.current += 1;
        }
        self.make(TokenKind::Glyph)
    }

    fn glyph_run(&mut self) -> (Token, Option<String>) {
        while is_glyph_char(self.peek()) {
            self.current += 1;
        }
        let lexeme = self.lexeme();
        match fixed_operator(lexeme) {
            Some(kind) => self.make(kind),
            None => self.make(TokenKind::Custom),
        }
    }
}

/// Scans the entire source buffer, returning the full token sequence
/// (bracketed by `Sof` and `Eof`) and any diagnostics collected along the
/// way. Lexical errors do not halt the scan; they appear as `Error` tokens
/// and are also recorded in the returned [`Diagnostics`].
pub fn scan_all(source: &str) -> (Vec<Token>, Diagnostics) {
    let mut tokens = vec![Token::new(TokenKind::Sof, 0, 0, 1)];
    let mut diagnostics = Diagnostics::new();
    let mut scanner = Scanner::new(source);

    loop {
        let (token, message) = scanner.scan_token();
        if let Some(message) = message {
            diagnostics.report(SpannedError::new(message, token.span()));
        }
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            break;
        }
    }

    (tokens, diagnostics)
}

/// Recovers a token's text from the source buffer it was scanned from.
pub fn lexeme_of<'a>(source: &'a str, span: Span) -> &'a str {
    &source[span.start..span.end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        scan_all(source).0.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn scans_simple_arithmetic() {
        let (tokens, diags) = scan_all("1 + 2 * 3");
        assert!(!diags.has_errors());
        let kinds: Vec<_> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Sof,
                TokenKind::Integer,
                TokenKind::Plus,
                TokenKind::Integer,
                TokenKind::Star,
                TokenKind::Integer,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn recognises_keywords_and_wildcard() {
        assert_eq!(
            kinds("if _ then else match"),
            vec![
                TokenKind::Sof,
                TokenKind::If,
                TokenKind::Wildcard,
                TokenKind::Then,
                TokenKind::Else,
                TokenKind::Match,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn float_requires_digit_after_dot() {
        let (tokens, _) = scan_all("1.5");
        assert_eq!(tokens[1].kind, TokenKind::Float);
    }

    #[test]
    fn bare_dot_is_not_a_float() {
        let (tokens, _) = scan_all("1 . 5");
        assert_eq!(tokens[1].kind, TokenKind::Integer);
        assert_eq!(tokens[2].kind, TokenKind::Dot);
    }

    #[test]
    fn malformed_exponent_is_an_error() {
        let (tokens, diags) = scan_all("1e+ ");
        assert!(diags.has_errors());
        assert_eq!(tokens[1].kind, TokenKind::Error);
    }

    #[test]
    fn f_quote_lexes_as_a_format_string_not_an_identifier() {
        let (tokens, diags) = scan_all("f\"{x}\"");
        assert!(!diags.has_errors());
        assert_eq!(tokens[1].kind, TokenKind::FormatStr);
    }

    #[test]
    fn bare_f_identifier_is_unaffected() {
        let (tokens, _) = scan_all("f + 1");
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
    }

    #[test]
    fn format_string_allows_line_continuation() {
        let (tokens, diags) = scan_all("f\"a\\\nb\"");
        assert!(!diags.has_errors());
        assert_eq!(tokens[1].kind, TokenKind::FormatStr);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let (tokens, diags) = scan_all("\"abc");
        assert!(diags.has_errors());
        assert_eq!(tokens[1].kind, TokenKind::Error);
    }

    #[test]
    fn glyph_run_matches_fixed_operator() {
        let (tokens, _) = scan_all("a <= b");
        assert_eq!(tokens[2].kind, TokenKind::LessEqual);
    }

    #[test]
    fn unmatched_glyph_run_is_custom() {
        let (tokens, _) = scan_all("a >>> b");
        assert_eq!(tokens[2].kind, TokenKind::Custom);
    }

    #[test]
    fn back_quoted_glyph_is_an_identifier_value() {
        let (tokens, _) = scan_all("`+ 1 2");
        assert_eq!(tokens[1].kind, TokenKind::Glyph);
    }

    #[test]
    fn line_comment_is_skipped_and_newline_still_counted() {
        let (tokens, _) = scan_all("1 // comment\n2");
        assert_eq!(tokens[1].line, 1);
        assert_eq!(tokens[2].line, 2);
    }

    #[test]
    fn scanner_is_deterministic() {
        let source = "add: a b = a + b; add 2 3";
        let first = kinds(source);
        let second = kinds(source);
        assert_eq!(first, second);
    }

    #[test]
    fn char_literal_scans_single_code_point() {
        let (tokens, diags) = scan_all("'a'");
        assert!(!diags.has_errors());
        assert_eq!(tokens[1].kind, TokenKind::Char);
    }

    #[test]
    fn char_literal_rejects_multiple_characters() {
        let (tokens, diags) = scan_all("'ab'");
        assert!(diags.has_errors());
        assert_eq!(tokens[1].kind, TokenKind::Error);
    }
}
