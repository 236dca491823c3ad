//! A compact tokenizer.
//!
//! This is the input adapter in front of the compiler core: it exists so
//! the binary runs on real source files and so tests can be written
//! against source text. The core itself starts at `parser::parse`, which
//! consumes the produced `Vec<Token>` and nothing else. There is no
//! preprocessor; the input is expected to be a single, self-contained
//! compilation unit.

use crate::common::error::{CompileError, Result};
use crate::common::source::Span;
use crate::frontend::token::{Token, TokenKind};

/// Tokenize a compilation unit. The returned sequence always ends with
/// a single `Eof` token.
pub fn lex(src: &str) -> Result<Vec<Token>> {
    Lexer::new(src).run()
}

struct Lexer<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src: src.as_bytes(),
            pos: 0,
        }
    }

    fn run(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments()?;
            let start = self.pos;
            let Some(c) = self.peek() else {
                tokens.push(Token::new(
                    TokenKind::Eof,
                    Span::new(start as u32, start as u32),
                ));
                return Ok(tokens);
            };
            let kind = match c {
                b'0'..=b'9' => self.number()?,
                b'"' => self.string_literal()?,
                b'\'' => self.char_literal()?,
                c if c == b'_' || c.is_ascii_alphabetic() => self.ident_or_keyword(),
                _ => self.punctuator()?,
            };
            tokens.push(Token::new(kind, Span::new(start as u32, self.pos as u32)));
        }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, n: usize) -> Option<u8> {
        self.src.get(self.pos + n).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn error_here(&self, msg: impl Into<String>) -> CompileError {
        let p = self.pos as u32;
        CompileError::syntax(msg, Span::new(p, p + 1))
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_whitespace() => {
                    self.pos += 1;
                }
                Some(b'/') if self.peek_at(1) == Some(b'/') => {
                    while let Some(c) = self.peek() {
                        if c == b'\n' {
                            break;
                        }
                        self.pos += 1;
                    }
                }
                Some(b'/') if self.peek_at(1) == Some(b'*') => {
                    let open = self.pos;
                    self.pos += 2;
                    loop {
                        if self.pos + 1 >= self.src.len() {
                            let p = open as u32;
                            return Err(CompileError::syntax(
                                "unterminated block comment",
                                Span::new(p, p + 2),
                            ));
                        }
                        if self.src[self.pos] == b'*' && self.src[self.pos + 1] == b'/' {
                            self.pos += 2;
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn ident_or_keyword(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'_' || c.is_ascii_alphanumeric() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
        TokenKind::from_keyword(text).unwrap_or_else(|| TokenKind::Identifier(text.to_string()))
    }

    /// Integer and floating literals. Integers accept decimal, hex (0x),
    /// octal (leading 0), and binary (0b) forms plus u/l suffixes; a
    /// decimal literal containing '.', 'e', or 'E' is a floating literal,
    /// with an optional f/F suffix selecting float.
    fn number(&mut self) -> Result<TokenKind> {
        let start = self.pos;

        // Hex and binary have unambiguous prefixes; handle them first.
        if self.peek() == Some(b'0') {
            match self.peek_at(1) {
                Some(b'x') | Some(b'X') => {
                    self.pos += 2;
                    let digits = self.take_while(|c| c.is_ascii_hexdigit());
                    if digits.is_empty() {
                        return Err(self.error_here("invalid hexadecimal constant"));
                    }
                    let value = u64::from_str_radix(&digits, 16)
                        .map_err(|_| self.error_here("integer constant out of range"))?;
                    return self.int_suffix(value);
                }
                Some(b'b') | Some(b'B') => {
                    self.pos += 2;
                    let digits = self.take_while(|c| c == b'0' || c == b'1');
                    if digits.is_empty() {
                        return Err(self.error_here("invalid binary constant"));
                    }
                    let value = u64::from_str_radix(&digits, 2)
                        .map_err(|_| self.error_here("integer constant out of range"))?;
                    return self.int_suffix(value);
                }
                _ => {}
            }
        }

        let int_part = self.take_while(|c| c.is_ascii_digit());
        let is_float = matches!(self.peek(), Some(b'.') | Some(b'e') | Some(b'E'));
        if is_float {
            if self.peek() == Some(b'.') {
                self.pos += 1;
                self.take_while(|c| c.is_ascii_digit());
            }
            if matches!(self.peek(), Some(b'e') | Some(b'E')) {
                self.pos += 1;
                if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                    self.pos += 1;
                }
                if self.take_while(|c| c.is_ascii_digit()).is_empty() {
                    return Err(self.error_here("exponent has no digits"));
                }
            }
            let text = std::str::from_utf8(&self.src[start..self.pos]).unwrap();
            let value: f64 = text
                .parse()
                .map_err(|_| self.error_here("invalid floating constant"))?;
            if matches!(self.peek(), Some(b'f') | Some(b'F')) {
                self.pos += 1;
                return Ok(TokenKind::FloatLiteralF32(value));
            }
            if matches!(self.peek(), Some(b'l') | Some(b'L')) {
                self.pos += 1; // long double collapses to double
            }
            return Ok(TokenKind::FloatLiteral(value));
        }

        // Octal when there is a leading zero and more digits follow.
        let value = if int_part.len() > 1 && int_part.starts_with('0') {
            u64::from_str_radix(&int_part[1..], 8)
                .map_err(|_| self.error_here("invalid octal constant"))?
        } else {
            int_part
                .parse::<u64>()
                .map_err(|_| self.error_here("integer constant out of range"))?
        };
        self.int_suffix(value)
    }

    fn int_suffix(&mut self, value: u64) -> Result<TokenKind> {
        let mut unsigned = false;
        let mut long = false;
        loop {
            match self.peek() {
                Some(b'u') | Some(b'U') if !unsigned => {
                    unsigned = true;
                    self.pos += 1;
                }
                Some(b'l') | Some(b'L') if !long => {
                    long = true;
                    self.pos += 1;
                    // "ll" is the same width as "l" on this target
                    if matches!(self.peek(), Some(b'l') | Some(b'L')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        let kind = match (unsigned, long) {
            (false, false) => {
                if value > i64::MAX as u64 {
                    TokenKind::ULongLiteral(value)
                } else {
                    TokenKind::IntLiteral(value as i64)
                }
            }
            (false, true) => {
                if value > i64::MAX as u64 {
                    TokenKind::ULongLiteral(value)
                } else {
                    TokenKind::LongLiteral(value as i64)
                }
            }
            (true, false) => TokenKind::UIntLiteral(value),
            (true, true) => TokenKind::ULongLiteral(value),
        };
        Ok(kind)
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if pred(c) {
                self.pos += 1;
            } else {
                break;
            }
        }
        std::str::from_utf8(&self.src[start..self.pos])
            .unwrap()
            .to_string()
    }

    fn escape_char(&mut self) -> Result<u8> {
        let c = self
            .bump()
            .ok_or_else(|| self.error_here("unterminated escape sequence"))?;
        let b = match c {
            b'n' => b'\n',
            b't' => b'\t',
            b'r' => b'\r',
            b'a' => 0x07,
            b'b' => 0x08,
            b'f' => 0x0c,
            b'v' => 0x0b,
            b'e' => 0x1b,
            b'0'..=b'7' => {
                // up to three octal digits, first already consumed
                let mut v = (c - b'0') as u32;
                for _ in 0..2 {
                    match self.peek() {
                        Some(d @ b'0'..=b'7') => {
                            v = v * 8 + (d - b'0') as u32;
                            self.pos += 1;
                        }
                        _ => break,
                    }
                }
                v as u8
            }
            b'x' => {
                let digits = self.take_while(|c| c.is_ascii_hexdigit());
                if digits.is_empty() {
                    return Err(self.error_here("\\x used with no following hex digits"));
                }
                u32::from_str_radix(&digits, 16)
                    .map_err(|_| self.error_here("hex escape sequence out of range"))?
                    as u8
            }
            other => other, // \\, \', \", and anything else maps to itself
        };
        Ok(b)
    }

    fn string_literal(&mut self) -> Result<TokenKind> {
        let open = self.pos;
        self.pos += 1; // opening quote
        let mut bytes = Vec::new();
        loop {
            match self.bump() {
                None | Some(b'\n') => {
                    let p = open as u32;
                    return Err(CompileError::syntax(
                        "unterminated string literal",
                        Span::new(p, p + 1),
                    ));
                }
                Some(b'"') => break,
                Some(b'\\') => bytes.push(self.escape_char()?),
                Some(c) => bytes.push(c),
            }
        }
        // String contents stay as raw bytes; the parser appends the NUL.
        Ok(TokenKind::StringLiteral(
            String::from_utf8_lossy(&bytes).into_owned(),
        ))
    }

    fn char_literal(&mut self) -> Result<TokenKind> {
        let open = self.pos;
        self.pos += 1; // opening quote
        let c = match self.bump() {
            None | Some(b'\n') | Some(b'\'') => {
                let p = open as u32;
                return Err(CompileError::syntax(
                    "empty or unterminated character constant",
                    Span::new(p, p + 1),
                ));
            }
            Some(b'\\') => self.escape_char()?,
            Some(c) => c,
        };
        if self.bump() != Some(b'\'') {
            let p = open as u32;
            return Err(CompileError::syntax(
                "unterminated character constant",
                Span::new(p, p + 1),
            ));
        }
        Ok(TokenKind::CharLiteral(c))
    }

    /// Punctuators, longest match first.
    fn punctuator(&mut self) -> Result<TokenKind> {
        use TokenKind::*;
        const THREE: &[(&[u8], TokenKind)] = &[(b"...", Ellipsis)];
        const TWO: &[(&[u8], TokenKind)] = &[
            (b"->", Arrow),
            (b"<<", LessLess),
            (b">>", GreaterGreater),
            (b"==", EqualEqual),
            (b"!=", BangEqual),
            (b"<=", LessEqual),
            (b">=", GreaterEqual),
            (b"&&", AmpAmp),
            (b"||", PipePipe),
        ];
        let rest = &self.src[self.pos..];
        for (pat, kind) in THREE.iter().chain(TWO) {
            if rest.starts_with(pat) {
                self.pos += pat.len();
                return Ok(kind.clone());
            }
        }
        let kind = match rest.first() {
            Some(b'(') => LParen,
            Some(b')') => RParen,
            Some(b'{') => LBrace,
            Some(b'}') => RBrace,
            Some(b'[') => LBracket,
            Some(b']') => RBracket,
            Some(b';') => Semicolon,
            Some(b',') => Comma,
            Some(b'.') => Dot,
            Some(b'+') => Plus,
            Some(b'-') => Minus,
            Some(b'*') => Star,
            Some(b'/') => Slash,
            Some(b'%') => Percent,
            Some(b'&') => Amp,
            Some(b'|') => Pipe,
            Some(b'^') => Caret,
            Some(b'~') => Tilde,
            Some(b'!') => Bang,
            Some(b'=') => Assign,
            Some(b'<') => Less,
            Some(b'>') => Greater,
            Some(b'?') => Question,
            Some(b':') => Colon,
            Some(&c) => {
                return Err(self.error_here(format!("stray '{}' in program", c as char)));
            }
            None => unreachable!("punctuator called at end of input"),
        };
        self.pos += 1;
        Ok(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        lex(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_a_function_header() {
        use TokenKind::*;
        assert_eq!(
            kinds("int add(int a, int b)"),
            vec![
                Int,
                Identifier("add".into()),
                LParen,
                Int,
                Identifier("a".into()),
                Comma,
                Int,
                Identifier("b".into()),
                RParen,
                Eof
            ]
        );
    }

    #[test]
    fn longest_match_punctuators() {
        use TokenKind::*;
        assert_eq!(kinds("<<= >>"), vec![LessLess, Assign, GreaterGreater, Eof]);
        assert_eq!(kinds("a->b"), vec![
            Identifier("a".into()),
            Arrow,
            Identifier("b".into()),
            Eof
        ]);
        assert_eq!(kinds("..."), vec![Ellipsis, Eof]);
    }

    #[test]
    fn integer_literal_forms() {
        assert_eq!(kinds("42")[0], TokenKind::IntLiteral(42));
        assert_eq!(kinds("0x2A")[0], TokenKind::IntLiteral(42));
        assert_eq!(kinds("052")[0], TokenKind::IntLiteral(42));
        assert_eq!(kinds("0b101010")[0], TokenKind::IntLiteral(42));
        assert_eq!(kinds("42u")[0], TokenKind::UIntLiteral(42));
        assert_eq!(kinds("42L")[0], TokenKind::LongLiteral(42));
        assert_eq!(kinds("42ul")[0], TokenKind::ULongLiteral(42));
    }

    #[test]
    fn float_literal_forms() {
        assert_eq!(kinds("1.5")[0], TokenKind::FloatLiteral(1.5));
        assert_eq!(kinds("1e3")[0], TokenKind::FloatLiteral(1000.0));
        assert_eq!(kinds("2.0f")[0], TokenKind::FloatLiteralF32(2.0));
    }

    #[test]
    fn string_and_char_escapes() {
        assert_eq!(
            kinds(r#""a\n\x41\0""#)[0],
            TokenKind::StringLiteral("a\nA\0".into())
        );
        assert_eq!(kinds(r"'\n'")[0], TokenKind::CharLiteral(b'\n'));
        assert_eq!(kinds("'A'")[0], TokenKind::CharLiteral(b'A'));
    }

    #[test]
    fn comments_are_skipped() {
        use TokenKind::*;
        assert_eq!(
            kinds("int /* a\nb */ x; // tail\n"),
            vec![Int, Identifier("x".into()), Semicolon, Eof]
        );
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(lex("\"abc").is_err());
        assert!(lex("/* abc").is_err());
    }
}
