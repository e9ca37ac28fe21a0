// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use crate::{Result, SeriaError};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Table,
    Enum,
    Struct,

    Identifier(String),
    Number(u64),
    Str(String),

    Colon,
    Semicolon,
    Comma,
    Equals,
    OpenBracket,
    CloseBracket,
    OpenBrace,
    CloseBrace,

    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

const ESCAPE_CODES: &[(char, u64)] = &[
    ('r', b'\r' as u64),
    ('n', b'\n' as u64),
    ('t', b'\t' as u64),
    ('v', 0x0b),
    ('\\', b'\\' as u64),
    ('\'', b'\'' as u64),
    ('"', b'"' as u64),
    ('0', 0),
    ('1', 1),
    ('2', 2),
    ('3', 3),
    ('4', 4),
    ('5', 5),
    ('6', 6),
    ('7', 7),
    ('8', 8),
    ('9', 9),
];

pub struct Scanner<'src> {
    source: &'src str,
    chars: std::iter::Peekable<std::str::CharIndices<'src>>,
    start: usize,
    current: usize,
    line: usize,
}

impl<'src> Scanner<'src> {
    pub fn new(source: &str) -> Scanner<'_> {
        Scanner {
            source,
            chars: source.char_indices().peekable(),
            start: 0,
            current: 0,
            line: 1,
        }
    }

    pub fn next(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments();

        let kind = match self.chars.next() {
            Some((_, ch)) => match ch {
                '{' => TokenKind::OpenBrace,
                '}' => TokenKind::CloseBrace,
                '[' => TokenKind::OpenBracket,
                ']' => TokenKind::CloseBracket,
                ';' => TokenKind::Semicolon,
                ':' => TokenKind::Colon,
                '=' => TokenKind::Equals,
                ',' => TokenKind::Comma,
                '"' => self.string()?,
                '\'' => self.char_literal()?,
                '0' => match self.chars.peek().copied() {
                    Some((i, 'x')) | Some((i, 'X')) => {
                        self.chars.next();
                        self.start = i + 1;
                        self.number(16)?
                    }
                    _ => {
                        self.start = self.start.max(0);
                        self.current = self.start;
                        self.number_from_zero()?
                    }
                },
                ch if ch.is_ascii_digit() => {
                    self.number_starting_here(ch)?
                }
                ch if ch.is_alphabetic() || ch == '_' => self.identifier_or_keyword(ch),
                ch => {
                    return Err(SeriaError::Lex {
                        msg: format!("Unexpected character {ch:?}"),
                        line: self.line,
                    })
                }
            },
            None => TokenKind::Eof,
        };

        Ok(Token {
            kind,
            line: self.line,
        })
    }

    fn identifier_or_keyword(&mut self, first: char) -> TokenKind {
        let mut id = String::new();
        id.push(first);
        loop {
            match self.chars.peek() {
                Some((_, ch)) if ch.is_alphanumeric() || *ch == '_' || *ch == '.' => {
                    id.push(*ch);
                    self.chars.next();
                }
                _ => break,
            }
        }
        let lowered = id.to_ascii_lowercase();
        match lowered.as_str() {
            "table" => TokenKind::Table,
            "enum" => TokenKind::Enum,
            "struct" => TokenKind::Struct,
            "true" => TokenKind::Number(1),
            "false" => TokenKind::Number(0),
            _ => TokenKind::Identifier(id),
        }
    }

    /// Decimal literal that does not start with a leading zero.
    fn number_starting_here(&mut self, first: char) -> Result<TokenKind> {
        let mut text = String::new();
        text.push(first);
        loop {
            match self.chars.peek() {
                Some((_, ch)) if ch.is_ascii_digit() => {
                    text.push(*ch);
                    self.chars.next();
                }
                _ => break,
            }
        }
        text.parse::<u64>().map(TokenKind::Number).map_err(|_| SeriaError::Lex {
            msg: format!("Invalid number literal {text:?}"),
            line: self.line,
        })
    }

    /// A literal that began with a single `0` and is not a `0x` form: bare `0`,
    /// or an octal literal (`0` followed by more digits).
    fn number_from_zero(&mut self) -> Result<TokenKind> {
        let mut text = String::from("0");
        loop {
            match self.chars.peek() {
                Some((_, ch)) if ch.is_ascii_digit() => {
                    text.push(*ch);
                    self.chars.next();
                }
                _ => break,
            }
        }
        let radix = if text.len() > 1 { 8 } else { 10 };
        let digits = if radix == 8 { &text[1..] } else { text.as_str() };
        u64::from_str_radix(digits, radix)
            .map(TokenKind::Number)
            .map_err(|_| SeriaError::Lex {
                msg: format!("Invalid number literal {text:?}"),
                line: self.line,
            })
    }

    fn number(&mut self, radix: u32) -> Result<TokenKind> {
        let mut text = String::new();
        loop {
            match self.chars.peek() {
                Some((_, ch)) if ch.is_ascii_hexdigit() => {
                    text.push(*ch);
                    self.chars.next();
                }
                _ => break,
            }
        }
        u64::from_str_radix(&text, radix)
            .map(TokenKind::Number)
            .map_err(|_| SeriaError::Lex {
                msg: format!("Invalid number literal {text:?}"),
                line: self.line,
            })
    }

    /// A character literal: `'c'` or `'\e'` where `e` is one of the escapes in
    /// `ESCAPE_CODES`.
    fn char_literal(&mut self) -> Result<TokenKind> {
        let value = match self.chars.next() {
            Some((_, '\\')) => match self.chars.next() {
                Some((_, esc)) => {
                    let (_, code) = ESCAPE_CODES
                        .iter()
                        .find(|(c, _)| *c == esc)
                        .ok_or_else(|| SeriaError::Lex {
                            msg: format!("Invalid escape sequence '\\{esc}'"),
                            line: self.line,
                        })?;
                    *code
                }
                None => {
                    return Err(SeriaError::Lex {
                        msg: "Unterminated character literal".to_string(),
                        line: self.line,
                    })
                }
            },
            Some((_, ch)) => ch as u64,
            None => {
                return Err(SeriaError::Lex {
                    msg: "Unterminated character literal".to_string(),
                    line: self.line,
                })
            }
        };
        match self.chars.next() {
            Some((_, '\'')) => Ok(TokenKind::Number(value)),
            _ => Err(SeriaError::Lex {
                msg: "Expected closing ' after character literal".to_string(),
                line: self.line,
            }),
        }
    }

    /// A double-quoted string literal with no interior escaping and no embedded
    /// `"` (spec.md § 4.1).
    fn string(&mut self) -> Result<TokenKind> {
        let mut s = String::new();
        loop {
            match self.chars.next() {
                Some((_, '"')) => return Ok(TokenKind::Str(s)),
                Some((_, '\n')) => {
                    return Err(SeriaError::Lex {
                        msg: "Unterminated string literal".to_string(),
                        line: self.line,
                    })
                }
                Some((_, ch)) => s.push(ch),
                None => {
                    return Err(SeriaError::Lex {
                        msg: "Unterminated string literal".to_string(),
                        line: self.line,
                    })
                }
            }
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.chars.peek() {
                Some((_, '\n')) => {
                    self.line += 1;
                    self.chars.next();
                }
                Some((_, ch)) if ch.is_whitespace() => {
                    self.chars.next();
                }
                Some((_, '/')) => {
                    let mut lookahead = self.chars.clone();
                    lookahead.next();
                    match lookahead.peek() {
                        Some((_, '/')) => {
                            self.chars.next();
                            self.chars.next();
                            self.line_comment();
                        }
                        Some((_, '*')) => {
                            self.chars.next();
                            self.chars.next();
                            self.block_comment();
                        }
                        _ => break,
                    }
                }
                _ => break,
            }
        }
    }

    fn line_comment(&mut self) {
        loop {
            match self.chars.peek() {
                Some((_, '\n')) | None => break,
                _ => {
                    self.chars.next();
                }
            }
        }
    }

    fn block_comment(&mut self) {
        loop {
            match self.chars.next() {
                Some((_, '\n')) => self.line += 1,
                Some((_, '*')) => {
                    if let Some((_, '/')) = self.chars.peek() {
                        self.chars.next();
                        return;
                    }
                }
                Some(_) => continue,
                None => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut scanner = Scanner::new(src);
        let mut out = Vec::new();
        loop {
            let tok = scanner.next().unwrap();
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn punctuation() {
        assert_eq!(
            kinds("{ } [ ] : ; ="),
            vec![
                TokenKind::OpenBrace,
                TokenKind::CloseBrace,
                TokenKind::OpenBracket,
                TokenKind::CloseBracket,
                TokenKind::Colon,
                TokenKind::Semicolon,
                TokenKind::Equals,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(
            kinds("/* block */ { // line\n }"),
            vec![TokenKind::OpenBrace, TokenKind::CloseBrace, TokenKind::Eof]
        );
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(
            kinds("Table ENUM struct"),
            vec![
                TokenKind::Table,
                TokenKind::Enum,
                TokenKind::Struct,
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn booleans_become_numbers() {
        assert_eq!(
            kinds("TRUE false True"),
            vec![
                TokenKind::Number(1),
                TokenKind::Number(0),
                TokenKind::Number(1),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("123 0xFF 0x10 010"),
            vec![
                TokenKind::Number(123),
                TokenKind::Number(255),
                TokenKind::Number(16),
                TokenKind::Number(8),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn char_literals() {
        assert_eq!(
            kinds(r"'a' '\n' '\0'"),
            vec![
                TokenKind::Number('a' as u64),
                TokenKind::Number(b'\n' as u64),
                TokenKind::Number(0),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn invalid_escape_is_an_error() {
        let mut scanner = Scanner::new(r"'\q'");
        assert!(matches!(scanner.next(), Err(SeriaError::Lex { .. })));
    }

    #[test]
    fn dotted_identifiers() {
        assert_eq!(
            kinds("a.b.c"),
            vec![TokenKind::Identifier("a.b.c".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn strings() {
        assert_eq!(
            kinds(r#""hello""#),
            vec![TokenKind::Str("hello".to_string()), TokenKind::Eof]
        );
    }
}
