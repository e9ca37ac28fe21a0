// SPDX-License-Identifier: BSD-3-Clause
// Copyright 2025. Triad National Security, LLC.

use log::trace;

use crate::ast::*;
use crate::scanner::{Scanner, Token, TokenKind};
use crate::{Result, SeriaError};

pub struct Parser<'src> {
    scanner: Scanner<'src>,
    current: Token,
    next: Token,
}

impl<'src> Parser<'src> {
    pub fn new(scanner: Scanner<'src>) -> Result<Self> {
        let mut parser = Parser {
            scanner,
            current: Token {
                kind: TokenKind::Eof,
                line: 0,
            },
            next: Token {
                kind: TokenKind::Eof,
                line: 0,
            },
        };
        // Prime `next` with the first real token so `peek()` reflects it
        // immediately; a lex error here (e.g. an invalid first character)
        // must propagate now, since nothing re-checks it later.
        parser.next = parser.scanner.next()?;
        Ok(parser)
    }

    pub fn parse(&mut self) -> Result<Schema> {
        let mut schema = Schema::new();
        loop {
            match &self.peek().kind {
                TokenKind::Eof => break,
                _ => {
                    let def = self.definition()?;
                    trace!("parsed definition {:?}", def.name());
                    schema.push(def);
                }
            }
        }
        Ok(schema)
    }

    fn definition(&mut self) -> Result<Definition> {
        let tok = self.advance()?;
        match tok.kind {
            TokenKind::Enum => self.enum_def(),
            TokenKind::Struct => self.aggregate_def(AggregateKind::Struct),
            TokenKind::Table => self.aggregate_def(AggregateKind::Table),
            _ => self.error("Expected 'enum', 'struct' or 'table' to begin a definition", &tok),
        }
    }

    fn enum_def(&mut self) -> Result<Definition> {
        let name = self.expect_identifier("Expected identifier after 'enum'")?;

        let underlying = if self.peek().kind == TokenKind::Colon {
            self.advance()?;
            let ty = self.expect_identifier("Expected type name after ':' in enum definition")?;
            TypeRef::Unresolved(ty)
        } else {
            TypeRef::Unresolved("uint16".to_string())
        };

        self.expect(TokenKind::OpenBrace, "Expected '{' to begin enum body")?;

        let mut members = Vec::new();
        loop {
            if self.peek().kind == TokenKind::CloseBrace {
                self.advance()?;
                break;
            }
            if !members.is_empty() {
                self.expect(TokenKind::Comma, "Expected ',' between enum members")?;
                if self.peek().kind == TokenKind::CloseBrace {
                    self.advance()?;
                    break;
                }
            }

            let name = self.expect_identifier("Expected identifier for enum member")?;
            let value = if self.peek().kind == TokenKind::Equals {
                self.advance()?;
                Some(self.expect_number("Expected integer literal after '=' in enum member")?)
            } else {
                None
            };
            members.push(EnumMember { name, value });
        }

        if members.is_empty() {
            return Err(SeriaError::Parse {
                msg: format!("enum {name} must declare at least one member"),
                line: self.current.line,
            });
        }

        Ok(Definition::Enum(EnumDecl {
            name,
            underlying,
            members,
            values: Default::default(),
        }))
    }

    fn aggregate_def(&mut self, kind: AggregateKind) -> Result<Definition> {
        let keyword = if kind == AggregateKind::Struct { "struct" } else { "table" };
        let name = self.expect_identifier(&format!("Expected identifier after '{keyword}'"))?;
        self.expect(TokenKind::OpenBrace, "Expected '{' to begin definition body")?;

        let mut members = Vec::new();
        loop {
            if self.peek().kind == TokenKind::CloseBrace {
                self.advance()?;
                break;
            }
            members.push(self.member()?);
        }

        Ok(Definition::Aggregate(AggregateDecl {
            name,
            kind,
            members,
            table_id: None,
        }))
    }

    /// `member := id COLON type (EQUALS literal)? SEMICOLON` (spec.md § 4.2).
    fn member(&mut self) -> Result<Member> {
        let name = self.expect_identifier("Expected member name")?;
        self.expect(TokenKind::Colon, "Expected ':' after member name")?;
        let (ty, vector) = self.member_type()?;

        let default = if self.peek().kind == TokenKind::Equals {
            self.advance()?;
            let tok = self.advance()?;
            Some(match tok.kind {
                TokenKind::Number(n) => Literal::Int(n),
                TokenKind::Str(s) => Literal::Str(s),
                _ => return self.error("Expected a literal default value after '='", &tok),
            })
        } else {
            None
        };

        self.expect(TokenKind::Semicolon, "Expected ';' after member declaration")?;

        Ok(Member {
            name,
            ty,
            default,
            vector,
            field_id: None,
        })
    }

    /// `type := id | OBRACK id CBRACK | OBRACK id COLON number CBRACK` (spec.md § 4.2).
    fn member_type(&mut self) -> Result<(TypeRef, VectorKind)> {
        if self.peek().kind == TokenKind::OpenBracket {
            self.advance()?;
            let ty_name = self.expect_identifier("Expected type name inside '['")?;
            let vector = if self.peek().kind == TokenKind::Colon {
                self.advance()?;
                let n = self.expect_number("Expected array length after ':' inside '['")?;
                let n: u32 = n.try_into().map_err(|_| SeriaError::Parse {
                    msg: "Fixed array length does not fit in a u32".to_string(),
                    line: self.current.line,
                })?;
                VectorKind::Fixed(n)
            } else {
                VectorKind::Unbounded
            };
            self.expect(TokenKind::CloseBracket, "Expected ']' to close vector type")?;
            Ok((TypeRef::Unresolved(ty_name), vector))
        } else {
            let ty_name = self.expect_identifier("Expected type name")?;
            Ok((TypeRef::Unresolved(ty_name), VectorKind::None))
        }
    }

    /// Advances the token stream and returns the token that was current
    /// before the advance (i.e. the one about to be consumed).
    fn advance(&mut self) -> Result<Token> {
        let fetched = self.scanner.next()?;
        self.current = std::mem::replace(&mut self.next, fetched);
        Ok(self.current.clone())
    }

    fn peek(&self) -> &Token {
        &self.next
    }

    fn expect(&mut self, kind: TokenKind, msg: &str) -> Result<Token> {
        let tok = self.advance()?;
        if tok.kind != kind {
            return self.error(msg, &tok);
        }
        Ok(tok)
    }

    fn expect_identifier(&mut self, msg: &str) -> Result<String> {
        let tok = self.advance()?;
        match tok.kind {
            TokenKind::Identifier(ref s) => Ok(s.clone()),
            _ => self.error(msg, &tok),
        }
    }

    fn expect_number(&mut self, msg: &str) -> Result<u64> {
        let tok = self.advance()?;
        match tok.kind {
            TokenKind::Number(n) => Ok(n),
            _ => self.error(msg, &tok),
        }
    }

    fn error<T>(&self, msg: &str, tok: &Token) -> Result<T> {
        Err(SeriaError::Parse {
            msg: format!("{msg}, got {:?}", tok.kind),
            line: tok.line,
        })
    }
}
