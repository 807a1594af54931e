//! Metadata conditions: which master images a target accepts.
//!
//! Conditions are compiled once, when the configuration is loaded, from a
//! small expression language:
//!
//! ```text
//! expr    := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | primary
//! primary := "(" expr ")" | "true" | "false" | "public" | "private"
//!          | "has_metadata"
//!          | "has" "(" STRING ")"
//!          | field ("==" | "!=" | "startswith" | "endswith") STRING
//! field   := "name" | "status" | "owner" | "checksum" | "prop" "(" STRING ")"
//! ```
//!
//! `has_metadata` is true when the image carries at least one property of the
//! target's `metadata_set`. Strings use single or double quotes.
//!
//! Example: `public and (has("nid") or name startswith "base_")`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::error::ConditionError;
use crate::image::Image;

type Predicate = dyn Fn(&Image, &BTreeSet<String>) -> bool + Send + Sync;

/// A compiled predicate over `(image, metadata_set)`.
#[derive(Clone)]
pub enum MetadataCondition {
    Expr { source: String, expr: Arc<Expr> },
    Custom(Arc<Predicate>),
}

impl MetadataCondition {
    /// Compile an expression.
    pub fn parse(source: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(ConditionError::Unexpected(token.to_string()));
        }
        Ok(Self::Expr {
            source: source.to_string(),
            expr: Arc::new(expr),
        })
    }

    /// Wrap a programmatic predicate.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Image, &BTreeSet<String>) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    pub fn evaluate(&self, image: &Image, metadata_set: &BTreeSet<String>) -> bool {
        match self {
            MetadataCondition::Expr { expr, .. } => expr.eval(image, metadata_set),
            MetadataCondition::Custom(f) => f(image, metadata_set),
        }
    }
}

impl fmt::Debug for MetadataCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataCondition::Expr { source, .. } => {
                f.debug_tuple("MetadataCondition").field(source).finish()
            }
            MetadataCondition::Custom(_) => f.write_str("MetadataCondition(<fn>)"),
        }
    }
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Name,
    Status,
    Owner,
    Checksum,
    Property(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    StartsWith,
    EndsWith,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Literal(bool),
    Public,
    HasMetadata,
    Has(String),
    Compare {
        field: Field,
        op: CompareOp,
        value: String,
    },
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self, image: &Image, metadata_set: &BTreeSet<String>) -> bool {
        match self {
            Expr::Literal(b) => *b,
            Expr::Public => image.is_public,
            Expr::HasMetadata => metadata_set
                .iter()
                .any(|key| image.user_properties.contains_key(key)),
            Expr::Has(key) => image.user_properties.contains_key(key),
            Expr::Compare { field, op, value } => {
                let actual = match field {
                    Field::Name => Some(image.name.as_str()),
                    Field::Status => Some(image.status.as_str()),
                    Field::Owner => Some(image.owner.as_str()),
                    Field::Checksum => Some(image.checksum.as_str()),
                    Field::Property(key) => image.property(key),
                };
                match (op, actual) {
                    (CompareOp::Eq, Some(actual)) => actual == value,
                    (CompareOp::Ne, Some(actual)) => actual != value,
                    (CompareOp::Ne, None) => true,
                    (CompareOp::StartsWith, Some(actual)) => actual.starts_with(value.as_str()),
                    (CompareOp::EndsWith, Some(actual)) => actual.ends_with(value.as_str()),
                    (_, None) => false,
                }
            }
            Expr::Not(inner) => !inner.eval(image, metadata_set),
            Expr::And(a, b) => a.eval(image, metadata_set) && b.eval(image, metadata_set),
            Expr::Or(a, b) => a.eval(image, metadata_set) || b.eval(image, metadata_set),
        }
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    LParen,
    RParen,
    EqEq,
    NotEq,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{s}"),
            Token::Str(s) => write!(f, "\"{s}\""),
            Token::LParen => f.write_str("("),
            Token::RParen => f.write_str(")"),
            Token::EqEq => f.write_str("=="),
            Token::NotEq => f.write_str("!="),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, ConditionError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' | '!' => {
                chars.next();
                match chars.next() {
                    Some((_, '=')) if c == '=' => tokens.push(Token::EqEq),
                    Some((_, '=')) => tokens.push(Token::NotEq),
                    _ => return Err(ConditionError::InvalidCharacter { ch: c, offset }),
                }
            }
            '"' | '\'' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                for (_, ch) in chars.by_ref() {
                    if ch == c {
                        closed = true;
                        break;
                    }
                    value.push(ch);
                }
                if !closed {
                    return Err(ConditionError::UnterminatedString { offset });
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, ch)) = chars.peek() {
                    if ch.is_ascii_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(ConditionError::InvalidCharacter { ch: other, offset }),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == keyword)
    }

    fn expect(&mut self, expected: Token) -> Result<(), ConditionError> {
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(ConditionError::Unexpected(token.to_string())),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }

    fn expect_string(&mut self) -> Result<String, ConditionError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(s),
            Some(token) => Err(ConditionError::Unexpected(token.to_string())),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_and()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_unary()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        let token = self.next().ok_or(ConditionError::UnexpectedEnd)?;
        let ident = match token {
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                return Ok(inner);
            }
            Token::Ident(ident) => ident,
            other => return Err(ConditionError::Unexpected(other.to_string())),
        };

        let field = match ident.as_str() {
            "true" => return Ok(Expr::Literal(true)),
            "false" => return Ok(Expr::Literal(false)),
            "public" => return Ok(Expr::Public),
            "private" => return Ok(Expr::Not(Box::new(Expr::Public))),
            "has_metadata" => return Ok(Expr::HasMetadata),
            "has" => {
                self.expect(Token::LParen)?;
                let key = self.expect_string()?;
                self.expect(Token::RParen)?;
                return Ok(Expr::Has(key));
            }
            "name" => Field::Name,
            "status" => Field::Status,
            "owner" => Field::Owner,
            "checksum" => Field::Checksum,
            "prop" => {
                self.expect(Token::LParen)?;
                let key = self.expect_string()?;
                self.expect(Token::RParen)?;
                Field::Property(key)
            }
            other => return Err(ConditionError::UnknownIdentifier(other.to_string())),
        };

        let op = match self.next() {
            Some(Token::EqEq) => CompareOp::Eq,
            Some(Token::NotEq) => CompareOp::Ne,
            Some(Token::Ident(op)) if op == "startswith" => CompareOp::StartsWith,
            Some(Token::Ident(op)) if op == "endswith" => CompareOp::EndsWith,
            Some(token) => return Err(ConditionError::Unexpected(token.to_string())),
            None => return Err(ConditionError::UnexpectedEnd),
        };
        let value = self.expect_string()?;
        Ok(Expr::Compare { field, op, value })
    }
}
