//! Textual predicate syntax.
//!
//! Grammar (keywords are case-insensitive):
//!
//! ```text
//! expr       := and ( (OR | "||") and )*
//! and        := unary ( (AND | "&&") unary )*
//! unary      := (NOT | "!") unary | primary
//! primary    := "(" expr ")" | TRUEPREDICATE | FALSEPREDICATE | comparison
//! comparison := IDENT op literal
//!             | IDENT (CONTAINS | BEGINSWITH) flags? string
//!             | IDENT IN "{" (literal ("," literal)*)? "}"
//! op         := "==" | "=" | "!=" | "<>" | "<" | "<=" | ">" | ">="
//! flags      := "[" ("c" | "d")* "]"
//! literal    := number | string | TRUE | FALSE | NIL | NULL
//! ```
//!
//! The `d` flag is accepted and ignored; only ASCII case folding (`c`) is
//! supported.

use crate::model::value::Value;
use crate::query::predicate::{CompareOp, Predicate};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Malformed predicate text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateParseError {
    /// Byte offset where parsing failed.
    pub position: usize,
    pub message: String,
}

impl Display for PredicateParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "at offset {}: {}", self.position, self.message)
    }
}

impl Error for PredicateParseError {}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(Value),
    Text(String),
    Flags(String),
    Op(CompareOp),
    And,
    Or,
    Not,
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    position: usize,
}

/// Parses predicate text into a `Predicate` tree.
pub fn parse_predicate(text: &str) -> Result<Predicate, PredicateParseError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        cursor: 0,
        end: text.len(),
    };
    let predicate = parser.parse_or()?;
    match parser.peek() {
        None => Ok(predicate),
        Some(spanned) => Err(PredicateParseError {
            position: spanned.position,
            message: "unexpected trailing input".to_string(),
        }),
    }
}

fn tokenize(text: &str) -> Result<Vec<Spanned>, PredicateParseError> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut tokens = Vec::new();
    let mut index = 0;

    while index < chars.len() {
        let (position, ch) = chars[index];
        let next = chars.get(index + 1).map(|(_, c)| *c);
        let mut push = |token: Token, width: usize| {
            tokens.push(Spanned { token, position });
            width
        };

        let consumed = match (ch, next) {
            (c, _) if c.is_whitespace() => 1,
            ('(', _) => push(Token::LParen, 1),
            (')', _) => push(Token::RParen, 1),
            ('{', _) => push(Token::LBrace, 1),
            ('}', _) => push(Token::RBrace, 1),
            (',', _) => push(Token::Comma, 1),
            ('=', Some('=')) => push(Token::Op(CompareOp::Eq), 2),
            ('=', _) => push(Token::Op(CompareOp::Eq), 1),
            ('!', Some('=')) => push(Token::Op(CompareOp::Ne), 2),
            ('!', _) => push(Token::Not, 1),
            ('<', Some('>')) => push(Token::Op(CompareOp::Ne), 2),
            ('<', Some('=')) => push(Token::Op(CompareOp::Le), 2),
            ('<', _) => push(Token::Op(CompareOp::Lt), 1),
            ('>', Some('=')) => push(Token::Op(CompareOp::Ge), 2),
            ('>', _) => push(Token::Op(CompareOp::Gt), 1),
            ('&', Some('&')) => push(Token::And, 2),
            ('|', Some('|')) => push(Token::Or, 2),
            ('[', _) => {
                let (flags, width) = read_until(&chars, index + 1, ']').ok_or_else(|| {
                    PredicateParseError {
                        position,
                        message: "unterminated operator flags".to_string(),
                    }
                })?;
                push(Token::Flags(flags), width + 2)
            }
            ('\'' | '"', _) => {
                let (literal, width) =
                    read_until(&chars, index + 1, ch).ok_or_else(|| PredicateParseError {
                        position,
                        message: "unterminated string literal".to_string(),
                    })?;
                push(Token::Text(literal), width + 2)
            }
            (c, _) if c.is_ascii_digit() || (c == '-' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let width = chars[index + 1..]
                    .iter()
                    .take_while(|(_, c)| c.is_ascii_digit() || *c == '.')
                    .count()
                    + 1;
                let raw: String = chars[index..index + width].iter().map(|(_, c)| c).collect();
                let number = parse_number(&raw).ok_or_else(|| PredicateParseError {
                    position,
                    message: format!("invalid number `{raw}`"),
                })?;
                push(Token::Number(number), width)
            }
            (c, _) if c.is_ascii_alphabetic() || c == '_' => {
                let width = chars[index..]
                    .iter()
                    .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
                    .count();
                let word: String = chars[index..index + width].iter().map(|(_, c)| c).collect();
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    _ => Token::Ident(word),
                };
                push(token, width)
            }
            (other, _) => {
                return Err(PredicateParseError {
                    position,
                    message: format!("unexpected character `{other}`"),
                })
            }
        };
        index += consumed;
    }

    Ok(tokens)
}

/// Reads chars from `start` up to (not including) `terminator`.
///
/// Returns the collected text and its width in chars.
fn read_until(chars: &[(usize, char)], start: usize, terminator: char) -> Option<(String, usize)> {
    let rest = chars.get(start..)?;
    let width = rest.iter().position(|(_, c)| *c == terminator)?;
    Some((rest[..width].iter().map(|(_, c)| c).collect(), width))
}

fn parse_number(raw: &str) -> Option<Value> {
    if raw.contains('.') {
        raw.parse::<f64>().ok().and_then(Value::real)
    } else {
        raw.parse::<i64>().ok().map(Value::Integer)
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    cursor: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.cursor)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek().is_some_and(|spanned| &spanned.token == token) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn error_here(&self, message: impl Into<String>) -> PredicateParseError {
        PredicateParseError {
            position: self.peek().map_or(self.end, |spanned| spanned.position),
            message: message.into(),
        }
    }

    fn parse_or(&mut self) -> Result<Predicate, PredicateParseError> {
        let mut parts = vec![self.parse_and()?];
        while self.eat(&Token::Or) {
            parts.push(self.parse_and()?);
        }
        Ok(collapse(parts, Predicate::Or))
    }

    fn parse_and(&mut self) -> Result<Predicate, PredicateParseError> {
        let mut parts = vec![self.parse_unary()?];
        while self.eat(&Token::And) {
            parts.push(self.parse_unary()?);
        }
        Ok(collapse(parts, Predicate::And))
    }

    fn parse_unary(&mut self) -> Result<Predicate, PredicateParseError> {
        if self.eat(&Token::Not) {
            return Ok(self.parse_unary()?.negate());
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Predicate, PredicateParseError> {
        if self.eat(&Token::LParen) {
            let inner = self.parse_or()?;
            if !self.eat(&Token::RParen) {
                return Err(self.error_here("expected `)`"));
            }
            return Ok(inner);
        }

        let field = match self.peek().map(|spanned| spanned.token.clone()) {
            Some(Token::Ident(word)) => {
                self.cursor += 1;
                word
            }
            _ => return Err(self.error_here("expected a field name")),
        };

        match field.to_ascii_uppercase().as_str() {
            "TRUEPREDICATE" => return Ok(Predicate::And(Vec::new())),
            "FALSEPREDICATE" => return Ok(Predicate::Or(Vec::new())),
            _ => {}
        }

        let operator = self.peek().map(|spanned| spanned.token.clone());
        if operator.is_some() {
            self.cursor += 1;
        }
        match operator {
            Some(Token::Op(op)) => {
                let value = self.parse_literal()?;
                Ok(Predicate::compare(field, op, value))
            }
            Some(Token::Ident(keyword)) => match keyword.to_ascii_uppercase().as_str() {
                "CONTAINS" => {
                    let case_insensitive = self.parse_flags()?;
                    let needle = self.parse_text()?;
                    Ok(Predicate::Contains {
                        field,
                        needle,
                        case_insensitive,
                    })
                }
                "BEGINSWITH" => {
                    let case_insensitive = self.parse_flags()?;
                    let prefix = self.parse_text()?;
                    Ok(Predicate::BeginsWith {
                        field,
                        prefix,
                        case_insensitive,
                    })
                }
                "IN" => {
                    let values = self.parse_list()?;
                    Ok(Predicate::In { field, values })
                }
                _ => {
                    self.cursor -= 1;
                    Err(self.error_here(format!("unknown operator `{keyword}`")))
                }
            },
            Some(_) => {
                self.cursor -= 1;
                Err(self.error_here(format!("expected an operator after `{field}`")))
            }
            None => Err(self.error_here(format!("expected an operator after `{field}`"))),
        }
    }

    /// Returns whether the `c` (case-insensitive) flag is present.
    fn parse_flags(&mut self) -> Result<bool, PredicateParseError> {
        let flags = match self.peek().map(|spanned| &spanned.token) {
            Some(Token::Flags(flags)) => flags.to_ascii_lowercase(),
            _ => return Ok(false),
        };
        if let Some(bad) = flags.chars().find(|c| !matches!(c, 'c' | 'd')) {
            return Err(self.error_here(format!("unsupported operator flag `{bad}`")));
        }
        self.cursor += 1;
        Ok(flags.contains('c'))
    }

    fn parse_text(&mut self) -> Result<String, PredicateParseError> {
        match self.peek().map(|spanned| spanned.token.clone()) {
            Some(Token::Text(text)) => {
                self.cursor += 1;
                Ok(text)
            }
            _ => Err(self.error_here("expected a string literal")),
        }
    }

    fn parse_list(&mut self) -> Result<Vec<Value>, PredicateParseError> {
        if !self.eat(&Token::LBrace) {
            return Err(self.error_here("expected `{` to start an IN list"));
        }
        let mut values = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(values);
        }
        loop {
            values.push(self.parse_literal()?);
            if self.eat(&Token::RBrace) {
                return Ok(values);
            }
            if !self.eat(&Token::Comma) {
                return Err(self.error_here("expected `,` or `}` in IN list"));
            }
        }
    }

    fn parse_literal(&mut self) -> Result<Value, PredicateParseError> {
        let value = match self.peek().map(|spanned| spanned.token.clone()) {
            Some(Token::Number(value)) => value,
            Some(Token::Text(text)) => Value::Text(text),
            Some(Token::Ident(word)) => match word.to_ascii_uppercase().as_str() {
                "TRUE" | "YES" => Value::Bool(true),
                "FALSE" | "NO" => Value::Bool(false),
                "NIL" | "NULL" => Value::Null,
                _ => return Err(self.error_here(format!("expected a literal, found `{word}`"))),
            },
            _ => return Err(self.error_here("expected a literal")),
        };
        self.cursor += 1;
        Ok(value)
    }
}

fn collapse(mut parts: Vec<Predicate>, wrap: fn(Vec<Predicate>) -> Predicate) -> Predicate {
    if parts.len() == 1 {
        parts.remove(0)
    } else {
        wrap(parts)
    }
}
