//! Content filters and ordering expressions for the loopback bus
//!
//! Filter grammar:
//!
//! ```text
//! expr       := and_expr ( OR and_expr )*
//! and_expr   := unary ( AND unary )*
//! unary      := NOT unary | '(' expr ')' | comparison
//! comparison := path op literal
//! path       := '/' name
//! op         := = | != | <> | < | <= | > | >=
//! literal    := number | 'quoted text' | true | false
//! ```
//!
//! Keywords are case-insensitive. A comparison against a missing field, or
//! a value of a different kind, is false.
//!
//! Ordering expressions are a comma-separated list of `/field [ASC|DESC]`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

use grid_types::value::Value;
use rust_decimal::Decimal;

/// Errors from parsing a filter or ordering expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string literal")]
    UnterminatedString,

    #[error("expected {expected}, found {found}")]
    Expected { expected: &'static str, found: String },

    #[error("trailing input: {0}")]
    TrailingInput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn holds(&self, ord: Ordering) -> bool {
        match self {
            CompareOp::Eq => ord == Ordering::Equal,
            CompareOp::Ne => ord != Ordering::Equal,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Le => ord != Ordering::Greater,
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Ge => ord != Ordering::Less,
        }
    }
}

/// Parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Compare {
        field: String,
        op: CompareOp,
        literal: Value,
    },
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(tok) => Err(FilterError::TrailingInput(tok.describe())),
        }
    }

    /// Evaluate against a record's fields.
    pub fn matches(&self, record: &BTreeMap<String, Value>) -> bool {
        match self {
            Filter::Compare { field, op, literal } => record
                .get(field)
                .and_then(|v| v.compare(literal))
                .map(|ord| op.holds(ord))
                .unwrap_or(false),
            Filter::And(a, b) => a.matches(record) && b.matches(record),
            Filter::Or(a, b) => a.matches(record) || b.matches(record),
            Filter::Not(inner) => !inner.matches(record),
        }
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Filter::parse(s)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(String),
    Op(CompareOp),
    Literal(Value),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Path(p) => format!("path /{}", p),
            Token::Op(op) => format!("operator {:?}", op),
            Token::Literal(v) => format!("literal {}", v),
            Token::And => "AND".to_string(),
            Token::Or => "OR".to_string(),
            Token::Not => "NOT".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
        }
    }
}

fn is_name_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '-' || ch == '.'
}

fn tokenize(input: &str) -> Result<Vec<Token>, FilterError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, ch) = chars[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '/' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_name_char(chars[end].1) {
                    end += 1;
                }
                if end == start {
                    return Err(FilterError::Expected {
                        expected: "field name after '/'",
                        found: "nothing".to_string(),
                    });
                }
                tokens.push(Token::Path(chars[start..end].iter().map(|(_, c)| c).collect()));
                i = end;
            }
            '=' => {
                tokens.push(Token::Op(CompareOp::Eq));
                i += 1;
            }
            '!' | '<' | '>' => {
                let next = chars.get(i + 1).map(|(_, c)| *c);
                let (op, width) = match (ch, next) {
                    ('!', Some('=')) => (CompareOp::Ne, 2),
                    ('<', Some('>')) => (CompareOp::Ne, 2),
                    ('<', Some('=')) => (CompareOp::Le, 2),
                    ('>', Some('=')) => (CompareOp::Ge, 2),
                    ('<', _) => (CompareOp::Lt, 1),
                    ('>', _) => (CompareOp::Gt, 1),
                    _ => return Err(FilterError::UnexpectedChar { ch, offset }),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            '\'' => {
                let mut text = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(FilterError::UnterminatedString),
                        // '' is an escaped quote
                        Some((_, '\'')) if chars.get(j + 1).map(|(_, c)| *c) == Some('\'') => {
                            text.push('\'');
                            j += 2;
                        }
                        Some((_, '\'')) => break,
                        Some((_, c)) => {
                            text.push(*c);
                            j += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(Value::Text(text)));
                i = j + 1;
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                let mut end = i + 1;
                while end < chars.len()
                    && (chars[end].1.is_ascii_digit() || chars[end].1 == '.')
                {
                    end += 1;
                }
                let text: String = chars[start..end].iter().map(|(_, c)| c).collect();
                let number = Decimal::from_str(&text).map_err(|_| FilterError::Expected {
                    expected: "number",
                    found: text.clone(),
                })?;
                tokens.push(Token::Literal(Value::Number(number)));
                i = end;
            }
            c if c.is_alphabetic() => {
                let start = i;
                let mut end = i;
                while end < chars.len() && chars[end].1.is_alphanumeric() {
                    end += 1;
                }
                let word: String = chars[start..end].iter().map(|(_, c)| c).collect();
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    "TRUE" => Token::Literal(Value::Bool(true)),
                    "FALSE" => Token::Literal(Value::Bool(false)),
                    _ => return Err(FilterError::UnexpectedChar { ch: c, offset }),
                };
                tokens.push(token);
                i = end;
            }
            _ => return Err(FilterError::UnexpectedChar { ch, offset }),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn found(tok: Option<Token>) -> String {
        tok.map(|t| t.describe())
            .unwrap_or_else(|| "end of input".to_string())
    }

    fn expr(&mut self) -> Result<Filter, FilterError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Filter::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Filter, FilterError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.unary()?;
            left = Filter::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Filter, FilterError> {
        match self.next() {
            Some(Token::Not) => Ok(Filter::Not(Box::new(self.unary()?))),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(FilterError::Expected {
                        expected: "')'",
                        found: Self::found(other),
                    }),
                }
            }
            Some(Token::Path(field)) => {
                let op = match self.next() {
                    Some(Token::Op(op)) => op,
                    other => {
                        return Err(FilterError::Expected {
                            expected: "comparison operator",
                            found: Self::found(other),
                        })
                    }
                };
                let literal = match self.next() {
                    Some(Token::Literal(v)) => v,
                    other => {
                        return Err(FilterError::Expected {
                            expected: "literal",
                            found: Self::found(other),
                        })
                    }
                };
                Ok(Filter::Compare { field, op, literal })
            }
            other => Err(FilterError::Expected {
                expected: "comparison, NOT or '('",
                found: Self::found(other),
            }),
        }
    }
}

/// One `/field [ASC|DESC]` term of an ordering expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

/// Ordering expression applied to snapshot records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub keys: Vec<SortKey>,
}

impl OrderBy {
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        let mut keys = Vec::new();
        for term in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let mut words = term.split_whitespace();
            let path = words.next().unwrap_or_default();
            let field = path
                .strip_prefix('/')
                .filter(|f| !f.is_empty() && f.chars().all(is_name_char))
                .ok_or_else(|| FilterError::Expected {
                    expected: "/field",
                    found: path.to_string(),
                })?;
            let descending = match words.next().map(|w| w.to_ascii_uppercase()) {
                None => false,
                Some(w) if w == "ASC" => false,
                Some(w) if w == "DESC" => true,
                Some(w) => {
                    return Err(FilterError::Expected {
                        expected: "ASC or DESC",
                        found: w,
                    })
                }
            };
            if let Some(extra) = words.next() {
                return Err(FilterError::TrailingInput(extra.to_string()));
            }
            keys.push(SortKey {
                field: field.to_string(),
                descending,
            });
        }
        Ok(Self { keys })
    }

    /// Compare two records. Missing or incomparable values sort last.
    pub fn compare(&self, a: &BTreeMap<String, Value>, b: &BTreeMap<String, Value>) -> Ordering {
        for key in &self.keys {
            let ord = match (a.get(&key.field), b.get(&key.field)) {
                (Some(x), Some(y)) => match x.compare(y) {
                    Some(ord) if key.descending => ord.reverse(),
                    Some(ord) => ord,
                    None => Ordering::Equal,
                },
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(symbol: &str, bid: i64) -> BTreeMap<String, Value> {
        let mut r = BTreeMap::new();
        r.insert("symbol".to_string(), Value::from(symbol));
        r.insert("bid".to_string(), Value::from(bid));
        r
    }

    #[test]
    fn test_simple_comparisons() {
        let ibm = record("IBM", 100);
        assert!(Filter::parse("/symbol = 'IBM'").unwrap().matches(&ibm));
        assert!(!Filter::parse("/symbol != 'IBM'").unwrap().matches(&ibm));
        assert!(Filter::parse("/symbol <> 'MSFT'").unwrap().matches(&ibm));
        assert!(Filter::parse("/bid > 99.5").unwrap().matches(&ibm));
        assert!(Filter::parse("/bid >= 100").unwrap().matches(&ibm));
        assert!(!Filter::parse("/bid < 100").unwrap().matches(&ibm));
        assert!(Filter::parse("/bid <= 100").unwrap().matches(&ibm));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let f = Filter::parse("/symbol = 'MSFT' AND /bid > 1000 OR /symbol = 'IBM'").unwrap();
        assert!(f.matches(&record("IBM", 1)));
        assert!(!f.matches(&record("MSFT", 1)));
        assert!(f.matches(&record("MSFT", 2000)));
    }

    #[test]
    fn test_parentheses_and_not() {
        let f = Filter::parse("NOT (/symbol = 'IBM' or /symbol = 'MSFT')").unwrap();
        assert!(!f.matches(&record("IBM", 1)));
        assert!(f.matches(&record("KO", 1)));
    }

    #[test]
    fn test_missing_field_never_matches() {
        let f = Filter::parse("/venue = 'NYSE'").unwrap();
        assert!(!f.matches(&record("IBM", 1)));
        let f = Filter::parse("/venue != 'NYSE'").unwrap();
        assert!(!f.matches(&record("IBM", 1)));
    }

    #[test]
    fn test_kind_mismatch_never_matches() {
        let f = Filter::parse("/symbol > 5").unwrap();
        assert!(!f.matches(&record("IBM", 1)));
    }

    #[test]
    fn test_quoted_quote_and_negative_number() {
        let mut r = BTreeMap::new();
        r.insert("name".to_string(), Value::from("O'Neil"));
        r.insert("delta".to_string(), Value::from(-3));
        assert!(Filter::parse("/name = 'O''Neil'").unwrap().matches(&r));
        assert!(Filter::parse("/delta < -2").unwrap().matches(&r));
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Filter::parse("/symbol = 'IBM"),
            Err(FilterError::UnterminatedString)
        ));
        assert!(matches!(
            Filter::parse("/symbol 'IBM'"),
            Err(FilterError::Expected { .. })
        ));
        assert!(matches!(
            Filter::parse("/bid > 1 /ask"),
            Err(FilterError::TrailingInput(_))
        ));
        assert!(matches!(
            Filter::parse("/bid > 1 XOR /ask > 2"),
            Err(FilterError::UnexpectedChar { .. })
        ));
        assert!(Filter::parse("").is_err());
    }

    #[test]
    fn test_order_by_parse_and_compare() {
        let order = OrderBy::parse("/bid DESC, /symbol").unwrap();
        assert_eq!(order.keys.len(), 2);
        assert!(order.keys[0].descending);
        assert!(!order.keys[1].descending);

        let mut rows = vec![record("B", 1), record("A", 5), record("C", 5)];
        rows.sort_by(|a, b| order.compare(a, b));
        let symbols: Vec<_> = rows
            .iter()
            .map(|r| r["symbol"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(symbols, vec!["A", "C", "B"]);
    }

    #[test]
    fn test_order_by_errors() {
        assert!(OrderBy::parse("bid").is_err());
        assert!(OrderBy::parse("/bid SIDEWAYS").is_err());
        assert!(OrderBy::parse("/bid DESC extra").is_err());
    }
}
