//! SQL rule filter parser and evaluator
//!
//! Supports the subset of the Service Bus SQL filter grammar that applies
//! to string-valued message metadata:
//! - comparisons: `=`, `<>`, `!=`, `<`, `<=`, `>`, `>=`
//! - `AND`, `OR`, `NOT`, parentheses
//! - `IS [NOT] NULL`, `[NOT] LIKE 'pattern'`, `[NOT] IN (...)`, `EXISTS(prop)`
//! - literals: `'string'`, numbers, `TRUE`, `FALSE`, `NULL`
//!
//! Identifiers prefixed with `sys.` resolve to system properties
//! (`MessageId`, `Label`/`Subject`, `CorrelationId`, `ContentType`);
//! `user.` or bare identifiers resolve to application properties.

use std::cmp::Ordering;
use thiserror::Error;

use crate::types::OutgoingMessage;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Empty filter expression")]
    Empty,

    #[error("Unexpected character '{0}' at position {1}")]
    UnexpectedChar(char, usize),

    #[error("Unterminated literal starting at position {0}")]
    UnterminatedLiteral(usize),

    #[error("Unexpected token: {0}")]
    UnexpectedToken(String),

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Filter nests deeper than {0} levels")]
    TooDeep(usize),

    #[error("Filter has more than {0} AND/OR operators")]
    TooComplex(usize),
}

/// Deepest allowed run of parentheses and `NOT`
pub const MAX_NESTING: usize = 32;

/// Most `AND`/`OR` operators one filter may combine
pub const MAX_OPERATORS: usize = 256;

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq, // =
    Ne, // <> or !=
    Lt, // <
    Le, // <=
    Gt, // >
    Ge, // >=
}

/// A literal or property reference
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Property(PropertyRef),
    Str(String),
    Number(f64),
    Bool(bool),
    Null,
}

/// Property lookup target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyRef {
    System(String),
    User(String),
}

/// Parsed filter condition tree
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Comparison {
        left: Operand,
        op: ComparisonOp,
        right: Operand,
    },
    IsNull {
        operand: Operand,
        negated: bool,
    },
    Like {
        operand: Operand,
        pattern: String,
        negated: bool,
    },
    In {
        operand: Operand,
        values: Vec<Operand>,
        negated: bool,
    },
    Exists(PropertyRef),
    Literal(bool),
    And(Box<Condition>, Box<Condition>),
    Or(Box<Condition>, Box<Condition>),
    Not(Box<Condition>),
}

/// A compiled SQL filter
#[derive(Debug, Clone, PartialEq)]
pub struct SqlFilter {
    expression: String,
    root: Condition,
}

impl SqlFilter {
    /// Parse a filter expression
    pub fn parse(expression: &str) -> Result<Self, FilterError> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Err(FilterError::Empty);
        }

        let tokens = tokenize(expression)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
            operators: 0,
        };
        let root = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(FilterError::UnexpectedToken(token.describe()));
        }

        Ok(Self {
            expression: expression.to_string(),
            root,
        })
    }

    /// The `1=1` filter used by the default rule
    pub fn match_all() -> Self {
        Self {
            expression: "1=1".to_string(),
            root: Condition::Literal(true),
        }
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn condition(&self) -> &Condition {
        &self.root
    }

    /// Evaluate against a message's metadata; unknown comparisons are false
    pub fn matches(&self, message: &OutgoingMessage) -> bool {
        evaluate(&self.root, message)
    }
}

// === Tokenizer ===

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    Op(ComparisonOp),
    LParen,
    RParen,
    Comma,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(s) => s.clone(),
            Token::Str(s) => format!("'{}'", s),
            Token::Number(n) => n.to_string(),
            Token::Op(op) => format!("{:?}", op),
            Token::LParen => "(".to_string(),
            Token::RParen => ")".to_string(),
            Token::Comma => ",".to_string(),
        }
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        matches!(self, Token::Ident(s) if s.eq_ignore_ascii_case(keyword))
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, FilterError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(ComparisonOp::Eq));
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(ComparisonOp::Ne));
                i += 2;
            }
            '<' => match chars.get(i + 1) {
                Some('>') => {
                    tokens.push(Token::Op(ComparisonOp::Ne));
                    i += 2;
                }
                Some('=') => {
                    tokens.push(Token::Op(ComparisonOp::Le));
                    i += 2;
                }
                _ => {
                    tokens.push(Token::Op(ComparisonOp::Lt));
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(ComparisonOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(ComparisonOp::Gt));
                    i += 1;
                }
            }
            '\'' => {
                let start = i;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(FilterError::UnterminatedLiteral(start)),
                        // '' escapes a quote
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            value.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            '[' => {
                let start = i;
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == ']')
                    .ok_or(FilterError::UnterminatedLiteral(start))?;
                tokens.push(Token::Ident(chars[i + 1..i + end].iter().collect()));
                i += end + 1;
            }
            c if c.is_ascii_digit()
                || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) =>
            {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| FilterError::UnexpectedToken(text.clone()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '$'))
                {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(FilterError::UnexpectedChar(other, i)),
        }
    }

    Ok(tokens)
}

// === Parser ===

const RESERVED: [&str; 9] = [
    "AND", "OR", "NOT", "IS", "NULL", "LIKE", "IN", "TRUE", "FALSE",
];

// `depth` and `operators` cap how deep the condition tree can grow
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    operators: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, FilterError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(FilterError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), FilterError> {
        let token = self.next()?;
        if &token == expected {
            Ok(())
        } else {
            Err(FilterError::UnexpectedToken(token.describe()))
        }
    }

    fn descend(&mut self) -> Result<(), FilterError> {
        if self.depth >= MAX_NESTING {
            return Err(FilterError::TooDeep(MAX_NESTING));
        }
        self.depth += 1;
        Ok(())
    }

    fn count_operator(&mut self) -> Result<(), FilterError> {
        if self.operators >= MAX_OPERATORS {
            return Err(FilterError::TooComplex(MAX_OPERATORS));
        }
        self.operators += 1;
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Condition, FilterError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("OR") {
            self.count_operator()?;
            let right = self.parse_and()?;
            left = Condition::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Condition, FilterError> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("AND") {
            self.count_operator()?;
            let right = self.parse_not()?;
            left = Condition::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Condition, FilterError> {
        if self.eat_keyword("NOT") {
            self.descend()?;
            let inner = self.parse_not()?;
            self.depth -= 1;
            return Ok(Condition::Not(Box::new(inner)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Condition, FilterError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                self.descend()?;
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                self.depth -= 1;
                return Ok(inner);
            }
            Some(t) if t.is_keyword("EXISTS") => {
                self.pos += 1;
                self.expect(&Token::LParen)?;
                let operand = self.parse_operand()?;
                self.expect(&Token::RParen)?;
                return match operand {
                    Operand::Property(property) => Ok(Condition::Exists(property)),
                    _ => Err(FilterError::UnexpectedToken(
                        "EXISTS requires a property".to_string(),
                    )),
                };
            }
            _ => {}
        }

        let operand = self.parse_operand()?;

        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.parse_operand()?;
            return Ok(Condition::Comparison {
                left: operand,
                op,
                right,
            });
        }

        if self.eat_keyword("IS") {
            let negated = self.eat_keyword("NOT");
            if !self.eat_keyword("NULL") {
                return Err(self.unexpected());
            }
            return Ok(Condition::IsNull { operand, negated });
        }

        let negated = self.eat_keyword("NOT");
        if self.eat_keyword("LIKE") {
            return match self.next()? {
                Token::Str(pattern) => Ok(Condition::Like {
                    operand,
                    pattern,
                    negated,
                }),
                other => Err(FilterError::UnexpectedToken(other.describe())),
            };
        }
        if self.eat_keyword("IN") {
            self.expect(&Token::LParen)?;
            let mut values = vec![self.parse_operand()?];
            while self.peek() == Some(&Token::Comma) {
                self.pos += 1;
                values.push(self.parse_operand()?);
            }
            self.expect(&Token::RParen)?;
            return Ok(Condition::In {
                operand,
                values,
                negated,
            });
        }
        if negated {
            return Err(self.unexpected());
        }

        // Bare TRUE / FALSE
        match operand {
            Operand::Bool(value) => Ok(Condition::Literal(value)),
            _ => Err(self.unexpected()),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, FilterError> {
        match self.next()? {
            Token::Str(s) => Ok(Operand::Str(s)),
            Token::Number(n) => Ok(Operand::Number(n)),
            Token::Ident(name) => {
                if name.eq_ignore_ascii_case("TRUE") {
                    Ok(Operand::Bool(true))
                } else if name.eq_ignore_ascii_case("FALSE") {
                    Ok(Operand::Bool(false))
                } else if name.eq_ignore_ascii_case("NULL") {
                    Ok(Operand::Null)
                } else if RESERVED.iter().any(|kw| name.eq_ignore_ascii_case(kw)) {
                    Err(FilterError::UnexpectedToken(name))
                } else {
                    Ok(Operand::Property(property_ref(&name)))
                }
            }
            other => Err(FilterError::UnexpectedToken(other.describe())),
        }
    }

    fn unexpected(&self) -> FilterError {
        match self.peek() {
            Some(token) => FilterError::UnexpectedToken(token.describe()),
            None => FilterError::UnexpectedEnd,
        }
    }
}

fn property_ref(name: &str) -> PropertyRef {
    let lower = name.to_ascii_lowercase();
    if lower.starts_with("sys.") {
        PropertyRef::System(name[4..].to_string())
    } else if lower.starts_with("user.") {
        PropertyRef::User(name[5..].to_string())
    } else {
        PropertyRef::User(name.to_string())
    }
}

// === Evaluation ===

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
}

fn resolve(property: &PropertyRef, message: &OutgoingMessage) -> Value {
    let found = match property {
        PropertyRef::System(name) => match name.to_ascii_lowercase().as_str() {
            "messageid" => message.message_id.clone(),
            "label" | "subject" => message.subject.clone(),
            "correlationid" => message.correlation_id.clone(),
            "contenttype" => message.content_type.clone(),
            _ => None,
        },
        PropertyRef::User(name) => message.properties.get(name).cloned().or_else(|| {
            message
                .properties
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.clone())
        }),
    };
    found.map_or(Value::Null, Value::Str)
}

fn value_of(operand: &Operand, message: &OutgoingMessage) -> Value {
    match operand {
        Operand::Property(property) => resolve(property, message),
        Operand::Str(s) => Value::Str(s.clone()),
        Operand::Number(n) => Value::Number(*n),
        Operand::Bool(b) => Value::Bool(*b),
        Operand::Null => Value::Null,
    }
}

/// Order two values; string properties are coerced when compared with
/// numbers or booleans. `None` means the comparison is unknown.
fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Str(b)) => b.trim().parse::<f64>().ok()?.partial_cmp(a).map(Ordering::reverse),
        (Value::Str(a), Value::Number(b)) => a.trim().parse::<f64>().ok()?.partial_cmp(b),
        (Value::Bool(a), Value::Str(b)) => Some(a.cmp(&b.trim().parse::<bool>().ok()?)),
        (Value::Str(a), Value::Bool(b)) => Some(a.trim().parse::<bool>().ok()?.cmp(b)),
        _ => None,
    }
}

fn evaluate(condition: &Condition, message: &OutgoingMessage) -> bool {
    match condition {
        Condition::Literal(value) => *value,
        Condition::Comparison { left, op, right } => {
            let ordering = compare(&value_of(left, message), &value_of(right, message));
            match (ordering, op) {
                (None, _) => false,
                (Some(o), ComparisonOp::Eq) => o == Ordering::Equal,
                (Some(o), ComparisonOp::Ne) => o != Ordering::Equal,
                (Some(o), ComparisonOp::Lt) => o == Ordering::Less,
                (Some(o), ComparisonOp::Le) => o != Ordering::Greater,
                (Some(o), ComparisonOp::Gt) => o == Ordering::Greater,
                (Some(o), ComparisonOp::Ge) => o != Ordering::Less,
            }
        }
        Condition::IsNull { operand, negated } => {
            (value_of(operand, message) == Value::Null) != *negated
        }
        Condition::Like {
            operand,
            pattern,
            negated,
        } => match value_of(operand, message) {
            Value::Str(s) => like_match(&s, pattern) != *negated,
            _ => false,
        },
        Condition::In {
            operand,
            values,
            negated,
        } => {
            let value = value_of(operand, message);
            if value == Value::Null {
                return false;
            }
            let found = values
                .iter()
                .any(|v| compare(&value, &value_of(v, message)) == Some(Ordering::Equal));
            found != *negated
        }
        Condition::Exists(property) => resolve(property, message) != Value::Null,
        Condition::And(a, b) => evaluate(a, message) && evaluate(b, message),
        Condition::Or(a, b) => evaluate(a, message) || evaluate(b, message),
        Condition::Not(inner) => !evaluate(inner, message),
    }
}

/// `%` matches any run of characters, `_` exactly one
fn like_match(value: &str, pattern: &str) -> bool {
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();

    // matched[j]: pattern[..j] matches value[..i]
    let mut matched = vec![false; pattern.len() + 1];
    matched[0] = true;
    for j in 1..=pattern.len() {
        matched[j] = matched[j - 1] && pattern[j - 1] == '%';
    }

    for &ch in &value {
        let mut next = vec![false; pattern.len() + 1];
        for j in 1..=pattern.len() {
            next[j] = match pattern[j - 1] {
                '%' => next[j - 1] || matched[j],
                '_' => matched[j - 1],
                p => matched[j - 1] && p == ch,
            };
        }
        matched = next;
    }

    matched[pattern.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> OutgoingMessage {
        OutgoingMessage::new("payload")
            .with_subject("order-created")
            .with_property("region", "eu-west")
            .with_property("priority", "7")
            .with_property("express", "true")
    }

    fn eval(expr: &str) -> bool {
        SqlFilter::parse(expr).unwrap().matches(&message())
    }

    #[test]
    fn test_match_all_forms() {
        assert!(eval("1=1"));
        assert!(!eval("1=0"));
        assert!(eval("TRUE"));
        assert!(!eval("false"));
        assert!(SqlFilter::match_all().matches(&OutgoingMessage::default()));
    }

    #[test]
    fn test_string_comparisons() {
        assert!(eval("region = 'eu-west'"));
        assert!(eval("user.region <> 'us-east'"));
        assert!(eval("region != 'us-east'"));
        assert!(!eval("region = 'us-east'"));
        assert!(eval("sys.Label = 'order-created'"));
        assert!(eval("sys.Subject = 'order-created'"));
    }

    #[test]
    fn test_numeric_coercion() {
        assert!(eval("priority > 5"));
        assert!(eval("priority >= 7 AND priority <= 7"));
        assert!(!eval("priority < 3"));
        assert!(eval("express = TRUE"));
    }

    #[test]
    fn test_boolean_logic_and_precedence() {
        assert!(eval("region = 'x' OR priority = 7 AND express = true"));
        assert!(!eval("(region = 'x' OR priority = 7) AND express = false"));
        assert!(eval("NOT region = 'x'"));
        assert!(eval("not (priority < 3)"));
    }

    #[test]
    fn test_null_handling() {
        assert!(eval("missing IS NULL"));
        assert!(eval("region IS NOT NULL"));
        assert!(!eval("missing = 'anything'"));
        assert!(!eval("missing <> 'anything'"));
        assert!(eval("EXISTS(region)"));
        assert!(!eval("EXISTS(missing)"));
    }

    #[test]
    fn test_like_and_in() {
        assert!(eval("region LIKE 'eu-%'"));
        assert!(eval("region LIKE 'eu-wes_'"));
        assert!(!eval("region LIKE 'us%'"));
        assert!(eval("region NOT LIKE 'us%'"));
        assert!(eval("region IN ('us-east', 'eu-west')"));
        assert!(eval("priority IN (1, 7)"));
        assert!(eval("region NOT IN ('ap-south')"));
    }

    #[test]
    fn test_quoted_literals_and_brackets() {
        let msg = OutgoingMessage::new("x").with_property("customer name", "O'Brien");
        let filter = SqlFilter::parse("[customer name] = 'O''Brien'").unwrap();
        assert!(filter.matches(&msg));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(SqlFilter::parse("  "), Err(FilterError::Empty));
        assert!(matches!(
            SqlFilter::parse("region = 'eu"),
            Err(FilterError::UnterminatedLiteral(_))
        ));
        assert_eq!(SqlFilter::parse("region ="), Err(FilterError::UnexpectedEnd));
        assert!(SqlFilter::parse("region = 'a' AND").is_err());
        assert!(SqlFilter::parse("region 'a'").is_err());
        assert!(SqlFilter::parse("(region = 'a'").is_err());
        assert!(SqlFilter::parse("region = 'a')").is_err());
        assert!(matches!(
            SqlFilter::parse("region # 'a'"),
            Err(FilterError::UnexpectedChar('#', _))
        ));
        assert!(SqlFilter::parse("AND = 1").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let nested = |levels: usize| {
            format!("{}1=1{}", "(".repeat(levels), ")".repeat(levels))
        };
        assert!(SqlFilter::parse(&nested(MAX_NESTING)).is_ok());
        assert_eq!(
            SqlFilter::parse(&nested(20_000)),
            Err(FilterError::TooDeep(MAX_NESTING))
        );

        let negations = format!("{}TRUE", "NOT ".repeat(20_000));
        assert_eq!(
            SqlFilter::parse(&negations),
            Err(FilterError::TooDeep(MAX_NESTING))
        );
    }

    #[test]
    fn test_operator_limit() {
        let chain = |terms: usize| vec!["1=1"; terms].join(" OR ");
        assert!(SqlFilter::parse(&chain(MAX_OPERATORS + 1)).is_ok());
        assert_eq!(
            SqlFilter::parse(&chain(50_000)),
            Err(FilterError::TooComplex(MAX_OPERATORS))
        );
    }

    #[test]
    fn test_like_matcher() {
        assert!(like_match("", "%"));
        assert!(like_match("abc", "a%c"));
        assert!(like_match("abc", "%%c"));
        assert!(!like_match("abc", "a_"));
        assert!(like_match("abc", "___"));
        assert!(!like_match("", "_"));
    }
}
