//! Restricted expression evaluator
//!
//! A small allow-listed AST evaluated without any host-language code
//! execution: literals, context identifiers, arithmetic, comparisons,
//! and boolean logic. Used by condition expressions and custom-script
//! transforms.

use serde_json::Value;
use thiserror::Error;

/// Evaluation failure
#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("parse error at offset {0}: {1}")]
    Parse(usize, String),

    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("division by zero")]
    DivisionByZero,
}

/// Expression AST
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dotted identifier resolved against the evaluation context
    Identifier(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Ne,
    And,
    Or,
}

/// Parse an expression string into an AST
pub fn parse(source: &str) -> Result<Expr, EvalError> {
    let mut parser = Parser {
        tokens: tokenize(source)?,
        position: 0,
    };
    let expr = parser.parse_or()?;
    match parser.peek() {
        None => Ok(expr),
        Some((offset, token)) => Err(EvalError::Parse(
            *offset,
            format!("unexpected token {:?}", token),
        )),
    }
}

/// Parse and evaluate in one call
///
/// `resolve` supplies identifier values from the surrounding context.
pub fn evaluate<F>(source: &str, resolve: F) -> Result<Value, EvalError>
where
    F: Fn(&str) -> Option<Value>,
{
    eval(&parse(source)?, &resolve)
}

/// Evaluate a parsed AST
pub fn eval<F>(expr: &Expr, resolve: &F) -> Result<Value, EvalError>
where
    F: Fn(&str) -> Option<Value>,
{
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Identifier(name) => {
            resolve(name).ok_or_else(|| EvalError::UnknownIdentifier(name.clone()))
        }
        Expr::Unary(op, inner) => {
            let value = eval(inner, resolve)?;
            match op {
                UnaryOp::Not => match value {
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    other => Err(EvalError::Type(format!("! requires a bool, got {}", other))),
                },
                UnaryOp::Neg => match as_number(&value) {
                    Some(n) => Ok(number(-n)),
                    None => Err(EvalError::Type(format!(
                        "unary - requires a number, got {}",
                        value
                    ))),
                },
            }
        }
        Expr::Binary(op, left, right) => {
            // Short-circuit the logic operators
            if matches!(op, BinaryOp::And | BinaryOp::Or) {
                let left = expect_bool(eval(left, resolve)?)?;
                return match (op, left) {
                    (BinaryOp::And, false) => Ok(Value::Bool(false)),
                    (BinaryOp::Or, true) => Ok(Value::Bool(true)),
                    _ => Ok(Value::Bool(expect_bool(eval(right, resolve)?)?)),
                };
            }

            let left = eval(left, resolve)?;
            let right = eval(right, resolve)?;
            apply_binary(*op, left, right)
        }
    }
}

fn expect_bool(value: Value) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::Type(format!("expected a bool, got {}", other))),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn number(n: f64) -> Value {
    serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number)
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Add => match (&left, &right) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            _ => numeric_op(op, &left, &right),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            numeric_op(op, &left, &right)
        }
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&left, &right))),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
            let (a, b) = match (as_number(&left), as_number(&right)) {
                (Some(a), Some(b)) => (a, b),
                _ => {
                    return Err(EvalError::Type(format!(
                        "comparison requires numbers, got {} and {}",
                        left, right
                    )))
                }
            };
            let result = match op {
                BinaryOp::Lt => a < b,
                BinaryOp::Lte => a <= b,
                BinaryOp::Gt => a > b,
                BinaryOp::Gte => a >= b,
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("handled before operand evaluation"),
    }
}

fn numeric_op(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let (a, b) = match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(EvalError::Type(format!(
                "arithmetic requires numbers, got {} and {}",
                left, right
            )))
        }
    };
    match op {
        BinaryOp::Add => Ok(number(a + b)),
        BinaryOp::Sub => Ok(number(a - b)),
        BinaryOp::Mul => Ok(number(a * b)),
        BinaryOp::Div | BinaryOp::Rem if b == 0.0 => Err(EvalError::DivisionByZero),
        BinaryOp::Div => Ok(number(a / b)),
        BinaryOp::Rem => Ok(number(a % b)),
        _ => unreachable!(),
    }
}

/// Equality with numeric awareness: 1 == 1.0, otherwise strict
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (as_number(left), as_number(right)) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

// ── Tokenizer ──

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    String(String),
    Identifier(String),
    True,
    False,
    Null,
    LParen,
    RParen,
    Op(BinaryOp),
    Not,
    Minus,
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>, EvalError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\n' | '\r' => i += 1,
            '(' => {
                tokens.push((i, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((i, Token::RParen));
                i += 1;
            }
            '+' => {
                tokens.push((i, Token::Op(BinaryOp::Add)));
                i += 1;
            }
            '-' => {
                tokens.push((i, Token::Minus));
                i += 1;
            }
            '*' => {
                tokens.push((i, Token::Op(BinaryOp::Mul)));
                i += 1;
            }
            '/' => {
                tokens.push((i, Token::Op(BinaryOp::Div)));
                i += 1;
            }
            '%' => {
                tokens.push((i, Token::Op(BinaryOp::Rem)));
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push((i, Token::Op(BinaryOp::Ne)));
                    i += 2;
                } else {
                    tokens.push((i, Token::Not));
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push((i, Token::Op(BinaryOp::Eq)));
                    i += 2;
                } else {
                    return Err(EvalError::Parse(i, "expected ==".to_string()));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push((i, Token::Op(BinaryOp::Lte)));
                    i += 2;
                } else {
                    tokens.push((i, Token::Op(BinaryOp::Lt)));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push((i, Token::Op(BinaryOp::Gte)));
                    i += 2;
                } else {
                    tokens.push((i, Token::Op(BinaryOp::Gt)));
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push((i, Token::Op(BinaryOp::And)));
                    i += 2;
                } else {
                    return Err(EvalError::Parse(i, "expected &&".to_string()));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push((i, Token::Op(BinaryOp::Or)));
                    i += 2;
                } else {
                    return Err(EvalError::Parse(i, "expected ||".to_string()));
                }
            }
            '\'' | '"' => {
                let quote = c;
                let start = i;
                i += 1;
                let mut text = String::new();
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&'\\') => {
                            if let Some(&escaped) = chars.get(i + 1) {
                                text.push(escaped);
                                i += 2;
                            } else {
                                return Err(EvalError::Parse(i, "dangling escape".to_string()));
                            }
                        }
                        Some(&ch) => {
                            text.push(ch);
                            i += 1;
                        }
                        None => {
                            return Err(EvalError::Parse(start, "unterminated string".to_string()))
                        }
                    }
                }
                tokens.push((start, Token::String(text)));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| EvalError::Parse(start, format!("bad number {}", text)))?;
                tokens.push((start, Token::Number(value)));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let token = match text.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    _ => Token::Identifier(text),
                };
                tokens.push((start, token));
            }
            other => {
                return Err(EvalError::Parse(i, format!("unexpected character {:?}", other)))
            }
        }
    }

    Ok(tokens)
}

// ── Recursive-descent parser ──

struct Parser {
    tokens: Vec<(usize, Token)>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(usize, Token)> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn eat_op(&mut self, ops: &[BinaryOp]) -> Option<BinaryOp> {
        if let Some((_, Token::Op(op))) = self.peek() {
            if ops.contains(op) {
                let op = *op;
                self.position += 1;
                return Some(op);
            }
        }
        None
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_and()?;
        while self.eat_op(&[BinaryOp::Or]).is_some() {
            let right = self.parse_and()?;
            left = Expr::Binary(BinaryOp::Or, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_equality()?;
        while self.eat_op(&[BinaryOp::And]).is_some() {
            let right = self.parse_equality()?;
            left = Expr::Binary(BinaryOp::And, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_comparison()?;
        while let Some(op) = self.eat_op(&[BinaryOp::Eq, BinaryOp::Ne]) {
            let right = self.parse_comparison()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_additive()?;
        while let Some(op) =
            self.eat_op(&[BinaryOp::Lt, BinaryOp::Lte, BinaryOp::Gt, BinaryOp::Gte])
        {
            let right = self.parse_additive()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            if self.eat_op(&[BinaryOp::Add]).is_some() {
                let right = self.parse_multiplicative()?;
                left = Expr::Binary(BinaryOp::Add, Box::new(left), Box::new(right));
            } else if matches!(self.peek(), Some((_, Token::Minus))) {
                self.position += 1;
                let right = self.parse_multiplicative()?;
                left = Expr::Binary(BinaryOp::Sub, Box::new(left), Box::new(right));
            } else {
                break;
            }
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.eat_op(&[BinaryOp::Mul, BinaryOp::Div, BinaryOp::Rem]) {
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            Some((_, Token::Not)) => {
                self.position += 1;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            Some((_, Token::Minus)) => {
                self.position += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        match self.advance() {
            Some((_, Token::Number(n))) => Ok(Expr::Literal(number(n))),
            Some((_, Token::String(s))) => Ok(Expr::Literal(Value::String(s))),
            Some((_, Token::True)) => Ok(Expr::Literal(Value::Bool(true))),
            Some((_, Token::False)) => Ok(Expr::Literal(Value::Bool(false))),
            Some((_, Token::Null)) => Ok(Expr::Literal(Value::Null)),
            Some((_, Token::Identifier(name))) => Ok(Expr::Identifier(name)),
            Some((offset, Token::LParen)) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some((_, Token::RParen)) => Ok(inner),
                    _ => Err(EvalError::Parse(offset, "unclosed parenthesis".to_string())),
                }
            }
            Some((offset, token)) => Err(EvalError::Parse(
                offset,
                format!("unexpected token {:?}", token),
            )),
            None => Err(EvalError::Parse(0, "empty expression".to_string())),
        }
    }
}
