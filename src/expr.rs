//! Restricted boolean expression evaluator for rule conditions
//!
//! Rules and movement types used to carry free-form executable strings in
//! the systems this one replaces. Here a condition is parsed once, at
//! registration time, into a small comparison grammar:
//!
//! ```text
//! expr    := or
//! or      := and ("or" and)*
//! and     := unary ("and" unary)*
//! unary   := "not" unary | cmp
//! cmp     := operand (("==" | "!=" | "<" | "<=" | ">" | ">=") operand)?
//! operand := "(" expr ")" | ident | number | string | "true" | "false"
//! ```
//!
//! Identifiers resolve against a field scope supplied at evaluation time.
//! There is no function call, no assignment, no side effect of any kind.

use std::collections::BTreeMap;

use crate::error::ValidationError;

/// A field value a condition can compare against.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Num(f64),
    Str(String),
    Bool(bool),
}

/// Named fields exposed to a condition.
pub type Scope = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Field(String),
    Literal(Value),
    Cmp {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

/// A parsed, reusable condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    root: Expr,
}

/// Evaluation fault. Callers gate the rule off and log, they never fail
/// a transition over one of these.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum EvalError {
    #[error("unknown field {0:?}")]
    UnknownField(String),
    #[error("cannot compare {lhs} with {rhs}")]
    TypeMismatch {
        lhs: &'static str,
        rhs: &'static str,
    },
    #[error("expression does not yield a boolean")]
    NotBoolean,
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Bool(_) => "bool",
        }
    }
}

impl Condition {
    /// Parse a condition string. Malformed input is refused here, before
    /// the owning rule or movement type is ever registered.
    pub fn parse(source: &str) -> Result<Self, ValidationError> {
        let tokens = tokenize(source).map_err(|reason| ValidationError::MalformedCondition {
            expr: source.to_string(),
            reason,
        })?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser
            .expr()
            .and_then(|root| {
                if parser.pos == parser.tokens.len() {
                    Ok(root)
                } else {
                    Err(format!("unexpected trailing input at token {}", parser.pos))
                }
            })
            .map_err(|reason| ValidationError::MalformedCondition {
                expr: source.to_string(),
                reason,
            })?;

        Ok(Self {
            source: source.to_string(),
            root,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against a field scope.
    pub fn evaluate(&self, scope: &Scope) -> Result<bool, EvalError> {
        match eval(&self.root, scope)? {
            Value::Bool(b) => Ok(b),
            _ => Err(EvalError::NotBoolean),
        }
    }
}

fn eval(expr: &Expr, scope: &Scope) -> Result<Value, EvalError> {
    match expr {
        Expr::Field(name) => scope
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownField(name.clone())),
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Cmp { op, lhs, rhs } => {
            let lhs = eval(lhs, scope)?;
            let rhs = eval(rhs, scope)?;
            compare(*op, &lhs, &rhs).map(Value::Bool)
        }
        Expr::And(a, b) => {
            let a = truthy(eval(a, scope)?)?;
            if !a {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(eval(b, scope)?)?))
        }
        Expr::Or(a, b) => {
            let a = truthy(eval(a, scope)?)?;
            if a {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(eval(b, scope)?)?))
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(eval(inner, scope)?)?)),
    }
}

fn truthy(value: Value) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(b),
        _ => Err(EvalError::NotBoolean),
    }
}

fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> Result<bool, EvalError> {
    match (lhs, rhs) {
        (Value::Num(a), Value::Num(b)) => Ok(match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }),
        (Value::Str(a), Value::Str(b)) => match op {
            CmpOp::Eq => Ok(a == b),
            CmpOp::Ne => Ok(a != b),
            // ordering is only defined for numbers
            _ => Err(EvalError::TypeMismatch {
                lhs: "string",
                rhs: "string",
            }),
        },
        (Value::Bool(a), Value::Bool(b)) => match op {
            CmpOp::Eq => Ok(a == b),
            CmpOp::Ne => Ok(a != b),
            _ => Err(EvalError::TypeMismatch {
                lhs: "bool",
                rhs: "bool",
            }),
        },
        _ => Err(EvalError::TypeMismatch {
            lhs: lhs.kind(),
            rhs: rhs.kind(),
        }),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Str(String),
    True,
    False,
    And,
    Or,
    Not,
    Op(CmpOp),
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
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
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Eq));
                    i += 2;
                } else {
                    return Err("single '=' is not a valid operator, use '=='".into());
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ne));
                    i += 2;
                } else {
                    return Err("expected '=' after '!'".into());
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Le));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Lt));
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Op(CmpOp::Ge));
                    i += 2;
                } else {
                    tokens.push(Token::Op(CmpOp::Gt));
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                        None => return Err("unterminated string literal".into()),
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let num = text
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number literal {text:?}"))?;
                tokens.push(Token::Number(num));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "true" => Token::True,
                    "false" => Token::False,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(format!("unexpected character {other:?}")),
        }
    }

    if tokens.is_empty() {
        return Err("empty expression".into());
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

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expr(&mut self) -> Result<Expr, String> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.bump();
            let rhs = self.and_expr()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.bump();
            let rhs = self.unary()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.peek() == Some(&Token::Not) {
            self.bump();
            let inner = self.unary()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.cmp()
    }

    fn cmp(&mut self) -> Result<Expr, String> {
        let lhs = self.operand()?;
        if let Some(Token::Op(op)) = self.peek().cloned() {
            self.bump();
            let rhs = self.operand()?;
            return Ok(Expr::Cmp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn operand(&mut self) -> Result<Expr, String> {
        match self.bump() {
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.bump() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err("expected ')'".into()),
                }
            }
            Some(Token::Ident(name)) => Ok(Expr::Field(name)),
            Some(Token::Number(n)) => Ok(Expr::Literal(Value::Num(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::True) => Ok(Expr::Literal(Value::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(Value::Bool(false))),
            Some(other) => Err(format!("unexpected token {other:?}")),
            None => Err("unexpected end of expression".into()),
        }
    }
}
