//! # Avaliador de Expressões (estilo CEL)
//!
//! Implementa a linguagem de expressões usada em `when`, em params,
//! capturas e payloads com `expression`, e pelo extrator de valores.
//!
//! ## O que a linguagem suporta:
//!
//! ```text
//! phase == "Ready"                          comparação
//! cluster.status.conditions[0].status       acesso pontilhado + índice
//! cluster.?status.?phase                    encadeamento opcional
//! has(cluster.status)                       teste de presença
//! attempts > 2 && !dryRun                   lógica booleana
//! size(items) > 0                           tamanho de lista/string/mapa
//! name.startsWith("cm-")                    métodos de string
//! ready ? "yes" : "no"                      ternário
//! ```
//!
//! ## O sinal de "campo ausente"
//!
//! A distinção mais importante deste módulo: um `no such field` ou
//! `no such overload` em tempo de execução é um **sinal de ausência**,
//! não um erro qualquer. Quem decide o que fazer com ele é o chamador:
//!
//! - Durante uma extração de valor (captura, payload com default),
//!   ausência vira "missing" e segue o fluxo de fallback.
//! - Durante um `when` ou uma expressão de payload sem default,
//!   a mesma falha é um erro duro.
//!
//! Um erro de **parse** nunca é ausência: expressão malformada é
//! sempre fatal, em qualquer contexto.
//!
//! ## Tipagem
//!
//! Os valores são `serde_json::Value`; as raízes do ambiente têm tipo
//! dinâmico, então toda checagem de tipo acontece em runtime. Nenhum
//! repositório de referência carrega um avaliador CEL pronto, então o
//! interpretador é escrito aqui mesmo sobre o tipo de valor JSON, na
//! mesma linha do navegador de caminhos do módulo de extração.

use serde_json::{Number, Value};
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// ERROS
// ============================================================================

/// Erros de compilação e avaliação de expressões.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    /// Expressão malformada. Nunca é tratado como ausência.
    #[error("parse error: {0}")]
    Parse(String),

    /// Campo referenciado não existe (sinal de ausência).
    #[error("no such field '{0}'")]
    NoSuchField(String),

    /// Operação aplicada a tipos incompatíveis (sinal de ausência).
    #[error("no such overload: {0}")]
    NoSuchOverload(String),

    /// Divisão ou módulo por zero.
    #[error("division by zero")]
    DivisionByZero,

    /// Qualquer outra falha de runtime.
    #[error("{0}")]
    Other(String),
}

impl EvalError {
    /// Indica se este erro é o sinal de "campo ausente".
    pub fn is_missing(&self) -> bool {
        matches!(self, EvalError::NoSuchField(_) | EvalError::NoSuchOverload(_))
    }
}

// ============================================================================
// TOKENS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    Null,
    Dot,
    DotQuestion,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Question,
    Colon,
}

fn lex(source: &str) -> Result<Vec<Tok>, EvalError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = source.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Tok::RBracket);
                i += 1;
            }
            ',' => {
                tokens.push(Tok::Comma);
                i += 1;
            }
            '+' => {
                tokens.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Tok::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Tok::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Tok::Percent);
                i += 1;
            }
            '?' => {
                tokens.push(Tok::Question);
                i += 1;
            }
            ':' => {
                tokens.push(Tok::Colon);
                i += 1;
            }
            '.' => {
                if chars.get(i + 1) == Some(&'?') {
                    tokens.push(Tok::DotQuestion);
                    i += 2;
                } else {
                    tokens.push(Tok::Dot);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Tok::Eq);
                    i += 2;
                } else {
                    return Err(EvalError::Parse("single '=' is not an operator".to_string()));
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Tok::Ne);
                    i += 2;
                } else {
                    tokens.push(Tok::Not);
                    i += 1;
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Tok::Le);
                    i += 2;
                } else {
                    tokens.push(Tok::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Tok::Ge);
                    i += 2;
                } else {
                    tokens.push(Tok::Gt);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Tok::AndAnd);
                    i += 2;
                } else {
                    return Err(EvalError::Parse("single '&' is not an operator".to_string()));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Tok::OrOr);
                    i += 2;
                } else {
                    return Err(EvalError::Parse("single '|' is not an operator".to_string()));
                }
            }
            '\'' | '"' => {
                let quote = c;
                i += 1;
                let mut s = String::new();
                let mut closed = false;
                while i < chars.len() {
                    let c = chars[i];
                    if c == quote {
                        closed = true;
                        i += 1;
                        break;
                    }
                    if c == '\\' && i + 1 < chars.len() {
                        i += 1;
                        match chars[i] {
                            'n' => s.push('\n'),
                            't' => s.push('\t'),
                            'r' => s.push('\r'),
                            other => s.push(other),
                        }
                    } else {
                        s.push(c);
                    }
                    i += 1;
                }
                if !closed {
                    return Err(EvalError::Parse("unterminated string literal".to_string()));
                }
                tokens.push(Tok::Str(s));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                let mut is_float = false;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                    is_float = true;
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let literal: String = chars[start..i].iter().collect();
                if is_float {
                    let parsed = literal
                        .parse::<f64>()
                        .map_err(|_| EvalError::Parse(format!("invalid number '{}'", literal)))?;
                    tokens.push(Tok::Float(parsed));
                } else {
                    let parsed = literal
                        .parse::<i64>()
                        .map_err(|_| EvalError::Parse(format!("invalid number '{}'", literal)))?;
                    tokens.push(Tok::Int(parsed));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                match ident.as_str() {
                    "true" => tokens.push(Tok::True),
                    "false" => tokens.push(Tok::False),
                    "null" => tokens.push(Tok::Null),
                    _ => tokens.push(Tok::Ident(ident)),
                }
            }
            other => {
                return Err(EvalError::Parse(format!("unexpected character '{}'", other)));
            }
        }
    }

    Ok(tokens)
}

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Lit(Value),
    Ident(String),
    /// Acesso a campo: `obj.field` (ou `obj.?field` quando opcional).
    Member {
        object: Box<Expr>,
        field: String,
        optional: bool,
    },
    /// Indexação: `list[0]`, `map["key"]`.
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    /// Chamada global (`has(x)`, `size(x)`) ou método (`s.contains(y)`).
    Call {
        target: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

// ============================================================================
// PARSER
// ============================================================================

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat(&mut self, expected: &Tok) -> Result<(), EvalError> {
        match self.next() {
            Some(tok) if tok == *expected => Ok(()),
            Some(tok) => Err(EvalError::Parse(format!(
                "expected {:?}, found {:?}",
                expected, tok
            ))),
            None => Err(EvalError::Parse(format!(
                "expected {:?}, found end of expression",
                expected
            ))),
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, EvalError> {
        let cond = self.parse_or()?;
        if self.peek() == Some(&Tok::Question) {
            self.next();
            let then = self.parse_expr()?;
            self.eat(&Tok::Colon)?;
            let otherwise = self.parse_expr()?;
            return Ok(Expr::Ternary {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            });
        }
        Ok(cond)
    }

    fn parse_or(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_and()?;
        while self.peek() == Some(&Tok::OrOr) {
            self.next();
            let rhs = self.parse_and()?;
            lhs = Expr::Binary {
                op: BinOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_equality()?;
        while self.peek() == Some(&Tok::AndAnd) {
            self.next();
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary {
                op: BinOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Eq) => BinOp::Eq,
                Some(Tok::Ne) => BinOp::Ne,
                _ => break,
            };
            self.next();
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Lt) => BinOp::Lt,
                Some(Tok::Le) => BinOp::Le,
                Some(Tok::Gt) => BinOp::Gt,
                Some(Tok::Ge) => BinOp::Ge,
                _ => break,
            };
            self.next();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.next();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::Percent) => BinOp::Mod,
                _ => break,
            };
            self.next();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, EvalError> {
        match self.peek() {
            Some(Tok::Not) => {
                self.next();
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            Some(Tok::Minus) => {
                self.next();
                Ok(Expr::Neg(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, EvalError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Tok::Dot) => {
                    self.next();
                    let field = self.expect_ident()?;
                    if self.peek() == Some(&Tok::LParen) {
                        // Chamada de método: expr.field(args).
                        self.next();
                        let args = self.parse_args()?;
                        expr = Expr::Call {
                            target: Some(Box::new(expr)),
                            name: field,
                            args,
                        };
                    } else {
                        expr = Expr::Member {
                            object: Box::new(expr),
                            field,
                            optional: false,
                        };
                    }
                }
                Some(Tok::DotQuestion) => {
                    self.next();
                    let field = self.expect_ident()?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        field,
                        optional: true,
                    };
                }
                Some(Tok::LBracket) => {
                    self.next();
                    let index = self.parse_expr()?;
                    self.eat(&Tok::RBracket)?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, EvalError> {
        match self.next() {
            Some(Tok::Int(i)) => Ok(Expr::Lit(Value::from(i))),
            Some(Tok::Float(f)) => Ok(Expr::Lit(
                Number::from_f64(f)
                    .map(Value::Number)
                    .ok_or_else(|| EvalError::Parse(format!("non-finite number {}", f)))?,
            )),
            Some(Tok::Str(s)) => Ok(Expr::Lit(Value::String(s))),
            Some(Tok::True) => Ok(Expr::Lit(Value::Bool(true))),
            Some(Tok::False) => Ok(Expr::Lit(Value::Bool(false))),
            Some(Tok::Null) => Ok(Expr::Lit(Value::Null)),
            Some(Tok::LParen) => {
                let expr = self.parse_expr()?;
                self.eat(&Tok::RParen)?;
                Ok(expr)
            }
            Some(Tok::Ident(name)) => {
                if self.peek() == Some(&Tok::LParen) {
                    // Chamada global: has(x), size(x).
                    self.next();
                    let args = self.parse_args()?;
                    Ok(Expr::Call {
                        target: None,
                        name,
                        args,
                    })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Some(tok) => Err(EvalError::Parse(format!("unexpected token {:?}", tok))),
            None => Err(EvalError::Parse("unexpected end of expression".to_string())),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<Expr>, EvalError> {
        let mut args = Vec::new();
        if self.peek() == Some(&Tok::RParen) {
            self.next();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr()?);
            match self.next() {
                Some(Tok::Comma) => continue,
                Some(Tok::RParen) => break,
                Some(tok) => {
                    return Err(EvalError::Parse(format!(
                        "expected ',' or ')', found {:?}",
                        tok
                    )))
                }
                None => return Err(EvalError::Parse("unterminated call".to_string())),
            }
        }
        Ok(args)
    }

    fn expect_ident(&mut self) -> Result<String, EvalError> {
        match self.next() {
            Some(Tok::Ident(name)) => Ok(name),
            Some(tok) => Err(EvalError::Parse(format!(
                "expected field name, found {:?}",
                tok
            ))),
            None => Err(EvalError::Parse(
                "expected field name, found end of expression".to_string(),
            )),
        }
    }
}

// ============================================================================
// PROGRAMA COMPILADO
// ============================================================================

/// Uma expressão compilada, pronta para avaliação repetida.
#[derive(Debug, Clone)]
pub struct Program {
    root: Expr,
}

/// Compila uma expressão. Erros aqui são sempre fatais.
pub fn compile(source: &str) -> Result<Program, EvalError> {
    let tokens = lex(source)?;
    if tokens.is_empty() {
        return Err(EvalError::Parse("empty expression".to_string()));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let root = parser.parse_expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(EvalError::Parse(format!(
            "trailing tokens after expression: {:?}",
            &parser.tokens[parser.pos..]
        )));
    }
    Ok(Program { root })
}

impl Program {
    /// Avalia contra um ambiente de raízes nomeadas.
    pub fn evaluate(&self, env: &HashMap<String, Value>) -> Result<Value, EvalError> {
        eval(&self.root, env)
    }
}

/// Compila e avalia em um passo.
pub fn evaluate(source: &str, env: &HashMap<String, Value>) -> Result<Value, EvalError> {
    compile(source)?.evaluate(env)
}

/// Compila e avalia exigindo resultado booleano (condições `when`).
pub fn evaluate_condition(source: &str, env: &HashMap<String, Value>) -> Result<bool, EvalError> {
    match evaluate(source, env)? {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::Other(format!(
            "condition must evaluate to bool, got {}",
            super::type_name(&other)
        ))),
    }
}

// ============================================================================
// AVALIAÇÃO
// ============================================================================

fn eval(expr: &Expr, env: &HashMap<String, Value>) -> Result<Value, EvalError> {
    match expr {
        Expr::Lit(value) => Ok(value.clone()),

        Expr::Ident(name) => env
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::NoSuchField(name.clone())),

        Expr::Member {
            object,
            field,
            optional,
        } => {
            let object = match eval(object, env) {
                Ok(v) => v,
                // Ausência no meio de uma cadeia opcional propaga null.
                Err(e) if *optional && e.is_missing() => return Ok(Value::Null),
                Err(e) => return Err(e),
            };
            match object {
                Value::Object(map) => match map.get(field) {
                    Some(v) => Ok(v.clone()),
                    None if *optional => Ok(Value::Null),
                    None => Err(EvalError::NoSuchField(field.clone())),
                },
                _ if *optional => Ok(Value::Null),
                other => Err(EvalError::NoSuchOverload(format!(
                    "field access '{}' on {}",
                    field,
                    super::type_name(&other)
                ))),
            }
        }

        Expr::Index { object, index } => {
            let object = eval(object, env)?;
            let index = eval(index, env)?;
            match (&object, &index) {
                (Value::Array(items), Value::Number(n)) => {
                    let i = n.as_i64().ok_or_else(|| {
                        EvalError::NoSuchOverload("list index must be an integer".to_string())
                    })?;
                    usize::try_from(i)
                        .ok()
                        .and_then(|i| items.get(i))
                        .cloned()
                        .ok_or_else(|| EvalError::NoSuchField(format!("index {}", i)))
                }
                (Value::Object(map), Value::String(key)) => map
                    .get(key)
                    .cloned()
                    .ok_or_else(|| EvalError::NoSuchField(key.clone())),
                _ => Err(EvalError::NoSuchOverload(format!(
                    "cannot index {} with {}",
                    super::type_name(&object),
                    super::type_name(&index)
                ))),
            }
        }

        Expr::Call { target, name, args } => eval_call(target.as_deref(), name, args, env),

        Expr::Not(inner) => match eval(inner, env)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(EvalError::NoSuchOverload(format!(
                "'!' on {}",
                super::type_name(&other)
            ))),
        },

        Expr::Neg(inner) => match eval(inner, env)? {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::from(-i))
                } else if let Some(f) = n.as_f64() {
                    Number::from_f64(-f)
                        .map(Value::Number)
                        .ok_or_else(|| EvalError::Other("non-finite number".to_string()))
                } else {
                    Err(EvalError::NoSuchOverload("'-' on number".to_string()))
                }
            }
            other => Err(EvalError::NoSuchOverload(format!(
                "'-' on {}",
                super::type_name(&other)
            ))),
        },

        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, env),

        Expr::Ternary {
            cond,
            then,
            otherwise,
        } => match eval(cond, env)? {
            Value::Bool(true) => eval(then, env),
            Value::Bool(false) => eval(otherwise, env),
            other => Err(EvalError::NoSuchOverload(format!(
                "ternary condition must be bool, got {}",
                super::type_name(&other)
            ))),
        },
    }
}

fn eval_binary(
    op: BinOp,
    lhs: &Expr,
    rhs: &Expr,
    env: &HashMap<String, Value>,
) -> Result<Value, EvalError> {
    // && e || com curto-circuito: o lado direito não avalia à toa.
    if op == BinOp::And || op == BinOp::Or {
        let left = expect_bool(eval(lhs, env)?, "logical operand")?;
        if op == BinOp::And && !left {
            return Ok(Value::Bool(false));
        }
        if op == BinOp::Or && left {
            return Ok(Value::Bool(true));
        }
        let right = expect_bool(eval(rhs, env)?, "logical operand")?;
        return Ok(Value::Bool(right));
    }

    let left = eval(lhs, env)?;
    let right = eval(rhs, env)?;

    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = compare_values(&left, &right)?;
            let result = match op {
                BinOp::Lt => ordering.is_lt(),
                BinOp::Le => ordering.is_le(),
                BinOp::Gt => ordering.is_gt(),
                BinOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        BinOp::Add => add_values(&left, &right),
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => arithmetic(op, &left, &right),
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn eval_call(
    target: Option<&Expr>,
    name: &str,
    args: &[Expr],
    env: &HashMap<String, Value>,
) -> Result<Value, EvalError> {
    match (target, name) {
        // has(a.b): teste de presença de campo.
        (None, "has") => {
            if args.len() != 1 {
                return Err(EvalError::Parse("has() takes exactly one argument".to_string()));
            }
            match &args[0] {
                Expr::Member { object, field, .. } => match eval(object, env) {
                    Ok(Value::Object(map)) => Ok(Value::Bool(map.contains_key(field))),
                    Ok(_) => Ok(Value::Bool(false)),
                    Err(e) if e.is_missing() => Ok(Value::Bool(false)),
                    Err(e) => Err(e),
                },
                _ => Err(EvalError::Parse(
                    "has() requires a field selection argument".to_string(),
                )),
            }
        }

        (None, "size") => {
            if args.len() != 1 {
                return Err(EvalError::Parse("size() takes exactly one argument".to_string()));
            }
            size_of(&eval(&args[0], env)?)
        }

        (Some(target), "size") if args.is_empty() => size_of(&eval(target, env)?),

        (Some(target), "contains" | "startsWith" | "endsWith") => {
            if args.len() != 1 {
                return Err(EvalError::Parse(format!(
                    "{}() takes exactly one argument",
                    name
                )));
            }
            let subject = eval(target, env)?;
            let needle = eval(&args[0], env)?;
            match (&subject, &needle) {
                (Value::String(s), Value::String(n)) => {
                    let result = match name {
                        "contains" => s.contains(n.as_str()),
                        "startsWith" => s.starts_with(n.as_str()),
                        _ => s.ends_with(n.as_str()),
                    };
                    Ok(Value::Bool(result))
                }
                (Value::Array(items), _) if name == "contains" => {
                    Ok(Value::Bool(items.iter().any(|i| values_equal(i, &needle))))
                }
                _ => Err(EvalError::NoSuchOverload(format!(
                    "{}() on {}",
                    name,
                    super::type_name(&subject)
                ))),
            }
        }

        (None, other) => Err(EvalError::NoSuchOverload(format!(
            "unknown function '{}'",
            other
        ))),
        (Some(_), other) => Err(EvalError::NoSuchOverload(format!(
            "unknown method '{}'",
            other
        ))),
    }
}

// ============================================================================
// OPERAÇÕES SOBRE VALORES
// ============================================================================

fn expect_bool(value: Value, what: &str) -> Result<bool, EvalError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(EvalError::NoSuchOverload(format!(
            "{} must be bool, got {}",
            what,
            super::type_name(&other)
        ))),
    }
}

/// Igualdade profunda com comparação numérica cruzada (1 == 1.0).
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Result<std::cmp::Ordering, EvalError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (
                x.as_f64().unwrap_or(f64::NAN),
                y.as_f64().unwrap_or(f64::NAN),
            );
            x.partial_cmp(&y)
                .ok_or_else(|| EvalError::Other("numbers are not comparable".to_string()))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(EvalError::NoSuchOverload(format!(
            "cannot compare {} with {}",
            super::type_name(a),
            super::type_name(b)
        ))),
    }
}

fn add_values(a: &Value, b: &Value) -> Result<Value, EvalError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return x
                    .checked_add(y)
                    .map(Value::from)
                    .ok_or_else(|| EvalError::Other("integer overflow".to_string()));
            }
            let sum = x.as_f64().unwrap_or(f64::NAN) + y.as_f64().unwrap_or(f64::NAN);
            Number::from_f64(sum)
                .map(Value::Number)
                .ok_or_else(|| EvalError::Other("non-finite number".to_string()))
        }
        (Value::String(x), Value::String(y)) => Ok(Value::String(format!("{}{}", x, y))),
        (Value::Array(x), Value::Array(y)) => {
            let mut joined = x.clone();
            joined.extend(y.iter().cloned());
            Ok(Value::Array(joined))
        }
        _ => Err(EvalError::NoSuchOverload(format!(
            "'+' on {} and {}",
            super::type_name(a),
            super::type_name(b)
        ))),
    }
}

fn arithmetic(op: BinOp, a: &Value, b: &Value) -> Result<Value, EvalError> {
    let (x, y) = match (a, b) {
        (Value::Number(x), Value::Number(y)) => (x, y),
        _ => {
            return Err(EvalError::NoSuchOverload(format!(
                "arithmetic on {} and {}",
                super::type_name(a),
                super::type_name(b)
            )))
        }
    };

    if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
        let result = match op {
            BinOp::Sub => x.checked_sub(y),
            BinOp::Mul => x.checked_mul(y),
            BinOp::Div => {
                if y == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                x.checked_div(y)
            }
            BinOp::Mod => {
                if y == 0 {
                    return Err(EvalError::DivisionByZero);
                }
                x.checked_rem(y)
            }
            _ => unreachable!(),
        };
        return result
            .map(Value::from)
            .ok_or_else(|| EvalError::Other("integer overflow".to_string()));
    }

    let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
    let result = match op {
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            x / y
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            x % y
        }
        _ => unreachable!(),
    };
    Number::from_f64(result)
        .map(Value::Number)
        .ok_or_else(|| EvalError::Other("non-finite number".to_string()))
}

fn size_of(value: &Value) -> Result<Value, EvalError> {
    match value {
        Value::String(s) => Ok(Value::from(s.chars().count() as i64)),
        Value::Array(items) => Ok(Value::from(items.len() as i64)),
        Value::Object(map) => Ok(Value::from(map.len() as i64)),
        other => Err(EvalError::NoSuchOverload(format!(
            "size() on {}",
            super::type_name(other)
        ))),
    }
}
