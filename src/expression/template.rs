//! # Renderizador de Templates
//!
//! Implementa a linguagem de interpolação de texto usada em URLs,
//! headers, bodies, manifestos, mensagens de log e chaves de payload.
//!
//! ## Sintaxe:
//!
//! ```text
//! {{ .caminho.pontilhado }}                    referência a variável
//! {{ .nome | upper }}                          filtro encadeado
//! {{ .valor | default "fallback" }}            default para null/vazio
//! {{ now | date "%Y-%m-%d" }}                  função de tempo
//! ```
//!
//! ## Política de chave ausente: ESTRITA
//!
//! Um template que referencia uma variável cujo segmento raiz não está
//! ligado falha; um campo profundo ausente também falha. Isso pega
//! erros de digitação em URLs e manifestos cedo, ao invés de enviar
//! uma string com buraco para um sistema externo.
//!
//! ## Filtros disponíveis:
//!
//! | Grupo | Funções |
//! |---|---|
//! | String | `lower upper title trim replace contains hasPrefix hasSuffix quote` |
//! | Tempo | `now`, `date <layout> <t>` (alias `dateFormat`) |
//! | Coerção | `int int64 float64 string` |
//! | Fallback | `default <def> <val>` (aplica em null ou string vazia) |

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use thiserror::Error;

use super::{coerce, display_string};
use crate::clients::Clock;
use crate::protocol::CoerceTarget;

static TEMPLATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^{}]+)\}\}").expect("valid template regex"));

/// Erros de renderização de template.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TemplateError {
    /// O segmento raiz de um caminho não está ligado no ambiente.
    #[error("template references unbound variable '{0}'")]
    UnboundVariable(String),

    /// Um segmento profundo do caminho não existe.
    #[error("template path '{path}' has no field '{segment}'")]
    MissingField { path: String, segment: String },

    /// A expressão dentro de `{{ }}` é malformada.
    #[error("invalid template expression '{0}': {1}")]
    Invalid(String, String),

    /// Um filtro falhou (função desconhecida, aridade ou valor errado).
    #[error("template function '{0}': {1}")]
    Function(String, String),
}

// ============================================================================
// TOKENS DO PIPELINE
// ============================================================================

/// Token de uma expressão de template.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    /// Separador de estágios do pipeline.
    Pipe,
    /// Caminho pontilhado começando com `.` (ex: `.a.b.c`).
    Path(String),
    /// Literal string entre aspas.
    Str(String),
    /// Literal numérico.
    Num(Value),
    /// Literal booleano.
    Bool(bool),
    /// Nome de função.
    Ident(String),
}

/// Tokeniza a expressão interna de um `{{ }}`.
fn tokenize(input: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '|' => {
                chars.next();
                tokens.push(Token::Pipe);
            }
            '"' => {
                chars.next();
                let mut s = String::new();
                let mut closed = false;
                while let Some(c) = chars.next() {
                    match c {
                        '"' => {
                            closed = true;
                            break;
                        }
                        '\\' => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some('t') => s.push('\t'),
                            Some(other) => s.push(other),
                            None => break,
                        },
                        other => s.push(other),
                    }
                }
                if !closed {
                    return Err(TemplateError::Invalid(
                        input.to_string(),
                        "unterminated string literal".to_string(),
                    ));
                }
                tokens.push(Token::Str(s));
            }
            '.' => {
                chars.next();
                let mut path = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' || c == '.' || c == '-' || c == '/' {
                        path.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if path.is_empty() {
                    return Err(TemplateError::Invalid(
                        input.to_string(),
                        "empty variable reference".to_string(),
                    ));
                }
                tokens.push(Token::Path(path));
            }
            c if c.is_ascii_digit() || c == '-' => {
                chars.next();
                let mut num = String::new();
                num.push(c);
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        num.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = if num.contains('.') {
                    num.parse::<f64>()
                        .ok()
                        .and_then(serde_json::Number::from_f64)
                        .map(Value::Number)
                } else {
                    num.parse::<i64>().ok().map(Value::from)
                };
                match value {
                    Some(v) => tokens.push(Token::Num(v)),
                    None => {
                        return Err(TemplateError::Invalid(
                            input.to_string(),
                            format!("invalid number literal '{}'", num),
                        ))
                    }
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.as_str() {
                    "true" => tokens.push(Token::Bool(true)),
                    "false" => tokens.push(Token::Bool(false)),
                    _ => tokens.push(Token::Ident(ident)),
                }
            }
            other => {
                return Err(TemplateError::Invalid(
                    input.to_string(),
                    format!("unexpected character '{}'", other),
                ));
            }
        }
    }

    Ok(tokens)
}

// ============================================================================
// ENGINE
// ============================================================================

/// Renderizador de templates contra um ambiente de variáveis.
///
/// O relógio é injetado para que `now` seja determinístico em testes e
/// em dry-run.
pub struct TemplateEngine {
    clock: Arc<dyn Clock>,
}

impl TemplateEngine {
    /// Cria um engine com o relógio dado.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Renderiza um template para texto.
    pub fn render(
        &self,
        template: &str,
        env: &HashMap<String, Value>,
    ) -> Result<String, TemplateError> {
        // Caminho rápido: a maioria das strings não tem template.
        if !template.contains("{{") {
            return Ok(template.to_string());
        }

        let mut output = String::new();
        let mut last_index = 0;

        for capture in TEMPLATE_RE.captures_iter(template) {
            let matched = capture.get(0).expect("capture 0 always present");
            output.push_str(&template[last_index..matched.start()]);

            let inner = capture.get(1).expect("capture 1 always present").as_str();
            let value = self.eval_pipeline(inner.trim(), env)?;
            output.push_str(&display_string(&value));

            last_index = matched.end();
        }

        output.push_str(&template[last_index..]);
        Ok(output)
    }

    /// Renderiza recursivamente todas as strings de uma árvore JSON,
    /// chaves de mapas inclusive.
    pub fn render_value(
        &self,
        value: &Value,
        env: &HashMap<String, Value>,
    ) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) => Ok(Value::String(self.render(s, env)?)),
            Value::Array(items) => {
                let mut rendered = Vec::with_capacity(items.len());
                for item in items {
                    rendered.push(self.render_value(item, env)?);
                }
                Ok(Value::Array(rendered))
            }
            Value::Object(map) => {
                let mut rendered = Map::with_capacity(map.len());
                for (key, item) in map {
                    let rendered_key = self.render(key, env)?;
                    rendered.insert(rendered_key, self.render_value(item, env)?);
                }
                Ok(Value::Object(rendered))
            }
            _ => Ok(value.clone()),
        }
    }

    /// Avalia a expressão interna de um `{{ }}` (valor + pipes).
    fn eval_pipeline(
        &self,
        inner: &str,
        env: &HashMap<String, Value>,
    ) -> Result<Value, TemplateError> {
        let tokens = tokenize(inner)?;
        let stages: Vec<&[Token]> = tokens.split(|t| *t == Token::Pipe).collect();

        if stages.iter().any(|s| s.is_empty()) {
            return Err(TemplateError::Invalid(
                inner.to_string(),
                "empty pipeline stage".to_string(),
            ));
        }

        let mut piped: Option<Value> = None;
        for (index, stage) in stages.iter().enumerate() {
            piped = Some(self.eval_stage(inner, stage, piped, index == 0, env)?);
        }

        piped.ok_or_else(|| {
            TemplateError::Invalid(inner.to_string(), "empty expression".to_string())
        })
    }

    /// Avalia um estágio do pipeline.
    ///
    /// O primeiro estágio pode ser um valor (caminho ou literal) ou uma
    /// chamada de função; os demais são sempre funções e recebem o
    /// valor do estágio anterior como último argumento.
    fn eval_stage(
        &self,
        inner: &str,
        stage: &[Token],
        piped: Option<Value>,
        first: bool,
        env: &HashMap<String, Value>,
    ) -> Result<Value, TemplateError> {
        match &stage[0] {
            Token::Ident(name) => {
                let mut args = Vec::with_capacity(stage.len());
                for token in &stage[1..] {
                    args.push(self.resolve_token(inner, token, env)?);
                }
                if let Some(value) = piped {
                    args.push(value);
                }
                self.apply_function(name, args)
            }
            value_token if first && stage.len() == 1 => self.resolve_token(inner, value_token, env),
            _ => Err(TemplateError::Invalid(
                inner.to_string(),
                "pipeline stage must be a single value or a function call".to_string(),
            )),
        }
    }

    /// Resolve um token de valor (caminho ou literal).
    fn resolve_token(
        &self,
        inner: &str,
        token: &Token,
        env: &HashMap<String, Value>,
    ) -> Result<Value, TemplateError> {
        match token {
            Token::Path(path) => resolve_path(path, env),
            Token::Str(s) => Ok(Value::String(s.clone())),
            Token::Num(n) => Ok(n.clone()),
            Token::Bool(b) => Ok(Value::Bool(*b)),
            Token::Ident(name) => Err(TemplateError::Invalid(
                inner.to_string(),
                format!("function '{}' used where a value was expected", name),
            )),
            Token::Pipe => Err(TemplateError::Invalid(
                inner.to_string(),
                "unexpected pipe".to_string(),
            )),
        }
    }

    /// Aplica uma função do conjunto definido.
    fn apply_function(&self, name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
        let arity = |expected: usize| -> Result<(), TemplateError> {
            if args.len() == expected {
                Ok(())
            } else {
                Err(TemplateError::Function(
                    name.to_string(),
                    format!("expects {} argument(s), got {}", expected, args.len()),
                ))
            }
        };

        match name {
            "lower" => {
                arity(1)?;
                Ok(Value::String(display_string(&args[0]).to_lowercase()))
            }
            "upper" => {
                arity(1)?;
                Ok(Value::String(display_string(&args[0]).to_uppercase()))
            }
            "title" => {
                arity(1)?;
                Ok(Value::String(title_case(&display_string(&args[0]))))
            }
            "trim" => {
                arity(1)?;
                Ok(Value::String(display_string(&args[0]).trim().to_string()))
            }
            "replace" => {
                arity(3)?;
                let old = display_string(&args[0]);
                let new = display_string(&args[1]);
                let subject = display_string(&args[2]);
                Ok(Value::String(subject.replace(&old, &new)))
            }
            "contains" => {
                arity(2)?;
                let needle = display_string(&args[0]);
                let subject = display_string(&args[1]);
                Ok(Value::Bool(subject.contains(&needle)))
            }
            "hasPrefix" => {
                arity(2)?;
                let prefix = display_string(&args[0]);
                let subject = display_string(&args[1]);
                Ok(Value::Bool(subject.starts_with(&prefix)))
            }
            "hasSuffix" => {
                arity(2)?;
                let suffix = display_string(&args[0]);
                let subject = display_string(&args[1]);
                Ok(Value::Bool(subject.ends_with(&suffix)))
            }
            "quote" => {
                arity(1)?;
                Ok(Value::String(
                    serde_json::to_string(&display_string(&args[0]))
                        .unwrap_or_else(|_| "\"\"".to_string()),
                ))
            }
            "now" => {
                arity(0)?;
                Ok(Value::String(self.clock.now().to_rfc3339()))
            }
            "date" | "dateFormat" => {
                arity(2)?;
                let layout = display_string(&args[0]);
                let raw = display_string(&args[1]);
                let parsed = chrono::DateTime::parse_from_rfc3339(&raw).map_err(|e| {
                    TemplateError::Function(
                        name.to_string(),
                        format!("'{}' is not an RFC3339 timestamp: {}", raw, e),
                    )
                })?;
                let mut formatted = String::new();
                write!(formatted, "{}", parsed.format(&layout)).map_err(|_| {
                    TemplateError::Function(
                        name.to_string(),
                        format!("invalid layout '{}'", layout),
                    )
                })?;
                Ok(Value::String(formatted))
            }
            "int" | "int64" => {
                arity(1)?;
                coerce(&args[0], CoerceTarget::Int)
                    .map_err(|e| TemplateError::Function(name.to_string(), e.0))
            }
            "float64" => {
                arity(1)?;
                coerce(&args[0], CoerceTarget::Float64)
                    .map_err(|e| TemplateError::Function(name.to_string(), e.0))
            }
            "string" => {
                arity(1)?;
                coerce(&args[0], CoerceTarget::String)
                    .map_err(|e| TemplateError::Function(name.to_string(), e.0))
            }
            "default" => {
                arity(2)?;
                let is_empty = match &args[1] {
                    Value::Null => true,
                    Value::String(s) => s.is_empty(),
                    _ => false,
                };
                Ok(if is_empty {
                    args[0].clone()
                } else {
                    args[1].clone()
                })
            }
            _ => Err(TemplateError::Function(
                name.to_string(),
                "unknown function".to_string(),
            )),
        }
    }
}

/// Resolve um caminho pontilhado no ambiente (política estrita).
fn resolve_path(path: &str, env: &HashMap<String, Value>) -> Result<Value, TemplateError> {
    let mut segments = path.split('.');
    let root = segments.next().unwrap_or_default();

    let mut current = env
        .get(root)
        .ok_or_else(|| TemplateError::UnboundVariable(root.to_string()))?;

    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment).ok_or_else(|| TemplateError::MissingField {
                path: path.to_string(),
                segment: segment.to_string(),
            })?,
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .ok_or_else(|| TemplateError::MissingField {
                    path: path.to_string(),
                    segment: segment.to_string(),
                })?,
            _ => {
                return Err(TemplateError::MissingField {
                    path: path.to_string(),
                    segment: segment.to_string(),
                })
            }
        };
    }

    Ok(current.clone())
}

/// Primeira letra de cada palavra em maiúscula.
fn title_case(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut at_word_start = true;
    for c in input.chars() {
        if c.is_whitespace() {
            at_word_start = true;
            output.push(c);
        } else if at_word_start {
            output.extend(c.to_uppercase());
            at_word_start = false;
        } else {
            output.push(c);
        }
    }
    output
}
