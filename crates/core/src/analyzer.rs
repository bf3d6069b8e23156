//! The analysis capability consumed by workers.
//!
//! The engine treats analysis as an opaque function from content bytes to
//! [`Facts`]. `LexicalAnalyzer` is the reference implementation: a small
//! tokenizer that extracts namespaced class-like declarations and static
//! `class_alias(...)` calls. Anything implementing [`Analyzer`] can be swapped
//! in without the engine noticing.

use thiserror::Error;

use crate::facts::{AliasFact, Facts};

#[derive(Debug, Clone, Error)]
pub enum AnalysisError {
  #[error("content is not analysable: {0}")]
  InvalidContent(String),
}

/// Pure content analysis: same bytes in, same facts out.
///
/// Implementations must be deterministic; blob-level memoization depends on
/// it. Constructed once and passed by reference into the worker, never held
/// as global state.
pub trait Analyzer: Send + Sync {
  fn analyse(&self, content: &[u8]) -> Result<Facts, AnalysisError>;
}

// ============================================================================
// Reference lexical analyzer
// ============================================================================

/// Keywords that introduce a class-like declaration.
const DECL_KEYWORDS: &[&str] = &["class", "interface", "trait", "enum"];

/// Extracts declared symbols and dynamic aliases with a single lexical pass.
///
/// Comments and string literals are skipped, `namespace` declarations are
/// tracked so symbols come out fully qualified. Content with none of the
/// interesting keywords short-circuits to empty facts before tokenizing,
/// which is the dominant case in large trees.
#[derive(Debug, Default, Clone)]
pub struct LexicalAnalyzer;

impl Analyzer for LexicalAnalyzer {
  fn analyse(&self, content: &[u8]) -> Result<Facts, AnalysisError> {
    let text = std::str::from_utf8(content).map_err(|e| AnalysisError::InvalidContent(e.to_string()))?;

    // Fast gate: most files declare nothing interesting.
    if !DECL_KEYWORDS.iter().any(|kw| text.contains(kw)) && !text.contains("class_alias") {
      return Ok(Facts::default());
    }

    let tokens = tokenize(text);
    let mut facts = Facts::default();
    let mut namespace = String::new();

    let mut i = 0;
    while i < tokens.len() {
      match &tokens[i] {
        Token::Ident(word) if word == "namespace" => {
          if let Some((name, next)) = read_qualified_name(&tokens, i + 1) {
            namespace = name;
            i = next;
            continue;
          }
        }
        Token::Ident(word) if DECL_KEYWORDS.contains(&word.as_str()) => {
          // `Foo::class` and `new class {...}` are not declarations.
          let preceded_by_scope = i > 0 && matches!(&tokens[i - 1], Token::Punct(p) if p == "::");
          let anonymous = i > 0 && matches!(&tokens[i - 1], Token::Ident(p) if p == "new");
          if !preceded_by_scope && !anonymous {
            if let Some(Token::Ident(name)) = tokens.get(i + 1) {
              facts.symbols.push(qualify(&namespace, name));
              i += 2;
              continue;
            }
          }
        }
        Token::Ident(word) if word == "class_alias" => {
          if let Some((alias, next)) = read_alias_call(&tokens, i + 1) {
            facts.aliases.push(alias);
            i = next;
            continue;
          }
        }
        _ => {}
      }
      i += 1;
    }

    Ok(facts)
  }
}

fn qualify(namespace: &str, name: &str) -> String {
  if namespace.is_empty() {
    name.to_string()
  } else {
    format!("{namespace}\\{name}")
  }
}

/// Read a backslash-qualified name starting at `start`. Returns the name and
/// the index of the first token past it.
fn read_qualified_name(tokens: &[Token], start: usize) -> Option<(String, usize)> {
  let mut parts = Vec::new();
  let mut i = start;
  loop {
    match tokens.get(i) {
      Some(Token::Ident(word)) => {
        parts.push(word.clone());
        i += 1;
      }
      _ => break,
    }
    match tokens.get(i) {
      Some(Token::Punct(p)) if p == "\\" => i += 1,
      _ => break,
    }
  }
  if parts.is_empty() {
    None
  } else {
    Some((parts.join("\\"), i))
  }
}

/// Parse `( arg1 , arg2` after a `class_alias` identifier. Both arguments
/// must be statically known (string literal or `Name::class`); anything else
/// means the alias cannot be resolved without running the code, so it is
/// skipped entirely.
fn read_alias_call(tokens: &[Token], start: usize) -> Option<(AliasFact, usize)> {
  let mut i = start;
  match tokens.get(i) {
    Some(Token::Punct(p)) if p == "(" => i += 1,
    _ => return None,
  }
  let (original, next) = read_static_class_arg(tokens, i)?;
  i = next;
  match tokens.get(i) {
    Some(Token::Punct(p)) if p == "," => i += 1,
    _ => return None,
  }
  let (alias, next) = read_static_class_arg(tokens, i)?;
  Some((AliasFact { original, alias }, next))
}

/// One static class argument: a string literal or `Qualified\Name::class`.
fn read_static_class_arg(tokens: &[Token], start: usize) -> Option<(String, usize)> {
  match tokens.get(start) {
    Some(Token::Str(value)) => Some((value.clone(), start + 1)),
    Some(Token::Ident(_)) => {
      let (name, mut i) = read_qualified_name(tokens, start)?;
      match (tokens.get(i), tokens.get(i + 1)) {
        (Some(Token::Punct(p)), Some(Token::Ident(kw))) if p == "::" && kw == "class" => {
          i += 2;
          Some((name, i))
        }
        _ => None,
      }
    }
    _ => None,
  }
}

// ============================================================================
// Tokenizer
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
  Ident(String),
  Str(String),
  Punct(String),
}

/// Lex identifiers, string literals and the punctuation the extractor cares
/// about, skipping line comments, block comments and everything else.
fn tokenize(text: &str) -> Vec<Token> {
  let mut tokens = Vec::new();
  let chars: Vec<char> = text.chars().collect();
  let mut i = 0;

  while i < chars.len() {
    let c = chars[i];
    match c {
      '/' if chars.get(i + 1) == Some(&'/') => {
        while i < chars.len() && chars[i] != '\n' {
          i += 1;
        }
      }
      '#' => {
        while i < chars.len() && chars[i] != '\n' {
          i += 1;
        }
      }
      '/' if chars.get(i + 1) == Some(&'*') => {
        i += 2;
        while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
          i += 1;
        }
        i = (i + 2).min(chars.len());
      }
      '\'' | '"' => {
        let quote = c;
        let mut value = String::new();
        i += 1;
        while i < chars.len() && chars[i] != quote {
          if chars[i] == '\\' && i + 1 < chars.len() {
            value.push(chars[i + 1]);
            i += 2;
          } else {
            value.push(chars[i]);
            i += 1;
          }
        }
        i += 1; // closing quote
        tokens.push(Token::Str(value));
      }
      ':' if chars.get(i + 1) == Some(&':') => {
        tokens.push(Token::Punct("::".into()));
        i += 2;
      }
      '(' | ')' | ',' | ';' | '\\' => {
        tokens.push(Token::Punct(c.to_string()));
        i += 1;
      }
      _ if c.is_alphabetic() || c == '_' => {
        let mut word = String::new();
        while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
          word.push(chars[i]);
          i += 1;
        }
        tokens.push(Token::Ident(word));
      }
      _ => i += 1,
    }
  }

  tokens
}
