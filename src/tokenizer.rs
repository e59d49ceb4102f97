//! Lexical analysis: streams tokens out of the raw source text.
//!
//! The tokenizer is intentionally tiny – it knows nothing about semantics
//! beyond recognising the punctuators, decimal literals and the single
//! reserved word `return`. It keeps one token of lookahead: `current`
//! holds the most recently produced token and `advance` replaces it.

use std::iter::Peekable;
use std::str::Chars;

use crate::error::{CompileError, CompileResult};
use crate::location::Location;

/// Kinds of tokens recognised by the front-end. Only identifiers and
/// integer literals carry a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
  Identifier(String),
  Integer(i64),
  Equals,
  Plus,
  Minus,
  Star,
  Slash,
  Semicolon,
  Colon,
  Comma,
  LeftParen,
  RightParen,
  LeftBrace,
  RightBrace,
  Return,
  Eof,
}

impl TokenKind {
  /// Human-friendly description used in diagnostics.
  pub fn describe(&self) -> String {
    match self {
      TokenKind::Identifier(name) => format!("identifier '{name}'"),
      TokenKind::Integer(value) => format!("integer '{value}'"),
      TokenKind::Equals => "'='".to_string(),
      TokenKind::Plus => "'+'".to_string(),
      TokenKind::Minus => "'-'".to_string(),
      TokenKind::Star => "'*'".to_string(),
      TokenKind::Slash => "'/'".to_string(),
      TokenKind::Semicolon => "';'".to_string(),
      TokenKind::Colon => "':'".to_string(),
      TokenKind::Comma => "','".to_string(),
      TokenKind::LeftParen => "'('".to_string(),
      TokenKind::RightParen => "')'".to_string(),
      TokenKind::LeftBrace => "'{'".to_string(),
      TokenKind::RightBrace => "'}'".to_string(),
      TokenKind::Return => "'return'".to_string(),
      TokenKind::Eof => "end of file".to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
  pub kind: TokenKind,
  pub location: Location,
}

/// Streaming tokenizer with one token of lookahead.
pub struct Tokenizer<'a> {
  file_name: String,
  chars: Peekable<Chars<'a>>,
  line: usize,
  column: usize,
  current: Token,
  reached_end: bool,
}

impl<'a> Tokenizer<'a> {
  /// The current token is undefined until the first `advance`; the parser
  /// primes it on construction.
  pub fn new(source: &'a str, file_name: impl Into<String>) -> Self {
    let file_name = file_name.into();
    let current = Token {
      kind: TokenKind::Eof,
      location: Location::new(file_name.clone(), 0, 0),
    };
    Self {
      file_name,
      chars: source.chars().peekable(),
      line: 0,
      column: 0,
      current,
      reached_end: false,
    }
  }

  pub fn current(&self) -> &Token {
    &self.current
  }

  pub fn reached_end(&self) -> bool {
    self.reached_end
  }

  fn location(&self) -> Location {
    Location::new(self.file_name.clone(), self.line, self.column)
  }

  /// Consume one character, maintaining the line and column counters. The
  /// character after a newline sits at column 0.
  fn next_char(&mut self) -> Option<char> {
    let c = self.chars.next()?;
    if c == '\n' {
      self.line += 1;
      self.column = 0;
    } else {
      self.column += 1;
    }
    Some(c)
  }

  fn skip_whitespace(&mut self) {
    while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
      self.next_char();
    }
  }

  /// Replace `current` with the next token from the stream.
  pub fn advance(&mut self) -> CompileResult<()> {
    self.skip_whitespace();
    let location = self.location();

    let Some(&c) = self.chars.peek() else {
      self.current = Token {
        kind: TokenKind::Eof,
        location,
      };
      self.reached_end = true;
      return Ok(());
    };

    let kind = if c.is_ascii_alphabetic() || c == '_' {
      self.read_identifier()
    } else if c.is_ascii_digit() {
      self.read_integer()
    } else {
      let kind = match c {
        '=' => TokenKind::Equals,
        '+' => TokenKind::Plus,
        '-' => TokenKind::Minus,
        '*' => TokenKind::Star,
        '/' => TokenKind::Slash,
        ';' => TokenKind::Semicolon,
        ':' => TokenKind::Colon,
        ',' => TokenKind::Comma,
        '(' => TokenKind::LeftParen,
        ')' => TokenKind::RightParen,
        '{' => TokenKind::LeftBrace,
        '}' => TokenKind::RightBrace,
        _ => {
          return Err(CompileError::UnexpectedCharacter { location, found: c });
        }
      };
      self.next_char();
      kind
    };

    self.current = Token { kind, location };
    Ok(())
  }

  fn read_identifier(&mut self) -> TokenKind {
    let mut lexeme = String::new();
    while let Some(&c) = self.chars.peek() {
      if c.is_ascii_alphanumeric() || c == '_' {
        lexeme.push(c);
        self.next_char();
      } else {
        break;
      }
    }

    if lexeme == "return" {
      TokenKind::Return
    } else {
      TokenKind::Identifier(lexeme)
    }
  }

  /// Decimal literals accumulate with wrapping arithmetic; overflow wraps
  /// silently here and the compiler layer enforces type bounds.
  fn read_integer(&mut self) -> TokenKind {
    let mut value: i64 = 0;
    while let Some(&c) = self.chars.peek() {
      if let Some(digit) = c.to_digit(10) {
        value = value.wrapping_mul(10).wrapping_add(digit as i64);
        self.next_char();
      } else {
        break;
      }
    }
    TokenKind::Integer(value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn collect(source: &str) -> Vec<Token> {
    let mut tokenizer = Tokenizer::new(source, "test.fn");
    let mut tokens = Vec::new();
    loop {
      tokenizer.advance().unwrap();
      tokens.push(tokenizer.current().clone());
      if tokenizer.reached_end() {
        return tokens;
      }
    }
  }

  #[test]
  fn lexes_declaration() {
    let kinds: Vec<TokenKind> = collect("i32 a = 42;")
      .into_iter()
      .map(|token| token.kind)
      .collect();
    assert_eq!(
      kinds,
      vec![
        TokenKind::Identifier("i32".to_string()),
        TokenKind::Identifier("a".to_string()),
        TokenKind::Equals,
        TokenKind::Integer(42),
        TokenKind::Semicolon,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn return_is_reserved() {
    let tokens = collect("return returns");
    assert_eq!(tokens[0].kind, TokenKind::Return);
    assert_eq!(
      tokens[1].kind,
      TokenKind::Identifier("returns".to_string())
    );
  }

  #[test]
  fn tracks_lines_and_columns() {
    let tokens = collect("a\n  b = 1;");
    assert_eq!(tokens[0].location, Location::new("test.fn", 0, 0));
    assert_eq!(tokens[1].location, Location::new("test.fn", 1, 2));
    assert_eq!(tokens[2].location, Location::new("test.fn", 1, 4));
    assert_eq!(tokens[3].location, Location::new("test.fn", 1, 6));
  }

  #[test]
  fn punctuators() {
    let kinds: Vec<TokenKind> = collect("():,{}*/")
      .into_iter()
      .map(|token| token.kind)
      .collect();
    assert_eq!(
      kinds,
      vec![
        TokenKind::LeftParen,
        TokenKind::RightParen,
        TokenKind::Colon,
        TokenKind::Comma,
        TokenKind::LeftBrace,
        TokenKind::RightBrace,
        TokenKind::Star,
        TokenKind::Slash,
        TokenKind::Eof,
      ]
    );
  }

  #[test]
  fn rejects_unknown_characters() {
    let mut tokenizer = Tokenizer::new("a # b", "test.fn");
    tokenizer.advance().unwrap();
    let err = tokenizer.advance().unwrap_err();
    assert!(matches!(
      err,
      CompileError::UnexpectedCharacter { found: '#', .. }
    ));
    assert_eq!(err.location(), &Location::new("test.fn", 0, 2));
  }

  #[test]
  fn empty_input_is_eof() {
    let mut tokenizer = Tokenizer::new("   \n ", "test.fn");
    tokenizer.advance().unwrap();
    assert_eq!(tokenizer.current().kind, TokenKind::Eof);
    assert!(tokenizer.reached_end());
  }
}
