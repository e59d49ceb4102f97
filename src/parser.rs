//! Recursive-descent parser producing a flat list of top-level declarations.
//!
//! Expressions descend through a precedence ladder with two binary levels
//! (`+`/`-` below `*`/`/`), both left-associative. Unary negation binds
//! tighter than any binary operator and wraps the whole atom including its
//! postfix operators, so `-f(x):i8` negates the casted call result. The
//! classic declaration ambiguity (`i32 a = ...` vs `a = ...`) is resolved
//! with the single token of lookahead the tokenizer provides.

use crate::error::{CompileError, CompileResult};
use crate::location::Location;
use crate::tokenizer::{Token, TokenKind, Tokenizer};

/// Binary operators recognised by the language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
}

impl BinaryOp {
  pub fn describe(&self) -> &'static str {
    match self {
      BinaryOp::Add => "addition",
      BinaryOp::Sub => "subtraction",
      BinaryOp::Mul => "multiplication",
      BinaryOp::Div => "division",
    }
  }
}

/// Expression tree produced by the parser. Types are expressed
/// syntactically as identifier nodes and resolved during code generation.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
  pub kind: ExprKind,
  pub location: Location,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
  Identifier(String),
  Integer(i64),
  Negation(Box<Expr>),
  TypeCast { inner: Box<Expr>, target: Box<Expr> },
  Binary {
    op: BinaryOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  Call { callee: Box<Expr>, args: Vec<Expr> },
}

impl Expr {
  pub fn new(kind: ExprKind, location: Location) -> Self {
    Self { kind, location }
  }

  pub fn is_call(&self) -> bool {
    matches!(self.kind, ExprKind::Call { .. })
  }
}

/// Statements allowed inside a function body.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
  Assignment {
    location: Location,
    lhs: Expr,
    rhs: Expr,
  },
  Return {
    location: Location,
    value: Option<Expr>,
  },
  Call(Expr),
}

/// A single `type name` pair in a function's argument list.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
  pub location: Location,
  pub type_expr: Expr,
  pub name: String,
}

/// Top-level declarations, in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
  Variable {
    location: Location,
    type_expr: Option<Expr>,
    name: String,
    initializer: Expr,
  },
  Function {
    location: Location,
    return_type: Option<Expr>,
    name: String,
    args: Vec<Parameter>,
    body: Vec<Statement>,
  },
}

pub struct Parser<'a> {
  tokenizer: Tokenizer<'a>,
}

impl<'a> Parser<'a> {
  /// Takes ownership of the tokenizer and primes its lookahead.
  pub fn new(mut tokenizer: Tokenizer<'a>) -> CompileResult<Self> {
    tokenizer.advance()?;
    Ok(Self { tokenizer })
  }

  /// Parse top-level declarations until end of file.
  pub fn parse_file(&mut self) -> CompileResult<Vec<Declaration>> {
    let mut declarations = Vec::new();
    while self.current().kind != TokenKind::Eof {
      declarations.push(self.parse_declaration()?);
    }
    Ok(declarations)
  }

  fn current(&self) -> &Token {
    self.tokenizer.current()
  }

  fn advance(&mut self) -> CompileResult<()> {
    self.tokenizer.advance()
  }

  fn unexpected<T>(&self, expected: impl Into<String>) -> CompileResult<T> {
    let token = self.current();
    Err(CompileError::UnexpectedToken {
      location: token.location.clone(),
      found: token.kind.describe(),
      expected: expected.into(),
    })
  }

  /// Consume the current token if it matches `kind`. Only meaningful for
  /// payload-free kinds.
  fn eat(&mut self, kind: &TokenKind) -> CompileResult<bool> {
    if &self.current().kind == kind {
      self.advance()?;
      Ok(true)
    } else {
      Ok(false)
    }
  }

  fn skip(&mut self, kind: &TokenKind) -> CompileResult<()> {
    if self.eat(kind)? {
      Ok(())
    } else {
      self.unexpected(kind.describe())
    }
  }

  fn expect_identifier(&mut self) -> CompileResult<(String, Location)> {
    if let TokenKind::Identifier(name) = &self.current().kind {
      let name = name.clone();
      let location = self.current().location.clone();
      self.advance()?;
      Ok((name, location))
    } else {
      self.unexpected("an identifier")
    }
  }

  /// A type in the grammar is a bare identifier; resolution happens later.
  fn parse_type_expr(&mut self) -> CompileResult<Expr> {
    let (name, location) = self.expect_identifier()?;
    Ok(Expr::new(ExprKind::Identifier(name), location))
  }

  // ----- Declarations -----

  /// Both declaration forms begin with an identifier. A second identifier
  /// makes the first one the type; `=` or `(` makes the first one the name
  /// of an untyped variable or a void function.
  fn parse_declaration(&mut self) -> CompileResult<Declaration> {
    let (first, first_location) = self.expect_identifier()?;

    let (type_expr, name) = if let TokenKind::Identifier(second) = &self.current().kind {
      let second = second.clone();
      let type_expr = Expr::new(ExprKind::Identifier(first), first_location.clone());
      self.advance()?;
      (Some(type_expr), second)
    } else {
      (None, first)
    };

    if self.eat(&TokenKind::Equals)? {
      let initializer = self.parse_expression()?;
      self.skip(&TokenKind::Semicolon)?;
      Ok(Declaration::Variable {
        location: first_location,
        type_expr,
        name,
        initializer,
      })
    } else if self.current().kind == TokenKind::LeftParen {
      self.parse_function(first_location, type_expr, name)
    } else {
      self.unexpected("'=' or '('")
    }
  }

  fn parse_function(
    &mut self,
    location: Location,
    return_type: Option<Expr>,
    name: String,
  ) -> CompileResult<Declaration> {
    self.skip(&TokenKind::LeftParen)?;
    let mut args = Vec::new();
    if self.current().kind != TokenKind::RightParen {
      loop {
        let type_expr = self.parse_type_expr()?;
        let arg_location = type_expr.location.clone();
        let (arg_name, _) = self.expect_identifier()?;
        args.push(Parameter {
          location: arg_location,
          type_expr,
          name: arg_name,
        });
        if !self.eat(&TokenKind::Comma)? {
          break;
        }
      }
    }
    self.skip(&TokenKind::RightParen)?;

    self.skip(&TokenKind::LeftBrace)?;
    let mut body = Vec::new();
    while !self.eat(&TokenKind::RightBrace)? {
      if self.current().kind == TokenKind::Eof {
        return self.unexpected("'}'");
      }
      body.push(self.parse_statement()?);
    }

    Ok(Declaration::Function {
      location,
      return_type,
      name,
      args,
      body,
    })
  }

  // ----- Statements -----

  fn parse_statement(&mut self) -> CompileResult<Statement> {
    if self.current().kind == TokenKind::Return {
      let location = self.current().location.clone();
      self.advance()?;
      let value = if self.current().kind == TokenKind::Semicolon {
        None
      } else {
        Some(self.parse_expression()?)
      };
      self.skip(&TokenKind::Semicolon)?;
      return Ok(Statement::Return { location, value });
    }

    let expr = self.parse_expression()?;
    if self.eat(&TokenKind::Equals)? {
      let location = expr.location.clone();
      let rhs = self.parse_expression()?;
      self.skip(&TokenKind::Semicolon)?;
      return Ok(Statement::Assignment {
        location,
        lhs: expr,
        rhs,
      });
    }

    // Only a call may stand alone as a statement.
    if expr.is_call() {
      if self.eat(&TokenKind::Semicolon)? {
        return Ok(Statement::Call(expr));
      }
      return self.unexpected("'=' or ';'");
    }
    self.unexpected("'='")
  }

  // ----- Expressions -----

  fn parse_expression(&mut self) -> CompileResult<Expr> {
    self.parse_additive()
  }

  fn parse_additive(&mut self) -> CompileResult<Expr> {
    let mut node = self.parse_multiplicative()?;
    loop {
      let op = match self.current().kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        _ => break,
      };
      let location = self.current().location.clone();
      self.advance()?;
      let rhs = self.parse_multiplicative()?;
      node = Expr::new(
        ExprKind::Binary {
          op,
          lhs: Box::new(node),
          rhs: Box::new(rhs),
        },
        location,
      );
    }
    Ok(node)
  }

  fn parse_multiplicative(&mut self) -> CompileResult<Expr> {
    let mut node = self.parse_primary()?;
    loop {
      let op = match self.current().kind {
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        _ => break,
      };
      let location = self.current().location.clone();
      self.advance()?;
      let rhs = self.parse_primary()?;
      node = Expr::new(
        ExprKind::Binary {
          op,
          lhs: Box::new(node),
          rhs: Box::new(rhs),
        },
        location,
      );
    }
    Ok(node)
  }

  /// A primary is an optionally negated atom followed by any number of
  /// postfix operators: `:type` casts and `(...)` calls, left to right.
  fn parse_primary(&mut self) -> CompileResult<Expr> {
    let location = self.current().location.clone();
    let negated = self.eat(&TokenKind::Minus)?;

    let mut node = self.parse_atom()?;
    loop {
      if self.eat(&TokenKind::Colon)? {
        let target = self.parse_type_expr()?;
        node = Expr::new(
          ExprKind::TypeCast {
            inner: Box::new(node),
            target: Box::new(target),
          },
          location.clone(),
        );
      } else if self.eat(&TokenKind::LeftParen)? {
        let mut call_args = Vec::new();
        if self.current().kind != TokenKind::RightParen {
          loop {
            call_args.push(self.parse_expression()?);
            if !self.eat(&TokenKind::Comma)? {
              break;
            }
          }
        }
        self.skip(&TokenKind::RightParen)?;
        node = Expr::new(
          ExprKind::Call {
            callee: Box::new(node),
            args: call_args,
          },
          location.clone(),
        );
      } else {
        break;
      }
    }

    if negated {
      node = Expr::new(ExprKind::Negation(Box::new(node)), location);
    }
    Ok(node)
  }

  fn parse_atom(&mut self) -> CompileResult<Expr> {
    let location = self.current().location.clone();
    match &self.current().kind {
      TokenKind::Identifier(name) => {
        let name = name.clone();
        self.advance()?;
        Ok(Expr::new(ExprKind::Identifier(name), location))
      }
      TokenKind::Integer(value) => {
        let value = *value;
        self.advance()?;
        Ok(Expr::new(ExprKind::Integer(value), location))
      }
      TokenKind::LeftParen => {
        self.advance()?;
        let node = self.parse_expression()?;
        self.skip(&TokenKind::RightParen)?;
        Ok(node)
      }
      _ => self.unexpected("an expression"),
    }
  }
}
