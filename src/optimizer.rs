//! Constant folding over expression subtrees.
//!
//! A single bottom-up pass with two's-complement wrapping on 64-bit
//! intermediates. Folded nodes keep the location of the node they replace
//! so later diagnostics still point at the source. Type casts survive as
//! the type tag around their folded operand; the value is masked when it
//! is materialised, not here.

use crate::error::{CompileError, CompileResult};
use crate::parser::{BinaryOp, Expr, ExprKind};

/// Fold constant arithmetic in `expr`. Pure and idempotent; the only
/// failure is a constant division by zero.
pub fn optimize_expression(expr: Expr) -> CompileResult<Expr> {
  let location = expr.location;
  let kind = match expr.kind {
    ExprKind::Negation(inner) => {
      let inner = optimize_expression(*inner)?;
      if let ExprKind::Integer(value) = inner.kind {
        ExprKind::Integer(value.wrapping_neg())
      } else {
        ExprKind::Negation(Box::new(inner))
      }
    }

    ExprKind::Binary { op, lhs, rhs } => {
      let lhs = optimize_expression(*lhs)?;
      let rhs = optimize_expression(*rhs)?;
      match (&lhs.kind, &rhs.kind) {
        (&ExprKind::Integer(a), &ExprKind::Integer(b)) => {
          let value = match op {
            BinaryOp::Add => a.wrapping_add(b),
            BinaryOp::Sub => a.wrapping_sub(b),
            BinaryOp::Mul => a.wrapping_mul(b),
            BinaryOp::Div => {
              if b == 0 {
                return Err(CompileError::DivisionByZero { location });
              }
              a.wrapping_div(b)
            }
          };
          ExprKind::Integer(value)
        }
        _ => ExprKind::Binary {
          op,
          lhs: Box::new(lhs),
          rhs: Box::new(rhs),
        },
      }
    }

    ExprKind::TypeCast { inner, target } => ExprKind::TypeCast {
      inner: Box::new(optimize_expression(*inner)?),
      target,
    },

    // Identifiers, literals and calls pass through unchanged.
    other => other,
  };
  Ok(Expr::new(kind, location))
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::Parser;
  use crate::tokenizer::Tokenizer;

  fn parse_initializer(source: &str) -> Expr {
    let full = format!("x = {source};");
    let mut parser = Parser::new(Tokenizer::new(&full, "test.fn")).unwrap();
    let declarations = parser.parse_file().unwrap();
    match declarations.into_iter().next().unwrap() {
      crate::parser::Declaration::Variable { initializer, .. } => initializer,
      _ => panic!("expected a variable declaration"),
    }
  }

  #[test]
  fn folds_arithmetic() {
    let folded = optimize_expression(parse_initializer("5 + 3 * 2")).unwrap();
    assert_eq!(folded.kind, ExprKind::Integer(11));
  }

  #[test]
  fn folds_negation() {
    let folded = optimize_expression(parse_initializer("-4 / 2")).unwrap();
    assert_eq!(folded.kind, ExprKind::Integer(-2));
  }

  #[test]
  fn keeps_cast_as_type_tag() {
    let folded = optimize_expression(parse_initializer("(2 + 3):u8")).unwrap();
    let ExprKind::TypeCast { inner, .. } = folded.kind else {
      panic!("expected the cast to survive");
    };
    assert_eq!(inner.kind, ExprKind::Integer(5));
  }

  #[test]
  fn leaves_identifiers_alone() {
    let folded = optimize_expression(parse_initializer("a + 2 * 3")).unwrap();
    let ExprKind::Binary { op, lhs, rhs } = folded.kind else {
      panic!("expected a binary node");
    };
    assert_eq!(op, BinaryOp::Add);
    assert!(matches!(&lhs.kind, ExprKind::Identifier(name) if name == "a"));
    assert_eq!(rhs.kind, ExprKind::Integer(6));
  }

  #[test]
  fn rejects_constant_division_by_zero() {
    let err = optimize_expression(parse_initializer("1 / 0")).unwrap_err();
    assert!(matches!(err, CompileError::DivisionByZero { .. }));
  }

  #[test]
  fn idempotent() {
    let once = optimize_expression(parse_initializer("1 + 2 + a * 3")).unwrap();
    let twice = optimize_expression(once.clone()).unwrap();
    assert_eq!(once, twice);
  }
}
