//! Shared error taxonomy for the compilation pipeline.
//!
//! Every failure carries the `Location` it was raised at and a short
//! message; the first error aborts the compilation and surfaces to the
//! caller unchanged. Messages carry at most one cause.

use snafu::Snafu;

use crate::location::Location;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
  #[snafu(display("{location}: unexpected character '{found}'"))]
  UnexpectedCharacter { location: Location, found: char },

  #[snafu(display("{location}: unexpected token {found}, expected {expected}"))]
  UnexpectedToken {
    location: Location,
    found: String,
    expected: String,
  },

  #[snafu(display("{location}: unexpected syntax node, expected {expected}"))]
  UnexpectedSyntaxNode { location: Location, expected: String },

  #[snafu(display("{location}: unknown identifier '{name}'"))]
  UnknownIdentifier { location: Location, name: String },

  #[snafu(display("{location}: invalid type cast: {message}"))]
  InvalidTypeCast { location: Location, message: String },

  #[snafu(display("{location}: cannot negate a value of unsigned type"))]
  UnsignedType { location: Location },

  #[snafu(display("{location}: expression is not assignable"))]
  NotLValue { location: Location },

  #[snafu(display("{location}: called value is not a function"))]
  NotCallableType { location: Location },

  #[snafu(display("{location}: function '{name}' does not return a value"))]
  NoReturnValue { location: Location, name: String },

  #[snafu(display("{location}: return does not match the function's return type"))]
  MismatchingReturn { location: Location },

  #[snafu(display("{location}: division by zero"))]
  DivisionByZero { location: Location },

  #[snafu(display("{location}: duplicate symbol '{symbol}'"))]
  DuplicateSymbol { location: Location, symbol: String },

  #[snafu(display("{location}: ran out of registers"))]
  OutOfRegisters { location: Location },

  #[snafu(display("{location}: not implemented: {what}"))]
  NotImplemented { location: Location, what: String },
}

impl CompileError {
  /// Location the error was raised at. Used by diagnostics and tests.
  pub fn location(&self) -> &Location {
    match self {
      CompileError::UnexpectedCharacter { location, .. }
      | CompileError::UnexpectedToken { location, .. }
      | CompileError::UnexpectedSyntaxNode { location, .. }
      | CompileError::UnknownIdentifier { location, .. }
      | CompileError::InvalidTypeCast { location, .. }
      | CompileError::UnsignedType { location }
      | CompileError::NotLValue { location }
      | CompileError::NotCallableType { location }
      | CompileError::NoReturnValue { location, .. }
      | CompileError::MismatchingReturn { location }
      | CompileError::DivisionByZero { location }
      | CompileError::DuplicateSymbol { location, .. }
      | CompileError::OutOfRegisters { location }
      | CompileError::NotImplemented { location, .. } => location,
    }
  }
}
