//! Crate root: wires together the compilation pipeline.
//!
//! The stages are intentionally small and composable so they can be evolved
//! independently:
//! - `tokenizer` streams located tokens with one token of lookahead.
//! - `parser` owns all syntactic knowledge and returns the top-level
//!   declarations as a flat syntax tree.
//! - `optimizer` folds constant arithmetic in expression subtrees.
//! - `codegen` registers symbols, tracks value locations through the
//!   register file and emits the FASM x86-32 listing.
//! - `error` centralises the failure taxonomy shared by every stage.

pub mod error;
pub mod location;
pub mod optimizer;
pub mod parser;
pub mod tokenizer;
pub mod ty;

mod assembly;
mod codegen;
mod registers;
mod value;

pub use error::{CompileError, CompileResult};

/// Compile a source unit into a FASM x86-32 listing. `file_name` is only
/// used to label diagnostics.
pub fn compile(source: &str, file_name: &str) -> CompileResult<String> {
  let tokenizer = tokenizer::Tokenizer::new(source, file_name);
  let mut parser = parser::Parser::new(tokenizer)?;
  let declarations = parser.parse_file()?;
  codegen::generate(&declarations)
}
