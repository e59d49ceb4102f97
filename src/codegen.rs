//! Code generation: lower the parsed declarations into a FASM x86-32
//! listing.
//!
//! The generator runs in two phases. Registration walks the top-level
//! declarations into insertion-ordered symbol tables (globals and
//! functions, with the `_read`/`_write` intrinsics pre-registered). Code
//! generation then walks each function body, tracking where every computed
//! value lives (immediate, memory symbol or register) and converting
//! between the integer types as values flow into typed destinations.
//! Function bodies are buffered so the prologue can save exactly the
//! registers the body touched.

use std::collections::HashMap;

use log::{debug, trace};

use crate::assembly::AssemblyWriter;
use crate::error::{CompileError, CompileResult};
use crate::location::Location;
use crate::optimizer;
use crate::parser::{BinaryOp, Declaration, Expr, ExprKind, Statement};
use crate::registers::{RETURN_REGISTER, RegisterFile, name32};
use crate::ty::{self, IntType, Type};
use crate::value::Value;

/// Emit assembly for a parsed source unit.
pub fn generate(declarations: &[Declaration]) -> CompileResult<String> {
  let mut compiler = Compiler::new();
  compiler.register_declarations(declarations)?;
  compiler.emit_globals();
  compiler.compile_functions()?;
  compiler.emit_intrinsic_bodies();
  Ok(compiler.asm.finish())
}

struct GlobalVariable {
  symbol: String,
  ty: IntType,
  value_text: String,
}

struct FunctionParam {
  ty: IntType,
  name: String,
}

struct FunctionInfo {
  name: String,
  symbol: String,
  return_type: Option<IntType>,
  params: Vec<FunctionParam>,
  body: Vec<Statement>,
  intrinsic: bool,
}

struct Compiler {
  globals: Vec<GlobalVariable>,
  global_index: HashMap<String, usize>,
  functions: Vec<FunctionInfo>,
  function_index: HashMap<String, usize>,
  registers: RegisterFile,
  asm: AssemblyWriter,
  current_function: usize,
  needs_end_label: bool,
}

/// Source names are prefixed to keep them clear of assembler keywords.
fn mangle(name: &str) -> String {
  format!("_{name}")
}

/// Adjust a literal to fit `target`. Implicit conversions refuse any
/// change of meaning; explicit ones mask to the target's width and
/// reinterpret the sign bit.
fn convert_integer(
  source_ty: Option<IntType>,
  literal: i64,
  target: IntType,
  explicit: bool,
  location: &Location,
) -> CompileResult<Value> {
  if let Some(source) = source_ty
    && source.signed != target.signed
    && literal < 0
  {
    return Err(CompileError::InvalidTypeCast {
      location: location.clone(),
      message: "cannot change type's signedness".to_string(),
    });
  }

  let mut value = literal;
  if literal < target.min() || literal > target.max() {
    if !explicit {
      let message = if literal < 0 && !target.signed {
        "cannot change type's signedness"
      } else {
        "possible value loss"
      };
      return Err(CompileError::InvalidTypeCast {
        location: location.clone(),
        message: message.to_string(),
      });
    }
    value = literal & target.mask();
    if target.signed && value > target.max() {
      value -= 2 * target.max() + 2;
    }
  }

  Ok(Value::Integer {
    ty: Some(target),
    value,
  })
}

impl Compiler {
  fn new() -> Self {
    let mut compiler = Self {
      globals: Vec::new(),
      global_index: HashMap::new(),
      functions: Vec::new(),
      function_index: HashMap::new(),
      registers: RegisterFile::new(),
      asm: AssemblyWriter::new(),
      current_function: 0,
      needs_end_label: false,
    };
    compiler.register_intrinsic("read", Some(ty::I32), Vec::new());
    compiler.register_intrinsic(
      "write",
      None,
      vec![FunctionParam {
        ty: ty::I32,
        name: "value".to_string(),
      }],
    );
    compiler
  }

  fn register_intrinsic(&mut self, name: &str, return_type: Option<IntType>, params: Vec<FunctionParam>) {
    let symbol = mangle(name);
    self.function_index.insert(symbol.clone(), self.functions.len());
    self.functions.push(FunctionInfo {
      name: name.to_string(),
      symbol,
      return_type,
      params,
      body: Vec::new(),
      intrinsic: true,
    });
  }

  // ----- Phase 1: registration -----

  fn register_declarations(&mut self, declarations: &[Declaration]) -> CompileResult<()> {
    for declaration in declarations {
      match declaration {
        Declaration::Variable {
          location,
          type_expr,
          name,
          initializer,
        } => self.register_variable(location, type_expr.as_ref(), name, initializer)?,
        Declaration::Function { .. } => self.register_function(declaration)?,
      }
    }
    debug!(
      "registered {} globals and {} functions",
      self.globals.len(),
      self.functions.len()
    );
    Ok(())
  }

  fn check_duplicate(&self, symbol: &str, location: &Location) -> CompileResult<()> {
    if self.global_index.contains_key(symbol) || self.function_index.contains_key(symbol) {
      return Err(CompileError::DuplicateSymbol {
        location: location.clone(),
        symbol: symbol.to_string(),
      });
    }
    Ok(())
  }

  /// A type in the syntax tree is a bare identifier resolved against the
  /// built-in integer types.
  fn resolve_int_type(&self, expr: &Expr) -> CompileResult<IntType> {
    let ExprKind::Identifier(name) = &expr.kind else {
      return Err(CompileError::UnexpectedSyntaxNode {
        location: expr.location.clone(),
        expected: "a type name".to_string(),
      });
    };
    IntType::from_name(name).ok_or_else(|| CompileError::UnknownIdentifier {
      location: expr.location.clone(),
      name: name.clone(),
    })
  }

  /// Globals are initialised with constants; the folded initializer must
  /// collapse to a literal, optionally wrapped in an explicit cast.
  fn register_variable(
    &mut self,
    location: &Location,
    type_expr: Option<&Expr>,
    name: &str,
    initializer: &Expr,
  ) -> CompileResult<()> {
    let ty = match type_expr {
      Some(expr) => self.resolve_int_type(expr)?,
      // An untyped global takes the default integer width.
      None => ty::I32,
    };
    let symbol = mangle(name);
    self.check_duplicate(&symbol, location)?;

    let folded = optimizer::optimize_expression(initializer.clone())?;
    let constant = match &folded.kind {
      ExprKind::Integer(value) => Value::integer(*value),
      ExprKind::TypeCast { inner, target } => {
        let cast_ty = self.resolve_int_type(target)?;
        let ExprKind::Integer(value) = inner.kind else {
          return Err(CompileError::UnexpectedSyntaxNode {
            location: folded.location.clone(),
            expected: "a constant initializer".to_string(),
          });
        };
        convert_integer(None, value, cast_ty, true, &folded.location)?
      }
      _ => {
        return Err(CompileError::UnexpectedSyntaxNode {
          location: folded.location.clone(),
          expected: "a constant initializer".to_string(),
        });
      }
    };
    let Value::Integer {
      ty: constant_ty,
      value,
    } = constant
    else {
      unreachable!()
    };
    let converted = convert_integer(constant_ty, value, ty, false, &folded.location)?;
    let Value::Integer { value, .. } = converted else {
      unreachable!()
    };

    self.global_index.insert(symbol.clone(), self.globals.len());
    self.globals.push(GlobalVariable {
      symbol,
      ty,
      value_text: value.to_string(),
    });
    Ok(())
  }

  fn register_function(&mut self, declaration: &Declaration) -> CompileResult<()> {
    let Declaration::Function {
      location,
      return_type,
      name,
      args,
      body,
    } = declaration
    else {
      unreachable!()
    };

    let symbol = mangle(name);
    self.check_duplicate(&symbol, location)?;

    let return_type = match return_type {
      Some(expr) => Some(self.resolve_int_type(expr)?),
      None => None,
    };
    let mut params: Vec<FunctionParam> = Vec::new();
    for arg in args {
      if params.iter().any(|param| param.name == arg.name) {
        return Err(CompileError::DuplicateSymbol {
          location: arg.location.clone(),
          symbol: arg.name.clone(),
        });
      }
      params.push(FunctionParam {
        ty: self.resolve_int_type(&arg.type_expr)?,
        name: arg.name.clone(),
      });
    }

    self.function_index.insert(symbol.clone(), self.functions.len());
    self.functions.push(FunctionInfo {
      name: name.clone(),
      symbol,
      return_type,
      params,
      body: body.clone(),
      intrinsic: false,
    });
    Ok(())
  }

  // ----- Phase 2: code generation -----

  /// Data lines for the registered globals, in declaration order.
  fn emit_globals(&mut self) {
    let lines: Vec<(String, &'static str, String)> = self
      .globals
      .iter()
      .map(|global| {
        (
          global.symbol.clone(),
          global.ty.directive(),
          global.value_text.clone(),
        )
      })
      .collect();
    for (symbol, directive, value) in lines {
      self.asm.emit_data(&symbol, directive, &value);
    }
  }

  fn compile_functions(&mut self) -> CompileResult<()> {
    for index in 0..self.functions.len() {
      if self.functions[index].intrinsic {
        continue;
      }
      self.compile_function(index)?;
    }
    Ok(())
  }

  fn compile_function(&mut self, index: usize) -> CompileResult<()> {
    let symbol = self.functions[index].symbol.clone();
    trace!("generating code for {symbol}");

    self.current_function = index;
    self.needs_end_label = false;
    self.registers.reset_used();
    self.asm.clear_code();

    let body = self.functions[index].body.clone();
    for (i, statement) in body.iter().enumerate() {
      self.compile_statement(statement, i + 1 == body.len())?;
    }

    // The body is known now, so the prologue can save exactly the
    // registers it touched. The accumulator is exempt: restoring it would
    // destroy the return value.
    let saved: Vec<u8> = self
      .registers
      .used_registers()
      .into_iter()
      .filter(|&id| id != RETURN_REGISTER)
      .collect();

    self.asm.blank_text_line();
    self.asm.emit_label(&symbol);
    self.asm.emit_text("push ebp");
    self.asm.emit_text("mov ebp, esp");
    for &id in &saved {
      self.asm.emit_text(format!("push {}", name32(id)));
    }
    self.asm.insert_function_code();
    if self.needs_end_label {
      self.asm.emit_label(&format!("end{symbol}"));
    }
    for &id in saved.iter().rev() {
      self.asm.emit_text(format!("pop {}", name32(id)));
    }
    self.asm.emit_text("leave");
    self.asm.emit_text("ret");

    debug_assert_eq!(self.registers.live_count(), 0);
    Ok(())
  }

  fn compile_statement(&mut self, statement: &Statement, is_last: bool) -> CompileResult<()> {
    match statement {
      Statement::Assignment { location, lhs, rhs } => {
        let destination = self.compile_value(lhs, None)?;
        if !matches!(
          destination,
          Value::Symbol {
            ty: Type::Int(_),
            ..
          }
        ) {
          self.registers.free_value(&destination);
          return Err(CompileError::NotLValue {
            location: location.clone(),
          });
        }
        self.generate_assignment(&destination, rhs)
      }
      Statement::Return { location, value } => self.compile_return(location, value.as_ref(), is_last),
      Statement::Call(expr) => {
        self.compile_call(expr, false)?;
        Ok(())
      }
    }
  }

  /// Move the return value into the accumulator and, for a return that is
  /// not the function's last statement, jump to the shared epilogue.
  fn compile_return(
    &mut self,
    location: &Location,
    value: Option<&Expr>,
    is_last: bool,
  ) -> CompileResult<()> {
    let return_type = self.functions[self.current_function].return_type;
    match (value, return_type) {
      (Some(expr), Some(return_type)) => {
        let result = self.compile_value(expr, Some(return_type))?;
        let already_home = matches!(
          &result,
          Value::Register { alloc, .. }
            if self.registers.register_id(*alloc) == RETURN_REGISTER
        );
        if already_home {
          self.registers.free_value(&result);
        } else {
          let (alloc, displaced) = self.registers.require(RETURN_REGISTER, location)?;
          if let Some(new_id) = displaced {
            self
              .asm
              .emit_code(format!("mov {}, {}", name32(new_id), name32(RETURN_REGISTER)));
          }
          let destination = Value::Register {
            ty: return_type,
            alloc,
          };
          self.generate_mov(&destination, result, false, location)?;
          self.registers.free_value(&destination);
        }
      }
      (None, None) => {}
      _ => {
        return Err(CompileError::MismatchingReturn {
          location: location.clone(),
        });
      }
    }

    if !is_last {
      let symbol = self.functions[self.current_function].symbol.clone();
      self.asm.emit_code(format!("jmp end{symbol}"));
      self.needs_end_label = true;
    }
    Ok(())
  }

  /// Fold the right-hand side, then move it into the destination. A cast
  /// whose target equals the destination's type is compiled untargeted and
  /// moved explicitly, which permits deliberate narrowing of a computed
  /// value into a same-sized destination.
  fn generate_assignment(&mut self, destination: &Value, rhs: &Expr) -> CompileResult<()> {
    let rhs = optimizer::optimize_expression(rhs.clone())?;
    let destination_ty = destination.int_type();

    if let ExprKind::TypeCast { inner, target } = &rhs.kind {
      let cast_ty = self.resolve_int_type(target)?;
      if Some(cast_ty) == destination_ty {
        let value = self.compile_value(inner, None)?;
        return self.generate_mov(destination, value, true, &rhs.location);
      }
    }

    let value = self.compile_value(&rhs, destination_ty)?;
    self.generate_mov(destination, value, false, &rhs.location)
  }

  // ----- Symbol and type resolution -----

  /// Resolve an identifier within the current function: parameters first,
  /// then globals, then functions.
  fn find_symbol(&self, name: &str, location: &Location) -> CompileResult<Value> {
    let function = &self.functions[self.current_function];
    // Frame layout: [ebp] saved ebp, [ebp+4] return address, then args.
    if let Some(index) = function.params.iter().position(|param| param.name == name) {
      return Ok(Value::Symbol {
        ty: Type::Int(function.params[index].ty),
        symbol: "ebp".to_string(),
        offset: ((index + 2) * 4) as i32,
      });
    }

    let symbol = mangle(name);
    if let Some(&index) = self.global_index.get(&symbol) {
      return Ok(Value::Symbol {
        ty: Type::Int(self.globals[index].ty),
        symbol: self.globals[index].symbol.clone(),
        offset: 0,
      });
    }
    if let Some(&index) = self.function_index.get(&symbol) {
      return Ok(Value::Symbol {
        ty: Type::Function(index),
        symbol: self.functions[index].symbol.clone(),
        offset: 0,
      });
    }

    Err(CompileError::UnknownIdentifier {
      location: location.clone(),
      name: name.to_string(),
    })
  }

  fn int_operand(&self, ty: Option<Type>, location: &Location) -> CompileResult<Option<IntType>> {
    match ty {
      Some(Type::Int(ty)) => Ok(Some(ty)),
      Some(Type::Function(_)) => Err(CompileError::UnexpectedSyntaxNode {
        location: location.clone(),
        expected: "a numeric operand".to_string(),
      }),
      None => Ok(None),
    }
  }

  /// The result type of an expression, without emitting code. Literals
  /// stay unbound until a consumer supplies a type.
  fn evaluate_type(&self, expr: &Expr) -> CompileResult<Option<Type>> {
    match &expr.kind {
      ExprKind::Integer(_) => Ok(None),
      ExprKind::Identifier(name) => Ok(self.find_symbol(name, &expr.location)?.ty()),
      ExprKind::TypeCast { target, .. } => {
        Ok(Some(Type::Int(self.resolve_int_type(target)?)))
      }
      ExprKind::Negation(inner) => {
        let inner_ty = self.int_operand(self.evaluate_type(inner)?, &expr.location)?;
        if let Some(ty) = inner_ty
          && !ty.signed
        {
          return Err(CompileError::UnsignedType {
            location: expr.location.clone(),
          });
        }
        Ok(inner_ty.map(Type::Int))
      }
      ExprKind::Binary { lhs, rhs, .. } => {
        let left = self.int_operand(self.evaluate_type(lhs)?, &lhs.location)?;
        let right = self.int_operand(self.evaluate_type(rhs)?, &rhs.location)?;
        match (left, right) {
          (Some(a), Some(b)) => {
            if a.signed != b.signed {
              return Err(CompileError::InvalidTypeCast {
                location: expr.location.clone(),
                message: "cannot change type's signedness".to_string(),
              });
            }
            Ok(Some(Type::Int(if a.size >= b.size { a } else { b })))
          }
          (Some(ty), None) | (None, Some(ty)) => Ok(Some(Type::Int(ty))),
          (None, None) => Ok(None),
        }
      }
      ExprKind::Call { callee, .. } => match self.evaluate_type(callee)? {
        Some(Type::Function(index)) => Ok(self.functions[index].return_type.map(Type::Int)),
        _ => Err(CompileError::NotCallableType {
          location: callee.location.clone(),
        }),
      },
    }
  }

  // ----- Value operations -----

  fn format_value(&self, value: &Value, location: &Location) -> CompileResult<String> {
    match value {
      Value::Integer { value, .. } => Ok(value.to_string()),
      Value::Register { ty, alloc } => {
        Ok(self.registers.name(*alloc, ty.size, location)?.to_string())
      }
      Value::Symbol { ty, symbol, offset } => match ty {
        // Function symbols render as the bare label.
        Type::Function(_) => Ok(symbol.clone()),
        Type::Int(ty) => {
          if *offset == 0 {
            Ok(format!("{} [{}]", ty.width_name(), symbol))
          } else {
            Ok(format!("{} [{}{:+}]", ty.width_name(), symbol, offset))
          }
        }
      },
    }
  }

  /// Two values alias when they resolve to the same storage: equal
  /// symbol-plus-offset, or the same register id regardless of width.
  fn same_location(&self, a: &Value, b: &Value) -> bool {
    match (a, b) {
      (
        Value::Symbol {
          symbol: a_symbol,
          offset: a_offset,
          ..
        },
        Value::Symbol {
          symbol: b_symbol,
          offset: b_offset,
          ..
        },
      ) => a_symbol == b_symbol && a_offset == b_offset,
      (Value::Register { alloc: a, .. }, Value::Register { alloc: b, .. }) => {
        self.registers.register_id(*a) == self.registers.register_id(*b)
      }
      _ => false,
    }
  }

  /// Move `source` into the strongly typed `destination`, consuming the
  /// source. Implicit moves refuse signedness changes and narrowing;
  /// moves between identical locations emit nothing.
  fn generate_mov(
    &mut self,
    destination: &Value,
    source: Value,
    explicit: bool,
    location: &Location,
  ) -> CompileResult<()> {
    let Some(destination_ty) = destination.int_type() else {
      return Err(CompileError::UnexpectedSyntaxNode {
        location: location.clone(),
        expected: "an assignable location".to_string(),
      });
    };

    // Literals are materialised at the destination's type.
    if let Value::Integer { ty, value } = source {
      let converted = convert_integer(ty, value, destination_ty, explicit, location)?;
      let Value::Integer { value, .. } = converted else {
        unreachable!()
      };
      let destination_text = self.format_value(destination, location)?;
      self.asm.emit_code(format!("mov {destination_text}, {value}"));
      return Ok(());
    }

    let Some(source_ty) = source.int_type() else {
      return Err(CompileError::UnexpectedSyntaxNode {
        location: location.clone(),
        expected: "a numeric value".to_string(),
      });
    };

    if !explicit {
      if source_ty.signed != destination_ty.signed {
        return Err(CompileError::InvalidTypeCast {
          location: location.clone(),
          message: "cannot change type's signedness".to_string(),
        });
      }
      if destination_ty.size < source_ty.size {
        return Err(CompileError::InvalidTypeCast {
          location: location.clone(),
          message: "possible value loss".to_string(),
        });
      }
    }

    if self.same_location(destination, &source) {
      self.registers.free_value(&source);
      return Ok(());
    }

    // Memory-to-memory bounces through a scratch register.
    if matches!(destination, Value::Symbol { .. }) && matches!(source, Value::Symbol { .. }) {
      let alloc = self.registers.allocate(location)?;
      let scratch = Value::Register {
        ty: source_ty,
        alloc,
      };
      let scratch_text = self.format_value(&scratch, location)?;
      let source_text = self.format_value(&source, location)?;
      self.asm.emit_code(format!("mov {scratch_text}, {source_text}"));
      return self.generate_mov(destination, scratch, explicit, location);
    }

    let destination_text = self.format_value(destination, location)?;
    if destination_ty.size == source_ty.size {
      let source_text = self.format_value(&source, location)?;
      self.asm.emit_code(format!("mov {destination_text}, {source_text}"));
    } else if destination_ty.size > source_ty.size {
      let mnemonic = if source_ty.signed { "movsx" } else { "movzx" };
      let source_text = self.format_value(&source, location)?;
      self
        .asm
        .emit_code(format!("{mnemonic} {destination_text}, {source_text}"));
    } else {
      // Narrowing reinterprets the source at the destination's width; the
      // admission check above already restricted this to explicit moves.
      let narrowed = match &source {
        Value::Register { alloc, .. } => Value::Register {
          ty: destination_ty,
          alloc: *alloc,
        },
        Value::Symbol { symbol, offset, .. } => Value::Symbol {
          ty: Type::Int(destination_ty),
          symbol: symbol.clone(),
          offset: *offset,
        },
        Value::Integer { .. } => unreachable!(),
      };
      let source_text = self.format_value(&narrowed, location)?;
      self.asm.emit_code(format!("mov {destination_text}, {source_text}"));
    }

    self.registers.free_value(&source);
    Ok(())
  }

  /// Re-type `value` as `target`, emitting widening instructions where the
  /// underlying storage demands them.
  fn generate_type_cast(
    &mut self,
    value: Value,
    target: IntType,
    explicit: bool,
    location: &Location,
  ) -> CompileResult<Value> {
    if let Value::Integer { ty, value } = value {
      return convert_integer(ty, value, target, explicit, location);
    }
    let Some(source_ty) = value.int_type() else {
      return Err(CompileError::UnexpectedSyntaxNode {
        location: location.clone(),
        expected: "a numeric value".to_string(),
      });
    };
    if source_ty == target {
      return Ok(value);
    }
    if source_ty.signed != target.signed && !explicit {
      return Err(CompileError::InvalidTypeCast {
        location: location.clone(),
        message: "cannot change type's signedness".to_string(),
      });
    }

    if source_ty.size > target.size {
      // Narrowing aliases the low bytes; no instruction needed.
      if !explicit {
        return Err(CompileError::InvalidTypeCast {
          location: location.clone(),
          message: "possible value loss".to_string(),
        });
      }
      return Ok(match value {
        Value::Register { alloc, .. } => Value::Register { ty: target, alloc },
        Value::Symbol { symbol, offset, .. } => Value::Symbol {
          ty: Type::Int(target),
          symbol,
          offset,
        },
        Value::Integer { .. } => unreachable!(),
      });
    }

    if source_ty.size < target.size {
      return match value {
        Value::Register { alloc, .. } => {
          if source_ty.signed {
            let wide = self.registers.name(alloc, target.size, location)?;
            let narrow = self.registers.name(alloc, source_ty.size, location)?;
            self.asm.emit_code(format!("movsx {wide}, {narrow}"));
          } else {
            let wide = self.registers.name(alloc, target.size, location)?;
            self.asm.emit_code(format!("and {wide}, {}", source_ty.mask()));
          }
          Ok(Value::Register { ty: target, alloc })
        }
        Value::Symbol { .. } => {
          let alloc = self.registers.allocate(location)?;
          let register = Value::Register { ty: target, alloc };
          let mnemonic = if source_ty.signed { "movsx" } else { "movzx" };
          let register_text = self.format_value(&register, location)?;
          let source_text = self.format_value(&value, location)?;
          self
            .asm
            .emit_code(format!("{mnemonic} {register_text}, {source_text}"));
          Ok(register)
        }
        Value::Integer { .. } => unreachable!(),
      };
    }

    // Same size, different signedness; the explicit check already passed.
    Ok(match value {
      Value::Register { alloc, .. } => Value::Register { ty: target, alloc },
      Value::Symbol { symbol, offset, .. } => Value::Symbol {
        ty: Type::Int(target),
        symbol,
        offset,
      },
      Value::Integer { .. } => unreachable!(),
    })
  }

  /// Load `value` into a register if it is not in one already.
  fn ensure_register(
    &mut self,
    value: Value,
    fallback: Option<IntType>,
    location: &Location,
  ) -> CompileResult<Value> {
    if value.is_register() {
      return Ok(value);
    }
    let ty = value.int_type().or(fallback).unwrap_or(ty::I32);
    let alloc = self.registers.allocate(location)?;
    let register = Value::Register { ty, alloc };
    self.generate_mov(&register, value, false, location)?;
    Ok(register)
  }

  // ----- Expression code generation -----

  /// Compile an expression to a value. Allocated registers stay live and
  /// owned by the caller.
  fn compile_value(&mut self, expr: &Expr, target: Option<IntType>) -> CompileResult<Value> {
    match &expr.kind {
      ExprKind::Identifier(name) => self.find_symbol(name, &expr.location),

      ExprKind::Integer(value) => match target {
        Some(ty) => convert_integer(None, *value, ty, false, &expr.location),
        None => Ok(Value::integer(*value)),
      },

      ExprKind::TypeCast { inner, target } => {
        let cast_ty = self.resolve_int_type(target)?;
        let value = self.compile_value(inner, Some(cast_ty))?;
        self.generate_type_cast(value, cast_ty, true, &expr.location)
      }

      ExprKind::Negation(inner) => {
        let value = self.compile_value(inner, target)?;
        if matches!(value.ty(), Some(Type::Function(_))) {
          return Err(CompileError::UnexpectedSyntaxNode {
            location: inner.location.clone(),
            expected: "a numeric value".to_string(),
          });
        }
        if let Some(ty) = value.int_type()
          && !ty.signed
        {
          self.registers.free_value(&value);
          return Err(CompileError::UnsignedType {
            location: expr.location.clone(),
          });
        }
        let register = self.ensure_register(value, target, &expr.location)?;
        let register_text = self.format_value(&register, &expr.location)?;
        self.asm.emit_code(format!("neg {register_text}"));
        Ok(register)
      }

      ExprKind::Binary { op, lhs, rhs } => self.compile_binary(expr, *op, lhs, rhs, target),

      ExprKind::Call { .. } => match self.compile_call(expr, true)? {
        Some(value) => Ok(value),
        None => unreachable!(),
      },
    }
  }

  fn compile_binary(
    &mut self,
    expr: &Expr,
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    target: Option<IntType>,
  ) -> CompileResult<Value> {
    let result_type = self
      .evaluate_type(expr)?
      .and_then(|ty| ty.as_int())
      .or(target);

    let mut left = self.compile_value(lhs, result_type)?;
    let mut right = self.compile_value(rhs, result_type)?;

    if let (Some(left_ty), Some(right_ty)) = (left.int_type(), right.int_type())
      && left_ty.signed != right_ty.signed
    {
      self.registers.free_value(&left);
      self.registers.free_value(&right);
      return Err(CompileError::InvalidTypeCast {
        location: expr.location.clone(),
        message: "cannot change type's signedness".to_string(),
      });
    }

    // The left operand carries the result and must live in a register.
    if !left.is_register() {
      if op == BinaryOp::Add && right.is_register() {
        // Addition commutes.
        std::mem::swap(&mut left, &mut right);
      } else {
        let ty = result_type.or(left.int_type()).unwrap_or(ty::I32);
        let alloc = self.registers.allocate(&expr.location)?;
        let register = Value::Register { ty, alloc };
        self.generate_mov(&register, left, false, &lhs.location)?;
        left = register;
      }
    }

    let right = match result_type {
      Some(ty) => self.generate_type_cast(right, ty, false, &rhs.location)?,
      None => right,
    };

    let mnemonic = match op {
      BinaryOp::Add => "add",
      BinaryOp::Sub => "sub",
      BinaryOp::Mul | BinaryOp::Div => {
        self.registers.free_value(&left);
        self.registers.free_value(&right);
        return Err(CompileError::NotImplemented {
          location: expr.location.clone(),
          what: format!("{} code generation", op.describe()),
        });
      }
    };

    let left_text = self.format_value(&left, &expr.location)?;
    let right_text = self.format_value(&right, &expr.location)?;
    self.asm.emit_code(format!("{mnemonic} {left_text}, {right_text}"));
    self.registers.free_value(&right);
    Ok(left)
  }

  /// Emit a cdecl call: arguments are stored left to right into a
  /// pre-subtracted frame and the caller cleans up. Returns the
  /// return-register value, or `None` in statement context.
  fn compile_call(&mut self, expr: &Expr, need_result: bool) -> CompileResult<Option<Value>> {
    let ExprKind::Call { callee, args } = &expr.kind else {
      unreachable!()
    };

    let callee_value = self.compile_value(callee, None)?;
    let Some(Type::Function(index)) = callee_value.strong_type() else {
      self.registers.free_value(&callee_value);
      return Err(CompileError::NotCallableType {
        location: callee.location.clone(),
      });
    };

    let symbol = self.functions[index].symbol.clone();
    let name = self.functions[index].name.clone();
    let return_type = self.functions[index].return_type;
    let param_types: Vec<IntType> = self.functions[index].params.iter().map(|p| p.ty).collect();
    if args.len() != param_types.len() {
      return Err(CompileError::UnexpectedSyntaxNode {
        location: expr.location.clone(),
        expected: format!("{} arguments in call to '{name}'", param_types.len()),
      });
    }

    let frame = 4 * args.len() as i32;
    if frame > 0 {
      self.asm.emit_code(format!("sub esp, {frame}"));
    }
    for (i, arg) in args.iter().enumerate() {
      let slot = Value::Symbol {
        ty: Type::Int(param_types[i]),
        symbol: "esp".to_string(),
        offset: 4 * i as i32,
      };
      self.generate_assignment(&slot, arg)?;
    }

    let result = if need_result {
      let Some(return_type) = return_type else {
        return Err(CompileError::NoReturnValue {
          location: expr.location.clone(),
          name,
        });
      };
      let (alloc, displaced) = self.registers.require(RETURN_REGISTER, &expr.location)?;
      if let Some(new_id) = displaced {
        self
          .asm
          .emit_code(format!("mov {}, {}", name32(new_id), name32(RETURN_REGISTER)));
      }
      Some(Value::Register {
        ty: return_type,
        alloc,
      })
    } else {
      None
    };

    self.asm.emit_code(format!("call {symbol}"));
    if frame > 0 {
      self.asm.emit_code(format!("add esp, {frame}"));
    }
    self.registers.free_value(&callee_value);
    Ok(result)
  }

  // ----- Phase 3: intrinsics -----

  /// Hand-written wrappers over the C runtime: `_read` parses a decimal
  /// integer with `scanf`, `_write` prints one with `printf`.
  fn emit_intrinsic_bodies(&mut self) {
    self.asm.blank_text_line();
    self.asm.emit_label("_read");
    for line in [
      "push ebp",
      "mov ebp, esp",
      "sub esp, 4",
      "lea eax, [ebp-4]",
      "push eax",
      "push scanf_format",
      "call [scanf]",
      "add esp, 8",
      "mov eax, dword [ebp-4]",
      "leave",
      "ret",
    ] {
      self.asm.emit_text(line);
    }

    self.asm.blank_text_line();
    self.asm.emit_label("_write");
    for line in [
      "push ebp",
      "mov ebp, esp",
      "push dword [ebp+8]",
      "push printf_format",
      "call [printf]",
      "add esp, 8",
      "leave",
      "ret",
    ] {
      self.asm.emit_text(line);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::Parser;
  use crate::tokenizer::Tokenizer;

  fn compile_source(source: &str) -> CompileResult<String> {
    let mut parser = Parser::new(Tokenizer::new(source, "test.fn"))?;
    let declarations = parser.parse_file()?;
    generate(&declarations)
  }

  #[test]
  fn convert_integer_round_trips_without_narrowing() {
    for (ty, literal) in [(ty::I8, -100), (ty::U16, 40000), (ty::I32, -1), (ty::U8, 255)] {
      let loc = Location::new("test.fn", 0, 0);
      let forward = convert_integer(None, literal, ty, false, &loc).unwrap();
      let Value::Integer { ty: tagged, value } = forward else {
        panic!("expected a literal");
      };
      assert_eq!(tagged, Some(ty));
      assert_eq!(value, literal);
    }
  }

  #[test]
  fn convert_integer_masks_explicit_casts() {
    let loc = Location::new("test.fn", 0, 0);
    let masked = convert_integer(None, 300, ty::U8, true, &loc).unwrap();
    assert!(matches!(masked, Value::Integer { value: 44, .. }));
    // Reinterpreting the sign bit on a signed target.
    let wrapped = convert_integer(None, 255, ty::I8, true, &loc).unwrap();
    assert!(matches!(wrapped, Value::Integer { value: -1, .. }));
  }

  #[test]
  fn convert_integer_rejects_implicit_loss() {
    let loc = Location::new("test.fn", 0, 0);
    let err = convert_integer(None, 300, ty::U8, false, &loc).unwrap_err();
    assert!(matches!(
      err,
      CompileError::InvalidTypeCast { ref message, .. } if message == "possible value loss"
    ));
    let err = convert_integer(None, -1, ty::U32, false, &loc).unwrap_err();
    assert!(matches!(
      err,
      CompileError::InvalidTypeCast { ref message, .. }
        if message == "cannot change type's signedness"
    ));
  }

  #[test]
  fn globals_become_data_lines() {
    let listing = compile_source("i32 a = 42;").unwrap();
    assert!(listing.contains("  _a dd 42\n"));
  }

  #[test]
  fn untyped_global_defaults_to_i32() {
    let listing = compile_source("a = 5;").unwrap();
    assert!(listing.contains("  _a dd 5\n"));
  }

  #[test]
  fn global_initializers_fold() {
    let listing = compile_source("i32 x = 5 + 3 * 2;").unwrap();
    assert!(listing.contains("  _x dd 11\n"));
    assert!(!listing.contains("imul"));
  }

  #[test]
  fn global_initializer_with_cast_masks() {
    let listing = compile_source("u8 a = 300:u8;").unwrap();
    assert!(listing.contains("  _a db 44\n"));
  }

  #[test]
  fn non_constant_initializer_is_rejected() {
    let err = compile_source("i32 a = b;").unwrap_err();
    assert!(matches!(err, CompileError::UnexpectedSyntaxNode { .. }));
  }

  #[test]
  fn duplicate_symbols_are_rejected() {
    let err = compile_source("i32 a = 1; i32 a = 2;").unwrap_err();
    assert!(matches!(
      err,
      CompileError::DuplicateSymbol { ref symbol, .. } if symbol == "_a"
    ));
    let err = compile_source("i32 read() { return 0; }").unwrap_err();
    assert!(matches!(err, CompileError::DuplicateSymbol { .. }));
  }

  #[test]
  fn duplicate_parameter_names_are_rejected() {
    let err = compile_source("i32 f(i32 x, i32 x) { return x; }").unwrap_err();
    assert!(matches!(
      err,
      CompileError::DuplicateSymbol { ref symbol, .. } if symbol == "x"
    ));
  }

  #[test]
  fn unknown_type_is_rejected() {
    let err = compile_source("int a = 1;").unwrap_err();
    assert!(matches!(
      err,
      CompileError::UnknownIdentifier { ref name, .. } if name == "int"
    ));
  }

  #[test]
  fn unknown_identifier_in_function() {
    let err = compile_source("i32 main() { b = 1; return 0; }").unwrap_err();
    assert!(matches!(
      err,
      CompileError::UnknownIdentifier { ref name, .. } if name == "b"
    ));
  }

  #[test]
  fn assignment_requires_an_lvalue() {
    let err = compile_source("i32 a = 0; i32 main() { a + 1 = 2; return 0; }").unwrap_err();
    assert!(matches!(err, CompileError::NotLValue { .. }));
  }

  #[test]
  fn return_presence_must_match() {
    let err = compile_source("i32 main() { return; }").unwrap_err();
    assert!(matches!(err, CompileError::MismatchingReturn { .. }));
    let err = compile_source("f() { return 1; }").unwrap_err();
    assert!(matches!(err, CompileError::MismatchingReturn { .. }));
  }

  #[test]
  fn void_call_has_no_value() {
    let err = compile_source("i32 a = 0; i32 main() { a = write(1); return 0; }").unwrap_err();
    assert!(matches!(
      err,
      CompileError::NoReturnValue { ref name, .. } if name == "write"
    ));
  }

  #[test]
  fn only_functions_are_callable() {
    let err = compile_source("i32 a = 0; i32 main() { return a(); }").unwrap_err();
    assert!(matches!(err, CompileError::NotCallableType { .. }));
  }

  #[test]
  fn argument_count_must_match() {
    let err = compile_source("f() { write(1, 2); }").unwrap_err();
    assert!(matches!(err, CompileError::UnexpectedSyntaxNode { .. }));
  }

  #[test]
  fn negating_unsigned_is_rejected() {
    let err = compile_source("u32 a = 1; i32 main() { a = -a; return 0; }").unwrap_err();
    assert!(matches!(err, CompileError::UnsignedType { .. }));
  }

  #[test]
  fn multiplication_of_variables_is_not_implemented() {
    let err = compile_source("i32 a = 2; i32 main() { a = a * a; return 0; }").unwrap_err();
    assert!(matches!(
      err,
      CompileError::NotImplemented { ref what, .. } if what.contains("multiplication")
    ));
  }

  #[test]
  fn mixed_signedness_arithmetic_is_rejected() {
    let err =
      compile_source("i32 a = 1; u32 b = 2; i32 main() { a = a + b; return 0; }").unwrap_err();
    assert!(matches!(err, CompileError::InvalidTypeCast { .. }));
  }

  #[test]
  fn narrow_add_uses_byte_registers() {
    let listing = compile_source("u8 a = 0; i32 main() { a = a + 1; return 0; }").unwrap();
    assert!(listing.contains("mov al, byte [_a]"));
    assert!(listing.contains("add al, 1"));
    assert!(listing.contains("mov byte [_a], al"));
  }

  #[test]
  fn early_return_jumps_to_the_shared_epilogue() {
    let listing =
      compile_source("i32 a = 0; i32 main() { a = 1; return 0; a = 2; return 1; }").unwrap();
    assert!(listing.contains("jmp end_main"));
    assert!(listing.contains("end_main:"));
  }

  #[test]
  fn widening_a_parameter_sign_extends() {
    let listing = compile_source("i32 f(i16 x) { return x:i32; }").unwrap();
    assert!(listing.contains("movsx eax, word [ebp+8]"));
  }

  #[test]
  fn explicit_same_size_narrowing_through_cast() {
    // The cast target equals the destination type, so the computed value
    // is narrowed deliberately.
    let listing =
      compile_source("u8 a = 0; u16 b = 400; i32 main() { a = b:u8; return 0; }").unwrap();
    assert!(listing.contains("mov byte [_a], "));
  }

  #[test]
  fn parameters_resolve_to_frame_slots() {
    let listing = compile_source("i32 sum(i32 a, i32 b) { return a + b; }").unwrap();
    assert!(listing.contains("mov eax, dword [ebp+8]"));
    assert!(listing.contains("add eax, dword [ebp+12]"));
  }

  #[test]
  fn intrinsic_bodies_are_emitted() {
    let listing = compile_source("").unwrap();
    assert!(listing.contains("_read:\n"));
    assert!(listing.contains("call [scanf]"));
    assert!(listing.contains("_write:\n"));
    assert!(listing.contains("call [printf]"));
  }
}
