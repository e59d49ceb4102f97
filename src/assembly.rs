//! Append-only builder for the final FASM listing.
//!
//! Three ordered sinks: the `data` segment, the `text` segment, and a
//! per-function `code` buffer. Function bodies are emitted into `code`
//! first so the prologue can be written once the set of touched registers
//! is known, then spliced into `text`. `finish` joins the segments with
//! the fixed PE console boilerplate.

#[derive(Debug, Default)]
pub struct AssemblyWriter {
  data: String,
  text: String,
  code: String,
}

impl AssemblyWriter {
  pub fn new() -> Self {
    Self::default()
  }

  /// A `<symbol> <directive> <value>` line in the data segment.
  pub fn emit_data(&mut self, symbol: &str, directive: &str, value: &str) {
    self.data.push_str("  ");
    self.data.push_str(symbol);
    self.data.push(' ');
    self.data.push_str(directive);
    self.data.push(' ');
    self.data.push_str(value);
    self.data.push('\n');
  }

  pub fn emit_label(&mut self, name: &str) {
    self.text.push_str(name);
    self.text.push_str(":\n");
  }

  pub fn emit_text(&mut self, instruction: impl AsRef<str>) {
    self.text.push_str("  ");
    self.text.push_str(instruction.as_ref());
    self.text.push('\n');
  }

  pub fn blank_text_line(&mut self) {
    self.text.push('\n');
  }

  /// Emit an instruction into the current function's body buffer.
  pub fn emit_code(&mut self, instruction: impl AsRef<str>) {
    self.code.push_str("  ");
    self.code.push_str(instruction.as_ref());
    self.code.push('\n');
  }

  /// Splice the buffered function body into the text segment, between the
  /// already-emitted prologue and the epilogue that follows.
  pub fn insert_function_code(&mut self) {
    self.text.push_str(&self.code);
    self.code.clear();
  }

  pub fn clear_code(&mut self) {
    self.code.clear();
  }

  /// Assemble the complete listing: headers, data (globals plus the fixed
  /// scanf/printf format strings), the start stub, the text segment and
  /// the import table.
  pub fn finish(self) -> String {
    let mut listing = String::new();
    listing.push_str("format PE console\n");
    listing.push_str("entry start\n");
    listing.push('\n');
    listing.push_str("include 'win32a.inc'\n");
    listing.push('\n');

    listing.push_str("section '.data' data readable writeable\n");
    listing.push_str(&self.data);
    listing.push_str("  scanf_format db \"%d\", 0\n");
    listing.push_str("  printf_format db \"%d\", 10, 0\n");
    listing.push('\n');

    listing.push_str("section '.text' code readable executable\n");
    listing.push_str("start:\n");
    listing.push_str("  call _main\n");
    listing.push_str("  push eax\n");
    listing.push_str("  call [ExitProcess]\n");
    listing.push_str(&self.text);
    listing.push('\n');

    listing.push_str("section '.idata' import data readable\n");
    listing.push_str("  library kernel32,'KERNEL32.DLL', msvcrt,'MSVCRT.DLL'\n");
    listing.push_str("  import kernel32, ExitProcess,'ExitProcess'\n");
    listing.push_str("  import msvcrt, scanf,'scanf', printf,'printf'\n");
    listing
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn splices_code_between_prologue_and_epilogue() {
    let mut asm = AssemblyWriter::new();
    asm.emit_code("add eax, 2");
    asm.emit_label("_f");
    asm.emit_text("push ebp");
    asm.insert_function_code();
    asm.emit_text("ret");

    let listing = asm.finish();
    let f = listing.find("_f:").unwrap();
    let push = listing.find("push ebp").unwrap();
    let add = listing.find("add eax, 2").unwrap();
    let ret = listing.find("  ret").unwrap();
    assert!(f < push && push < add && add < ret);
  }

  #[test]
  fn listing_carries_the_fixed_boilerplate() {
    let mut asm = AssemblyWriter::new();
    asm.emit_data("_a", "dd", "42");
    let listing = asm.finish();
    assert!(listing.starts_with("format PE console\n"));
    assert!(listing.contains("  _a dd 42\n"));
    assert!(listing.contains("scanf_format db \"%d\", 0"));
    assert!(listing.contains("printf_format db \"%d\", 10, 0"));
    assert!(listing.contains("start:\n  call _main\n  push eax\n  call [ExitProcess]\n"));
    assert!(listing.contains("import msvcrt, scanf,'scanf', printf,'printf'"));
  }
}
