//! End-to-end scenarios over the public `compile` API: whole source units
//! in, required fragments of the FASM listing (or a diagnostic) out.

use facc::CompileError;

fn compile(source: &str) -> Result<String, CompileError> {
  facc::compile(source, "program.fn")
}

/// Assert that `fragments` occur in `listing` in the given order.
fn assert_in_order(listing: &str, fragments: &[&str]) {
  let mut from = 0;
  for fragment in fragments {
    match listing[from..].find(fragment) {
      Some(at) => from += at + fragment.len(),
      None => panic!("missing '{fragment}' (in order) in listing:\n{listing}"),
    }
  }
}

#[test]
fn global_declaration_lands_in_data_section() {
  let listing = compile("i32 a = 42;").unwrap();
  let data = listing
    .split("section '.text'")
    .next()
    .expect("listing has a data section");
  assert!(data.contains("_a dd 42"));
}

#[test]
fn global_arithmetic_and_return() {
  let listing = compile("i32 a = 1;  i32 main() { a = a + 2; return 0; }").unwrap();
  assert_in_order(
    &listing,
    &[
      "_main:",
      "mov eax, dword [_a]",
      "add eax, 2",
      "mov dword [_a], eax",
      "mov eax, 0",
      "leave",
      "ret",
    ],
  );
}

#[test]
fn constant_expressions_fold_before_emission() {
  let listing = compile("i32 x = 5 + 3 * 2;  i32 main() { return x; }").unwrap();
  assert!(listing.contains("_x dd 11"));
  let main_body = &listing[listing.find("_main:").unwrap()..];
  let main_body = &main_body[..main_body.find("ret").unwrap()];
  assert!(!main_body.contains("add"));
  assert!(!main_body.contains("imul"));
}

#[test]
fn byte_sized_arithmetic_stays_narrow() {
  let listing = compile("u8 a = 0;  i32 main() { a = a + 1; return 0; }").unwrap();
  assert_in_order(
    &listing,
    &["mov al, byte [_a]", "add al, 1", "mov byte [_a], al"],
  );
}

#[test]
fn negative_literal_fits_signed_but_not_unsigned() {
  let listing = compile("i32 a = 0;  i32 main() { a = -1; return 0; }").unwrap();
  assert!(listing.contains("mov dword [_a], -1"));

  let err = compile("u32 a = 0;  i32 main() { a = -1; return 0; }").unwrap_err();
  let CompileError::InvalidTypeCast { message, .. } = err else {
    panic!("expected an invalid type cast, got {err}");
  };
  assert_eq!(message, "cannot change type's signedness");
}

#[test]
fn two_argument_call_uses_a_presubtracted_frame() {
  let listing =
    compile("i32 sum(i32 a, i32 b) { return a + b; }  i32 main() { return sum(2, 3); }").unwrap();

  assert_in_order(
    &listing,
    &[
      "_sum:",
      "mov eax, dword [ebp+8]",
      "add eax, dword [ebp+12]",
    ],
  );
  assert_in_order(
    &listing,
    &[
      "_main:",
      "sub esp, 8",
      "mov dword [esp], 2",
      "mov dword [esp+4], 3",
      "call _sum",
      "add esp, 8",
      "leave",
      "ret",
    ],
  );
  // The call result is already in the return register; the final move is
  // elided.
  let main_body = &listing[listing.find("_main:").unwrap()..];
  assert!(!main_body.contains("mov eax, eax"));
}

#[test]
fn listing_structure_is_fixed() {
  let listing = compile("i32 main() { return 0; }").unwrap();
  assert_in_order(
    &listing,
    &[
      "format PE console",
      "entry start",
      "include 'win32a.inc'",
      "section '.data' data readable writeable",
      "scanf_format db \"%d\", 0",
      "printf_format db \"%d\", 10, 0",
      "section '.text' code readable executable",
      "start:",
      "call _main",
      "push eax",
      "call [ExitProcess]",
      "_main:",
      "_read:",
      "call [scanf]",
      "_write:",
      "call [printf]",
      "section '.idata' import data readable",
      "library kernel32,'KERNEL32.DLL', msvcrt,'MSVCRT.DLL'",
      "import kernel32, ExitProcess,'ExitProcess'",
      "import msvcrt, scanf,'scanf', printf,'printf'",
    ],
  );
}

#[test]
fn intrinsics_are_callable_from_user_code() {
  let listing = compile("i32 main() { write(read()); return 0; }").unwrap();
  assert_in_order(
    &listing,
    &[
      "_main:",
      "call _read",
      "mov dword [esp], eax",
      "call _write",
      "add esp, 4",
    ],
  );
}

#[test]
fn early_returns_share_one_epilogue() {
  let listing =
    compile("i32 a = 0;  i32 main() { a = 1; return 1; a = 2; return 2; }").unwrap();
  assert_in_order(&listing, &["_main:", "jmp end_main", "end_main:", "leave", "ret"]);
}

#[test]
fn deterministic_output() {
  let source = "i32 a = 1;  i32 b = 2;  i32 main() { a = a + b; return a; }";
  assert_eq!(compile(source).unwrap(), compile(source).unwrap());
}

#[test]
fn diagnostics_carry_locations() {
  let err = compile("i32 main() {\n  x = 1;\n  return 0;\n}").unwrap_err();
  let CompileError::UnknownIdentifier { location, name } = err else {
    panic!("expected an unknown identifier error");
  };
  assert_eq!(name, "x");
  assert_eq!(location.file, "program.fn");
  assert_eq!(location.line, 1);
  assert_eq!(location.column, 2);
}
