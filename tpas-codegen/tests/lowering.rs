use tpas_codegen::codegen;
use tpas_codegen::environment::{Environment, VarLocation};
use tpas_frontend::diagnostics::Diagnostics;
use tpas_frontend::parser;
use tpas_frontend::semantic;

use cranelift_codegen::entity::EntityRef;
use cranelift_codegen::ir::StackSlot;

fn compile_ir(input: &str) -> String {
    let mut diags = Diagnostics::new();
    let program = parser::parse_program(input, &mut diags).expect("parse failed");
    let mut semantic_context = semantic::SemanticContext::new();
    semantic::check_program(&program, &mut semantic_context, &mut diags);
    assert_eq!(diags.num_error(), 0, "unexpected semantic errors");

    let ir = codegen::emit_ir(None, &program, &semantic_context, &mut diags);
    assert_eq!(diags.num_error(), 0, "unexpected lowering errors");
    ir
}

#[test]
fn arithmetic_uses_default_write_width() {
    let ir = compile_ir(
        r#"
program test;
var
  x : integer;
begin
  x := 2 + 3 * 4;
  writeln(x);
end.
"#,
    );
    assert!(ir.contains("imul"), "multiplication is lowered:\n{}", ir);
    assert!(ir.contains("iadd"), "addition is lowered:\n{}", ir);
    assert!(ir.contains("__write_int"), "integer writer is called:\n{}", ir);
    // The default field width of an integer is 13.
    assert!(ir.contains("iconst.i32 13"), "default width 13:\n{}", ir);
    assert!(ir.contains("__write_nl"), "writeln appends a newline:\n{}", ir);
}

#[test]
fn integer_widens_into_real_destination() {
    let ir = compile_ir(
        r#"
program test;
var
  r : real;
begin
  r := 1;
  r := r / 2;
  writeln(r:0:2);
end.
"#,
    );
    assert!(
        ir.contains("fcvt_from_sint"),
        "integer operand is widened:\n{}",
        ir
    );
    assert!(ir.contains("fdiv"), "real division:\n{}", ir);
    assert!(ir.contains("__write_real"), "real writer:\n{}", ir);
    // Explicit width 0 and precision 2.
    assert!(ir.contains("iconst.i32 0"), "width 0 passed:\n{}", ir);
    assert!(ir.contains("iconst.i32 2"), "precision 2 passed:\n{}", ir);
}

#[test]
fn default_real_precision_is_minus_one() {
    let ir = compile_ir(
        r#"
program test;
var
  r : real;
begin
  r := 2.5;
  write(r);
end.
"#,
    );
    assert!(ir.contains("iconst.i32 15"), "default real width 15:\n{}", ir);
    assert!(ir.contains("iconst.i32 -1"), "default precision -1:\n{}", ir);
}

#[test]
fn for_loop_tests_equality_before_increment() {
    let ir = compile_ir(
        r#"
program test;
var
  i : integer;
begin
  for i := 1 to 3 do
    write(i);
end.
"#,
    );
    assert!(ir.contains("brif"), "conditional branches:\n{}", ir);
    // The emptiness pre-test and the equality exit test.
    assert!(ir.contains("icmp sgt"), "empty-range test:\n{}", ir);
    assert!(ir.contains("icmp eq"), "exit test:\n{}", ir);
    assert!(ir.contains("iadd_imm"), "induction step:\n{}", ir);
    assert!(ir.contains("__write_int"), "loop body write:\n{}", ir);
}

#[test]
fn downto_loop_uses_signed_less_than() {
    let ir = compile_ir(
        r#"
program test;
var
  i : integer;
begin
  for i := 3 downto 1 do
    write(i);
end.
"#,
    );
    assert!(ir.contains("icmp slt"), "downward empty-range test:\n{}", ir);
}

#[test]
fn while_and_repeat_shapes() {
    let ir = compile_ir(
        r#"
program test;
var
  i : integer;
begin
  i := 0;
  while i < 10 do
    i := i + 1;
  repeat
    i := i - 1;
  until i = 0;
end.
"#,
    );
    assert!(ir.contains("icmp slt"), "while condition:\n{}", ir);
    assert!(ir.contains("icmp eq"), "until condition:\n{}", ir);
    assert!(ir.contains("brif"), "loop branches:\n{}", ir);
}

#[test]
fn if_then_else_branches_and_merges() {
    let ir = compile_ir(
        r#"
program test;
var
  x : integer;
begin
  if x < 3 then
    x := 1
  else
    x := 2;
end.
"#,
    );
    assert!(ir.contains("brif"), "two-way branch:\n{}", ir);
    let jumps = ir.matches("jump").count();
    assert!(jumps >= 2, "both arms jump to the merge block:\n{}", ir);
}

#[test]
fn set_literal_builds_bit_words() {
    let ir = compile_ir(
        r#"
program test;
var
  s : set of 0..7;
  b : boolean;
begin
  s := [1, 3, 5];
  b := 3 in s;
end.
"#,
    );
    assert!(ir.contains("ishl"), "bits are shifted into place:\n{}", ir);
    assert!(ir.contains("bor"), "bits are or-ed into the words:\n{}", ir);
    assert!(ir.contains("ushr"), "membership shifts the bit down:\n{}", ir);
    assert!(ir.contains("band_imm"), "membership masks the bit:\n{}", ir);
}

#[test]
fn set_operations_are_word_wise() {
    let ir = compile_ir(
        r#"
program test;
var
  s, t, u : set of 0..7;
  b : boolean;
begin
  s := [1, 2];
  t := [2, 3];
  u := s + t;
  u := s * t;
  u := s - t;
  b := s = t;
end.
"#,
    );
    assert!(ir.contains("band_not"), "set difference:\n{}", ir);
    assert!(ir.contains("band"), "set intersection:\n{}", ir);
    assert!(ir.contains("bor"), "set union:\n{}", ir);
}

#[test]
fn char_array_assignment_and_write() {
    let ir = compile_ir(
        r#"
program test;
var
  a : array[1..3] of char;
begin
  a := 'abc';
  write(a);
end.
"#,
    );
    assert!(ir.contains("__write_str"), "string writer is used:\n{}", ir);
}

#[test]
fn multi_dimensional_array_indexing_scales_strides() {
    let ir = compile_ir(
        r#"
program test;
var
  a : array[1..3, 2..5] of integer;
begin
  a[2, 3] := 7;
end.
"#,
    );
    // Indices are origin-shifted and scaled by the element stride.
    assert!(ir.contains("imul_imm"), "stride scaling:\n{}", ir);
    assert!(ir.contains("iadd"), "base plus offset:\n{}", ir);
}

#[test]
fn function_call_binds_result() {
    let ir = compile_ir(
        r#"
program test;
function double(a : integer) : integer;
begin
  double := a * 2;
end;
begin
  writeln(double(3));
end.
"#,
    );
    assert!(ir.contains("call fn"), "user call:\n{}", ir);
    assert!(ir.contains("; function 'double'"), "function is emitted:\n{}", ir);
    assert!(ir.contains("; function 'main'"), "main is emitted:\n{}", ir);
}

#[test]
fn var_parameters_pass_addresses() {
    let ir = compile_ir(
        r#"
program test;
var
  i : integer;
procedure bump(var x : integer);
begin
  x := x + 1;
end;
begin
  i := 0;
  bump(i);
end.
"#,
    );
    // The callee loads and stores through the incoming pointer.
    assert!(ir.contains("load.i32"), "load through pointer:\n{}", ir);
    assert!(ir.contains("store"), "store through pointer:\n{}", ir);
}

#[test]
fn read_passes_addresses_to_typed_readers() {
    let ir = compile_ir(
        r#"
program test;
var
  x : integer;
  r : real;
  c : char;
begin
  read(x, r, c);
  readln;
end.
"#,
    );
    assert!(ir.contains("__read_int"), "integer reader:\n{}", ir);
    assert!(ir.contains("__read_real"), "real reader:\n{}", ir);
    assert!(ir.contains("__read_chr"), "char reader:\n{}", ir);
    assert!(ir.contains("__read_nl"), "readln newline:\n{}", ir);
}

#[test]
fn nil_lowers_to_a_null_pointer() {
    let ir = compile_ir(
        r#"
program test;
type
  p = ^node;
  node = record
    v : integer;
    n : p;
  end;
var
  h : p;
begin
  h := nil;
end.
"#,
    );
    assert!(ir.contains("iconst.i64 0"), "null pointer constant:\n{}", ir);
}

#[test]
fn pointer_dereference_uses_the_pointer_as_address() {
    let ir = compile_ir(
        r#"
program test;
type
  p = ^integer;
var
  h : p;
  x : integer;
begin
  x := h^;
  h^ := 4;
end.
"#,
    );
    assert!(ir.contains("load.i64"), "pointer value is loaded:\n{}", ir);
    assert!(ir.contains("load.i32"), "pointee is loaded:\n{}", ir);
}

#[test]
fn record_field_access_uses_offsets() {
    let ir = compile_ir(
        r#"
program test;
type
  pair = record
    a : char;
    b : integer;
  end;
var
  r : pair;
  x : integer;
begin
  r.b := 3;
  x := r.b;
end.
"#,
    );
    // Field b sits at offset 4 after the aligned char.
    assert!(ir.contains("iadd_imm"), "field offset is added:\n{}", ir);
}

#[test]
fn char_concatenation_materialises_a_string() {
    let ir = compile_ir(
        r#"
program test;
begin
  writeln('a' + 'b');
end.
"#,
    );
    assert!(ir.contains("__write_str"), "concatenation is written as a string:\n{}", ir);
}

#[test]
fn builtins_lower_inline() {
    let ir = compile_ir(
        r#"
program test;
var
  x : integer;
  b : boolean;
  c : char;
begin
  x := abs(-3);
  b := odd(x);
  x := ord('a');
  c := chr(65);
  x := succ(x);
  x := pred(x);
end.
"#,
    );
    assert!(ir.contains("select"), "abs selects the negated value:\n{}", ir);
    assert!(ir.contains("ireduce"), "chr narrows to a char:\n{}", ir);
    assert!(!ir.contains("call fn"), "builtins never call out:\n{}", ir);
}

// A name bound in an inner scope disappears when the level is dropped and
// the outer binding is visible again, unchanged.
#[test]
fn environment_scoped_lookup() {
    let mut env = Environment::new();
    let outer = StackSlot::new(1);
    let inner = StackSlot::new(2);

    assert!(env.add("x", VarLocation::Stack(outer)));
    env.new_level();
    assert!(env.add("x", VarLocation::Stack(inner)));
    match env.find("x") {
        Some(VarLocation::Stack(s)) => assert_eq!(s, inner),
        other => panic!("unexpected location {:?}", other),
    }
    // Duplicates are rejected within a level.
    assert!(!env.add("x", VarLocation::Stack(inner)));
    assert!(env.add("y", VarLocation::Stack(inner)));

    env.drop_level();
    match env.find("x") {
        Some(VarLocation::Stack(s)) => assert_eq!(s, outer),
        other => panic!("unexpected location {:?}", other),
    }
    assert!(env.find("y").is_none());
    assert!(env.dump().contains("x"));
}
