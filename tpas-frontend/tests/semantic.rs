use tpas_frontend::ast;
use tpas_frontend::diagnostics;
use tpas_frontend::parser;
use tpas_frontend::semantic;

mod common;

use common::CheckDiagnostics;

fn semantic_check_diags(input: &str, errors: Vec<String>) {
    let mut diags = diagnostics::Diagnostics::new();
    let p = parser::parse_program(input, &mut diags);

    let p = match p {
        Some(p) => p,
        None => panic!("no AST was created?"),
    };

    let mut semantic_context = semantic::SemanticContext::new();
    semantic::check_program(&p, &mut semantic_context, &mut diags);

    let mut check_diags = CheckDiagnostics::new();
    errors.iter().for_each(|s| check_diags.check_error(s));

    diags.report(&check_diags);
    assert_eq!(
        errors.len(),
        check_diags.num_diagnostics_seen(),
        "fewer diagnostics emitted than checked for"
    );
}

fn checked_program(
    input: &str,
) -> (
    tpas_frontend::span::SpannedBox<ast::Program>,
    semantic::SemanticContext,
) {
    let mut diags = diagnostics::Diagnostics::new();
    let p = parser::parse_program(input, &mut diags).expect("parse failed");
    let mut semantic_context = semantic::SemanticContext::new();
    semantic::check_program(&p, &mut semantic_context, &mut diags);
    assert_eq!(diags.num_error(), 0, "unexpected diagnostics");
    (p, semantic_context)
}

#[test]
fn no_diagnostics() {
    semantic_check_diags(
        r#"
program test(input, output);
var
  x : integer;
  y, z : real;
begin
   x := 3;
   y := 2.3;
   z := x + y;
end."#,
        vec![],
    );
}

#[test]
fn semantic_diagnostics() {
    semantic_check_diags(
        r#"
program test;
var
  aa : real;
  bbb : integer;
  cccc : boolean;
begin
  aa := bbb + aa;
  aaa := bbb + aa + cccc;
end.
  "#,
        vec![
            "identifier 'aaa' not found in this scope".to_string(),
            "Incompatible type in expression".to_string(),
        ],
    )
}

#[test]
fn incompatible_assignment() {
    semantic_check_diags(
        r#"
program test;
var
  x : integer;
begin
  x := 1.5;
end.
"#,
        vec!["Incompatible type in assignment".to_string()],
    );
}

#[test]
fn value_out_of_range() {
    semantic_check_diags(
        r#"
program test;
var
  r : 1..5;
begin
  r := 7;
end.
"#,
        vec!["Value out of range".to_string()],
    );
}

#[test]
fn subrange_in_range_is_fine() {
    semantic_check_diags(
        r#"
program test;
var
  r : 1..5;
  x : integer;
begin
  r := 3;
  x := r + 1;
end.
"#,
        vec![],
    );
}

#[test]
fn forward_pointer_resolves() {
    semantic_check_diags(
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
        vec![],
    );
}

#[test]
fn forward_pointer_unresolved() {
    semantic_check_diags(
        r#"
program test;
type
  p = ^nothing;
var
  h : p;
begin
  h := nil;
end.
"#,
        vec!["forward declared pointer type not declared: nothing".to_string()],
    );
}

#[test]
fn at_most_one_function_body() {
    semantic_check_diags(
        r#"
program test;
function f : integer;
begin
  f := 1;
end;
function f : integer;
begin
  f := 2;
end;
begin
end.
"#,
        vec!["function 'f' has already been defined".to_string()],
    );
}

#[test]
fn forward_then_definition_is_fine() {
    semantic_check_diags(
        r#"
program test;
procedure p(x : integer); forward;
procedure q;
begin
  p(3);
end;
procedure p(x : integer);
begin
end;
begin
  q;
end.
"#,
        vec![],
    );
}

#[test]
fn duplicate_variable() {
    semantic_check_diags(
        r#"
program test;
var
  x : integer;
  x : real;
begin
end.
"#,
        vec!["identifier 'x' has already been declared in this scope".to_string()],
    );
}

#[test]
fn char_array_takes_matching_string_literal() {
    semantic_check_diags(
        r#"
program test;
var
  a : array[1..3] of char;
begin
  a := 'abc';
end.
"#,
        vec![],
    );
}

#[test]
fn char_array_rejects_wrong_length() {
    semantic_check_diags(
        r#"
program test;
var
  a : array[1..3] of char;
begin
  a := 'ab';
end.
"#,
        vec!["String assignment from incompatible string constant".to_string()],
    );
}

#[test]
fn set_assignment_and_membership() {
    semantic_check_diags(
        r#"
program test;
var
  s : set of 0..7;
  x : integer;
begin
  s := [1, 3, 5];
  s := [];
  if 3 in s then
    x := 1;
end.
"#,
        vec![],
    );
}

#[test]
fn set_subtype_mismatch() {
    semantic_check_diags(
        r#"
program test;
var
  s : set of 0..7;
begin
  s := ['a'];
end.
"#,
        vec!["Subtypes are different in assignment.".to_string()],
    );
}

#[test]
fn in_requires_integral_left_hand() {
    semantic_check_diags(
        r#"
program test;
var
  s : set of 0..7;
  b : boolean;
begin
  b := 1.5 in s;
end.
"#,
        vec![
            "Left hand of 'in' expression should be integral.".to_string(),
            "Left hand type does not match constituent parts of set".to_string(),
        ],
    );
}

#[test]
fn var_argument_must_be_a_variable() {
    semantic_check_diags(
        r#"
program test;
procedure p(var x : integer);
begin
  x := 1;
end;
begin
  p(3);
end.
"#,
        vec!["Args declared with 'var' must be a variable".to_string()],
    );
}

#[test]
fn wrong_number_of_arguments() {
    semantic_check_diags(
        r#"
program test;
procedure p(x : integer);
begin
end;
begin
  p(1, 2);
end.
"#,
        vec!["Incorrect number of arguments for 'p'".to_string()],
    );
}

#[test]
fn condition_must_be_integral() {
    semantic_check_diags(
        r#"
program test;
var
  x : integer;
begin
  if 1.5 then
    x := 1;
end.
"#,
        vec!["the condition of this statement must be integral".to_string()],
    );
}

#[test]
fn procedure_name_clash() {
    semantic_check_diags(
        r#"
program test;
var
  f : integer;
procedure f;
begin
end;
begin
end.
"#,
        vec!["identifier 'f' has already been declared in this scope".to_string()],
    );
}

#[test]
fn parameters_shadow_globals() {
    semantic_check_diags(
        r#"
program test;
var
  x : integer;
function twice(x : integer) : integer;
begin
  twice := x * 2;
end;
begin
  x := twice(4);
end.
"#,
        vec![],
    );
}

#[test]
fn enum_values_usable_in_expressions() {
    semantic_check_diags(
        r#"
program test;
type
  color = (red, green, blue);
var
  c : color;
begin
  c := green;
  if c = blue then
    c := red;
end.
"#,
        vec![],
    );
}

// Concatenating two chars produces the canonical 255-character string.
#[test]
fn char_concatenation_yields_string_255() {
    let (p, ctx) = checked_program(
        r#"
program test;
begin
  writeln('a' + 'b');
end.
"#,
    );

    let block = p.get().1.get();
    let stmts = match block.3.get() {
        ast::Stmt::Compound(s) => &s.0,
        _ => panic!("expected a compound statement"),
    };
    let write = match stmts[0].get() {
        ast::Stmt::Write(w) => w,
        _ => panic!("expected a write statement"),
    };
    let concat = &write.1[0].get().0;

    let ty = ctx.get_ast_type(concat.id()).expect("expression not typed");
    let ts = &ctx.type_system;
    assert!(ts.is_string_type(ty));
    let range = ts.get_range(ty).unwrap();
    assert_eq!((range.start(), range.end()), (0, 255));
}

// A set literal assigned to a declared set picks up the declared range
// before lowering.
#[test]
fn set_literal_takes_destination_range() {
    let (p, ctx) = checked_program(
        r#"
program test;
var
  s : set of 0..7;
begin
  s := [1, 3, 5];
end.
"#,
    );

    let block = p.get().1.get();
    let stmts = match block.3.get() {
        ast::Stmt::Compound(s) => &s.0,
        _ => panic!("expected a compound statement"),
    };
    let assig = match stmts[0].get() {
        ast::Stmt::Assignment(a) => a,
        _ => panic!("expected an assignment"),
    };

    let rhs_ty = ctx.get_ast_type(assig.1.id()).expect("literal not typed");
    let ts = &ctx.type_system;
    assert!(ts.is_set_type(rhs_ty));
    let range = ts.set_range(rhs_ty).expect("range must be filled in");
    assert_eq!((range.start(), range.end()), (0, 7));
    assert_eq!(ts.set_words(rhs_ty), 1);
}

// A set literal that never meets a declared set falls back to the range
// guessed from its element type, written back by the deferred fixup.
#[test]
fn dangling_set_literal_gets_clamped_range() {
    let (p, ctx) = checked_program(
        r#"
program test;
var
  b : boolean;
begin
  b := 600 in [1, 3, 5];
end.
"#,
    );

    let block = p.get().1.get();
    let stmts = match block.3.get() {
        ast::Stmt::Compound(s) => &s.0,
        _ => panic!("expected a compound statement"),
    };
    let assig = match stmts[0].get() {
        ast::Stmt::Assignment(a) => a,
        _ => panic!("expected an assignment"),
    };
    let in_expr = match assig.1.get() {
        ast::Expr::BinOp(b) => b,
        _ => panic!("expected a binary expression"),
    };

    let set_ty = ctx.get_ast_type(in_expr.2.id()).expect("literal not typed");
    let ts = &ctx.type_system;
    let range = ts.set_range(set_ty).expect("range must be filled in");
    // Synthesised from the integer operand's range, clamped.
    assert_eq!((range.start(), range.end()), (0, 511));
}
