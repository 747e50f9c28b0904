use tpas_frontend::ast;
use tpas_frontend::diagnostics;
use tpas_frontend::dump;
use tpas_frontend::parser;
use tpas_frontend::semantic;

fn parse_ok(input: &str) -> tpas_frontend::span::SpannedBox<ast::Program> {
    let mut diags = diagnostics::Diagnostics::new();
    let p = parser::parse_program(input, &mut diags);
    assert_eq!(diags.num_error(), 0, "unexpected parse errors");
    p.expect("no AST was created?")
}

#[test]
fn parses_program_heading_and_block() {
    let p = parse_ok(
        r#"
program test(input, output);
var
  x : integer;
begin
  x := 1;
end."#,
    );
    assert_eq!(p.get().0.get(), "test");
    let block = p.get().1.get();
    assert!(block.1.is_some());
    assert!(matches!(block.3.get(), ast::Stmt::Compound(..)));
}

#[test]
fn precedence_multiplication_binds_tighter() {
    let p = parse_ok(
        r#"
program test;
var
  x : integer;
begin
  x := 2 + 3 * 4;
end."#,
    );
    let block = p.get().1.get();
    let stmts = match block.3.get() {
        ast::Stmt::Compound(s) => &s.0,
        _ => panic!("expected compound"),
    };
    let assig = match stmts[0].get() {
        ast::Stmt::Assignment(a) => a,
        _ => panic!("expected assignment"),
    };
    // The tree is (2 + (3 * 4)).
    match assig.1.get() {
        ast::Expr::BinOp(top) => {
            assert_eq!(*top.0.get(), ast::BinOperator::Addition);
            match top.2.get() {
                ast::Expr::BinOp(inner) => {
                    assert_eq!(*inner.0.get(), ast::BinOperator::Multiplication)
                }
                _ => panic!("expected nested multiplication"),
            }
        }
        _ => panic!("expected a binary operation"),
    }
}

#[test]
fn comments_and_case_insensitivity() {
    parse_ok(
        r#"
PROGRAM Test; { nested { comments } are fine }
VAR
  X : Integer; (* old style too *)
BEGIN
  x := 1;
END."#,
    );
}

#[test]
fn write_arguments_carry_width_and_precision() {
    let p = parse_ok(
        r#"
program test;
var
  r : real;
begin
  writeln(r:0:2, 'done');
end."#,
    );
    let block = p.get().1.get();
    let stmts = match block.3.get() {
        ast::Stmt::Compound(s) => &s.0,
        _ => panic!("expected compound"),
    };
    let write = match stmts[0].get() {
        ast::Stmt::Write(w) => w,
        _ => panic!("expected write"),
    };
    assert!(write.0, "writeln flag");
    assert_eq!(write.1.len(), 2);
    let first = write.1[0].get();
    assert!(first.1.is_some(), "width present");
    assert!(first.2.is_some(), "precision present");
    let second = write.1[1].get();
    assert!(second.1.is_none());
}

#[test]
fn designators_nest() {
    let p = parse_ok(
        r#"
program test;
type
  p = ^rec;
  rec = record
    f : array[1..3] of integer;
  end;
var
  h : p;
  x : integer;
begin
  x := h^.f[2];
end."#,
    );
    let block = p.get().1.get();
    let stmts = match block.3.get() {
        ast::Stmt::Compound(s) => &s.0,
        _ => panic!("expected compound"),
    };
    let assig = match stmts[0].get() {
        ast::Stmt::Assignment(a) => a,
        _ => panic!("expected assignment"),
    };
    // h^.f[2] parses as ArrayAccess(FieldAccess(Deref(Variable)))
    match assig.1.get() {
        ast::Expr::ArrayAccess(a) => match a.0.get() {
            ast::Expr::FieldAccess(f) => {
                assert!(matches!(f.0.get(), ast::Expr::Deref(..)));
            }
            _ => panic!("expected field access"),
        },
        _ => panic!("expected array access"),
    }
}

#[test]
fn parse_error_is_diagnosed() {
    let mut diags = diagnostics::Diagnostics::new();
    let p = parser::parse_program("program test; begin x := end.", &mut diags);
    assert!(p.is_none());
    assert!(diags.num_error() > 0);
}

#[test]
fn ast_dump_shows_types() {
    let input = r#"
program test;
var
  x : integer;
  y : real;
begin
  x := 3;
  y := x + y;
end."#;
    let mut diags = diagnostics::Diagnostics::new();
    let p = parser::parse_program(input, &mut diags).expect("parse failed");
    let mut ctx = semantic::SemanticContext::new();
    semantic::check_program(&p, &mut ctx, &mut diags);
    assert_eq!(diags.num_error(), 0);

    let mut dumper = dump::ASTDumper::new(input, &ctx);
    dumper.dump_program(&p);
    let text = dumper.to_string();

    assert!(text.contains("Program \"test\""), "{}", text);
    assert!(text.contains("VariableDeclarationPart"), "{}", text);
    assert!(text.contains("StmtAssignment"), "{}", text);
    assert!(text.contains("BinOp + real"), "{}", text);
    assert!(text.contains("ExprVariable \"x\" integer"), "{}", text);
}
