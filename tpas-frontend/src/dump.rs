use crate::ast;
use crate::semantic::SemanticContext;
use crate::span::{LineMap, SpanId, SpanLoc, SpannedBox};

use std::fmt;

/// Prints the AST as an indented tree with source positions and, after
/// semantic analysis, the resolved type of each expression.
pub struct ASTDumper<'a> {
    linemap: LineMap,
    ctx: &'a SemanticContext,
    output: String,
    depth: usize,
}

impl<'a> ASTDumper<'a> {
    pub fn new(input: &str, ctx: &'a SemanticContext) -> ASTDumper<'a> {
        ASTDumper {
            linemap: LineMap::new(input),
            ctx,
            output: String::new(),
            depth: 0,
        }
    }

    pub fn dump_program(&mut self, program: &SpannedBox<ast::Program>) {
        self.line(program.loc(), &format!("Program \"{}\"", program.get().0.get()));
        self.nested(|d| d.dump_block(&program.get().1));
    }

    fn line(&mut self, loc: &SpanLoc, text: &str) {
        let (line, col) = self.linemap.offset_to_line_and_col(loc.begin());
        for _ in 0..self.depth {
            self.output.push_str("  ");
        }
        self.output.push_str(&format!("{} {}:{}\n", text, line, col));
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self)) {
        self.depth += 1;
        f(self);
        self.depth -= 1;
    }

    fn type_of(&self, id: SpanId) -> String {
        match self.ctx.get_ast_type(id) {
            Some(ty) => self.ctx.type_system.get_type_name(ty),
            None => "<no type>".to_string(),
        }
    }

    fn dump_block(&mut self, block: &SpannedBox<ast::Block>) {
        self.line(block.loc(), "Block");
        self.nested(|d| {
            let block = block.get();
            if let Some(types) = &block.0 {
                d.line(types.loc(), "TypeDefinitionPart");
                d.nested(|d| {
                    for def in &types.get().0 {
                        d.line(
                            def.loc(),
                            &format!(
                                "TypeDefinition \"{}\" {}",
                                def.get().0.get(),
                                d.type_of(def.get().1.id())
                            ),
                        );
                    }
                });
            }
            if let Some(vars) = &block.1 {
                d.dump_variable_declarations(vars);
            }
            for proc in &block.2 {
                d.dump_procedure(proc);
            }
            d.dump_stmt(&block.3);
        });
    }

    fn dump_variable_declarations(&mut self, vars: &SpannedBox<ast::VariableDeclarationPart>) {
        self.line(vars.loc(), "VariableDeclarationPart");
        self.nested(|d| {
            for decl in &vars.get().0 {
                let names: Vec<_> = decl.get().0.iter().map(|n| n.get().clone()).collect();
                d.line(
                    decl.loc(),
                    &format!("VariableDeclaration [{}]", names.join(", ")),
                );
            }
        });
    }

    fn dump_procedure(&mut self, proc: &SpannedBox<ast::ProcedureDeclaration>) {
        match proc.get() {
            ast::ProcedureDeclaration::ProcedureForward(p) => {
                self.line(proc.loc(), &format!("ProcedureForward \"{}\"", p.0.get()));
            }
            ast::ProcedureDeclaration::ProcedureDefinition(p) => {
                self.line(proc.loc(), &format!("ProcedureDefinition \"{}\"", p.0.get()));
                self.nested(|d| d.dump_function_body(&p.2));
            }
            ast::ProcedureDeclaration::FunctionForward(p) => {
                self.line(proc.loc(), &format!("FunctionForward \"{}\"", p.0.get()));
            }
            ast::ProcedureDeclaration::FunctionDefinition(p) => {
                self.line(proc.loc(), &format!("FunctionDefinition \"{}\"", p.0.get()));
                self.nested(|d| d.dump_function_body(&p.3));
            }
        }
    }

    fn dump_function_body(&mut self, body: &SpannedBox<ast::FunctionBody>) {
        if let Some(vars) = &body.get().0 {
            self.dump_variable_declarations(vars);
        }
        self.dump_stmt(&body.get().1);
    }

    fn dump_stmt(&mut self, stmt: &SpannedBox<ast::Stmt>) {
        match stmt.get() {
            ast::Stmt::Compound(s) => {
                self.line(stmt.loc(), "StmtCompound");
                self.nested(|d| {
                    for sub in &s.0 {
                        d.dump_stmt(sub);
                    }
                });
            }
            ast::Stmt::Assignment(s) => {
                self.line(stmt.loc(), "StmtAssignment");
                self.nested(|d| {
                    d.dump_expr(&s.0);
                    d.dump_expr(&s.1);
                });
            }
            ast::Stmt::ProcedureCall(s) => {
                self.line(stmt.loc(), &format!("StmtProcedureCall \"{}\"", s.0.get()));
                self.nested(|d| {
                    for arg in &s.1 {
                        d.dump_expr(arg);
                    }
                });
            }
            ast::Stmt::If(s) => {
                self.line(stmt.loc(), "StmtIf");
                self.nested(|d| {
                    d.dump_expr(&s.0);
                    d.dump_stmt(&s.1);
                    if let Some(else_part) = &s.2 {
                        d.dump_stmt(else_part);
                    }
                });
            }
            ast::Stmt::WhileDo(s) => {
                self.line(stmt.loc(), "StmtWhileDo");
                self.nested(|d| {
                    d.dump_expr(&s.0);
                    d.dump_stmt(&s.1);
                });
            }
            ast::Stmt::RepeatUntil(s) => {
                self.line(stmt.loc(), "StmtRepeatUntil");
                self.nested(|d| {
                    for sub in &s.0 {
                        d.dump_stmt(sub);
                    }
                    d.dump_expr(&s.1);
                });
            }
            ast::Stmt::For(s) => {
                let kind = match s.0 {
                    ast::ForKind::To => "to",
                    ast::ForKind::DownTo => "downto",
                };
                self.line(
                    stmt.loc(),
                    &format!("StmtFor \"{}\" {}", s.1.get(), kind),
                );
                self.nested(|d| {
                    d.dump_expr(&s.2);
                    d.dump_expr(&s.3);
                    d.dump_stmt(&s.4);
                });
            }
            ast::Stmt::Write(s) => {
                self.line(
                    stmt.loc(),
                    if s.0 { "StmtWriteln" } else { "StmtWrite" },
                );
                self.nested(|d| {
                    for arg in &s.1 {
                        d.dump_expr(&arg.get().0);
                    }
                });
            }
            ast::Stmt::Read(s) => {
                self.line(stmt.loc(), if s.0 { "StmtReadln" } else { "StmtRead" });
                self.nested(|d| {
                    for arg in &s.1 {
                        d.dump_expr(arg);
                    }
                });
            }
            ast::Stmt::Empty(..) => {
                self.line(stmt.loc(), "StmtEmpty");
            }
        }
    }

    fn dump_expr(&mut self, expr: &SpannedBox<ast::Expr>) {
        let ty = self.type_of(expr.id());
        match expr.get() {
            ast::Expr::Const(c) => {
                self.line(expr.loc(), &format!("ExprConst {} {}", c.0.get(), ty));
            }
            ast::Expr::Nil(..) => self.line(expr.loc(), "ExprNil"),
            ast::Expr::Variable(v) => {
                self.line(expr.loc(), &format!("ExprVariable \"{}\" {}", v.0.get(), ty));
            }
            ast::Expr::Deref(d_) => {
                self.line(expr.loc(), &format!("ExprDeref {}", ty));
                let inner = &d_.0;
                self.nested(|d| d.dump_expr(inner));
            }
            ast::Expr::ArrayAccess(a) => {
                self.line(expr.loc(), &format!("ExprArrayAccess {}", ty));
                self.nested(|d| {
                    d.dump_expr(&a.0);
                    for index in &a.1 {
                        d.dump_expr(index);
                    }
                });
            }
            ast::Expr::FieldAccess(f) => {
                self.line(
                    expr.loc(),
                    &format!("ExprFieldAccess \"{}\" {}", f.1.get(), ty),
                );
                self.nested(|d| d.dump_expr(&f.0));
            }
            ast::Expr::Call(c) => {
                self.line(expr.loc(), &format!("ExprCall \"{}\" {}", c.0.get(), ty));
                self.nested(|d| {
                    for arg in &c.1 {
                        d.dump_expr(arg);
                    }
                });
            }
            ast::Expr::BinOp(b) => {
                self.line(expr.loc(), &format!("BinOp {} {}", b.0.get(), ty));
                self.nested(|d| {
                    d.dump_expr(&b.1);
                    d.dump_expr(&b.2);
                });
            }
            ast::Expr::UnOp(u) => {
                self.line(expr.loc(), &format!("UnOp {} {}", u.0.get(), ty));
                self.nested(|d| d.dump_expr(&u.1));
            }
            ast::Expr::Range(r) => {
                self.line(expr.loc(), &format!("ExprRange {}", ty));
                self.nested(|d| {
                    d.dump_expr(&r.0);
                    d.dump_expr(&r.1);
                });
            }
            ast::Expr::SetLiteral(s) => {
                self.line(expr.loc(), &format!("ExprSetLiteral {}", ty));
                self.nested(|d| {
                    for elem in &s.0 {
                        d.dump_expr(elem);
                    }
                });
            }
            ast::Expr::Parentheses(p) => self.dump_expr(&p.0),
        }
    }
}

impl<'a> fmt::Display for ASTDumper<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.output)
    }
}
