use crate::ast;
use crate::constant::Constant;
use crate::diagnostics::Diagnostics;
use crate::lexer::{Lexer, Tok};
use crate::span::{SpanLoc, Spanned, SpannedBox};

// Recursive descent parser over the token stream. Errors abort the parse of
// the unit; the driver reports them and stops before semantic analysis.

struct ParseError {
    loc: SpanLoc,
    message: String,
}

type ParseResult<T> = Result<T, ParseError>;

struct Parser {
    tokens: Vec<(usize, Tok, usize)>,
    pos: usize,
    end_offset: usize,
}

pub fn parse_program(
    input: &str,
    diagnostics: &mut Diagnostics,
) -> Option<SpannedBox<ast::Program>> {
    let mut tokens = vec![];
    for t in Lexer::new(input) {
        match t {
            Ok(t) => tokens.push(t),
            Err(e) => {
                diagnostics.error(SpanLoc::new(e.start, e.end), e.message);
                return None;
            }
        }
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        end_offset: input.len(),
    };

    match parser.parse_program() {
        Ok(program) => Some(program),
        Err(e) => {
            diagnostics.error(e.loc, e.message);
            None
        }
    }
}

impl Parser {
    fn peek(&self) -> Option<&Tok> {
        self.tokens.get(self.pos).map(|t| &t.1)
    }

    fn peek_is(&self, tok: &Tok) -> bool {
        self.peek() == Some(tok)
    }

    fn current_loc(&self) -> SpanLoc {
        match self.tokens.get(self.pos) {
            Some((start, _, end)) => SpanLoc::new(*start, *end),
            None => SpanLoc::new(self.end_offset, self.end_offset),
        }
    }

    fn start_offset(&self) -> usize {
        self.current_loc().begin()
    }

    fn previous_end(&self) -> usize {
        if self.pos == 0 {
            return 0;
        }
        self.tokens[self.pos - 1].2
    }

    fn span_from(&self, start: usize) -> SpanLoc {
        SpanLoc::new(start, self.previous_end())
    }

    fn advance(&mut self) -> Option<Tok> {
        let t = self.tokens.get(self.pos).map(|t| t.1.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn error<T>(&self, message: String) -> ParseResult<T> {
        Err(ParseError {
            loc: self.current_loc(),
            message,
        })
    }

    fn expect(&mut self, tok: Tok) -> ParseResult<SpanLoc> {
        match self.peek() {
            Some(t) if *t == tok => {
                let loc = self.current_loc();
                self.advance();
                Ok(loc)
            }
            Some(t) => self.error(format!("unexpected token \"{}\", expecting \"{}\"", t, tok)),
            None => self.error(format!("unexpected end of file, expecting \"{}\"", tok)),
        }
    }

    fn accept(&mut self, tok: &Tok) -> bool {
        if self.peek_is(tok) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_identifier(&mut self) -> ParseResult<Spanned<String>> {
        match self.peek() {
            Some(Tok::Identifier(name)) => {
                let name = name.clone();
                let loc = self.current_loc();
                self.advance();
                Ok(Spanned::new(loc, name))
            }
            Some(t) => self.error(format!("unexpected token \"{}\", expecting an identifier", t)),
            None => self.error("unexpected end of file, expecting an identifier".to_string()),
        }
    }

    // program := 'program' identifier ( '(' identifier-list ')' )? ';'
    //            block '.'
    fn parse_program(&mut self) -> ParseResult<SpannedBox<ast::Program>> {
        let start = self.start_offset();
        self.expect(Tok::Program)?;
        let name = self.expect_identifier()?;
        if self.accept(&Tok::LeftParen) {
            // Program parameters (input, output) are accepted and ignored.
            loop {
                self.expect_identifier()?;
                if !self.accept(&Tok::Comma) {
                    break;
                }
            }
            self.expect(Tok::RightParen)?;
        }
        self.expect(Tok::Semicolon)?;
        let block = self.parse_block()?;
        self.expect(Tok::Dot)?;
        if let Some(t) = self.peek() {
            return self.error(format!("extra token \"{}\" after the end of the program", t));
        }
        Ok(SpannedBox::new(
            self.span_from(start),
            ast::Program(name, block),
        ))
    }

    fn parse_block(&mut self) -> ParseResult<SpannedBox<ast::Block>> {
        let start = self.start_offset();

        let type_part = if self.peek_is(&Tok::Type) {
            Some(self.parse_type_definition_part()?)
        } else {
            None
        };

        let var_part = if self.peek_is(&Tok::Var) {
            Some(self.parse_variable_declaration_part()?)
        } else {
            None
        };

        let mut procedures = vec![];
        loop {
            match self.peek() {
                Some(Tok::Procedure) => procedures.push(self.parse_procedure_declaration()?),
                Some(Tok::Function) => procedures.push(self.parse_function_declaration()?),
                _ => break,
            }
        }

        let statements = self.parse_compound_statement()?;

        Ok(SpannedBox::new(
            self.span_from(start),
            ast::Block(type_part, var_part, procedures, statements),
        ))
    }

    // Type definitions.

    fn parse_type_definition_part(&mut self) -> ParseResult<SpannedBox<ast::TypeDefinitionPart>> {
        let start = self.start_offset();
        self.expect(Tok::Type)?;
        let mut defs = vec![];
        while let Some(Tok::Identifier(..)) = self.peek() {
            let def_start = self.start_offset();
            let name = self.expect_identifier()?;
            self.expect(Tok::Equal)?;
            let denoter = self.parse_type_denoter()?;
            self.expect(Tok::Semicolon)?;
            defs.push(SpannedBox::new(
                self.span_from(def_start),
                ast::TypeDefinition(name, denoter),
            ));
        }
        if defs.is_empty() {
            return self.error("expecting at least one type definition".to_string());
        }
        Ok(SpannedBox::new(
            self.span_from(start),
            ast::TypeDefinitionPart(defs),
        ))
    }

    fn parse_type_denoter(&mut self) -> ParseResult<SpannedBox<ast::TypeDenoter>> {
        let start = self.start_offset();
        match self.peek() {
            Some(Tok::Deref) => {
                self.advance();
                let name = self.expect_identifier()?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::TypeDenoter::PointerType(ast::PointerType(name)),
                ))
            }
            Some(Tok::LeftParen) => {
                self.advance();
                let mut names = vec![self.expect_identifier()?];
                while self.accept(&Tok::Comma) {
                    names.push(self.expect_identifier()?);
                }
                self.expect(Tok::RightParen)?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::TypeDenoter::EnumeratedType(ast::EnumeratedType(names)),
                ))
            }
            Some(Tok::Array) => {
                self.advance();
                self.expect(Tok::LeftSquareBracket)?;
                let mut ranges = vec![self.parse_type_denoter()?];
                while self.accept(&Tok::Comma) {
                    ranges.push(self.parse_type_denoter()?);
                }
                self.expect(Tok::RightSquareBracket)?;
                self.expect(Tok::Of)?;
                let element = self.parse_type_denoter()?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::TypeDenoter::ArrayType(ast::ArrayType(ranges, element)),
                ))
            }
            Some(Tok::Record) => {
                self.advance();
                let (sections, variant) = self.parse_field_list(&Tok::End)?;
                self.expect(Tok::End)?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::TypeDenoter::RecordType(ast::RecordType(sections, variant)),
                ))
            }
            Some(Tok::Set) => {
                self.advance();
                self.expect(Tok::Of)?;
                let element = self.parse_type_denoter()?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::TypeDenoter::SetType(ast::SetType(element)),
                ))
            }
            Some(Tok::File) => {
                self.advance();
                self.expect(Tok::Of)?;
                let element = self.parse_type_denoter()?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::TypeDenoter::FileType(ast::FileType(element)),
                ))
            }
            Some(Tok::Identifier(..)) => {
                // Either a plain type name or the start of a subrange whose
                // lower bound is a named constant.
                if self.peek_nth_is_ellipsis(1) {
                    let lower = self.parse_const()?;
                    self.expect(Tok::Ellipsis)?;
                    let upper = self.parse_const()?;
                    return Ok(SpannedBox::new(
                        self.span_from(start),
                        ast::TypeDenoter::SubrangeType(ast::SubrangeType(lower, upper)),
                    ));
                }
                let name = self.expect_identifier()?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::TypeDenoter::TypeIdentifier(ast::TypeIdentifier(name)),
                ))
            }
            Some(Tok::IntegerLiteral(..)) | Some(Tok::StringLiteral(..)) | Some(Tok::Minus)
            | Some(Tok::Plus) => {
                let lower = self.parse_const()?;
                self.expect(Tok::Ellipsis)?;
                let upper = self.parse_const()?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::TypeDenoter::SubrangeType(ast::SubrangeType(lower, upper)),
                ))
            }
            Some(t) => self.error(format!("unexpected token \"{}\" in a type denoter", t)),
            None => self.error("unexpected end of file in a type denoter".to_string()),
        }
    }

    fn peek_nth_is_ellipsis(&self, n: usize) -> bool {
        matches!(self.tokens.get(self.pos + n), Some((_, Tok::Ellipsis, _)))
    }

    fn parse_const(&mut self) -> ParseResult<SpannedBox<ast::Const>> {
        let start = self.start_offset();
        let negate = if self.accept(&Tok::Minus) {
            true
        } else {
            self.accept(&Tok::Plus);
            false
        };
        match self.peek().cloned() {
            Some(Tok::IntegerLiteral(v)) => {
                self.advance();
                let v = if negate { -v } else { v };
                let loc = self.span_from(start);
                Ok(SpannedBox::new(
                    loc,
                    ast::Const::Integer(ast::ConstInteger(Spanned::new(loc, v))),
                ))
            }
            Some(Tok::StringLiteral(s)) if s.chars().count() == 1 && !negate => {
                self.advance();
                let loc = self.span_from(start);
                let c = s.chars().next().unwrap();
                Ok(SpannedBox::new(
                    loc,
                    ast::Const::Char(ast::ConstChar(Spanned::new(loc, c))),
                ))
            }
            Some(Tok::Identifier(name)) if !negate => {
                self.advance();
                let loc = self.span_from(start);
                Ok(SpannedBox::new(
                    loc,
                    ast::Const::Named(ast::ConstNamed(Spanned::new(loc, name))),
                ))
            }
            Some(t) => self.error(format!("unexpected token \"{}\" in a constant", t)),
            None => self.error("unexpected end of file in a constant".to_string()),
        }
    }

    // field-list := record-section (';' record-section)* (';' variant-part)?
    fn parse_field_list(
        &mut self,
        terminator: &Tok,
    ) -> ParseResult<(
        Vec<SpannedBox<ast::RecordSection>>,
        Option<SpannedBox<ast::VariantPart>>,
    )> {
        let mut sections = vec![];
        let mut variant = None;
        loop {
            match self.peek() {
                Some(t) if t == terminator => break,
                // 'case' introduces the trailing variant part.
                Some(Tok::Identifier(name)) if name != "case" => {
                    let start = self.start_offset();
                    let mut names = vec![self.expect_identifier()?];
                    while self.accept(&Tok::Comma) {
                        names.push(self.expect_identifier()?);
                    }
                    self.expect(Tok::Colon)?;
                    let ty = self.parse_type_denoter()?;
                    sections.push(SpannedBox::new(
                        self.span_from(start),
                        ast::RecordSection(names, ty),
                    ));
                    if !self.accept(&Tok::Semicolon) {
                        break;
                    }
                }
                _ => break,
            }
        }
        // Optional trailing variant part: `case tag : type of c1: (...)`.
        if let Some(Tok::Identifier(name)) = self.peek() {
            if name == "case" {
                variant = Some(self.parse_variant_part(terminator)?);
            }
        }
        Ok((sections, variant))
    }

    fn parse_variant_part(
        &mut self,
        terminator: &Tok,
    ) -> ParseResult<SpannedBox<ast::VariantPart>> {
        let start = self.start_offset();
        // Consume 'case'.
        self.advance();
        let first = self.expect_identifier()?;
        let (tag_name, tag_type) = if self.accept(&Tok::Colon) {
            let ty_start = self.start_offset();
            let ty_name = self.expect_identifier()?;
            (
                Some(first),
                SpannedBox::new(
                    self.span_from(ty_start),
                    ast::TypeDenoter::TypeIdentifier(ast::TypeIdentifier(ty_name)),
                ),
            )
        } else {
            let loc = *first.loc();
            (
                None,
                SpannedBox::new(
                    loc,
                    ast::TypeDenoter::TypeIdentifier(ast::TypeIdentifier(first)),
                ),
            )
        };
        self.expect(Tok::Of)?;

        let mut cases = vec![];
        loop {
            match self.peek() {
                Some(t) if t == terminator => break,
                None => break,
                _ => {}
            }
            let case_start = self.start_offset();
            let mut consts = vec![self.parse_const()?];
            while self.accept(&Tok::Comma) {
                consts.push(self.parse_const()?);
            }
            self.expect(Tok::Colon)?;
            self.expect(Tok::LeftParen)?;
            let (fields, nested_variant) = self.parse_field_list(&Tok::RightParen)?;
            if nested_variant.is_some() {
                return self.error("nested variant parts are not supported".to_string());
            }
            self.expect(Tok::RightParen)?;
            cases.push(SpannedBox::new(
                self.span_from(case_start),
                ast::VariantCase(consts, fields),
            ));
            if !self.accept(&Tok::Semicolon) {
                break;
            }
        }

        Ok(SpannedBox::new(
            self.span_from(start),
            ast::VariantPart(tag_name, tag_type, cases),
        ))
    }

    // Variable declarations.

    fn parse_variable_declaration_part(
        &mut self,
    ) -> ParseResult<SpannedBox<ast::VariableDeclarationPart>> {
        let start = self.start_offset();
        self.expect(Tok::Var)?;
        let mut decls = vec![];
        while let Some(Tok::Identifier(..)) = self.peek() {
            let decl_start = self.start_offset();
            let mut names = vec![self.expect_identifier()?];
            while self.accept(&Tok::Comma) {
                names.push(self.expect_identifier()?);
            }
            self.expect(Tok::Colon)?;
            let ty = self.parse_type_denoter()?;
            self.expect(Tok::Semicolon)?;
            decls.push(SpannedBox::new(
                self.span_from(decl_start),
                ast::VariableDeclaration(names, ty),
            ));
        }
        if decls.is_empty() {
            return self.error("expecting at least one variable declaration".to_string());
        }
        Ok(SpannedBox::new(
            self.span_from(start),
            ast::VariableDeclarationPart(decls),
        ))
    }

    // Procedures and functions.

    fn parse_formal_parameters(&mut self) -> ParseResult<Vec<SpannedBox<ast::FormalParameter>>> {
        let mut params = vec![];
        if !self.accept(&Tok::LeftParen) {
            return Ok(params);
        }
        loop {
            let start = self.start_offset();
            let by_ref = self.accept(&Tok::Var);
            let mut names = vec![self.expect_identifier()?];
            while self.accept(&Tok::Comma) {
                names.push(self.expect_identifier()?);
            }
            self.expect(Tok::Colon)?;
            let ty_start = self.start_offset();
            let ty_name = self.expect_identifier()?;
            let ty = SpannedBox::new(self.span_from(ty_start), ast::TypeIdentifier(ty_name));
            let loc = self.span_from(start);
            let param = if by_ref {
                ast::FormalParameter::Variable(ast::FormalParameterVariable(names, ty))
            } else {
                ast::FormalParameter::Value(ast::FormalParameterValue(names, ty))
            };
            params.push(SpannedBox::new(loc, param));
            if !self.accept(&Tok::Semicolon) {
                break;
            }
        }
        self.expect(Tok::RightParen)?;
        Ok(params)
    }

    fn parse_function_body(&mut self) -> ParseResult<SpannedBox<ast::FunctionBody>> {
        let start = self.start_offset();
        let var_part = if self.peek_is(&Tok::Var) {
            Some(self.parse_variable_declaration_part()?)
        } else {
            None
        };
        let stmt = self.parse_compound_statement()?;
        Ok(SpannedBox::new(
            self.span_from(start),
            ast::FunctionBody(var_part, stmt),
        ))
    }

    fn parse_procedure_declaration(
        &mut self,
    ) -> ParseResult<SpannedBox<ast::ProcedureDeclaration>> {
        let start = self.start_offset();
        self.expect(Tok::Procedure)?;
        let name = self.expect_identifier()?;
        let params = self.parse_formal_parameters()?;
        self.expect(Tok::Semicolon)?;
        let decl = if self.accept(&Tok::Forward) {
            self.expect(Tok::Semicolon)?;
            ast::ProcedureDeclaration::ProcedureForward(ast::ProcedureForward(name, params))
        } else {
            let body = self.parse_function_body()?;
            self.expect(Tok::Semicolon)?;
            ast::ProcedureDeclaration::ProcedureDefinition(ast::ProcedureDefinition(
                name, params, body,
            ))
        };
        Ok(SpannedBox::new(self.span_from(start), decl))
    }

    fn parse_function_declaration(&mut self) -> ParseResult<SpannedBox<ast::ProcedureDeclaration>> {
        let start = self.start_offset();
        self.expect(Tok::Function)?;
        let name = self.expect_identifier()?;
        let params = self.parse_formal_parameters()?;
        self.expect(Tok::Colon)?;
        let ty_start = self.start_offset();
        let result_name = self.expect_identifier()?;
        let result = SpannedBox::new(self.span_from(ty_start), ast::TypeIdentifier(result_name));
        self.expect(Tok::Semicolon)?;
        let decl = if self.accept(&Tok::Forward) {
            self.expect(Tok::Semicolon)?;
            ast::ProcedureDeclaration::FunctionForward(ast::FunctionForward(name, params, result))
        } else {
            let body = self.parse_function_body()?;
            self.expect(Tok::Semicolon)?;
            ast::ProcedureDeclaration::FunctionDefinition(ast::FunctionDefinition(
                name, params, result, body,
            ))
        };
        Ok(SpannedBox::new(self.span_from(start), decl))
    }

    // Statements.

    fn parse_compound_statement(&mut self) -> ParseResult<SpannedBox<ast::Stmt>> {
        let start = self.start_offset();
        self.expect(Tok::Begin)?;
        let mut stmts = vec![self.parse_statement()?];
        while self.accept(&Tok::Semicolon) {
            stmts.push(self.parse_statement()?);
        }
        self.expect(Tok::End)?;
        Ok(SpannedBox::new(
            self.span_from(start),
            ast::Stmt::Compound(ast::StmtCompound(stmts)),
        ))
    }

    fn parse_statement(&mut self) -> ParseResult<SpannedBox<ast::Stmt>> {
        let start = self.start_offset();
        match self.peek() {
            // An empty statement before a terminator.
            Some(Tok::End) | Some(Tok::Until) | Some(Tok::Semicolon) | Some(Tok::Else) | None => {
                Ok(SpannedBox::new(
                    self.current_loc(),
                    ast::Stmt::Empty(ast::StmtEmpty),
                ))
            }
            Some(Tok::Begin) => self.parse_compound_statement(),
            Some(Tok::If) => {
                self.advance();
                let cond = self.parse_expression()?;
                self.expect(Tok::Then)?;
                let then_part = self.parse_statement()?;
                let else_part = if self.accept(&Tok::Else) {
                    Some(self.parse_statement()?)
                } else {
                    None
                };
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::Stmt::If(ast::StmtIf(cond, then_part, else_part)),
                ))
            }
            Some(Tok::While) => {
                self.advance();
                let cond = self.parse_expression()?;
                self.expect(Tok::Do)?;
                let body = self.parse_statement()?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::Stmt::WhileDo(ast::StmtWhileDo(cond, body)),
                ))
            }
            Some(Tok::Repeat) => {
                self.advance();
                let mut body = vec![self.parse_statement()?];
                while self.accept(&Tok::Semicolon) {
                    body.push(self.parse_statement()?);
                }
                self.expect(Tok::Until)?;
                let cond = self.parse_expression()?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::Stmt::RepeatUntil(ast::StmtRepeatUntil(body, cond)),
                ))
            }
            Some(Tok::For) => {
                self.advance();
                let var = self.expect_identifier()?;
                self.expect(Tok::Assign)?;
                let start_expr = self.parse_expression()?;
                let kind = match self.peek() {
                    Some(Tok::To) => ast::ForKind::To,
                    Some(Tok::DownTo) => ast::ForKind::DownTo,
                    _ => return self.error("expecting \"to\" or \"downto\"".to_string()),
                };
                self.advance();
                let end_expr = self.parse_expression()?;
                self.expect(Tok::Do)?;
                let body = self.parse_statement()?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::Stmt::For(ast::StmtFor(kind, var, start_expr, end_expr, body)),
                ))
            }
            Some(Tok::Identifier(..)) => self.parse_simple_statement(),
            Some(t) => self.error(format!("unexpected token \"{}\" in a statement", t)),
        }
    }

    // Assignment, procedure call, or one of the read/write intrinsic
    // statement forms.
    fn parse_simple_statement(&mut self) -> ParseResult<SpannedBox<ast::Stmt>> {
        let start = self.start_offset();
        let name = self.expect_identifier()?;

        match name.get().as_str() {
            "write" | "writeln" => {
                let newline = name.get() == "writeln";
                let args = self.parse_write_arguments()?;
                return Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::Stmt::Write(ast::StmtWrite(newline, args)),
                ));
            }
            "read" | "readln" => {
                let newline = name.get() == "readln";
                let mut args = vec![];
                if self.accept(&Tok::LeftParen) {
                    loop {
                        args.push(self.parse_expression()?);
                        if !self.accept(&Tok::Comma) {
                            break;
                        }
                    }
                    self.expect(Tok::RightParen)?;
                }
                return Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::Stmt::Read(ast::StmtRead(newline, args)),
                ));
            }
            _ => {}
        }

        // A call with arguments.
        if self.peek_is(&Tok::LeftParen) {
            self.advance();
            let mut args = vec![];
            loop {
                args.push(self.parse_expression()?);
                if !self.accept(&Tok::Comma) {
                    break;
                }
            }
            self.expect(Tok::RightParen)?;
            return Ok(SpannedBox::new(
                self.span_from(start),
                ast::Stmt::ProcedureCall(ast::StmtProcedureCall(name, args)),
            ));
        }

        // An assignment through any designator, or a plain call.
        let name_loc = *name.loc();
        let mut lhs = SpannedBox::new(name_loc, ast::Expr::Variable(ast::ExprVariable(name)));
        lhs = self.parse_designator_suffixes(start, lhs)?;

        if self.accept(&Tok::Assign) {
            let rhs = self.parse_expression()?;
            return Ok(SpannedBox::new(
                self.span_from(start),
                ast::Stmt::Assignment(ast::StmtAssignment(lhs, rhs)),
            ));
        }

        match lhs.get() {
            ast::Expr::Variable(ast::ExprVariable(n)) => {
                let n = Spanned::new(*n.loc(), n.get().clone());
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::Stmt::ProcedureCall(ast::StmtProcedureCall(n, vec![])),
                ))
            }
            _ => self.error("expecting \":=\"".to_string()),
        }
    }

    fn parse_write_arguments(&mut self) -> ParseResult<Vec<SpannedBox<ast::WriteArg>>> {
        let mut args = vec![];
        if !self.accept(&Tok::LeftParen) {
            return Ok(args);
        }
        loop {
            let start = self.start_offset();
            let expr = self.parse_expression()?;
            let mut width = None;
            let mut precision = None;
            if self.accept(&Tok::Colon) {
                width = Some(self.parse_expression()?);
                if self.accept(&Tok::Colon) {
                    precision = Some(self.parse_expression()?);
                }
            }
            args.push(SpannedBox::new(
                self.span_from(start),
                ast::WriteArg(expr, width, precision),
            ));
            if !self.accept(&Tok::Comma) {
                break;
            }
        }
        self.expect(Tok::RightParen)?;
        Ok(args)
    }

    // Expressions. Standard Pascal precedence: a single optional relational
    // operator over simple expressions, additive operators over terms,
    // multiplicative operators over factors.

    fn parse_expression(&mut self) -> ParseResult<SpannedBox<ast::Expr>> {
        let start = self.start_offset();
        let lhs = self.parse_simple_expression()?;
        let op = match self.peek() {
            Some(Tok::Equal) => ast::BinOperator::Equal,
            Some(Tok::Different) => ast::BinOperator::NotEqual,
            Some(Tok::LowerThan) => ast::BinOperator::LessThan,
            Some(Tok::LowerOrEqual) => ast::BinOperator::LessOrEqual,
            Some(Tok::GreaterThan) => ast::BinOperator::GreaterThan,
            Some(Tok::GreaterOrEqual) => ast::BinOperator::GreaterOrEqual,
            Some(Tok::In) => ast::BinOperator::InSet,
            _ => return Ok(lhs),
        };
        let op_loc = self.current_loc();
        self.advance();
        let rhs = self.parse_simple_expression()?;
        Ok(SpannedBox::new(
            self.span_from(start),
            ast::Expr::BinOp(ast::ExprBinOp(Spanned::new(op_loc, op), lhs, rhs)),
        ))
    }

    fn parse_simple_expression(&mut self) -> ParseResult<SpannedBox<ast::Expr>> {
        let start = self.start_offset();
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => ast::BinOperator::Addition,
                Some(Tok::Minus) => ast::BinOperator::Subtraction,
                Some(Tok::Or) => ast::BinOperator::LogicalOr,
                _ => break,
            };
            let op_loc = self.current_loc();
            self.advance();
            let rhs = self.parse_term()?;
            lhs = SpannedBox::new(
                self.span_from(start),
                ast::Expr::BinOp(ast::ExprBinOp(Spanned::new(op_loc, op), lhs, rhs)),
            );
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> ParseResult<SpannedBox<ast::Expr>> {
        let start = self.start_offset();
        let mut lhs = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Mul) => ast::BinOperator::Multiplication,
                Some(Tok::Div) => ast::BinOperator::RealDivision,
                Some(Tok::IntegerDiv) => ast::BinOperator::IntegerDivision,
                Some(Tok::Mod) => ast::BinOperator::Modulo,
                Some(Tok::And) => ast::BinOperator::LogicalAnd,
                _ => break,
            };
            let op_loc = self.current_loc();
            self.advance();
            let rhs = self.parse_factor()?;
            lhs = SpannedBox::new(
                self.span_from(start),
                ast::Expr::BinOp(ast::ExprBinOp(Spanned::new(op_loc, op), lhs, rhs)),
            );
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> ParseResult<SpannedBox<ast::Expr>> {
        let start = self.start_offset();
        match self.peek().cloned() {
            Some(Tok::IntegerLiteral(v)) => {
                self.advance();
                let loc = self.span_from(start);
                Ok(SpannedBox::new(
                    loc,
                    ast::Expr::Const(ast::ExprConst(Spanned::new(loc, Constant::Integer(v)))),
                ))
            }
            Some(Tok::RealLiteral(v)) => {
                self.advance();
                let loc = self.span_from(start);
                Ok(SpannedBox::new(
                    loc,
                    ast::Expr::Const(ast::ExprConst(Spanned::new(loc, Constant::Real(v)))),
                ))
            }
            Some(Tok::StringLiteral(s)) => {
                self.advance();
                let loc = self.span_from(start);
                // A one-character string literal is a char literal.
                let c = if s.chars().count() == 1 {
                    Constant::Char(s.chars().next().unwrap())
                } else {
                    Constant::String(s)
                };
                Ok(SpannedBox::new(
                    loc,
                    ast::Expr::Const(ast::ExprConst(Spanned::new(loc, c))),
                ))
            }
            Some(Tok::Nil) => {
                self.advance();
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::Expr::Nil(ast::ExprNil),
                ))
            }
            Some(Tok::LeftParen) => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(Tok::RightParen)?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::Expr::Parentheses(ast::ExprParentheses(inner)),
                ))
            }
            Some(Tok::LeftSquareBracket) => {
                self.advance();
                let mut elements = vec![];
                if !self.peek_is(&Tok::RightSquareBracket) {
                    loop {
                        let elem_start = self.start_offset();
                        let e = self.parse_expression()?;
                        if self.accept(&Tok::Ellipsis) {
                            let upper = self.parse_expression()?;
                            elements.push(SpannedBox::new(
                                self.span_from(elem_start),
                                ast::Expr::Range(ast::ExprRange(e, upper)),
                            ));
                        } else {
                            elements.push(e);
                        }
                        if !self.accept(&Tok::Comma) {
                            break;
                        }
                    }
                }
                self.expect(Tok::RightSquareBracket)?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::Expr::SetLiteral(ast::ExprSetLiteral(elements)),
                ))
            }
            Some(Tok::Not) => {
                let op_loc = self.current_loc();
                self.advance();
                let operand = self.parse_factor()?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::Expr::UnOp(ast::ExprUnOp(
                        Spanned::new(op_loc, ast::UnaryOp::LogicalNot),
                        operand,
                    )),
                ))
            }
            Some(Tok::Plus) | Some(Tok::Minus) => {
                let op = if self.peek_is(&Tok::Minus) {
                    ast::UnaryOp::Minus
                } else {
                    ast::UnaryOp::Plus
                };
                let op_loc = self.current_loc();
                self.advance();
                let operand = self.parse_factor()?;
                Ok(SpannedBox::new(
                    self.span_from(start),
                    ast::Expr::UnOp(ast::ExprUnOp(Spanned::new(op_loc, op), operand)),
                ))
            }
            Some(Tok::Identifier(..)) => {
                let name = self.expect_identifier()?;
                if self.peek_is(&Tok::LeftParen) {
                    self.advance();
                    let mut args = vec![];
                    if !self.peek_is(&Tok::RightParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if !self.accept(&Tok::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(Tok::RightParen)?;
                    return Ok(SpannedBox::new(
                        self.span_from(start),
                        ast::Expr::Call(ast::ExprCall(name, args)),
                    ));
                }
                let name_loc = *name.loc();
                let var = SpannedBox::new(name_loc, ast::Expr::Variable(ast::ExprVariable(name)));
                self.parse_designator_suffixes(start, var)
            }
            Some(t) => self.error(format!("unexpected token \"{}\" in an expression", t)),
            None => self.error("unexpected end of file in an expression".to_string()),
        }
    }

    // Array indexing, field selection and pointer dereference suffixes.
    fn parse_designator_suffixes(
        &mut self,
        start: usize,
        mut expr: SpannedBox<ast::Expr>,
    ) -> ParseResult<SpannedBox<ast::Expr>> {
        loop {
            match self.peek() {
                Some(Tok::LeftSquareBracket) => {
                    self.advance();
                    let mut indices = vec![self.parse_expression()?];
                    while self.accept(&Tok::Comma) {
                        indices.push(self.parse_expression()?);
                    }
                    self.expect(Tok::RightSquareBracket)?;
                    expr = SpannedBox::new(
                        self.span_from(start),
                        ast::Expr::ArrayAccess(ast::ExprArrayAccess(expr, indices)),
                    );
                }
                Some(Tok::Dot) => {
                    self.advance();
                    let field = self.expect_identifier()?;
                    expr = SpannedBox::new(
                        self.span_from(start),
                        ast::Expr::FieldAccess(ast::ExprFieldAccess(expr, field)),
                    );
                }
                Some(Tok::Deref) => {
                    self.advance();
                    expr = SpannedBox::new(
                        self.span_from(start),
                        ast::Expr::Deref(ast::ExprDeref(expr)),
                    );
                }
                _ => break,
            }
        }
        Ok(expr)
    }
}
