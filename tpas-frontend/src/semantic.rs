use crate::ast;
use crate::constant::Constant;
use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
use crate::scope::ScopedMap;
use crate::span;
use crate::symbol::{ParameterKind, Symbol, SymbolId, SymbolKind, SymbolMap, SymbolMapImpl, SymbolRef};
use crate::typesystem::{Field, Range, TypeId, TypeRegistry, TypeSystem};

use std::collections::HashMap;

/// Names the analyser understands without a user declaration.
const BUILTIN_FUNCTIONS: &[&str] = &["abs", "odd", "ord", "chr", "succ", "pred"];

pub fn is_builtin_function(name: &str) -> bool {
    BUILTIN_FUNCTIONS.iter().any(|x| name == *x)
}

pub struct SemanticContext {
    symbol_map: SymbolMap,
    pub type_system: TypeSystem,
    pub registry: TypeRegistry,

    ast_types: HashMap<span::SpanId, TypeId>,
    ast_symbols: HashMap<span::SpanId, SymbolId>,
}

impl SemanticContext {
    pub fn new() -> SemanticContext {
        let symbol_map = SymbolMapImpl::new();
        let type_system = TypeSystem::new();
        let registry = TypeRegistry::new(&type_system);

        SemanticContext {
            symbol_map,
            type_system,
            registry,
            ast_types: HashMap::new(),
            ast_symbols: HashMap::new(),
        }
    }

    pub fn get_ast_type(&self, id: span::SpanId) -> Option<TypeId> {
        self.ast_types.get(&id).cloned()
    }

    pub fn set_ast_type(&mut self, id: span::SpanId, ty: TypeId) {
        self.ast_types.insert(id, ty);
    }

    pub fn get_ast_symbol(&self, id: span::SpanId) -> Option<SymbolId> {
        self.ast_symbols.get(&id).cloned()
    }

    pub fn set_ast_symbol(&mut self, id: span::SpanId, sym: SymbolId) {
        self.ast_symbols.insert(id, sym);
    }

    pub fn new_symbol(&mut self, sym: Symbol) -> SymbolId {
        self.symbol_map.borrow_mut().new_symbol(sym)
    }

    pub fn get_symbol(&self, id: SymbolId) -> SymbolRef {
        self.symbol_map.borrow().get_symbol(id)
    }
}

impl Default for SemanticContext {
    fn default() -> SemanticContext {
        SemanticContext::new()
    }
}

/// Deferred action run after the whole unit has been analysed. Fixups only
/// fill in previously absent range/element information of set types.
enum Fixup {
    SetLiteralRange { set_type: TypeId, range: Range },
}

pub fn check_program(
    program: &span::SpannedBox<ast::Program>,
    ctx: &mut SemanticContext,
    diagnostics: &mut Diagnostics,
) {
    let mut checker = SemanticChecker {
        ctx,
        diagnostics,
        scope: ScopedMap::new(),
        fixups: vec![],
        current_function: None,
    };

    checker.check_block(program.get().1.get());

    // Drain the fixup queue exactly once, before lowering happens.
    let fixups = std::mem::take(&mut checker.fixups);
    for f in fixups {
        match f {
            Fixup::SetLiteralRange { set_type, range } => {
                if checker.ctx.type_system.set_range(set_type).is_none() {
                    checker.ctx.type_system.set_update_range(set_type, range);
                }
            }
        }
    }
}

struct CurrentFunction {
    name: String,
    symbol_id: SymbolId,
    result_type: Option<TypeId>,
}

struct SemanticChecker<'a> {
    ctx: &'a mut SemanticContext,
    diagnostics: &'a mut Diagnostics,
    scope: ScopedMap<SymbolId>,
    fixups: Vec<Fixup>,
    current_function: Option<CurrentFunction>,
}

impl<'a> SemanticChecker<'a> {
    fn error_type(&self) -> TypeId {
        self.ctx.type_system.get_error_type()
    }

    fn lookup_symbol(&mut self, name: &str, span: &span::SpanLoc) -> Option<SymbolId> {
        let query = self.scope.find(name);
        if query.is_none() {
            self.diagnostics.error(
                *span,
                format!("identifier '{}' not found in this scope", name),
            );
            // Bind an erroneous identifier so later uses stay quiet.
            let mut dummy_sym = Symbol::new();
            dummy_sym.set_name(name);
            dummy_sym.set_kind(SymbolKind::ErrorLookup);
            dummy_sym.set_defining_point(*span);
            dummy_sym.set_type(self.error_type());
            let dummy_sym = self.ctx.new_symbol(dummy_sym);
            self.scope.add(name, dummy_sym);
        }
        query
    }

    fn extra_diag_previous_location(&self, symbol: &Symbol) -> Vec<Diagnostic> {
        let mut extra = vec![];
        if let Some(def_loc) = symbol.get_defining_point() {
            extra.push(Diagnostic::new(
                DiagnosticKind::Info,
                def_loc,
                format!(
                    "location of previous declaration{}",
                    if let Some(kind_symbol) = symbol.get_name_of_kind() {
                        format!(", declared as a {}", kind_symbol)
                    } else {
                        "".to_string()
                    }
                ),
            ));
        }
        extra
    }

    fn diagnose_redeclared_symbol(&mut self, name: &str, span: &span::SpanLoc) -> bool {
        match self.scope.find_in_current_level(name) {
            Some(prev) => {
                let extra = self.extra_diag_previous_location(&self.ctx.get_symbol(prev).borrow());
                self.diagnostics.add_with_extra(
                    DiagnosticKind::Error,
                    *span,
                    format!(
                        "identifier '{}' has already been declared in this scope",
                        name
                    ),
                    extra,
                );
                true
            }
            None => false,
        }
    }

    // Declarations.

    fn check_block(&mut self, block: &ast::Block) {
        if let Some(type_part) = &block.0 {
            self.check_type_definition_part(type_part.get());
        }
        if let Some(var_part) = &block.1 {
            self.check_variable_declaration_part(var_part.get());
        }
        for proc in &block.2 {
            self.check_procedure_declaration(proc.get());
        }
        self.check_stmt(block.3.get(), block.3.loc());
    }

    fn check_type_definition_part(&mut self, part: &ast::TypeDefinitionPart) {
        let mut pending_pointers: Vec<(TypeId, span::SpanLoc)> = vec![];
        for def in &part.0 {
            let def = def.get();
            let name = def.0.get().clone();
            let ty = self.resolve_type_denoter(&def.1, &mut pending_pointers);
            if !self.ctx.registry.add(&self.ctx.type_system, &name, ty) {
                self.diagnostics.error(
                    *def.0.loc(),
                    format!("type '{}' has already been declared in this scope", name),
                );
            }
            self.ctx.set_ast_type(def.1.id(), ty);
        }
        // Forward declared pointers are resolved once the whole part has
        // been seen, so mutually recursive definitions work.
        for (ptr, loc) in pending_pointers {
            self.ctx
                .registry
                .fix_up_incomplete(&mut self.ctx.type_system, ptr, self.diagnostics, loc);
        }
    }

    fn resolve_type_denoter(
        &mut self,
        denoter: &span::SpannedBox<ast::TypeDenoter>,
        pending_pointers: &mut Vec<(TypeId, span::SpanLoc)>,
    ) -> TypeId {
        let loc = *denoter.loc();
        let ty = match denoter.get() {
            ast::TypeDenoter::TypeIdentifier(t) => {
                let name = t.0.get();
                match self.ctx.registry.find(name) {
                    Some(ty) => ty,
                    None if name == "text" => self.ctx.type_system.get_text_type(),
                    None => {
                        self.diagnostics
                            .error(loc, format!("type name '{}' not found in this scope", name));
                        self.error_type()
                    }
                }
            }
            ast::TypeDenoter::EnumeratedType(t) => {
                let values: Vec<String> = t.0.iter().map(|v| v.get().clone()).collect();
                let ty = self.ctx.type_system.get_enum_type(values);
                self.ctx
                    .registry
                    .register_enum_values(&self.ctx.type_system, ty);
                ty
            }
            ast::TypeDenoter::SubrangeType(t) => self.resolve_subrange(t, loc),
            ast::TypeDenoter::ArrayType(t) => {
                let element = self.resolve_type_denoter(&t.1, pending_pointers);
                let mut ranges = vec![];
                for dim in &t.0 {
                    let dim_ty = self.resolve_type_denoter(dim, pending_pointers);
                    if self.ctx.type_system.is_error_type(dim_ty) {
                        continue;
                    }
                    // A raw integer index would make the array as large as
                    // the whole integer range.
                    let unbounded = self.ctx.type_system.is_integer_type(dim_ty)
                        && !self.ctx.type_system.is_subrange_type(dim_ty);
                    match self.ctx.type_system.get_range(dim_ty) {
                        Some(r) if !unbounded => ranges.push(r),
                        _ => {
                            self.diagnostics.error(
                                *dim.loc(),
                                format!(
                                    "type {} cannot be used as an array index",
                                    self.ctx.type_system.get_type_name(dim_ty)
                                ),
                            );
                        }
                    }
                }
                if ranges.is_empty() {
                    self.error_type()
                } else {
                    self.ctx.type_system.get_array_type(element, ranges)
                }
            }
            ast::TypeDenoter::RecordType(t) => {
                let mut fields = self.resolve_record_sections(&t.0, pending_pointers);
                let variant = t.1.as_ref().map(|variant_part| {
                    let vp = variant_part.get();
                    // The tag, when named, is an ordinary trailing field.
                    if let Some(tag_name) = &vp.0 {
                        let tag_ty = self.resolve_type_denoter(&vp.1, pending_pointers);
                        fields.push(Field {
                            name: tag_name.get().clone(),
                            ty: tag_ty,
                        });
                    }
                    let mut union_fields = vec![];
                    for case in &vp.2 {
                        union_fields
                            .extend(self.resolve_record_sections(&case.get().1, pending_pointers));
                    }
                    self.ctx.type_system.get_variant_type(union_fields)
                });
                self.ctx.type_system.get_record_type(fields, variant)
            }
            ast::TypeDenoter::SetType(t) => {
                let element = self.resolve_type_denoter(&t.0, pending_pointers);
                if self.ctx.type_system.is_error_type(element) {
                    return self.error_type();
                }
                if !self.ctx.type_system.is_integral_type(element) {
                    self.diagnostics.error(
                        *t.0.loc(),
                        format!(
                            "type {} cannot be the element of a set",
                            self.ctx.type_system.get_type_name(element)
                        ),
                    );
                    return self.error_type();
                }
                // The element of the set is the host type of the declared
                // element; the range comes from the declared element itself,
                // clamped to the representable set size.
                let range = self.ctx.type_system.set_range_from_element(element);
                let host = if self.ctx.type_system.is_subrange_type(element) {
                    self.ctx.type_system.get_host_type(element)
                } else {
                    element
                };
                self.ctx.type_system.get_set_type(Some(host), range)
            }
            ast::TypeDenoter::FileType(t) => {
                let element = self.resolve_type_denoter(&t.0, pending_pointers);
                self.ctx.type_system.get_file_type(element)
            }
            ast::TypeDenoter::PointerType(t) => {
                let name = t.0.get();
                match self.ctx.registry.find(name) {
                    Some(pointee) => self.ctx.type_system.get_pointer_type(pointee),
                    None => {
                        let ptr = self.ctx.type_system.get_incomplete_pointer_type(name);
                        pending_pointers.push((ptr, *t.0.loc()));
                        ptr
                    }
                }
            }
        };
        self.ctx.set_ast_type(denoter.id(), ty);
        ty
    }

    fn resolve_record_sections(
        &mut self,
        sections: &[span::SpannedBox<ast::RecordSection>],
        pending_pointers: &mut Vec<(TypeId, span::SpanLoc)>,
    ) -> Vec<Field> {
        let mut fields: Vec<Field> = vec![];
        for section in sections {
            let section = section.get();
            let ty = self.resolve_type_denoter(&section.1, pending_pointers);
            for name in &section.0 {
                if fields.iter().any(|f| &f.name == name.get()) {
                    self.diagnostics.error(
                        *name.loc(),
                        format!("field '{}' has already been declared", name.get()),
                    );
                    continue;
                }
                fields.push(Field {
                    name: name.get().clone(),
                    ty,
                });
            }
        }
        fields
    }

    fn resolve_subrange(&mut self, t: &ast::SubrangeType, loc: span::SpanLoc) -> TypeId {
        let lower = self.eval_const(&t.0);
        let upper = self.eval_const(&t.1);
        let (lower, upper) = match (lower, upper) {
            (Some(l), Some(u)) => (l, u),
            _ => return self.error_type(),
        };
        if lower.1 != upper.1
            && !self.ctx.type_system.same_as(lower.1, upper.1)
        {
            self.diagnostics
                .error(loc, "Range should be same type at both ends".to_string());
            return self.error_type();
        }
        if upper.0 < lower.0 {
            self.diagnostics.error(
                loc,
                "lower bound of this range is greater than its upper bound".to_string(),
            );
            return self.error_type();
        }
        let range = Range::new(lower.0 as i32, upper.0 as i32);
        self.ctx.type_system.get_subrange_type(lower.1, range)
    }

    /// Ordinal value and type of a constant usable in a type position.
    fn eval_const(&mut self, c: &span::SpannedBox<ast::Const>) -> Option<(i64, TypeId)> {
        match c.get() {
            ast::Const::Integer(v) => {
                Some((*v.0.get(), self.ctx.type_system.get_integer_type()))
            }
            ast::Const::Char(v) => Some((
                *v.0.get() as i64,
                self.ctx.type_system.get_char_type(),
            )),
            ast::Const::Named(v) => {
                let name = v.0.get();
                match self.ctx.registry.find_enum_value(name) {
                    Some(ev) => Some((ev.value, ev.owner)),
                    None => {
                        self.diagnostics.error(
                            *v.0.loc(),
                            format!("'{}' is not a known enumerated value", name),
                        );
                        None
                    }
                }
            }
        }
    }

    fn check_variable_declaration_part(&mut self, part: &ast::VariableDeclarationPart) {
        for decl in &part.0 {
            let decl = decl.get();
            let mut pending_pointers = vec![];
            let ty = self.resolve_type_denoter(&decl.1, &mut pending_pointers);
            for (ptr, loc) in pending_pointers {
                self.ctx.registry.fix_up_incomplete(
                    &mut self.ctx.type_system,
                    ptr,
                    self.diagnostics,
                    loc,
                );
            }
            for name in &decl.0 {
                if self.diagnose_redeclared_symbol(name.get(), name.loc()) {
                    continue;
                }
                let mut sym = Symbol::new();
                sym.set_name(name.get());
                sym.set_kind(SymbolKind::Variable);
                sym.set_type(ty);
                sym.set_defining_point(*name.loc());
                let sym_id = self.ctx.new_symbol(sym);
                self.scope.add(name.get(), sym_id);
                self.ctx.set_ast_symbol(name.id(), sym_id);
            }
        }
    }

    fn resolve_type_identifier(&mut self, t: &span::SpannedBox<ast::TypeIdentifier>) -> TypeId {
        let name = t.get().0.get();
        match self.ctx.registry.find(name) {
            Some(ty) => ty,
            None => {
                self.diagnostics.error(
                    *t.loc(),
                    format!("type name '{}' not found in this scope", name),
                );
                self.error_type()
            }
        }
    }

    fn build_formal_parameters(
        &mut self,
        params: &[span::SpannedBox<ast::FormalParameter>],
    ) -> Vec<SymbolId> {
        let mut result = vec![];
        for param in params {
            let (names, ty, kind) = match param.get() {
                ast::FormalParameter::Value(p) => (&p.0, &p.1, ParameterKind::Value),
                ast::FormalParameter::Variable(p) => (&p.0, &p.1, ParameterKind::Variable),
            };
            let ty = self.resolve_type_identifier(ty);
            for name in names {
                let mut sym = Symbol::new();
                sym.set_name(name.get());
                sym.set_kind(SymbolKind::Variable);
                sym.set_type(ty);
                sym.set_parameter(kind);
                sym.set_defining_point(*name.loc());
                let sym_id = self.ctx.new_symbol(sym);
                result.push(sym_id);
                self.ctx.set_ast_symbol(name.id(), sym_id);
            }
        }
        result
    }

    fn check_procedure_declaration(&mut self, decl: &ast::ProcedureDeclaration) {
        match decl {
            ast::ProcedureDeclaration::ProcedureForward(d) => {
                self.declare_procedure_or_function(&d.0, &d.1, None, false);
            }
            ast::ProcedureDeclaration::ProcedureDefinition(d) => {
                if let Some(sym_id) = self.declare_procedure_or_function(&d.0, &d.1, None, true) {
                    self.check_function_body(sym_id, &d.2);
                }
            }
            ast::ProcedureDeclaration::FunctionForward(d) => {
                let result = self.resolve_type_identifier(&d.2);
                self.declare_procedure_or_function(&d.0, &d.1, Some(result), false);
            }
            ast::ProcedureDeclaration::FunctionDefinition(d) => {
                let result = self.resolve_type_identifier(&d.2);
                if let Some(sym_id) =
                    self.declare_procedure_or_function(&d.0, &d.1, Some(result), true)
                {
                    self.check_function_body(sym_id, &d.3);
                }
            }
        }
    }

    /// Introduces (or completes) the symbol of a procedure or function.
    /// Returns the symbol to use for the body, or None when the
    /// declaration is erroneous. At most one non-forward definition of a
    /// name is accepted.
    fn declare_procedure_or_function(
        &mut self,
        name: &span::Spanned<String>,
        params: &[span::SpannedBox<ast::FormalParameter>],
        result: Option<TypeId>,
        is_definition: bool,
    ) -> Option<SymbolId> {
        let is_procedure = result.is_none();
        let kind_str = if is_procedure { "procedure" } else { "function" };
        let expected_kind = if is_procedure {
            SymbolKind::Procedure
        } else {
            SymbolKind::Function
        };

        if let Some(prev_id) = self.scope.find_in_current_level(name.get()) {
            let prev = self.ctx.get_symbol(prev_id);
            let (prev_kind, prev_defined, prev_params) = {
                let prev = prev.borrow();
                (
                    prev.get_kind(),
                    prev.is_defined(),
                    prev.get_formal_parameters().unwrap_or_default(),
                )
            };

            if prev_kind != expected_kind {
                let extra = self.extra_diag_previous_location(&prev.borrow());
                self.diagnostics.add_with_extra(
                    DiagnosticKind::Error,
                    *name.loc(),
                    format!(
                        "identifier '{}' has already been declared in this scope",
                        name.get()
                    ),
                    extra,
                );
                return None;
            }
            if prev_defined {
                let extra = self.extra_diag_previous_location(&prev.borrow());
                self.diagnostics.add_with_extra(
                    DiagnosticKind::Error,
                    *name.loc(),
                    format!("{} '{}' has already been defined", kind_str, name.get()),
                    extra,
                );
                return None;
            }
            // Completing a forward declaration: the parameter count must
            // not change.
            let new_params = self.build_formal_parameters(params);
            if new_params.len() != prev_params.len() {
                self.diagnostics.error(
                    *name.loc(),
                    format!(
                        "change in the number of arguments of {} '{}'",
                        kind_str,
                        name.get()
                    ),
                );
                return None;
            }
            {
                let mut prev = prev.borrow_mut();
                prev.set_formal_parameters(new_params);
                if is_definition {
                    prev.set_defined(true);
                }
            }
            self.ctx.set_ast_symbol(name.id(), prev_id);
            return Some(prev_id);
        }

        let param_syms = self.build_formal_parameters(params);
        let mut sym = Symbol::new();
        sym.set_name(name.get());
        sym.set_kind(expected_kind);
        sym.set_defining_point(*name.loc());
        sym.set_defined(is_definition);
        sym.set_formal_parameters(param_syms);
        if let Some(result) = result {
            sym.set_return_type(result);
        }
        let sym_id = self.ctx.new_symbol(sym);
        self.scope.add(name.get(), sym_id);
        self.ctx.set_ast_symbol(name.id(), sym_id);
        Some(sym_id)
    }

    fn check_function_body(&mut self, sym_id: SymbolId, body: &span::SpannedBox<ast::FunctionBody>) {
        self.scope.new_level();
        self.ctx.registry.new_level();

        let (name, formal_params, result_type) = {
            let sym = self.ctx.get_symbol(sym_id);
            let sym = sym.borrow();
            (
                sym.get_name().clone(),
                sym.get_formal_parameters().unwrap_or_default(),
                sym.get_return_type(),
            )
        };

        for param_id in formal_params {
            let param = self.ctx.get_symbol(param_id);
            let param_name = param.borrow().get_name().clone();
            let param_loc = param.borrow().get_defining_point();
            if !self.scope.add(&param_name, param_id) {
                self.diagnostics.error(
                    param_loc.unwrap_or(span::SpanLoc::new(0, 0)),
                    format!("duplicate parameter name '{}'", param_name),
                );
            }
        }

        let previous = self.current_function.replace(CurrentFunction {
            name,
            symbol_id: sym_id,
            result_type,
        });

        let body = body.get();
        if let Some(var_part) = &body.0 {
            self.check_variable_declaration_part(var_part.get());
        }
        self.check_stmt(body.1.get(), body.1.loc());

        self.current_function = previous;
        self.ctx.registry.drop_level();
        self.scope.drop_level();
    }

    // Statements.

    fn check_stmt(&mut self, stmt: &ast::Stmt, loc: &span::SpanLoc) {
        match stmt {
            ast::Stmt::Compound(s) => {
                for sub in &s.0 {
                    self.check_stmt(sub.get(), sub.loc());
                }
            }
            ast::Stmt::Assignment(s) => self.check_assignment(s, loc),
            ast::Stmt::ProcedureCall(s) => self.check_procedure_call(s, loc),
            ast::Stmt::If(s) => {
                self.check_condition(&s.0);
                self.check_stmt(s.1.get(), s.1.loc());
                if let Some(else_part) = &s.2 {
                    self.check_stmt(else_part.get(), else_part.loc());
                }
            }
            ast::Stmt::WhileDo(s) => {
                self.check_condition(&s.0);
                self.check_stmt(s.1.get(), s.1.loc());
            }
            ast::Stmt::RepeatUntil(s) => {
                for sub in &s.0 {
                    self.check_stmt(sub.get(), sub.loc());
                }
                self.check_condition(&s.1);
            }
            ast::Stmt::For(s) => self.check_for(s),
            ast::Stmt::Write(s) => self.check_write(s),
            ast::Stmt::Read(s) => self.check_read(s),
            ast::Stmt::Empty(..) => {}
        }
    }

    fn check_condition(&mut self, cond: &span::SpannedBox<ast::Expr>) {
        let ty = self.check_expr(cond);
        if self.ctx.type_system.is_error_type(ty) {
            return;
        }
        if !self.ctx.type_system.is_integral_type(ty) {
            self.diagnostics.error(
                *cond.loc(),
                format!(
                    "the condition of this statement must be integral but it is {}",
                    self.ctx.type_system.get_type_name(ty)
                ),
            );
        }
    }

    fn check_assignment(&mut self, s: &ast::StmtAssignment, loc: &span::SpanLoc) {
        let lhs_ty = self.check_expr(&s.0);
        let rhs_ty = self.check_expr(&s.1);

        if !s.0.get().is_lvalue() && !self.is_function_result_name(s.0.get()) {
            self.diagnostics.error(
                *s.0.loc(),
                "left hand side of this assignment does not denote storage".to_string(),
            );
            return;
        }

        let ts = &self.ctx.type_system;
        if ts.is_error_type(lhs_ty) || ts.is_error_type(rhs_ty) {
            return;
        }

        // Set assignment fills in what the right hand side does not know
        // yet: its range and element come from the destination.
        if ts.is_set_type(lhs_ty) && ts.is_set_type(rhs_ty) {
            assert!(
                ts.set_range(lhs_ty).is_some() && ts.set_element(lhs_ty).is_some(),
                "left set type should be fully defined"
            );
            if self.ctx.type_system.set_range(rhs_ty).is_none() {
                let r = self.ctx.type_system.set_range(lhs_ty).unwrap();
                self.ctx.type_system.set_update_range(rhs_ty, r);
            }
            if self.ctx.type_system.set_element(rhs_ty).is_none() {
                let e = self.ctx.type_system.set_element(lhs_ty).unwrap();
                self.ctx.type_system.set_update_element(rhs_ty, e);
            }
            let ts = &self.ctx.type_system;
            let le = ts.set_element(lhs_ty).unwrap();
            let re = ts.set_element(rhs_ty).unwrap();
            if !ts.same_as(le, re) {
                self.diagnostics
                    .error(*loc, "Subtypes are different in assignment.".to_string());
            } else if ts.set_range(lhs_ty) != ts.set_range(rhs_ty) {
                self.diagnostics
                    .error(*loc, "Range mismatch for assignment".to_string());
            }
            return;
        }

        // nil is only accepted on the right hand side.
        if ts.is_pointer_type(lhs_ty) && s.1.get().is_nil() {
            return;
        }

        if ts.is_subrange_type(lhs_ty) {
            if let Some(v) = s.1.get().integer_literal_value() {
                let range = ts.get_range(lhs_ty).unwrap();
                if !range.contains(v) {
                    self.diagnostics.error(*loc, "Value out of range".to_string());
                }
                return;
            }
        }

        // Character arrays accept a string literal of exactly the same
        // length.
        if ts.is_array_type(lhs_ty) && !ts.is_string_type(lhs_ty) {
            if let Some(s_lit) = s.1.get().string_literal_value() {
                let ranges = ts.array_ranges(lhs_ty);
                let element = ts.get_sub_type(lhs_ty).unwrap();
                if ts.is_char_type(element)
                    && ranges.len() == 1
                    && ranges[0].size() == s_lit.chars().count() as u64
                {
                    return;
                }
                self.diagnostics.error(
                    *loc,
                    "String assignment from incompatible string constant".to_string(),
                );
                return;
            }
        }

        if ts.assignable_type(lhs_ty, rhs_ty).is_none() {
            self.diagnostics
                .error(*loc, "Incompatible type in assignment".to_string());
        }
    }

    fn is_function_result_name(&self, e: &ast::Expr) -> bool {
        match (e, &self.current_function) {
            (ast::Expr::Variable(v), Some(f)) => v.0.get() == &f.name,
            _ => false,
        }
    }

    fn check_for(&mut self, s: &ast::StmtFor) {
        let var_sym = self.lookup_symbol(s.1.get(), s.1.loc());
        if let Some(sym_id) = var_sym {
            self.ctx.set_ast_symbol(s.1.id(), sym_id);
            let sym = self.ctx.get_symbol(sym_id);
            let sym = sym.borrow();
            if sym.get_kind() != SymbolKind::Variable && sym.get_kind() != SymbolKind::ErrorLookup {
                self.diagnostics.error(
                    *s.1.loc(),
                    format!("'{}' does not denote a variable", s.1.get()),
                );
            } else if let Some(ty) = sym.get_type() {
                if !self.ctx.type_system.is_error_type(ty)
                    && !self.ctx.type_system.is_integral_type(ty)
                {
                    self.diagnostics.error(
                        *s.1.loc(),
                        "the induction variable of a for-statement must have an integral type"
                            .to_string(),
                    );
                }
            }
        }

        let start_ty = self.check_expr(&s.2);
        let end_ty = self.check_expr(&s.3);
        let ts = &self.ctx.type_system;
        if let Some(sym_id) = var_sym {
            if let Some(var_ty) = self.ctx.get_symbol(sym_id).borrow().get_type() {
                if !ts.is_error_type(start_ty) && ts.assignable_type(var_ty, start_ty).is_none() {
                    self.diagnostics.error(
                        *s.2.loc(),
                        "initial value of this for-statement is incompatible with its induction variable"
                            .to_string(),
                    );
                }
                if !ts.is_error_type(end_ty) && ts.assignable_type(var_ty, end_ty).is_none() {
                    self.diagnostics.error(
                        *s.3.loc(),
                        "final value of this for-statement is incompatible with its induction variable"
                            .to_string(),
                    );
                }
            }
        }

        self.check_stmt(s.4.get(), s.4.loc());
    }

    fn check_procedure_call(&mut self, s: &ast::StmtProcedureCall, loc: &span::SpanLoc) {
        let name = s.0.get();
        let sym_id = match self.lookup_symbol(name, s.0.loc()) {
            Some(x) => x,
            None => {
                // Still check the arguments for their own errors.
                for arg in &s.1 {
                    self.check_expr(arg);
                }
                return;
            }
        };
        let kind = self.ctx.get_symbol(sym_id).borrow().get_kind();
        match kind {
            SymbolKind::Procedure | SymbolKind::Function => {
                self.ctx.set_ast_symbol(s.0.id(), sym_id);
                self.check_call_arguments(sym_id, name, &s.1, loc);
            }
            SymbolKind::ErrorLookup => {}
            _ => {
                self.diagnostics
                    .error(*loc, format!("'{}' is not a procedure", name));
            }
        }
    }

    fn check_call_arguments(
        &mut self,
        callee: SymbolId,
        name: &str,
        args: &[span::SpannedBox<ast::Expr>],
        loc: &span::SpanLoc,
    ) {
        let formal_params = self
            .ctx
            .get_symbol(callee)
            .borrow()
            .get_formal_parameters()
            .unwrap_or_default();
        if formal_params.len() != args.len() {
            self.diagnostics.error(
                *loc,
                format!("Incorrect number of arguments for '{}'", name),
            );
            for arg in args {
                self.check_expr(arg);
            }
            return;
        }
        for (param_id, arg) in formal_params.iter().zip(args.iter()) {
            let arg_ty = self.check_expr(arg);
            let (param_ty, param_kind) = {
                let param = self.ctx.get_symbol(*param_id);
                let param = param.borrow();
                (param.get_type().unwrap(), param.get_parameter().unwrap())
            };
            if param_kind == ParameterKind::Variable && !arg.get().is_lvalue() {
                self.diagnostics.error(
                    *arg.loc(),
                    "Args declared with 'var' must be a variable".to_string(),
                );
                continue;
            }
            let ts = &self.ctx.type_system;
            if ts.is_error_type(arg_ty) {
                continue;
            }
            let compatible = if param_kind == ParameterKind::Variable {
                // By reference arguments alias the storage, no widening.
                ts.same_as(param_ty, arg_ty)
            } else if ts.is_subrange_type(param_ty) {
                arg.get()
                    .integer_literal_value()
                    .map(|v| ts.get_range(param_ty).unwrap().contains(v))
                    .unwrap_or_else(|| ts.assignable_type(param_ty, arg_ty).is_some())
            } else {
                ts.assignable_type(param_ty, arg_ty).is_some()
            };
            if !compatible {
                self.diagnostics.error(
                    *arg.loc(),
                    format!(
                        "argument of type {} is incompatible with parameter of type {}",
                        ts.get_type_name(arg_ty),
                        ts.get_type_name(param_ty)
                    ),
                );
            }
        }
    }

    fn check_write(&mut self, s: &ast::StmtWrite) {
        for arg in &s.1 {
            let arg = arg.get();
            let ty = self.check_expr(&arg.0);
            let ts = &self.ctx.type_system;
            if !ts.is_error_type(ty)
                && !ts.is_integral_type(ty)
                && !ts.is_real_type(ty)
                && !ts.is_string_like_type(ty)
            {
                self.diagnostics.error(
                    *arg.0.loc(),
                    format!(
                        "cannot write a value of type {}",
                        ts.get_type_name(ty)
                    ),
                );
            }
            if let Some(width) = &arg.1 {
                let wty = self.check_expr(width);
                if !self.ctx.type_system.is_error_type(wty)
                    && !self.ctx.type_system.is_integral_type(wty)
                {
                    self.diagnostics.error(
                        *width.loc(),
                        "Expected width to be integer value".to_string(),
                    );
                }
            }
            if let Some(precision) = &arg.2 {
                let pty = self.check_expr(precision);
                if !self.ctx.type_system.is_error_type(pty)
                    && !self.ctx.type_system.is_integral_type(pty)
                {
                    self.diagnostics.error(
                        *precision.loc(),
                        "Expected precision to be integer value".to_string(),
                    );
                }
                if !self.ctx.type_system.is_real_type(ty) {
                    self.diagnostics.error(
                        *precision.loc(),
                        "a precision is only meaningful for a real value".to_string(),
                    );
                }
            }
        }
    }

    fn check_read(&mut self, s: &ast::StmtRead) {
        for arg in &s.1 {
            let ty = self.check_expr(arg);
            if !arg.get().is_lvalue() {
                self.diagnostics.error(
                    *arg.loc(),
                    "Argument for read/readln should be a variable".to_string(),
                );
                continue;
            }
            let ts = &self.ctx.type_system;
            if !ts.is_error_type(ty)
                && !ts.is_integer_type(ty)
                && !ts.is_int64_type(ty)
                && !ts.is_real_type(ty)
                && !ts.is_char_type(ty)
            {
                self.diagnostics.error(
                    *arg.loc(),
                    format!("cannot read a value of type {}", ts.get_type_name(ty)),
                );
            }
        }
    }

    // Expressions. Every node gets its type recorded.

    fn check_expr(&mut self, e: &span::SpannedBox<ast::Expr>) -> TypeId {
        let ty = self.check_expr_impl(e);
        self.ctx.set_ast_type(e.id(), ty);
        ty
    }

    fn check_expr_impl(&mut self, e: &span::SpannedBox<ast::Expr>) -> TypeId {
        let loc = *e.loc();
        match e.get() {
            ast::Expr::Const(c) => match c.0.get() {
                Constant::Integer(..) => self.ctx.type_system.get_integer_type(),
                Constant::Real(..) => self.ctx.type_system.get_real_type(),
                Constant::Bool(..) => self.ctx.type_system.get_boolean_type(),
                Constant::Char(..) => self.ctx.type_system.get_char_type(),
                Constant::String(s) => {
                    let len = s.chars().count() as u32;
                    self.ctx.type_system.get_string_type(len.max(1))
                }
            },
            ast::Expr::Nil(..) => {
                let void = self.ctx.type_system.get_void_type();
                self.ctx.type_system.get_pointer_type(void)
            }
            ast::Expr::Variable(v) => self.check_variable(v, &loc, e.id()),
            ast::Expr::Deref(d) => {
                let inner_ty = self.check_expr(&d.0);
                let ts = &self.ctx.type_system;
                if ts.is_error_type(inner_ty) {
                    return inner_ty;
                }
                if !ts.is_pointer_type(inner_ty) {
                    self.diagnostics.error(
                        loc,
                        format!(
                            "cannot dereference a value of type {}",
                            ts.get_type_name(inner_ty)
                        ),
                    );
                    return self.error_type();
                }
                match ts.pointer_pointee(inner_ty) {
                    Some(pointee) => pointee,
                    None => {
                        self.diagnostics.error(
                            loc,
                            "cannot dereference a pointer to an undeclared type".to_string(),
                        );
                        self.error_type()
                    }
                }
            }
            ast::Expr::ArrayAccess(a) => self.check_array_access(a, &loc),
            ast::Expr::FieldAccess(f) => self.check_field_access(f, &loc),
            ast::Expr::Call(c) => self.check_call_expr(c, &loc, e.id()),
            ast::Expr::BinOp(b) => self.check_binary_expr(b, &loc),
            ast::Expr::UnOp(u) => self.check_unary_expr(u, &loc),
            ast::Expr::Range(r) => {
                let lty = self.check_expr(&r.0);
                let rty = self.check_expr(&r.1);
                let ts = &self.ctx.type_system;
                if ts.is_error_type(lty) || ts.is_error_type(rty) {
                    return self.error_type();
                }
                if !ts.same_as(lty, rty) {
                    self.diagnostics
                        .error(loc, "Range should be same type at both ends".to_string());
                    return self.error_type();
                }
                lty
            }
            ast::Expr::SetLiteral(s) => self.check_set_literal(s, &loc),
            ast::Expr::Parentheses(p) => self.check_expr(&p.0),
        }
    }

    fn check_variable(
        &mut self,
        v: &ast::ExprVariable,
        loc: &span::SpanLoc,
        id: span::SpanId,
    ) -> TypeId {
        let name = v.0.get();

        // Inside a function body its own name denotes the result slot.
        if let Some(f) = &self.current_function {
            if name == &f.name {
                if let Some(result_type) = f.result_type {
                    self.ctx.set_ast_symbol(id, f.symbol_id);
                    self.ctx.set_ast_symbol(v.0.id(), f.symbol_id);
                    return result_type;
                }
            }
        }

        // An enumerated value used as an expression.
        if let Some(ev) = self.ctx.registry.find_enum_value(name) {
            return ev.owner;
        }

        let sym_id = match self.lookup_symbol(name, loc) {
            Some(x) => x,
            None => return self.error_type(),
        };
        let sym = self.ctx.get_symbol(sym_id);
        let sym = sym.borrow();
        match sym.get_kind() {
            SymbolKind::Variable => {
                self.ctx.set_ast_symbol(id, sym_id);
                self.ctx.set_ast_symbol(v.0.id(), sym_id);
                sym.get_type().unwrap_or_else(|| self.error_type())
            }
            SymbolKind::ErrorLookup => self.error_type(),
            _ => {
                self.diagnostics.error(
                    *loc,
                    format!("'{}' cannot be used as a variable here", name),
                );
                self.error_type()
            }
        }
    }

    fn check_array_access(&mut self, a: &ast::ExprArrayAccess, loc: &span::SpanLoc) -> TypeId {
        let base_ty = self.check_expr(&a.0);
        let mut index_tys = vec![];
        for index in &a.1 {
            index_tys.push((self.check_expr(index), *index.loc()));
        }
        let ts = &self.ctx.type_system;
        if ts.is_error_type(base_ty) {
            return base_ty;
        }
        if !ts.is_array_type(base_ty) {
            self.diagnostics.error(
                *loc,
                format!(
                    "cannot index a value of type {}",
                    ts.get_type_name(base_ty)
                ),
            );
            return self.error_type();
        }
        if ts.array_ranges(base_ty).len() != a.1.len() {
            self.diagnostics.error(
                *loc,
                format!(
                    "this array expects {} indices but {} were given",
                    ts.array_ranges(base_ty).len(),
                    a.1.len()
                ),
            );
            return self.error_type();
        }
        let mut ok = true;
        for (index_ty, index_loc) in index_tys {
            if ts.is_error_type(index_ty) {
                ok = false;
            } else if !ts.is_integral_type(index_ty) {
                self.diagnostics
                    .error(index_loc, "Index is supposed to be integral type".to_string());
                ok = false;
            }
        }
        if !ok {
            return self.error_type();
        }
        ts.get_sub_type(base_ty).unwrap()
    }

    fn check_field_access(&mut self, f: &ast::ExprFieldAccess, loc: &span::SpanLoc) -> TypeId {
        let base_ty = self.check_expr(&f.0);
        let ts = &self.ctx.type_system;
        if ts.is_error_type(base_ty) {
            return base_ty;
        }
        let field_name = f.1.get();
        if ts.is_record_type(base_ty) {
            if let Some(idx) = ts.record_field_index(base_ty, field_name) {
                return ts.record_fields(base_ty)[idx].ty;
            }
            if let Some(variant) = ts.record_variant(base_ty) {
                if let Some(idx) = ts.record_field_index(variant, field_name) {
                    return ts.record_fields(variant)[idx].ty;
                }
            }
            self.diagnostics.error(
                *loc,
                format!("no field named '{}' in this record", field_name),
            );
            return self.error_type();
        }
        if ts.is_class_type(base_ty) {
            if let Some((owner, idx)) = ts.class_field_lookup(base_ty, field_name) {
                let owner_ty = if owner == ts.class_info(base_ty).name {
                    base_ty
                } else {
                    // Walk to the declaring class.
                    let mut current = base_ty;
                    loop {
                        let info = ts.class_info(current);
                        if info.name == owner {
                            break current;
                        }
                        current = info.base.expect("declaring class must be in the chain");
                    }
                };
                return ts.class_info(owner_ty).fields[idx].ty;
            }
            self.diagnostics.error(
                *loc,
                format!("no field named '{}' in this class", field_name),
            );
            return self.error_type();
        }
        self.diagnostics.error(
            *loc,
            format!(
                "cannot select a field of a value of type {}",
                ts.get_type_name(base_ty)
            ),
        );
        self.error_type()
    }

    fn check_call_expr(
        &mut self,
        c: &ast::ExprCall,
        loc: &span::SpanLoc,
        id: span::SpanId,
    ) -> TypeId {
        let name = c.0.get().clone();

        if is_builtin_function(&name) {
            return self.check_builtin_call(&name, &c.1, loc);
        }

        // A recursive call to the current function.
        let sym_id = if let Some(f) = &self.current_function {
            if name == f.name {
                Some(f.symbol_id)
            } else {
                None
            }
        } else {
            None
        };
        let sym_id = match sym_id {
            Some(x) => Some(x),
            None => self.lookup_symbol(&name, c.0.loc()),
        };
        let sym_id = match sym_id {
            Some(x) => x,
            None => {
                for arg in &c.1 {
                    self.check_expr(arg);
                }
                return self.error_type();
            }
        };

        let (kind, return_type) = {
            let sym = self.ctx.get_symbol(sym_id);
            let sym = sym.borrow();
            (sym.get_kind(), sym.get_return_type())
        };
        match kind {
            SymbolKind::Function => {
                self.ctx.set_ast_symbol(id, sym_id);
                self.ctx.set_ast_symbol(c.0.id(), sym_id);
                self.check_call_arguments(sym_id, &name, &c.1, loc);
                return_type.unwrap_or_else(|| self.error_type())
            }
            SymbolKind::Procedure => {
                self.diagnostics.error(
                    *loc,
                    format!("procedure '{}' cannot appear in an expression", name),
                );
                for arg in &c.1 {
                    self.check_expr(arg);
                }
                self.error_type()
            }
            SymbolKind::ErrorLookup => self.error_type(),
            _ => {
                self.diagnostics
                    .error(*loc, format!("'{}' is not a function", name));
                self.error_type()
            }
        }
    }

    fn check_builtin_call(
        &mut self,
        name: &str,
        args: &[span::SpannedBox<ast::Expr>],
        loc: &span::SpanLoc,
    ) -> TypeId {
        if args.len() != 1 {
            self.diagnostics.error(
                *loc,
                format!("Incorrect number of arguments for '{}'", name),
            );
            for arg in args {
                self.check_expr(arg);
            }
            return self.error_type();
        }
        let arg_ty = self.check_expr(&args[0]);
        if self.ctx.type_system.is_error_type(arg_ty) {
            return arg_ty;
        }
        let result = {
            let ts = &self.ctx.type_system;
            match name {
                "abs" => {
                    if ts.is_real_type(arg_ty)
                        || ts.is_integer_type(arg_ty)
                        || ts.is_int64_type(arg_ty)
                    {
                        Some(arg_ty)
                    } else {
                        None
                    }
                }
                "odd" => {
                    if ts.is_integer_type(arg_ty) || ts.is_int64_type(arg_ty) {
                        Some(ts.get_boolean_type())
                    } else {
                        None
                    }
                }
                "ord" => {
                    if ts.is_integral_type(arg_ty) {
                        Some(ts.get_integer_type())
                    } else {
                        None
                    }
                }
                "chr" => {
                    if ts.is_integer_type(arg_ty) {
                        Some(ts.get_char_type())
                    } else {
                        None
                    }
                }
                "succ" | "pred" => {
                    if ts.is_integral_type(arg_ty) {
                        Some(arg_ty)
                    } else {
                        None
                    }
                }
                _ => unreachable!("unhandled builtin '{}'", name),
            }
        };
        match result {
            Some(ty) => ty,
            None => {
                self.diagnostics.error(
                    *loc,
                    format!("invalid type of argument for '{}'", name),
                );
                self.error_type()
            }
        }
    }

    fn check_unary_expr(&mut self, u: &ast::ExprUnOp, loc: &span::SpanLoc) -> TypeId {
        let operand_ty = self.check_expr(&u.1);
        let ts = &self.ctx.type_system;
        if ts.is_error_type(operand_ty) {
            return operand_ty;
        }
        match u.0.get() {
            ast::UnaryOp::Plus | ast::UnaryOp::Minus => {
                if ts.is_real_type(operand_ty)
                    || ts.is_integer_type(operand_ty)
                    || ts.is_int64_type(operand_ty)
                {
                    if ts.is_subrange_type(operand_ty) {
                        ts.get_host_type(operand_ty)
                    } else {
                        operand_ty
                    }
                } else {
                    self.diagnostics.error(
                        *loc,
                        format!(
                            "operator '{}' cannot be applied to an operand of type {}",
                            u.0.get(),
                            ts.get_type_name(operand_ty)
                        ),
                    );
                    self.error_type()
                }
            }
            ast::UnaryOp::LogicalNot => {
                if ts.is_boolean_type(operand_ty) {
                    ts.get_boolean_type()
                } else {
                    self.diagnostics.error(
                        *loc,
                        format!(
                            "operator 'not' cannot be applied to an operand of type {}",
                            ts.get_type_name(operand_ty)
                        ),
                    );
                    self.error_type()
                }
            }
        }
    }

    // The binary expression rules of the analyser, in order: `in`, set
    // against set, char concatenation, pointer against nil, range against
    // integer literal, and finally plain compatibility.
    fn check_binary_expr(&mut self, b: &ast::ExprBinOp, loc: &span::SpanLoc) -> TypeId {
        let op = *b.0.get();
        let lty = self.check_expr(&b.1);
        let rty = self.check_expr(&b.2);

        if self.ctx.type_system.is_error_type(lty) || self.ctx.type_system.is_error_type(rty) {
            return self.error_type();
        }

        if op == ast::BinOperator::InSet {
            if !self.ctx.type_system.is_integral_type(lty) {
                self.diagnostics.error(
                    *loc,
                    "Left hand of 'in' expression should be integral.".to_string(),
                );
            }
            if !self.ctx.type_system.is_set_type(rty) {
                self.diagnostics.error(
                    *loc,
                    "Right hand of 'in' expression should be a set.".to_string(),
                );
                return self.ctx.type_system.get_boolean_type();
            }
            if self.ctx.type_system.set_element(rty).is_none() {
                let host = self.host_of(lty);
                self.ctx.type_system.set_update_element(rty, host);
            }
            let elem = self.ctx.type_system.set_element(rty).unwrap();
            let lhost = self.host_of(lty);
            if !self.ctx.type_system.same_as(lhost, elem) {
                self.diagnostics.error(
                    *loc,
                    "Left hand type does not match constituent parts of set".to_string(),
                );
            }
            if self.ctx.type_system.set_range(rty).is_none() {
                if let Some(r) = self.ctx.type_system.set_range_from_element(lty) {
                    self.ctx.type_system.set_update_range(rty, r);
                }
            }
            return self.ctx.type_system.get_boolean_type();
        }

        if self.ctx.type_system.is_set_type(lty) && self.ctx.type_system.is_set_type(rty) {
            // An empty set literal takes the element type of its sibling.
            if b.1.get().is_empty_set_literal() {
                if let Some(elem) = self.ctx.type_system.set_element(rty) {
                    if self.ctx.type_system.set_element(lty).is_none() {
                        self.ctx.type_system.set_update_element(lty, elem);
                    }
                }
            }
            if b.2.get().is_empty_set_literal() {
                if let Some(elem) = self.ctx.type_system.set_element(lty) {
                    if self.ctx.type_system.set_element(rty).is_none() {
                        self.ctx.type_system.set_update_element(rty, elem);
                    }
                }
            }
            match (
                self.ctx.type_system.set_element(lty),
                self.ctx.type_system.set_element(rty),
            ) {
                (Some(le), Some(re)) if !self.ctx.type_system.same_as(le, re) => {
                    self.diagnostics
                        .error(*loc, "Set type content isn't the same!".to_string());
                }
                _ => {}
            }
            if self.ctx.type_system.set_range(lty).is_none() {
                let range = self
                    .ctx
                    .type_system
                    .set_range(rty)
                    .or_else(|| {
                        self.ctx
                            .type_system
                            .set_element(rty)
                            .and_then(|e| self.ctx.type_system.set_range_from_element(e))
                    });
                if let Some(r) = range {
                    self.ctx.type_system.set_update_range(lty, r);
                }
            }
            if self.ctx.type_system.set_range(rty).is_none() {
                if let Some(r) = self.ctx.type_system.set_range(lty) {
                    self.ctx.type_system.set_update_range(rty, r);
                }
            }
            match op {
                ast::BinOperator::Addition
                | ast::BinOperator::Multiplication
                | ast::BinOperator::Subtraction => return rty,
                ast::BinOperator::Equal | ast::BinOperator::NotEqual => {
                    return self.ctx.type_system.get_boolean_type()
                }
                _ => {
                    self.diagnostics.error(
                        *loc,
                        format!("operator '{}' cannot be applied to set operands", op),
                    );
                    return self.error_type();
                }
            }
        }

        // Concatenating two chars makes a string.
        if op == ast::BinOperator::Addition
            && self.ctx.type_system.is_char_type(lty)
            && self.ctx.type_system.is_char_type(rty)
        {
            return self.ctx.type_system.get_string_type(255);
        }

        // A pointer compares against nil.
        if (op == ast::BinOperator::Equal || op == ast::BinOperator::NotEqual)
            && ((self.ctx.type_system.is_pointer_type(lty) && b.2.get().is_nil())
                || (self.ctx.type_system.is_pointer_type(rty) && b.1.get().is_nil()))
        {
            return self.ctx.type_system.get_boolean_type();
        }

        // A range-typed operand against an integer literal: the literal
        // must fall inside the range. Checked on both sides.
        if self.ctx.type_system.is_subrange_type(lty) {
            if let Some(v) = b.2.get().integer_literal_value() {
                let r = self.ctx.type_system.get_range(lty).unwrap();
                if !r.contains(v) {
                    self.diagnostics.error(*loc, "Value out of range".to_string());
                }
                return if op.is_relational() {
                    self.ctx.type_system.get_boolean_type()
                } else {
                    lty
                };
            }
        }
        if self.ctx.type_system.is_subrange_type(rty) {
            if let Some(v) = b.1.get().integer_literal_value() {
                let r = self.ctx.type_system.get_range(rty).unwrap();
                if !r.contains(v) {
                    self.diagnostics.error(*loc, "Value out of range".to_string());
                }
                return if op.is_relational() {
                    self.ctx.type_system.get_boolean_type()
                } else {
                    rty
                };
            }
        }

        let result = self.ctx.type_system.compatible_type(lty, rty);
        let result = match result {
            Some(ty) => ty,
            None => {
                self.diagnostics
                    .error(*loc, "Incompatible type in expression".to_string());
                return self.error_type();
            }
        };

        if op == ast::BinOperator::LogicalAnd || op == ast::BinOperator::LogicalOr {
            if !self.ctx.type_system.is_integral_type(result) {
                self.diagnostics.error(
                    *loc,
                    format!(
                        "operator '{}' cannot be applied to operands of type {} and {}",
                        op,
                        self.ctx.type_system.get_type_name(lty),
                        self.ctx.type_system.get_type_name(rty)
                    ),
                );
                return self.error_type();
            }
        }

        if op.is_relational() {
            self.ctx.type_system.get_boolean_type()
        } else {
            result
        }
    }

    fn host_of(&self, ty: TypeId) -> TypeId {
        if self.ctx.type_system.is_subrange_type(ty) {
            self.ctx.type_system.get_host_type(ty)
        } else {
            ty
        }
    }

    fn check_set_literal(&mut self, s: &ast::ExprSetLiteral, loc: &span::SpanLoc) -> TypeId {
        let mut element_ty: Option<TypeId> = None;
        for elem in &s.0 {
            let ty = self.check_expr(elem);
            if self.ctx.type_system.is_error_type(ty) {
                continue;
            }
            if !self.ctx.type_system.is_integral_type(ty) {
                self.diagnostics.error(
                    *elem.loc(),
                    format!(
                        "a value of type {} cannot be a member of a set",
                        self.ctx.type_system.get_type_name(ty)
                    ),
                );
                continue;
            }
            let host = self.host_of(ty);
            match element_ty {
                None => element_ty = Some(host),
                Some(prev) => {
                    if !self.ctx.type_system.same_as(prev, host) {
                        self.diagnostics.error(
                            *loc,
                            "elements of a set literal must all have the same type".to_string(),
                        );
                    }
                }
            }
        }

        let set_ty = self.ctx.type_system.get_set_type(element_ty, None);

        // The range is not known yet; guess one from the element type and
        // defer writing it back until the whole unit has been analysed.
        if let Some(elem) = element_ty {
            if let Some(range) = self.ctx.type_system.set_range_from_element(elem) {
                self.fixups.push(Fixup::SetLiteralRange {
                    set_type: set_ty,
                    range,
                });
            }
        }

        set_ty
    }
}
