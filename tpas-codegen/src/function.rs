use tpas_frontend::ast;
use tpas_frontend::constant::Constant;
use tpas_frontend::span;
use tpas_frontend::typesystem::TypeId;

use cranelift_codegen::ir::condcodes::{FloatCC, IntCC};
use cranelift_codegen::ir::stackslot::{StackSlotData, StackSlotKind};
use cranelift_codegen::ir::types::{F64, I32, I64, I8};
use cranelift_codegen::ir::{InstBuilder, MemFlags, StackSlot, Value};
use cranelift_frontend::FunctionBuilder;
use cranelift_module::Module;

use std::collections::HashMap;

use crate::builtin;
use crate::environment::VarLocation;
use crate::module::{FunctionInfo, ModuleLowering};

/// Lowers one function body into Cranelift IR. Holds the builder whose
/// insertion point all emission goes through, plus per-function memoised
/// references to module-level entities.
pub struct FunctionLowering<'a, 'b, 'c> {
    pub module: &'a mut ModuleLowering<'b>,
    pub(crate) builder: FunctionBuilder<'c>,

    entry_block: Option<cranelift_codegen::ir::Block>,
    function_references: HashMap<cranelift_module::FuncId, cranelift_codegen::ir::FuncRef>,
    data_references: HashMap<cranelift_module::DataId, cranelift_codegen::ir::GlobalValue>,
}

impl<'a, 'b, 'c> FunctionLowering<'a, 'b, 'c> {
    pub fn new(
        module: &'a mut ModuleLowering<'b>,
        builder: FunctionBuilder<'c>,
    ) -> FunctionLowering<'a, 'b, 'c> {
        FunctionLowering {
            module,
            builder,
            entry_block: None,
            function_references: HashMap::new(),
            data_references: HashMap::new(),
        }
    }

    pub fn init_function(&mut self) {
        let entry_block = self.builder.create_block();
        self.builder
            .append_block_params_for_function_params(entry_block);
        self.builder.switch_to_block(entry_block);
        self.entry_block = Some(entry_block);
    }

    pub fn finish(mut self) {
        self.builder.seal_all_blocks();
        self.builder.finalize();
    }

    fn error(&mut self, loc: span::SpanLoc, message: String) {
        self.module.diagnostics.error(loc, message);
    }

    fn expr_type(&self, e: &span::SpannedBox<ast::Expr>) -> Option<TypeId> {
        let ty = self.module.semantic_context.get_ast_type(e.id())?;
        if self.module.semantic_context.type_system.is_error_type(ty) {
            None
        } else {
            Some(ty)
        }
    }

    // Memoised per-function references.

    fn func_ref(
        &mut self,
        func_id: cranelift_module::FuncId,
    ) -> cranelift_codegen::ir::FuncRef {
        if let Some(r) = self.function_references.get(&func_id) {
            return *r;
        }
        let r = self
            .module
            .object_module
            .as_mut()
            .unwrap()
            .declare_func_in_func(func_id, self.builder.func);
        self.function_references.insert(func_id, r);
        r
    }

    fn global_addr(&mut self, data_id: cranelift_module::DataId) -> Value {
        let gv = if let Some(gv) = self.data_references.get(&data_id) {
            *gv
        } else {
            let gv = self
                .module
                .object_module
                .as_mut()
                .unwrap()
                .declare_data_in_func(data_id, self.builder.func);
            self.data_references.insert(data_id, gv);
            gv
        };
        let pointer_type = self.module.pointer_type;
        self.builder.ins().global_value(pointer_type, gv)
    }

    fn location_addr(&mut self, location: VarLocation) -> Value {
        match location {
            VarLocation::Global(data_id) => self.global_addr(data_id),
            VarLocation::Stack(slot) => {
                let pointer_type = self.module.pointer_type;
                self.builder.ins().stack_addr(pointer_type, slot, 0)
            }
            VarLocation::Address(v) => v,
        }
    }

    fn create_slot(&mut self, size: u64, align: u64) -> StackSlot {
        let align_shift = align.max(1).trailing_zeros() as u8;
        self.builder.create_sized_stack_slot(StackSlotData::new(
            StackSlotKind::ExplicitSlot,
            size as u32,
            align_shift,
        ))
    }

    fn create_slot_for_type(&mut self, ty: TypeId) -> StackSlot {
        let ts = &self.module.semantic_context.type_system;
        let size = ts.size_bytes(ty);
        let align = ts.align_bytes(ty);
        self.create_slot(size, align)
    }

    fn load_scalar(&mut self, addr: Value, scalar: cranelift_codegen::ir::Type) -> Value {
        self.builder.ins().load(scalar, MemFlags::trusted(), addr, 0)
    }

    fn store_scalar(&mut self, addr: Value, v: Value) {
        self.builder.ins().store(MemFlags::trusted(), v, addr, 0);
    }

    fn emit_memcpy(&mut self, dest: Value, src: Value, size: u64, align: u64) {
        let config = self.module.frontend_config;
        self.builder.emit_small_memory_copy(
            config,
            dest,
            src,
            size,
            align.min(8) as u8,
            align.min(8) as u8,
            true,
            MemFlags::new(),
        );
    }

    pub(crate) fn value_type(&self, v: Value) -> cranelift_codegen::ir::Type {
        self.builder.func.dfg.value_type(v)
    }

    pub(crate) fn to_i32(&mut self, v: Value) -> Value {
        match self.value_type(v) {
            I8 => self.builder.ins().uextend(I32, v),
            I64 => self.builder.ins().ireduce(I32, v),
            _ => v,
        }
    }

    fn to_i64(&mut self, v: Value) -> Value {
        match self.value_type(v) {
            I8 => self.builder.ins().uextend(I64, v),
            I32 => self.builder.ins().sextend(I64, v),
            _ => v,
        }
    }

    // Function prologue and epilogue.

    /// Captures the incoming arguments: a by-reference argument keeps its
    /// pointer, a by-value scalar gets a slot in the entry block and a
    /// store, a by-value aggregate is copied into a fresh slot. A function
    /// also gets a result slot named after itself.
    pub fn copy_in_parameters(&mut self, function_name: &str, info: &FunctionInfo) {
        let entry_block = self.entry_block.unwrap();
        let incoming: Vec<Value> = self.builder.block_params(entry_block).to_vec();

        for (param, value) in info.params.iter().zip(incoming.into_iter()) {
            let location = if param.by_ref {
                VarLocation::Address(value)
            } else if let Some(_scalar) = self.module.scalar_type(param.ty) {
                let slot = self.create_slot_for_type(param.ty);
                let pointer_type = self.module.pointer_type;
                let addr = self.builder.ins().stack_addr(pointer_type, slot, 0);
                self.store_scalar(addr, value);
                VarLocation::Stack(slot)
            } else {
                let ts = &self.module.semantic_context.type_system;
                let size = ts.size_bytes(param.ty);
                let align = ts.align_bytes(param.ty);
                let slot = self.create_slot_for_type(param.ty);
                let pointer_type = self.module.pointer_type;
                let addr = self.builder.ins().stack_addr(pointer_type, slot, 0);
                self.emit_memcpy(addr, value, size, align);
                VarLocation::Stack(slot)
            };
            if !self.module.env.add(&param.name, location) {
                let name = param.name.clone();
                self.module.diagnostics.error(
                    span::SpanLoc::new(0, 0),
                    format!("Duplicate variable name {}", name),
                );
            }
        }

        if let Some(result_ty) = info.result {
            let slot = self.create_slot_for_type(result_ty);
            self.module.env.add(function_name, VarLocation::Stack(slot));
        }
    }

    pub fn emit_return(&mut self, function_name: &str, info: &FunctionInfo) {
        match info.result {
            None => {
                self.builder.ins().return_(&[]);
            }
            Some(result_ty) => {
                // The result slot carries the name of the function itself.
                let location = self
                    .module
                    .env
                    .find(function_name)
                    .expect("result slot must exist");
                let addr = self.location_addr(location);
                let scalar = self.module.scalar_type(result_ty).unwrap();
                let v = self.load_scalar(addr, scalar);
                self.builder.ins().return_(&[v]);
            }
        }
    }

    pub fn emit_main_return(&mut self) {
        let zero = self.builder.ins().iconst(I32, 0);
        self.builder.ins().return_(&[zero]);
    }

    // Local variables: one stack slot each, created while the entry block
    // is the current block.

    pub fn lower_local_variables(&mut self, part: &ast::VariableDeclarationPart) {
        for decl in &part.0 {
            let decl = decl.get();
            for name in &decl.0 {
                let sym_id = match self.module.semantic_context.get_ast_symbol(name.id()) {
                    Some(x) => x,
                    None => continue,
                };
                let ty = match self
                    .module
                    .semantic_context
                    .get_symbol(sym_id)
                    .borrow()
                    .get_type()
                {
                    Some(x) => x,
                    None => continue,
                };
                if self.module.semantic_context.type_system.is_error_type(ty) {
                    continue;
                }
                let slot = self.create_slot_for_type(ty);
                if !self.module.env.add(name.get(), VarLocation::Stack(slot)) {
                    let loc = *name.loc();
                    let n = name.get().clone();
                    self.error(loc, format!("Duplicate name {}!", n));
                }
            }
        }
    }

    // Statements.

    pub fn lower_stmt(&mut self, stmt: &span::SpannedBox<ast::Stmt>) {
        match stmt.get() {
            ast::Stmt::Compound(s) => {
                for sub in &s.0 {
                    self.lower_stmt(sub);
                }
            }
            ast::Stmt::Assignment(s) => self.lower_assignment(s),
            ast::Stmt::ProcedureCall(s) => {
                self.lower_call(s.0.get(), &s.1, s.0.loc());
            }
            ast::Stmt::If(s) => self.lower_if(s),
            ast::Stmt::WhileDo(s) => self.lower_while(s),
            ast::Stmt::RepeatUntil(s) => self.lower_repeat(s),
            ast::Stmt::For(s) => self.lower_for(s),
            ast::Stmt::Write(s) => self.lower_write(s),
            ast::Stmt::Read(s) => self.lower_read(s),
            ast::Stmt::Empty(..) => {}
        }
    }

    fn lower_assignment(&mut self, s: &ast::StmtAssignment) {
        let dest_addr = match self.lower_addr(&s.0) {
            Some(x) => x,
            None => return,
        };
        let dest_ty = match self.expr_type(&s.0) {
            Some(x) => x,
            None => return,
        };
        self.store_expr_into_address(dest_addr, dest_ty, &s.1);
    }

    /// Stores the value of `rhs` into `dest_addr` of type `dest_ty`,
    /// widening integers stored into real destinations and copying
    /// aggregates byte-wise.
    fn store_expr_into_address(
        &mut self,
        dest_addr: Value,
        dest_ty: TypeId,
        rhs: &span::SpannedBox<ast::Expr>,
    ) {
        let rhs_ty = match self.expr_type(rhs) {
            Some(x) => x,
            None => return,
        };

        if let Some(_scalar) = self.module.scalar_type(dest_ty) {
            let v = match self.lower_expr(rhs) {
                Some(x) => x,
                None => return,
            };
            let v = self.convert_for_store(v, dest_ty);
            self.store_scalar(dest_addr, v);
            return;
        }

        // Character arrays accept string literals of the exact length.
        if let Some(s_lit) = rhs.get().string_literal_value() {
            let data_id = self.module.string_literal_data(s_lit);
            let src = self.global_addr(data_id);
            let size = s_lit.len() as u64;
            self.emit_memcpy(dest_addr, src, size, 1);
            return;
        }

        // Aggregate against aggregate: copy the destination's extent.
        let src = match self.lower_expr(rhs) {
            Some(x) => x,
            None => return,
        };
        let ts = &self.module.semantic_context.type_system;
        let size = if ts.is_set_type(dest_ty) {
            ts.set_words(dest_ty) as u64 * 4
        } else {
            ts.size_bytes(dest_ty)
        };
        let align = ts.align_bytes(dest_ty).min(ts.align_bytes(rhs_ty));
        self.emit_memcpy(dest_addr, src, size, align);
    }

    /// Implicit widening at a store boundary: integer to real, integer to
    /// int64.
    fn convert_for_store(&mut self, v: Value, dest_ty: TypeId) -> Value {
        let scalar = match self.module.scalar_type(dest_ty) {
            Some(x) => x,
            None => return v,
        };
        let vty = self.value_type(v);
        if scalar == F64 && (vty == I32 || vty == I64) {
            return self.builder.ins().fcvt_from_sint(F64, v);
        }
        if scalar == I64 && vty == I32 {
            return self.builder.ins().sextend(I64, v);
        }
        if scalar == I32 && vty == I64 {
            return self.builder.ins().ireduce(I32, v);
        }
        v
    }

    fn lower_if(&mut self, s: &ast::StmtIf) {
        let cond = match self.lower_expr(&s.0) {
            Some(x) => x,
            None => return,
        };

        let then_block = self.builder.create_block();
        let merge_block = self.builder.create_block();

        match &s.2 {
            Some(else_part) => {
                let else_block = self.builder.create_block();
                self.builder
                    .ins()
                    .brif(cond, then_block, &[], else_block, &[]);

                self.builder.switch_to_block(then_block);
                self.lower_stmt(&s.1);
                self.builder.ins().jump(merge_block, &[]);

                self.builder.switch_to_block(else_block);
                self.lower_stmt(else_part);
                self.builder.ins().jump(merge_block, &[]);
            }
            None => {
                self.builder
                    .ins()
                    .brif(cond, then_block, &[], merge_block, &[]);

                self.builder.switch_to_block(then_block);
                self.lower_stmt(&s.1);
                self.builder.ins().jump(merge_block, &[]);
            }
        }

        self.builder.switch_to_block(merge_block);
    }

    fn lower_while(&mut self, s: &ast::StmtWhileDo) {
        let check_block = self.builder.create_block();
        let body_block = self.builder.create_block();
        let after_block = self.builder.create_block();

        self.builder.ins().jump(check_block, &[]);
        self.builder.switch_to_block(check_block);

        let cond = match self.lower_expr(&s.0) {
            Some(x) => x,
            None => {
                self.builder.ins().jump(after_block, &[]);
                self.builder.switch_to_block(after_block);
                return;
            }
        };
        self.builder
            .ins()
            .brif(cond, body_block, &[], after_block, &[]);

        self.builder.switch_to_block(body_block);
        self.lower_stmt(&s.1);
        self.builder.ins().jump(check_block, &[]);

        self.builder.switch_to_block(after_block);
    }

    fn lower_repeat(&mut self, s: &ast::StmtRepeatUntil) {
        let body_block = self.builder.create_block();
        let after_block = self.builder.create_block();

        self.builder.ins().jump(body_block, &[]);
        self.builder.switch_to_block(body_block);

        for sub in &s.0 {
            self.lower_stmt(sub);
        }

        // Until-true semantics: leave the loop when the condition holds.
        let cond = match self.lower_expr(&s.1) {
            Some(x) => x,
            None => {
                self.builder.ins().jump(after_block, &[]);
                self.builder.switch_to_block(after_block);
                return;
            }
        };
        self.builder
            .ins()
            .brif(cond, after_block, &[], body_block, &[]);

        self.builder.switch_to_block(after_block);
    }

    fn lower_for(&mut self, s: &ast::StmtFor) {
        let var_name = s.1.get();
        let location = match self.module.env.find(var_name) {
            Some(x) => x,
            None => {
                let loc = *s.1.loc();
                let n = var_name.clone();
                self.error(loc, format!("Unknown variable name '{}'", n));
                return;
            }
        };
        let var_ty = self
            .module
            .semantic_context
            .get_ast_symbol(s.1.id())
            .and_then(|sym_id| {
                self.module
                    .semantic_context
                    .get_symbol(sym_id)
                    .borrow()
                    .get_type()
            });
        let scalar = var_ty
            .and_then(|ty| self.module.scalar_type(ty))
            .unwrap_or(I32);

        let start_val = match self.lower_expr(&s.2) {
            Some(x) => x,
            None => return,
        };
        let end_val = match self.lower_expr(&s.3) {
            Some(x) => x,
            None => return,
        };
        let start_val = self.normalize_to(scalar, start_val);
        let end_val = self.normalize_to(scalar, end_val);

        // An empty range runs the body zero times.
        let empty_cc = match s.0 {
            ast::ForKind::To => IntCC::SignedGreaterThan,
            ast::ForKind::DownTo => IntCC::SignedLessThan,
        };
        let range_is_empty = self.builder.ins().icmp(empty_cc, start_val, end_val);

        let init_block = self.builder.create_block();
        let loop_block = self.builder.create_block();
        let increment_block = self.builder.create_block();
        let after_block = self.builder.create_block();

        self.builder
            .ins()
            .brif(range_is_empty, after_block, &[], init_block, &[]);

        self.builder.switch_to_block(init_block);
        let var_addr = self.location_addr(location);
        self.store_scalar(var_addr, start_val);
        self.builder.ins().jump(loop_block, &[]);

        self.builder.switch_to_block(loop_block);
        self.lower_stmt(&s.4);

        // The exit test runs before the increment so the induction
        // variable cannot wrap at the end of its type.
        let var_addr = self.location_addr(location);
        let current = self.load_scalar(var_addr, scalar);
        let done = self.builder.ins().icmp(IntCC::Equal, current, end_val);
        self.builder
            .ins()
            .brif(done, after_block, &[], increment_block, &[]);

        self.builder.switch_to_block(increment_block);
        let step: i64 = match s.0 {
            ast::ForKind::To => 1,
            ast::ForKind::DownTo => -1,
        };
        let next = self.builder.ins().iadd_imm(current, step);
        let var_addr = self.location_addr(location);
        self.store_scalar(var_addr, next);
        self.builder.ins().jump(loop_block, &[]);

        self.builder.switch_to_block(after_block);
    }

    fn normalize_to(&mut self, scalar: cranelift_codegen::ir::Type, v: Value) -> Value {
        let vty = self.value_type(v);
        if vty == scalar {
            return v;
        }
        match scalar {
            I8 => self.builder.ins().ireduce(I8, v),
            I32 => self.to_i32(v),
            I64 => self.to_i64(v),
            _ => v,
        }
    }

    // write/writeln: one runtime call per argument, selected by the
    // argument type. Default widths: integer 13, real 15, anything else 0;
    // default precision for reals is -1 (the runtime chooses).
    fn lower_write(&mut self, s: &ast::StmtWrite) {
        for arg in &s.1 {
            let arg = arg.get();
            let ty = match self.expr_type(&arg.0) {
                Some(x) => x,
                None => continue,
            };
            let v = match self.lower_expr(&arg.0) {
                Some(x) => x,
                None => continue,
            };

            let ts = &self.module.semantic_context.type_system;
            let is_real = ts.is_real_type(ty);
            let is_char = ts.is_char_type(ty);
            let is_string = ts.is_string_like_type(ty) && !is_char;

            let default_width: i64 = if is_real {
                15
            } else if is_char || is_string {
                0
            } else {
                13
            };
            let width = match &arg.1 {
                Some(w) => {
                    let wv = self.lower_expr(w);
                    match wv {
                        Some(wv) => self.to_i32(wv),
                        None => continue,
                    }
                }
                None => self.builder.ins().iconst(I32, default_width),
            };

            if is_real {
                let precision = match &arg.2 {
                    Some(p) => {
                        let pv = self.lower_expr(p);
                        match pv {
                            Some(pv) => self.to_i32(pv),
                            None => continue,
                        }
                    }
                    None => self.builder.ins().iconst(I32, i64::from(-1i32 as u32)),
                };
                let f = self.module.rt_write_real();
                let fref = self.func_ref(f);
                self.builder.ins().call(fref, &[v, width, precision]);
            } else if is_char {
                let f = self.module.rt_write_char();
                let fref = self.func_ref(f);
                self.builder.ins().call(fref, &[v, width]);
            } else if is_string {
                let f = self.module.rt_write_str();
                let fref = self.func_ref(f);
                self.builder.ins().call(fref, &[v, width]);
            } else {
                let v = self.to_i32(v);
                let f = self.module.rt_write_int();
                let fref = self.func_ref(f);
                self.builder.ins().call(fref, &[v, width]);
            }
        }
        if s.0 {
            let f = self.module.rt_write_nl();
            let fref = self.func_ref(f);
            self.builder.ins().call(fref, &[]);
        }
    }

    // read/readln: the arguments are lowered to addresses and handed to
    // the typed runtime readers.
    fn lower_read(&mut self, s: &ast::StmtRead) {
        for arg in &s.1 {
            let ty = match self.expr_type(arg) {
                Some(x) => x,
                None => continue,
            };
            let addr = match self.lower_addr(arg) {
                Some(x) => x,
                None => continue,
            };
            let ts = &self.module.semantic_context.type_system;
            let f = if ts.is_real_type(ty) {
                self.module.rt_read_real()
            } else if ts.is_char_type(ty) {
                self.module.rt_read_chr()
            } else {
                self.module.rt_read_int()
            };
            let fref = self.func_ref(f);
            self.builder.ins().call(fref, &[addr]);
        }
        if s.0 {
            let f = self.module.rt_read_nl();
            let fref = self.func_ref(f);
            self.builder.ins().call(fref, &[]);
        }
    }

    // Calls.

    /// Lowers a user call. Builtins dispatch through the intrinsic table;
    /// otherwise the callee must be a known function and the argument
    /// count must match the prototype. By-reference arguments are lowered
    /// through the address contract, everything else by value.
    pub fn lower_call(
        &mut self,
        name: &str,
        args: &[span::SpannedBox<ast::Expr>],
        loc: &span::SpanLoc,
    ) -> Option<Value> {
        if builtin::is_builtin(name) {
            return builtin::lower(self, name, args);
        }

        let info = match self.module.get_function_info(name) {
            Some(x) => x.clone(),
            None => {
                self.error(*loc, format!("Unknown function {} referenced", name));
                return None;
            }
        };
        if info.params.len() != args.len() {
            self.error(
                *loc,
                format!("Incorrect number of arguments for {}.", name),
            );
            return None;
        }

        let mut lowered_args = vec![];
        for (param, arg) in info.params.iter().zip(args.iter()) {
            let v = if param.by_ref {
                if !arg.get().is_lvalue() {
                    self.error(
                        *arg.loc(),
                        "Args declared with 'var' must be a variable!".to_string(),
                    );
                    return None;
                }
                self.lower_addr(arg)?
            } else {
                let v = self.lower_expr(arg)?;
                self.convert_for_store(v, param.ty)
            };
            lowered_args.push(v);
        }

        let fref = self.func_ref(info.func_id);
        let call = self.builder.ins().call(fref, &lowered_args);
        if info.result.is_some() {
            Some(self.builder.inst_results(call)[0])
        } else {
            None
        }
    }

    // Expressions.

    pub fn lower_expr(&mut self, e: &span::SpannedBox<ast::Expr>) -> Option<Value> {
        let loc = *e.loc();
        match e.get() {
            ast::Expr::Const(c) => Some(self.lower_const(c.0.get())),
            ast::Expr::Nil(..) => {
                let pointer_type = self.module.pointer_type;
                Some(self.builder.ins().iconst(pointer_type, 0))
            }
            ast::Expr::Variable(v) => {
                let name = v.0.get().clone();
                // An enumerated value is a constant of its ordinal.
                if let Some(ev) = self.module.semantic_context.registry.find_enum_value(&name)
                {
                    let ty = self.expr_type(e)?;
                    let scalar = self.module.scalar_type(ty).unwrap_or(I32);
                    return Some(self.builder.ins().iconst(scalar, ev.value));
                }
                let ty = self.expr_type(e)?;
                let addr = self.lower_addr(e)?;
                match self.module.scalar_type(ty) {
                    Some(scalar) => Some(self.load_scalar(addr, scalar)),
                    None => Some(addr),
                }
            }
            ast::Expr::Deref(..) | ast::Expr::ArrayAccess(..) | ast::Expr::FieldAccess(..) => {
                let ty = self.expr_type(e)?;
                let addr = self.lower_addr(e)?;
                match self.module.scalar_type(ty) {
                    Some(scalar) => Some(self.load_scalar(addr, scalar)),
                    None => Some(addr),
                }
            }
            ast::Expr::Call(c) => {
                let result = self.lower_call(c.0.get(), &c.1, c.0.loc());
                if result.is_none() {
                    // A void callee has no result to name.
                    return None;
                }
                result
            }
            ast::Expr::BinOp(b) => self.lower_binop(b, &loc),
            ast::Expr::UnOp(u) => self.lower_unop(u, &loc),
            ast::Expr::Range(..) => {
                unreachable!("range expressions only appear inside set literals")
            }
            ast::Expr::SetLiteral(s) => {
                let ty = self.expr_type(e)?;
                self.lower_set_literal(s, ty)
            }
            ast::Expr::Parentheses(p) => self.lower_expr(&p.0),
        }
    }

    fn lower_const(&mut self, c: &Constant) -> Value {
        match c {
            Constant::Integer(v) => self.builder.ins().iconst(I32, *v),
            Constant::Real(v) => self.builder.ins().f64const(*v),
            Constant::Bool(v) => self.builder.ins().iconst(I8, *v as i64),
            Constant::Char(v) => self.builder.ins().iconst(I8, *v as i64),
            Constant::String(s) => {
                let data_id = self.module.string_literal_data(s);
                self.global_addr(data_id)
            }
        }
    }

    /// The address contract: computes the storage address of any lvalue
    /// (variable, pointer dereference, array element, field access).
    pub fn lower_addr(&mut self, e: &span::SpannedBox<ast::Expr>) -> Option<Value> {
        match e.get() {
            ast::Expr::Variable(v) => {
                let name = v.0.get();
                match self.module.env.find(name) {
                    Some(location) => Some(self.location_addr(location)),
                    None => {
                        let loc = *e.loc();
                        let n = name.clone();
                        self.error(loc, format!("Unknown variable name '{}'", n));
                        None
                    }
                }
            }
            // The address of a dereference is the pointer value itself.
            ast::Expr::Deref(d) => self.lower_expr(&d.0),
            ast::Expr::ArrayAccess(a) => self.lower_array_element_addr(a),
            ast::Expr::FieldAccess(f) => self.lower_field_addr(f, e.loc()),
            ast::Expr::Parentheses(p) => self.lower_addr(&p.0),
            _ => {
                let loc = *e.loc();
                self.error(loc, "cannot take the address of this expression".to_string());
                None
            }
        }
    }

    /// Element address of a (possibly multi-dimensional) array: for each
    /// index `i[k]` with range `[lo_k, hi_k]` and element stride `s_k`,
    /// the linear element index is the sum of `(i[k] - lo_k) * s_k`; the
    /// byte address adds the scaled linear index to the array base.
    fn lower_array_element_addr(&mut self, a: &ast::ExprArrayAccess) -> Option<Value> {
        let base_ty = self.expr_type(&a.0)?;
        let base_addr = self.lower_addr(&a.0)?;

        let ts = &self.module.semantic_context.type_system;
        let ranges = ts.array_ranges(base_ty).to_vec();
        let strides = ts.array_strides(base_ty);
        let element = ts.get_sub_type(base_ty).unwrap();
        let element_size = ts.size_bytes(element);

        let mut linear: Option<Value> = None;
        for ((index, range), stride) in a.1.iter().zip(ranges.iter()).zip(strides.iter()) {
            let iv = self.lower_expr(index)?;
            let iv = self.to_i64(iv);
            let shifted = self.builder.ins().iadd_imm(iv, -(range.start() as i64));
            let scaled = self.builder.ins().imul_imm(shifted, *stride as i64);
            linear = Some(match linear {
                Some(acc) => self.builder.ins().iadd(acc, scaled),
                None => scaled,
            });
        }
        let linear = linear?;
        let byte_offset = self.builder.ins().imul_imm(linear, element_size as i64);
        Some(self.builder.ins().iadd(base_addr, byte_offset))
    }

    fn lower_field_addr(
        &mut self,
        f: &ast::ExprFieldAccess,
        loc: &span::SpanLoc,
    ) -> Option<Value> {
        let base_ty = self.expr_type(&f.0)?;
        let base_addr = self.lower_addr(&f.0)?;
        let ts = &self.module.semantic_context.type_system;
        let field_name = f.1.get();

        if ts.is_record_type(base_ty) {
            if let Some(idx) = ts.record_field_index(base_ty, field_name) {
                let offset = ts.record_field_offset(base_ty, idx);
                return Some(self.builder.ins().iadd_imm(base_addr, offset as i64));
            }
            // All variant fields overlap at the variant offset.
            if let Some(variant) = ts.record_variant(base_ty) {
                if ts.record_field_index(variant, field_name).is_some() {
                    let offset = ts.record_variant_offset(base_ty);
                    return Some(self.builder.ins().iadd_imm(base_addr, offset as i64));
                }
            }
        }
        self.error(
            *loc,
            format!("no field named '{}' in this record", field_name),
        );
        None
    }

    fn lower_unop(&mut self, u: &ast::ExprUnOp, loc: &span::SpanLoc) -> Option<Value> {
        let v = self.lower_expr(&u.1)?;
        match u.0.get() {
            ast::UnaryOp::Plus => Some(v),
            ast::UnaryOp::Minus => {
                if self.value_type(v) == F64 {
                    Some(self.builder.ins().fneg(v))
                } else {
                    Some(self.builder.ins().ineg(v))
                }
            }
            ast::UnaryOp::LogicalNot => {
                let _ = loc;
                Some(self.builder.ins().icmp_imm(IntCC::Equal, v, 0))
            }
        }
    }

    fn lower_binop(&mut self, b: &ast::ExprBinOp, loc: &span::SpanLoc) -> Option<Value> {
        let op = *b.0.get();
        let lty = self.expr_type(&b.1)?;
        let rty = self.expr_type(&b.2)?;
        let ts = &self.module.semantic_context.type_system;

        if op == ast::BinOperator::InSet {
            return self.lower_in_set(b);
        }
        if ts.is_set_type(lty) && ts.is_set_type(rty) {
            return self.lower_set_binop(op, b, lty, rty, loc);
        }
        // Concatenating two chars materialises a small string value.
        if op == ast::BinOperator::Addition && ts.is_char_type(lty) && ts.is_char_type(rty) {
            let l = self.lower_expr(&b.1)?;
            let r = self.lower_expr(&b.2)?;
            let slot = self.create_slot(3, 1);
            let pointer_type = self.module.pointer_type;
            let addr = self.builder.ins().stack_addr(pointer_type, slot, 0);
            self.builder.ins().store(MemFlags::new(), l, addr, 0);
            self.builder.ins().store(MemFlags::new(), r, addr, 1);
            let nul = self.builder.ins().iconst(I8, 0);
            self.builder.ins().store(MemFlags::new(), nul, addr, 2);
            return Some(addr);
        }

        let mut l = self.lower_expr(&b.1)?;
        let mut r = self.lower_expr(&b.2)?;

        // Widen an integer operand when the other one is a double.
        if self.value_type(l) == F64 && self.value_type(r) != F64 {
            r = self.builder.ins().fcvt_from_sint(F64, r);
        } else if self.value_type(r) == F64 && self.value_type(l) != F64 {
            l = self.builder.ins().fcvt_from_sint(F64, l);
        } else if self.value_type(l) == I64 && self.value_type(r) == I32 {
            r = self.builder.ins().sextend(I64, r);
        } else if self.value_type(r) == I64 && self.value_type(l) == I32 {
            l = self.builder.ins().sextend(I64, l);
        }

        let vty = self.value_type(l);
        assert_eq!(
            vty,
            self.value_type(r),
            "operand types must match after widening"
        );

        if vty == F64 {
            let v = match op {
                ast::BinOperator::Addition => self.builder.ins().fadd(l, r),
                ast::BinOperator::Subtraction => self.builder.ins().fsub(l, r),
                ast::BinOperator::Multiplication => self.builder.ins().fmul(l, r),
                ast::BinOperator::RealDivision => self.builder.ins().fdiv(l, r),
                ast::BinOperator::Equal => self.builder.ins().fcmp(FloatCC::Equal, l, r),
                ast::BinOperator::NotEqual => {
                    self.builder.ins().fcmp(FloatCC::OrderedNotEqual, l, r)
                }
                ast::BinOperator::LessThan => self.builder.ins().fcmp(FloatCC::LessThan, l, r),
                ast::BinOperator::LessOrEqual => {
                    self.builder.ins().fcmp(FloatCC::LessThanOrEqual, l, r)
                }
                ast::BinOperator::GreaterThan => {
                    self.builder.ins().fcmp(FloatCC::GreaterThan, l, r)
                }
                ast::BinOperator::GreaterOrEqual => {
                    self.builder.ins().fcmp(FloatCC::GreaterThanOrEqual, l, r)
                }
                _ => unreachable!("operator '{}' cannot be applied to reals", op),
            };
            return Some(v);
        }

        let v = match op {
            ast::BinOperator::Addition => self.builder.ins().iadd(l, r),
            ast::BinOperator::Subtraction => self.builder.ins().isub(l, r),
            ast::BinOperator::Multiplication => self.builder.ins().imul(l, r),
            ast::BinOperator::RealDivision | ast::BinOperator::IntegerDivision => {
                self.builder.ins().sdiv(l, r)
            }
            ast::BinOperator::Modulo => self.builder.ins().srem(l, r),
            ast::BinOperator::LogicalAnd => self.builder.ins().band(l, r),
            ast::BinOperator::LogicalOr => self.builder.ins().bor(l, r),
            ast::BinOperator::Equal => self.builder.ins().icmp(IntCC::Equal, l, r),
            ast::BinOperator::NotEqual => self.builder.ins().icmp(IntCC::NotEqual, l, r),
            ast::BinOperator::LessThan => self.builder.ins().icmp(IntCC::SignedLessThan, l, r),
            ast::BinOperator::LessOrEqual => {
                self.builder.ins().icmp(IntCC::SignedLessThanOrEqual, l, r)
            }
            ast::BinOperator::GreaterThan => {
                self.builder.ins().icmp(IntCC::SignedGreaterThan, l, r)
            }
            ast::BinOperator::GreaterOrEqual => self
                .builder
                .ins()
                .icmp(IntCC::SignedGreaterThanOrEqual, l, r),
            ast::BinOperator::InSet => unreachable!("handled above"),
        };
        Some(v)
    }

    // Sets are bit arrays of 32-bit words.

    /// Membership test: load the word of the element, shift the bit down
    /// and mask it.
    fn lower_in_set(&mut self, b: &ast::ExprBinOp) -> Option<Value> {
        let set_ty = self.expr_type(&b.2)?;
        let v = self.lower_expr(&b.1)?;
        let set_addr = self.lower_expr(&b.2)?;

        let range = self
            .module
            .semantic_context
            .type_system
            .set_range(set_ty)
            .expect("set range must be known after analysis");

        let v = self.to_i32(v);
        let shifted = self.builder.ins().iadd_imm(v, -(range.start() as i64));
        let word_index = self.builder.ins().ushr_imm(shifted, 5);
        let word_index = self.builder.ins().uextend(I64, word_index);
        let byte_offset = self.builder.ins().imul_imm(word_index, 4);
        let word_addr = self.builder.ins().iadd(set_addr, byte_offset);
        let word = self.load_scalar(word_addr, I32);
        let bit_index = self.builder.ins().band_imm(shifted, 31);
        let shifted_word = self.builder.ins().ushr(word, bit_index);
        let bit = self.builder.ins().band_imm(shifted_word, 1);
        Some(self.builder.ins().icmp_imm(IntCC::NotEqual, bit, 0))
    }

    /// Builds a set value in a stack slot: zeroed words, then one bit OR
    /// per element (ranges loop from their lower to their upper bound).
    fn lower_set_literal(&mut self, s: &ast::ExprSetLiteral, ty: TypeId) -> Option<Value> {
        let ts = &self.module.semantic_context.type_system;
        let range = ts.set_range(ty);
        let words = match range {
            Some(r) => ((r.size() as u32) + 31) / 32,
            None => 1, // an empty literal never used against a known set
        };
        let start = range.map(|r| r.start()).unwrap_or(0);

        let slot = self.create_slot(words as u64 * 4, 4);
        let pointer_type = self.module.pointer_type;
        let addr = self.builder.ins().stack_addr(pointer_type, slot, 0);

        let zero = self.builder.ins().iconst(I32, 0);
        for w in 0..words {
            self.builder
                .ins()
                .store(MemFlags::trusted(), zero, addr, (w * 4) as i32);
        }

        for elem in &s.0 {
            match elem.get() {
                ast::Expr::Range(r) => {
                    let lo = self.lower_expr(&r.0)?;
                    let hi = self.lower_expr(&r.1)?;
                    let lo = self.to_i32(lo);
                    let hi = self.to_i32(hi);

                    // A small counting loop over the range.
                    let counter = self.create_slot(4, 4);
                    let counter_addr = self.builder.ins().stack_addr(pointer_type, counter, 0);
                    self.store_scalar(counter_addr, lo);

                    let head_block = self.builder.create_block();
                    let body_block = self.builder.create_block();
                    let after_block = self.builder.create_block();

                    self.builder.ins().jump(head_block, &[]);
                    self.builder.switch_to_block(head_block);
                    let current = self.load_scalar(counter_addr, I32);
                    let done = self
                        .builder
                        .ins()
                        .icmp(IntCC::SignedGreaterThan, current, hi);
                    self.builder
                        .ins()
                        .brif(done, after_block, &[], body_block, &[]);

                    self.builder.switch_to_block(body_block);
                    self.set_insert_bit(addr, start, current);
                    let next = self.builder.ins().iadd_imm(current, 1);
                    self.store_scalar(counter_addr, next);
                    self.builder.ins().jump(head_block, &[]);

                    self.builder.switch_to_block(after_block);
                }
                _ => {
                    let v = self.lower_expr(elem)?;
                    let v = self.to_i32(v);
                    self.set_insert_bit(addr, start, v);
                }
            }
        }

        Some(addr)
    }

    fn set_insert_bit(&mut self, set_addr: Value, range_start: i32, v: Value) {
        let shifted = self.builder.ins().iadd_imm(v, -(range_start as i64));
        let word_index = self.builder.ins().ushr_imm(shifted, 5);
        let word_index = self.builder.ins().uextend(I64, word_index);
        let byte_offset = self.builder.ins().imul_imm(word_index, 4);
        let word_addr = self.builder.ins().iadd(set_addr, byte_offset);
        let word = self.load_scalar(word_addr, I32);
        let one = self.builder.ins().iconst(I32, 1);
        let bit_index = self.builder.ins().band_imm(shifted, 31);
        let bit = self.builder.ins().ishl(one, bit_index);
        let new_word = self.builder.ins().bor(word, bit);
        self.store_scalar(word_addr, new_word);
    }

    /// Word-wise set operations: union, intersection, difference and the
    /// two equality comparisons.
    fn lower_set_binop(
        &mut self,
        op: ast::BinOperator,
        b: &ast::ExprBinOp,
        lty: TypeId,
        rty: TypeId,
        loc: &span::SpanLoc,
    ) -> Option<Value> {
        let laddr = self.lower_expr(&b.1)?;
        let raddr = self.lower_expr(&b.2)?;

        let ts = &self.module.semantic_context.type_system;
        let range = ts.set_range(lty).or_else(|| ts.set_range(rty));
        let words = match range {
            Some(r) => ((r.size() as u32) + 31) / 32,
            None => 0,
        };

        match op {
            ast::BinOperator::Addition
            | ast::BinOperator::Multiplication
            | ast::BinOperator::Subtraction => {
                let slot = self.create_slot(words.max(1) as u64 * 4, 4);
                let pointer_type = self.module.pointer_type;
                let result = self.builder.ins().stack_addr(pointer_type, slot, 0);
                for w in 0..words {
                    let off = (w * 4) as i32;
                    let lw = self
                        .builder
                        .ins()
                        .load(I32, MemFlags::trusted(), laddr, off);
                    let rw = self
                        .builder
                        .ins()
                        .load(I32, MemFlags::trusted(), raddr, off);
                    let res = match op {
                        ast::BinOperator::Addition => self.builder.ins().bor(lw, rw),
                        ast::BinOperator::Multiplication => self.builder.ins().band(lw, rw),
                        ast::BinOperator::Subtraction => self.builder.ins().band_not(lw, rw),
                        _ => unreachable!(),
                    };
                    self.builder
                        .ins()
                        .store(MemFlags::trusted(), res, result, off);
                }
                Some(result)
            }
            ast::BinOperator::Equal | ast::BinOperator::NotEqual => {
                let mut acc = self.builder.ins().iconst(I8, 1);
                for w in 0..words {
                    let off = (w * 4) as i32;
                    let lw = self
                        .builder
                        .ins()
                        .load(I32, MemFlags::trusted(), laddr, off);
                    let rw = self
                        .builder
                        .ins()
                        .load(I32, MemFlags::trusted(), raddr, off);
                    let eq = self.builder.ins().icmp(IntCC::Equal, lw, rw);
                    acc = self.builder.ins().band(acc, eq);
                }
                if op == ast::BinOperator::Equal {
                    Some(acc)
                } else {
                    Some(self.builder.ins().icmp_imm(IntCC::Equal, acc, 0))
                }
            }
            _ => {
                self.error(
                    *loc,
                    format!("operator '{}' cannot be applied to set operands", op),
                );
                None
            }
        }
    }
}
