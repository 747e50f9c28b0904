use tpas_frontend::ast;
use tpas_frontend::diagnostics::Diagnostics;
use tpas_frontend::semantic::SemanticContext;
use tpas_frontend::span;
use tpas_frontend::symbol::ParameterKind;
use tpas_frontend::typesystem::TypeId;

use cranelift_codegen::ir::types::{F64, I32, I64, I8};
use cranelift_codegen::ir::{AbiParam, Function, Signature, UserFuncName};
use cranelift_codegen::isa::{CallConv, TargetFrontendConfig};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::verifier::verify_function;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{DataDescription, Linkage, Module};

use std::collections::HashMap;
use std::fmt::Write;

use crate::environment::{Environment, VarLocation};
use crate::function::FunctionLowering;
use crate::runtime::RuntimeFunctions;

#[derive(Clone)]
pub struct ParamInfo {
    pub name: String,
    pub ty: TypeId,
    pub by_ref: bool,
}

#[derive(Clone)]
pub struct FunctionInfo {
    pub func_id: cranelift_module::FuncId,
    pub params: Vec<ParamInfo>,
    pub result: Option<TypeId>,
    pub defined: bool,
}

/// Module-wide lowering state: the object module under construction, the
/// memoised runtime imports, the string literal table, the function table
/// and the global level of the variable environment.
pub struct ModuleLowering<'a> {
    pub object_module: Option<Box<cranelift_object::ObjectModule>>,
    pub ctx: cranelift_codegen::Context,
    pub semantic_context: &'a SemanticContext,
    pub diagnostics: &'a mut Diagnostics,
    pub pointer_type: cranelift_codegen::ir::Type,
    pub frontend_config: TargetFrontendConfig,
    pub rt: RuntimeFunctions,
    pub env: Environment,

    string_table: HashMap<String, cranelift_module::DataId>,
    functions: HashMap<String, FunctionInfo>,

    // Function-id to symbol name, to print readable IR.
    symbol_names: HashMap<u32, String>,
    ir_text: String,
}

impl<'a> ModuleLowering<'a> {
    pub fn new(
        target: Option<String>,
        module_name: &str,
        semantic_context: &'a SemanticContext,
        diagnostics: &'a mut Diagnostics,
    ) -> ModuleLowering<'a> {
        let mut flag_builder = settings::builder();
        flag_builder.set("is_pic", "true").unwrap();
        flag_builder.set("opt_level", "speed").unwrap();
        let target = target.unwrap_or_else(|| "x86_64-unknown-linux-gnu".to_string());
        let isa_builder = cranelift_codegen::isa::lookup_by_name(&target).unwrap();
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .unwrap();
        let pointer_type = isa.pointer_type();
        let frontend_config = isa.frontend_config();
        let object_module = cranelift_object::ObjectModule::new(
            cranelift_object::ObjectBuilder::new(
                isa,
                module_name,
                cranelift_module::default_libcall_names(),
            )
            .unwrap(),
        );

        ModuleLowering {
            object_module: Some(Box::new(object_module)),
            ctx: cranelift_codegen::Context::new(),
            semantic_context,
            diagnostics,
            pointer_type,
            frontend_config,
            rt: RuntimeFunctions::default(),
            env: Environment::new(),
            string_table: HashMap::new(),
            functions: HashMap::new(),
            symbol_names: HashMap::new(),
            ir_text: String::new(),
        }
    }

    pub fn error(&mut self, loc: span::SpanLoc, message: String) {
        self.diagnostics.error(loc, message);
    }

    pub fn ir_text(&self) -> &str {
        &self.ir_text
    }

    pub fn emit_object(&mut self) -> Vec<u8> {
        let object_product = self.object_module.take().unwrap().finish();
        object_product.emit().unwrap()
    }

    pub fn get_function_info(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.get(name)
    }

    /// The Cranelift type backing a scalar frontend type; None for
    /// aggregates, which are handled through their address.
    pub fn scalar_type(&self, ty: TypeId) -> Option<cranelift_codegen::ir::Type> {
        let ts = &self.semantic_context.type_system;
        if ts.is_subrange_type(ty) {
            return self.scalar_type(ts.get_host_type(ty));
        }
        if ts.is_integer_type(ty) || ts.is_enum_type(ty) {
            Some(I32)
        } else if ts.is_int64_type(ty) {
            Some(I64)
        } else if ts.is_real_type(ty) {
            Some(F64)
        } else if ts.is_char_type(ty) || ts.is_boolean_type(ty) {
            Some(I8)
        } else if ts.is_pointer_type(ty) || ts.is_func_ptr_type(ty) {
            Some(self.pointer_type)
        } else {
            None
        }
    }

    // Runtime imports, declared on first use and memoised.

    fn register_import(&mut self, name: &str, sig: Signature) -> cranelift_module::FuncId {
        let func_id = self
            .object_module
            .as_mut()
            .unwrap()
            .declare_function(name, Linkage::Import, &sig)
            .unwrap();
        self.symbol_names.insert(func_id.as_u32(), name.to_string());
        func_id
    }

    fn import_signature(&self, params: &[cranelift_codegen::ir::Type]) -> Signature {
        let mut sig = Signature::new(CallConv::SystemV);
        for p in params {
            sig.params.push(AbiParam::new(*p));
        }
        sig
    }

    pub fn rt_write_int(&mut self) -> cranelift_module::FuncId {
        if let Some(id) = self.rt.write_int {
            return id;
        }
        let sig = self.import_signature(&[I32, I32]);
        let id = self.register_import("__write_int", sig);
        self.rt.write_int = Some(id);
        id
    }

    pub fn rt_write_real(&mut self) -> cranelift_module::FuncId {
        if let Some(id) = self.rt.write_real {
            return id;
        }
        let sig = self.import_signature(&[F64, I32, I32]);
        let id = self.register_import("__write_real", sig);
        self.rt.write_real = Some(id);
        id
    }

    pub fn rt_write_char(&mut self) -> cranelift_module::FuncId {
        if let Some(id) = self.rt.write_char {
            return id;
        }
        let sig = self.import_signature(&[I8, I32]);
        let id = self.register_import("__write_char", sig);
        self.rt.write_char = Some(id);
        id
    }

    pub fn rt_write_str(&mut self) -> cranelift_module::FuncId {
        if let Some(id) = self.rt.write_str {
            return id;
        }
        let sig = self.import_signature(&[self.pointer_type, I32]);
        let id = self.register_import("__write_str", sig);
        self.rt.write_str = Some(id);
        id
    }

    pub fn rt_write_nl(&mut self) -> cranelift_module::FuncId {
        if let Some(id) = self.rt.write_nl {
            return id;
        }
        let sig = self.import_signature(&[]);
        let id = self.register_import("__write_nl", sig);
        self.rt.write_nl = Some(id);
        id
    }

    pub fn rt_read_int(&mut self) -> cranelift_module::FuncId {
        if let Some(id) = self.rt.read_int {
            return id;
        }
        let sig = self.import_signature(&[self.pointer_type]);
        let id = self.register_import("__read_int", sig);
        self.rt.read_int = Some(id);
        id
    }

    pub fn rt_read_real(&mut self) -> cranelift_module::FuncId {
        if let Some(id) = self.rt.read_real {
            return id;
        }
        let sig = self.import_signature(&[self.pointer_type]);
        let id = self.register_import("__read_real", sig);
        self.rt.read_real = Some(id);
        id
    }

    pub fn rt_read_chr(&mut self) -> cranelift_module::FuncId {
        if let Some(id) = self.rt.read_chr {
            return id;
        }
        let sig = self.import_signature(&[self.pointer_type]);
        let id = self.register_import("__read_chr", sig);
        self.rt.read_chr = Some(id);
        id
    }

    pub fn rt_read_nl(&mut self) -> cranelift_module::FuncId {
        if let Some(id) = self.rt.read_nl {
            return id;
        }
        let sig = self.import_signature(&[]);
        let id = self.register_import("__read_nl", sig);
        self.rt.read_nl = Some(id);
        id
    }

    /// String literals become module data, one object per distinct
    /// content, NUL terminated for the runtime.
    pub fn string_literal_data(&mut self, s: &str) -> cranelift_module::DataId {
        if let Some(data_id) = self.string_table.get(s) {
            return *data_id;
        }
        let data_id = self
            .object_module
            .as_mut()
            .unwrap()
            .declare_anonymous_data(false, false)
            .unwrap();
        let mut bytes: Vec<u8> = s.bytes().collect();
        bytes.push(0);
        let mut data_desc = DataDescription::new();
        data_desc.define(bytes.into_boxed_slice());
        self.object_module
            .as_mut()
            .unwrap()
            .define_data(data_id, &data_desc)
            .unwrap();
        self.string_table.insert(s.to_string(), data_id);
        data_id
    }

    // Program walk.

    pub fn lower_program(&mut self, program: &span::SpannedBox<ast::Program>) {
        let block = program.get().1.get();

        if let Some(vars) = &block.1 {
            self.lower_global_variables(vars.get());
        }

        for proc in &block.2 {
            self.lower_procedure_declaration(proc);
        }

        self.lower_main(&block.3);
    }

    /// File-scope variables become internally linked globals initialised
    /// to zero.
    fn lower_global_variables(&mut self, part: &ast::VariableDeclarationPart) {
        for decl in &part.0 {
            let decl = decl.get();
            for name in &decl.0 {
                let sym_id = match self.semantic_context.get_ast_symbol(name.id()) {
                    Some(x) => x,
                    None => continue,
                };
                let ty = match self.semantic_context.get_symbol(sym_id).borrow().get_type() {
                    Some(x) => x,
                    None => continue,
                };
                let ts = &self.semantic_context.type_system;
                if ts.is_error_type(ty) {
                    continue;
                }
                let size = ts.size_bytes(ty);
                let align = ts.align_bytes(ty);

                let data_id = self
                    .object_module
                    .as_mut()
                    .unwrap()
                    .declare_anonymous_data(true, false)
                    .unwrap();
                let mut data_desc = DataDescription::new();
                data_desc.define_zeroinit(size as usize);
                data_desc.set_align(align);
                self.object_module
                    .as_mut()
                    .unwrap()
                    .define_data(data_id, &data_desc)
                    .unwrap();

                if !self.env.add(name.get(), VarLocation::Global(data_id)) {
                    let loc = *name.loc();
                    let name = name.get().clone();
                    self.error(loc, format!("Duplicate name {}!", name));
                }
            }
        }
    }

    fn lower_procedure_declaration(&mut self, proc: &span::SpannedBox<ast::ProcedureDeclaration>) {
        match proc.get() {
            ast::ProcedureDeclaration::ProcedureForward(d) => {
                self.declare_prototype(&d.0);
            }
            ast::ProcedureDeclaration::FunctionForward(d) => {
                self.declare_prototype(&d.0);
            }
            ast::ProcedureDeclaration::ProcedureDefinition(d) => {
                if let Some(info) = self.declare_prototype(&d.0) {
                    self.define_function(d.0.get(), info, &d.2);
                }
            }
            ast::ProcedureDeclaration::FunctionDefinition(d) => {
                if let Some(info) = self.declare_prototype(&d.0) {
                    self.define_function(d.0.get(), info, &d.3);
                }
            }
        }
    }

    /// Materialises a function prototype. By-reference arguments become
    /// pointers, and so do aggregate arguments passed by value (the callee
    /// copies them in). When the name is already known, the existing
    /// declaration is reused if it was a forward declaration of matching
    /// arity; anything else is a redefinition.
    fn declare_prototype(&mut self, name: &span::Spanned<String>) -> Option<FunctionInfo> {
        let sym_id = self.semantic_context.get_ast_symbol(name.id())?;
        let (formal_params, result) = {
            let sym = self.semantic_context.get_symbol(sym_id);
            let sym = sym.borrow();
            (
                sym.get_formal_parameters().unwrap_or_default(),
                sym.get_return_type(),
            )
        };

        let mut params = vec![];
        for param_id in formal_params {
            let param = self.semantic_context.get_symbol(param_id);
            let param = param.borrow();
            params.push(ParamInfo {
                name: param.get_name().clone(),
                ty: param.get_type().unwrap(),
                by_ref: param.get_parameter() == Some(ParameterKind::Variable),
            });
        }

        if let Some(existing) = self.functions.get(name.get()).cloned() {
            if existing.params.len() != params.len() {
                let loc = *name.loc();
                let n = name.get().clone();
                self.error(
                    loc,
                    format!("Change in number of arguments for function: {}", n),
                );
                return None;
            }
            return Some(existing);
        }

        let mut sig = Signature::new(CallConv::SystemV);
        for param in &params {
            if param.by_ref {
                sig.params.push(AbiParam::new(self.pointer_type));
            } else {
                match self.scalar_type(param.ty) {
                    Some(t) => sig.params.push(AbiParam::new(t)),
                    None => sig.params.push(AbiParam::new(self.pointer_type)),
                }
            }
        }
        if let Some(result) = result {
            match self.scalar_type(result) {
                Some(t) => sig.returns.push(AbiParam::new(t)),
                None => {
                    let loc = *name.loc();
                    let n = name.get().clone();
                    self.error(
                        loc,
                        format!("unsupported return type for function '{}'", n),
                    );
                    return None;
                }
            }
        }

        let func_id = self
            .object_module
            .as_mut()
            .unwrap()
            .declare_function(name.get(), Linkage::Export, &sig)
            .unwrap();
        self.symbol_names.insert(func_id.as_u32(), name.get().clone());

        let info = FunctionInfo {
            func_id,
            params,
            result,
            defined: false,
        };
        self.functions.insert(name.get().clone(), info.clone());
        Some(info)
    }

    fn signature_of(&self, info: &FunctionInfo) -> Signature {
        let mut sig = Signature::new(CallConv::SystemV);
        for param in &info.params {
            if param.by_ref {
                sig.params.push(AbiParam::new(self.pointer_type));
            } else {
                match self.scalar_type(param.ty) {
                    Some(t) => sig.params.push(AbiParam::new(t)),
                    None => sig.params.push(AbiParam::new(self.pointer_type)),
                }
            }
        }
        if let Some(result) = info.result {
            if let Some(t) = self.scalar_type(result) {
                sig.returns.push(AbiParam::new(t));
            }
        }
        sig
    }

    fn define_function(
        &mut self,
        name: &str,
        info: FunctionInfo,
        body: &span::SpannedBox<ast::FunctionBody>,
    ) {
        if info.defined {
            self.diagnostics.error(
                *body.loc(),
                format!("redefinition of function: {}", name),
            );
            return;
        }
        self.functions.get_mut(name).unwrap().defined = true;

        let sig = self.signature_of(&info);
        let mut func =
            Function::with_name_signature(UserFuncName::user(0, info.func_id.as_u32()), sig);
        let mut func_builder_ctx = FunctionBuilderContext::new();
        let builder = FunctionBuilder::new(&mut func, &mut func_builder_ctx);

        // One environment level per function compilation, dropped on every
        // path out of this routine.
        self.env.new_level();

        let mut lowering = FunctionLowering::new(self, builder);
        lowering.init_function();
        lowering.copy_in_parameters(name, &info);

        let body = body.get();
        if let Some(vars) = &body.0 {
            lowering.lower_local_variables(vars.get());
        }
        lowering.lower_stmt(&body.1);

        lowering.emit_return(name, &info);
        lowering.finish();

        self.env.drop_level();

        self.verify_and_define(name, func, info.func_id);
    }

    /// The statement part of the program becomes an exported `main`.
    fn lower_main(&mut self, statements: &span::SpannedBox<ast::Stmt>) {
        let mut sig = Signature::new(CallConv::SystemV);
        sig.returns.push(AbiParam::new(I32));
        sig.params.push(AbiParam::new(I32)); // argc
        sig.params.push(AbiParam::new(self.pointer_type)); // argv

        let func_id = self
            .object_module
            .as_mut()
            .unwrap()
            .declare_function("main", Linkage::Export, &sig)
            .unwrap();
        self.symbol_names.insert(func_id.as_u32(), "main".to_string());

        let mut func = Function::with_name_signature(UserFuncName::user(0, func_id.as_u32()), sig);
        let mut func_builder_ctx = FunctionBuilderContext::new();
        let builder = FunctionBuilder::new(&mut func, &mut func_builder_ctx);

        self.env.new_level();

        let mut lowering = FunctionLowering::new(self, builder);
        lowering.init_function();
        lowering.lower_stmt(statements);
        lowering.emit_main_return();
        lowering.finish();

        self.env.drop_level();

        self.verify_and_define("main", func, func_id);
    }

    /// The printed IR names external functions `u0:N`; substitute the
    /// declared symbol names so the dump reads like the module.
    fn apply_symbol_names(&self, text: &str) -> String {
        let mut out = text.to_string();
        let mut entries: Vec<_> = self.symbol_names.iter().collect();
        // Larger ids first so an id is never a prefix of a pending one.
        entries.sort_by_key(|(idx, _)| std::cmp::Reverse(**idx));
        for (idx, name) in entries {
            out = out.replace(&format!("u0:{}", idx), &format!("%{}", name));
        }
        out
    }

    fn verify_and_define(
        &mut self,
        name: &str,
        func: Function,
        func_id: cranelift_module::FuncId,
    ) {
        let flags = settings::Flags::new(settings::builder());
        let res = verify_function(&func, &flags);

        let _ = writeln!(self.ir_text, "; function '{}'", name);
        let text = self.apply_symbol_names(format!("{}", func.display()).trim());
        let _ = writeln!(self.ir_text, "{}", text);

        if let Err(errors) = res {
            panic!("{}", errors);
        }

        // Compiling the function runs the per-function pass set selected by
        // the flags (opt_level=speed).
        self.ctx.clear();
        self.ctx.func = func;
        self.object_module
            .as_mut()
            .unwrap()
            .define_function(func_id, &mut self.ctx)
            .unwrap();
    }
}
