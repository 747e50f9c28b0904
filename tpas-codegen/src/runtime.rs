/// Runtime helpers used by read/write lowering. Each one is declared in
/// the module the first time it is needed and memoised here; the names and
/// signatures are a stable ABI shared with the runtime library:
///
///   __write_int(i32 value, i32 width)
///   __write_real(f64 value, i32 width, i32 precision)   precision -1 = default
///   __write_char(i8 value, i32 width)
///   __write_str(i8* value, i32 width)
///   __write_nl()
///   __read_int(i32*)  __read_real(f64*)  __read_chr(i8*)  __read_nl()
#[derive(Default)]
pub struct RuntimeFunctions {
    pub write_int: Option<cranelift_module::FuncId>,
    pub write_real: Option<cranelift_module::FuncId>,
    pub write_char: Option<cranelift_module::FuncId>,
    pub write_str: Option<cranelift_module::FuncId>,
    pub write_nl: Option<cranelift_module::FuncId>,
    pub read_int: Option<cranelift_module::FuncId>,
    pub read_real: Option<cranelift_module::FuncId>,
    pub read_chr: Option<cranelift_module::FuncId>,
    pub read_nl: Option<cranelift_module::FuncId>,
}
