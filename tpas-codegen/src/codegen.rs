use tpas_frontend::ast;
use tpas_frontend::diagnostics::Diagnostics;
use tpas_frontend::semantic::SemanticContext;
use tpas_frontend::span;

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::module::ModuleLowering;

/// Lowers the checked program into an object file.
pub fn codegen(
    target: Option<String>,
    program: &span::SpannedBox<ast::Program>,
    semantic_context: &SemanticContext,
    diagnostics: &mut Diagnostics,
    object_filename: &Path,
) {
    let mut lowering = ModuleLowering::new(
        target,
        program.get().0.get(),
        semantic_context,
        diagnostics,
    );
    lowering.lower_program(program);
    if lowering.diagnostics.num_error() > 0 {
        return;
    }

    let bytes = lowering.emit_object();
    let mut file = File::create(object_filename).unwrap();
    file.write_all(&bytes).unwrap();
}

/// Lowers the checked program and returns the textual IR of every
/// function, for the ir-dump driver mode and the tests.
pub fn emit_ir(
    target: Option<String>,
    program: &span::SpannedBox<ast::Program>,
    semantic_context: &SemanticContext,
    diagnostics: &mut Diagnostics,
) -> String {
    let mut lowering = ModuleLowering::new(
        target,
        program.get().0.get(),
        semantic_context,
        diagnostics,
    );
    lowering.lower_program(program);
    lowering.ir_text().to_string()
}
