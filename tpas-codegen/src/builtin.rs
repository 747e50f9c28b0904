use tpas_frontend::ast;
use tpas_frontend::span::SpannedBox;

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::types::{F64, I8, I32};
use cranelift_codegen::ir::{InstBuilder, Value};

use crate::function::FunctionLowering;

/// An intrinsic lowering: builder state, the intrinsic's arguments, one
/// value out.
pub type BuiltinLowering =
    fn(&mut FunctionLowering<'_, '_, '_>, &[SpannedBox<ast::Expr>]) -> Option<Value>;

/// Name-indexed dispatch table. Call lowering consults `is_builtin` before
/// resolving a user function.
const BUILTINS: &[(&str, BuiltinLowering)] = &[
    ("abs", lower_abs),
    ("odd", lower_odd),
    ("ord", lower_ord),
    ("chr", lower_chr),
    ("succ", lower_succ),
    ("pred", lower_pred),
];

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.iter().any(|(n, _)| *n == name)
}

pub fn lower(
    fl: &mut FunctionLowering<'_, '_, '_>,
    name: &str,
    args: &[SpannedBox<ast::Expr>],
) -> Option<Value> {
    let (_, f) = BUILTINS.iter().find(|(n, _)| *n == name)?;
    f(fl, args)
}

fn single_arg(
    fl: &mut FunctionLowering<'_, '_, '_>,
    args: &[SpannedBox<ast::Expr>],
) -> Option<Value> {
    if args.len() != 1 {
        return None;
    }
    fl.lower_expr(&args[0])
}

fn lower_abs(fl: &mut FunctionLowering<'_, '_, '_>, args: &[SpannedBox<ast::Expr>]) -> Option<Value> {
    let v = single_arg(fl, args)?;
    if fl.value_type(v) == F64 {
        return Some(fl.builder.ins().fabs(v));
    }
    let negated = fl.builder.ins().ineg(v);
    let is_negative = fl.builder.ins().icmp_imm(IntCC::SignedLessThan, v, 0);
    Some(fl.builder.ins().select(is_negative, negated, v))
}

fn lower_odd(fl: &mut FunctionLowering<'_, '_, '_>, args: &[SpannedBox<ast::Expr>]) -> Option<Value> {
    let v = single_arg(fl, args)?;
    let low_bit = fl.builder.ins().band_imm(v, 1);
    Some(fl.builder.ins().icmp_imm(IntCC::NotEqual, low_bit, 0))
}

fn lower_ord(fl: &mut FunctionLowering<'_, '_, '_>, args: &[SpannedBox<ast::Expr>]) -> Option<Value> {
    let v = single_arg(fl, args)?;
    Some(fl.to_i32(v))
}

fn lower_chr(fl: &mut FunctionLowering<'_, '_, '_>, args: &[SpannedBox<ast::Expr>]) -> Option<Value> {
    let v = single_arg(fl, args)?;
    if fl.value_type(v) == I8 {
        return Some(v);
    }
    let v = if fl.value_type(v) == I32 {
        v
    } else {
        fl.to_i32(v)
    };
    Some(fl.builder.ins().ireduce(I8, v))
}

fn lower_succ(fl: &mut FunctionLowering<'_, '_, '_>, args: &[SpannedBox<ast::Expr>]) -> Option<Value> {
    let v = single_arg(fl, args)?;
    Some(fl.builder.ins().iadd_imm(v, 1))
}

fn lower_pred(fl: &mut FunctionLowering<'_, '_, '_>, args: &[SpannedBox<ast::Expr>]) -> Option<Value> {
    let v = single_arg(fl, args)?;
    Some(fl.builder.ins().iadd_imm(v, -1))
}
