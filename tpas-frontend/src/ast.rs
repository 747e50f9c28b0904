// AST for the Pascal-like input language. The parser builds these nodes and
// the semantic analyser decorates them through side tables keyed by SpanId.
use crate::constant::Constant;
use crate::span::{Spanned, SpannedBox};
use std::fmt;

#[derive(Debug)]
pub struct Program(pub Spanned<String>, pub SpannedBox<Block>);

#[derive(Debug)]
pub struct Block(
    pub Option<SpannedBox<TypeDefinitionPart>>,
    pub Option<SpannedBox<VariableDeclarationPart>>,
    pub Vec<SpannedBox<ProcedureDeclaration>>,
    pub SpannedBox<Stmt>,
);

// Type definitions.

#[derive(Debug)]
pub struct TypeDefinitionPart(pub Vec<SpannedBox<TypeDefinition>>);

#[derive(Debug)]
pub struct TypeDefinition(pub Spanned<String>, pub SpannedBox<TypeDenoter>);

#[derive(Debug)]
pub struct TypeIdentifier(pub Spanned<String>);
#[derive(Debug)]
pub struct EnumeratedType(pub Vec<Spanned<String>>);
#[derive(Debug)]
pub struct SubrangeType(pub SpannedBox<Const>, pub SpannedBox<Const>);
#[derive(Debug)]
pub struct ArrayType(
    pub Vec<SpannedBox<TypeDenoter>>,
    pub SpannedBox<TypeDenoter>,
);
#[derive(Debug)]
pub struct RecordSection(pub Vec<Spanned<String>>, pub SpannedBox<TypeDenoter>);
#[derive(Debug)]
pub struct VariantCase(
    pub Vec<SpannedBox<Const>>,
    pub Vec<SpannedBox<RecordSection>>,
);
#[derive(Debug)]
pub struct VariantPart(
    pub Option<Spanned<String>>,
    pub SpannedBox<TypeDenoter>,
    pub Vec<SpannedBox<VariantCase>>,
);
#[derive(Debug)]
pub struct RecordType(
    pub Vec<SpannedBox<RecordSection>>,
    pub Option<SpannedBox<VariantPart>>,
);
#[derive(Debug)]
pub struct SetType(pub SpannedBox<TypeDenoter>);
#[derive(Debug)]
pub struct FileType(pub SpannedBox<TypeDenoter>);
// The pointee of a pointer type is always a type name so it can be forward
// declared and fixed up later.
#[derive(Debug)]
pub struct PointerType(pub Spanned<String>);

#[derive(Debug)]
pub enum TypeDenoter {
    TypeIdentifier(TypeIdentifier),
    EnumeratedType(EnumeratedType),
    SubrangeType(SubrangeType),
    ArrayType(ArrayType),
    RecordType(RecordType),
    SetType(SetType),
    FileType(FileType),
    PointerType(PointerType),
}

// Constants usable in type denoters (subrange bounds, variant case labels).

#[derive(Debug)]
pub struct ConstInteger(pub Spanned<i64>);
#[derive(Debug)]
pub struct ConstChar(pub Spanned<char>);
#[derive(Debug)]
pub struct ConstNamed(pub Spanned<String>);

#[derive(Debug)]
pub enum Const {
    Integer(ConstInteger),
    Char(ConstChar),
    Named(ConstNamed),
}

// Variable declarations.

#[derive(Debug)]
pub struct VariableDeclarationPart(pub Vec<SpannedBox<VariableDeclaration>>);

#[derive(Debug)]
pub struct VariableDeclaration(pub Vec<Spanned<String>>, pub SpannedBox<TypeDenoter>);

// Procedures and functions.

#[derive(Debug)]
pub struct FormalParameterValue(pub Vec<Spanned<String>>, pub SpannedBox<TypeIdentifier>);
#[derive(Debug)]
pub struct FormalParameterVariable(pub Vec<Spanned<String>>, pub SpannedBox<TypeIdentifier>);

#[derive(Debug)]
pub enum FormalParameter {
    Value(FormalParameterValue),
    Variable(FormalParameterVariable),
}

#[derive(Debug)]
pub struct FunctionBody(
    pub Option<SpannedBox<VariableDeclarationPart>>,
    pub SpannedBox<Stmt>,
);

#[derive(Debug)]
pub struct ProcedureForward(
    pub Spanned<String>,
    pub Vec<SpannedBox<FormalParameter>>,
);
#[derive(Debug)]
pub struct ProcedureDefinition(
    pub Spanned<String>,
    pub Vec<SpannedBox<FormalParameter>>,
    pub SpannedBox<FunctionBody>,
);
#[derive(Debug)]
pub struct FunctionForward(
    pub Spanned<String>,
    pub Vec<SpannedBox<FormalParameter>>,
    pub SpannedBox<TypeIdentifier>,
);
#[derive(Debug)]
pub struct FunctionDefinition(
    pub Spanned<String>,
    pub Vec<SpannedBox<FormalParameter>>,
    pub SpannedBox<TypeIdentifier>,
    pub SpannedBox<FunctionBody>,
);

#[derive(Debug)]
pub enum ProcedureDeclaration {
    ProcedureForward(ProcedureForward),
    ProcedureDefinition(ProcedureDefinition),
    FunctionForward(FunctionForward),
    FunctionDefinition(FunctionDefinition),
}

// Statements.

#[derive(Debug)]
pub struct StmtAssignment(pub SpannedBox<Expr>, pub SpannedBox<Expr>);
#[derive(Debug)]
pub struct StmtProcedureCall(pub Spanned<String>, pub Vec<SpannedBox<Expr>>);
#[derive(Debug)]
pub struct StmtCompound(pub Vec<SpannedBox<Stmt>>);
#[derive(Debug)]
pub struct StmtIf(
    pub SpannedBox<Expr>,
    pub SpannedBox<Stmt>,
    pub Option<SpannedBox<Stmt>>,
);
#[derive(Debug)]
pub struct StmtWhileDo(pub SpannedBox<Expr>, pub SpannedBox<Stmt>);
#[derive(Debug)]
pub struct StmtRepeatUntil(pub Vec<SpannedBox<Stmt>>, pub SpannedBox<Expr>);
#[derive(Debug)]
pub struct StmtFor(
    pub ForKind,
    pub Spanned<String>,
    pub SpannedBox<Expr>,
    pub SpannedBox<Expr>,
    pub SpannedBox<Stmt>,
);

/// One argument of write/writeln: expression plus optional width and
/// precision (`e:w:p`).
#[derive(Debug)]
pub struct WriteArg(
    pub SpannedBox<Expr>,
    pub Option<SpannedBox<Expr>>,
    pub Option<SpannedBox<Expr>>,
);

#[derive(Debug)]
pub struct StmtWrite(pub bool, pub Vec<SpannedBox<WriteArg>>);
#[derive(Debug)]
pub struct StmtRead(pub bool, pub Vec<SpannedBox<Expr>>);
#[derive(Debug)]
pub struct StmtEmpty;

#[derive(Debug)]
pub enum Stmt {
    Assignment(StmtAssignment),
    ProcedureCall(StmtProcedureCall),
    Compound(StmtCompound),
    If(StmtIf),
    WhileDo(StmtWhileDo),
    RepeatUntil(StmtRepeatUntil),
    For(StmtFor),
    Write(StmtWrite),
    Read(StmtRead),
    Empty(StmtEmpty),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ForKind {
    To,
    DownTo,
}

// Expressions.

#[derive(Debug)]
pub struct ExprConst(pub Spanned<Constant>);
#[derive(Debug)]
pub struct ExprNil;
#[derive(Debug)]
pub struct ExprVariable(pub Spanned<String>);
#[derive(Debug)]
pub struct ExprDeref(pub SpannedBox<Expr>);
#[derive(Debug)]
pub struct ExprArrayAccess(pub SpannedBox<Expr>, pub Vec<SpannedBox<Expr>>);
#[derive(Debug)]
pub struct ExprFieldAccess(pub SpannedBox<Expr>, pub Spanned<String>);
#[derive(Debug)]
pub struct ExprCall(pub Spanned<String>, pub Vec<SpannedBox<Expr>>);
#[derive(Debug)]
pub struct ExprBinOp(
    pub Spanned<BinOperator>,
    pub SpannedBox<Expr>,
    pub SpannedBox<Expr>,
);
#[derive(Debug)]
pub struct ExprUnOp(pub Spanned<UnaryOp>, pub SpannedBox<Expr>);
#[derive(Debug)]
pub struct ExprRange(pub SpannedBox<Expr>, pub SpannedBox<Expr>);
#[derive(Debug)]
pub struct ExprSetLiteral(pub Vec<SpannedBox<Expr>>);
#[derive(Debug)]
pub struct ExprParentheses(pub SpannedBox<Expr>);

#[derive(Debug)]
pub enum Expr {
    Const(ExprConst),
    Nil(ExprNil),
    Variable(ExprVariable),
    Deref(ExprDeref),
    ArrayAccess(ExprArrayAccess),
    FieldAccess(ExprFieldAccess),
    Call(ExprCall),
    BinOp(ExprBinOp),
    UnOp(ExprUnOp),
    Range(ExprRange),
    SetLiteral(ExprSetLiteral),
    Parentheses(ExprParentheses),
}

impl Expr {
    /// An expression that designates storage: something the address
    /// contract applies to.
    pub fn is_lvalue(&self) -> bool {
        match self {
            Expr::Variable(..) | Expr::Deref(..) | Expr::ArrayAccess(..)
            | Expr::FieldAccess(..) => true,
            Expr::Parentheses(ExprParentheses(inner)) => inner.get().is_lvalue(),
            _ => false,
        }
    }

    pub fn is_nil(&self) -> bool {
        match self {
            Expr::Nil(..) => true,
            Expr::Parentheses(ExprParentheses(inner)) => inner.get().is_nil(),
            _ => false,
        }
    }

    /// The value of this expression if it is an integer literal, possibly
    /// behind a sign or parentheses.
    pub fn integer_literal_value(&self) -> Option<i64> {
        match self {
            Expr::Const(ExprConst(c)) => match c.get() {
                Constant::Integer(v) => Some(*v),
                _ => None,
            },
            Expr::UnOp(ExprUnOp(op, operand)) => match op.get() {
                UnaryOp::Minus => operand.get().integer_literal_value().map(|v| -v),
                UnaryOp::Plus => operand.get().integer_literal_value(),
                _ => None,
            },
            Expr::Parentheses(ExprParentheses(inner)) => inner.get().integer_literal_value(),
            _ => None,
        }
    }

    pub fn string_literal_value(&self) -> Option<&str> {
        match self {
            Expr::Const(ExprConst(c)) => match c.get() {
                Constant::String(s) => Some(s.as_str()),
                _ => None,
            },
            Expr::Parentheses(ExprParentheses(inner)) => inner.get().string_literal_value(),
            _ => None,
        }
    }

    pub fn is_empty_set_literal(&self) -> bool {
        match self {
            Expr::SetLiteral(ExprSetLiteral(elems)) => elems.is_empty(),
            Expr::Parentheses(ExprParentheses(inner)) => inner.get().is_empty_set_literal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum BinOperator {
    // Relationals
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Equal,
    NotEqual,
    InSet,
    // Additive
    Addition,
    Subtraction,
    LogicalOr,
    // Multiplicative
    Multiplication,
    RealDivision,
    IntegerDivision,
    Modulo,
    LogicalAnd,
}

impl BinOperator {
    pub fn is_relational(&self) -> bool {
        matches!(
            self,
            BinOperator::GreaterThan
                | BinOperator::GreaterOrEqual
                | BinOperator::LessThan
                | BinOperator::LessOrEqual
                | BinOperator::Equal
                | BinOperator::NotEqual
        )
    }
}

impl fmt::Display for BinOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                BinOperator::GreaterThan => ">",
                BinOperator::GreaterOrEqual => ">=",
                BinOperator::LessThan => "<",
                BinOperator::LessOrEqual => "<=",
                BinOperator::Equal => "=",
                BinOperator::NotEqual => "<>",
                BinOperator::InSet => "in",
                BinOperator::Addition => "+",
                BinOperator::Subtraction => "-",
                BinOperator::LogicalOr => "or",
                BinOperator::Multiplication => "*",
                BinOperator::RealDivision => "/",
                BinOperator::IntegerDivision => "div",
                BinOperator::Modulo => "mod",
                BinOperator::LogicalAnd => "and",
            }
        )
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum UnaryOp {
    Plus,
    Minus,
    LogicalNot,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                UnaryOp::Plus => "+",
                UnaryOp::Minus => "-",
                UnaryOp::LogicalNot => "not",
            }
        )
    }
}
