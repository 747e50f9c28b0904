use crate::ids;
use crate::span;
use crate::typesystem::TypeId;

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, Ord, PartialOrd)]
pub struct SymbolId(ids::Identifier);

impl Default for SymbolId {
    fn default() -> SymbolId {
        SymbolId(ids::new_id())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    #[default]
    None,
    // Placeholder bound after a failed lookup so the same name is only
    // diagnosed once.
    ErrorLookup,
    Variable,
    Type,
    Function,
    Procedure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterKind {
    Value,
    Variable,
}

#[derive(Debug, Default)]
struct SymbolInfo {
    name: String,
    kind: SymbolKind,
    ty: Option<TypeId>,
    def_loc: Option<span::SpanLoc>,
    defined: bool,
    parameter: Option<ParameterKind>,
    formal_parameters: Option<Vec<SymbolId>>,
    return_type: Option<TypeId>,
}

#[derive(Debug)]
pub struct Symbol {
    id: SymbolId,
    info: SymbolInfo,
}

impl Symbol {
    pub fn new() -> Symbol {
        let mut sym = Symbol {
            id: SymbolId::default(),
            info: SymbolInfo::default(),
        };
        sym.info.defined = true;
        sym
    }

    pub fn id(&self) -> SymbolId {
        self.id
    }

    pub fn get_name(&self) -> &String {
        &self.info.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.info.name = name.to_string();
    }

    pub fn get_kind(&self) -> SymbolKind {
        self.info.kind
    }

    pub fn set_kind(&mut self, kind: SymbolKind) {
        self.info.kind = kind;
    }

    pub fn get_type(&self) -> Option<TypeId> {
        self.info.ty
    }

    pub fn set_type(&mut self, ty: TypeId) {
        self.info.ty = Some(ty);
    }

    pub fn get_defining_point(&self) -> Option<span::SpanLoc> {
        self.info.def_loc
    }

    pub fn set_defining_point(&mut self, span: span::SpanLoc) {
        self.info.def_loc = Some(span);
    }

    pub fn get_name_of_kind(&self) -> Option<&str> {
        match self.get_kind() {
            SymbolKind::Variable => Some("variable"),
            SymbolKind::Type => Some("type"),
            SymbolKind::Function => Some("function"),
            SymbolKind::Procedure => Some("procedure"),
            _ => None,
        }
    }

    /// Whether the body of a function/procedure symbol has been seen. A
    /// forward declaration leaves this false until the definition arrives.
    pub fn is_defined(&self) -> bool {
        self.info.defined
    }

    pub fn set_defined(&mut self, defined: bool) {
        self.info.defined = defined
    }

    pub fn get_parameter(&self) -> Option<ParameterKind> {
        self.info.parameter
    }

    pub fn set_parameter(&mut self, kind: ParameterKind) {
        self.info.parameter = Some(kind);
    }

    pub fn set_formal_parameters(&mut self, formal_parameters: Vec<SymbolId>) {
        self.info.formal_parameters = Some(formal_parameters);
    }

    pub fn get_formal_parameters(&self) -> Option<Vec<SymbolId>> {
        self.info.formal_parameters.clone()
    }

    pub fn set_return_type(&mut self, ty: TypeId) {
        self.info.return_type = Some(ty);
    }

    pub fn get_return_type(&self) -> Option<TypeId> {
        self.info.return_type
    }
}

impl Default for Symbol {
    fn default() -> Symbol {
        Symbol::new()
    }
}

pub type SymbolMap = Rc<RefCell<SymbolMapImpl>>;
pub type SymbolRef = Rc<RefCell<Symbol>>;

#[derive(Default)]
pub struct SymbolMapImpl {
    symbols: HashMap<SymbolId, SymbolRef>,
}

impl SymbolMapImpl {
    pub fn new() -> SymbolMap {
        Rc::new(RefCell::new(SymbolMapImpl::default()))
    }

    pub fn new_symbol(&mut self, sym: Symbol) -> SymbolId {
        let new_id = sym.id();
        self.symbols
            .entry(new_id)
            .or_insert_with(|| Rc::new(RefCell::new(sym)));
        new_id
    }

    pub fn get_symbol(&self, id: SymbolId) -> SymbolRef {
        self.symbols.get(&id).unwrap().clone()
    }
}
