use crate::diagnostics::Diagnostics;
use crate::scope::ScopedMap;
use crate::span::SpanLoc;

use std::fmt;

// Set representation limits. Must match the runtime.
pub const MAX_SET_WORDS: u32 = 16;
pub const SET_BITS: u32 = 32;
pub const MAX_SET_SIZE: u32 = MAX_SET_WORDS * SET_BITS;

/// Closed interval `[start, end]` over the signed 32-bit integers. A
/// one-element range (`start == end`) is legal.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Range {
    start: i32,
    end: i32,
}

impl Range {
    pub fn new(start: i32, end: i32) -> Range {
        assert!(end >= start, "range ends before it starts");
        Range { start, end }
    }

    pub fn start(&self) -> i32 {
        self.start
    }

    pub fn end(&self) -> i32 {
        self.end
    }

    pub fn size(&self) -> u64 {
        (self.end as i64 - self.start as i64) as u64 + 1
    }

    pub fn contains(&self, v: i64) -> bool {
        self.start as i64 <= v && v <= self.end as i64
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Stable handle of a type in the `TypeSystem` arena.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct TypeId(usize);

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: TypeId,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Parameter {
    pub ty: TypeId,
    pub by_ref: bool,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FuncSignature {
    pub params: Vec<Parameter>,
    pub result: TypeId,
}

#[derive(Debug, Clone)]
pub struct MemberFunc {
    pub name: String,
    pub signature: FuncSignature,
    pub is_static: bool,
    pub is_virtual: bool,
    pub is_override: bool,
    // Slot in the vtable. Assigned when the class is created: an override
    // reuses the slot of the overridden virtual, a new virtual appends.
    pub virt_index: Option<usize>,
}

impl MemberFunc {
    pub fn new(name: &str, signature: FuncSignature) -> MemberFunc {
        MemberFunc {
            name: name.to_string(),
            signature,
            is_static: false,
            is_virtual: false,
            is_override: false,
            virt_index: None,
        }
    }

    pub fn virtual_(mut self) -> MemberFunc {
        self.is_virtual = true;
        self
    }

    pub fn override_(mut self) -> MemberFunc {
        self.is_override = true;
        self
    }

    pub fn static_(mut self) -> MemberFunc {
        self.is_static = true;
        self
    }
}

/// A pointer either knows its pointee or still waits for the forward
/// declared type name to be fixed up.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Pointee {
    Resolved(TypeId),
    Pending(String),
}

#[derive(Debug, Clone)]
pub struct ClassInfo {
    pub name: String,
    pub base: Option<TypeId>,
    pub fields: Vec<Field>,
    pub methods: Vec<MemberFunc>,
    pub variant: Option<TypeId>,
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Error,
    Integer,
    Int64,
    Real,
    Char,
    Boolean,
    Void,
    Enum(Vec<String>),
    SubRange {
        host: TypeId,
        range: Range,
    },
    Array {
        element: TypeId,
        ranges: Vec<Range>,
    },
    // Array of char indexed [0, capacity]; slot 0 holds the length.
    String {
        range: Range,
    },
    Record {
        fields: Vec<Field>,
        variant: Option<TypeId>,
    },
    Variant {
        fields: Vec<Field>,
    },
    Class(ClassInfo),
    Pointer(Pointee),
    FuncPtr(FuncSignature),
    Function {
        result: TypeId,
    },
    Set {
        element: Option<TypeId>,
        range: Option<Range>,
    },
    File {
        element: TypeId,
    },
    Text,
}

/// Arena of type nodes. Every type is reached through a `TypeId`; the only
/// in-place mutations are the ones semantic analysis is allowed to do:
/// resolving a pending pointer pointee and filling an absent set
/// range/element.
pub struct TypeSystem {
    types: Vec<TypeKind>,

    error_type_id: TypeId,
    integer_type_id: TypeId,
    int64_type_id: TypeId,
    real_type_id: TypeId,
    char_type_id: TypeId,
    boolean_type_id: TypeId,
    void_type_id: TypeId,
    text_type_id: TypeId,
}

impl TypeSystem {
    pub fn new() -> TypeSystem {
        let mut ts = TypeSystem {
            types: vec![],
            error_type_id: TypeId(0),
            integer_type_id: TypeId(0),
            int64_type_id: TypeId(0),
            real_type_id: TypeId(0),
            char_type_id: TypeId(0),
            boolean_type_id: TypeId(0),
            void_type_id: TypeId(0),
            text_type_id: TypeId(0),
        };

        ts.error_type_id = ts.new_type(TypeKind::Error);
        ts.integer_type_id = ts.new_type(TypeKind::Integer);
        ts.int64_type_id = ts.new_type(TypeKind::Int64);
        ts.real_type_id = ts.new_type(TypeKind::Real);
        ts.char_type_id = ts.new_type(TypeKind::Char);
        ts.boolean_type_id = ts.new_type(TypeKind::Boolean);
        ts.void_type_id = ts.new_type(TypeKind::Void);
        ts.text_type_id = ts.new_type(TypeKind::Text);

        ts
    }

    pub fn new_type(&mut self, kind: TypeKind) -> TypeId {
        let id = TypeId(self.types.len());
        self.types.push(kind);
        id
    }

    pub fn get_kind(&self, id: TypeId) -> &TypeKind {
        &self.types[id.0]
    }

    // Builtins.

    pub fn get_error_type(&self) -> TypeId {
        self.error_type_id
    }
    pub fn get_integer_type(&self) -> TypeId {
        self.integer_type_id
    }
    pub fn get_int64_type(&self) -> TypeId {
        self.int64_type_id
    }
    pub fn get_real_type(&self) -> TypeId {
        self.real_type_id
    }
    pub fn get_char_type(&self) -> TypeId {
        self.char_type_id
    }
    pub fn get_boolean_type(&self) -> TypeId {
        self.boolean_type_id
    }
    pub fn get_void_type(&self) -> TypeId {
        self.void_type_id
    }
    pub fn get_text_type(&self) -> TypeId {
        self.text_type_id
    }

    // Derived type constructors.

    pub fn get_subrange_type(&mut self, host: TypeId, range: Range) -> TypeId {
        self.new_type(TypeKind::SubRange { host, range })
    }

    pub fn get_array_type(&mut self, element: TypeId, ranges: Vec<Range>) -> TypeId {
        assert!(!ranges.is_empty(), "array needs at least one range");
        self.new_type(TypeKind::Array { element, ranges })
    }

    /// String of `capacity` characters, stored as a char array over
    /// `[0, capacity]`; index 0 is reserved for the length.
    pub fn get_string_type(&mut self, capacity: u32) -> TypeId {
        assert!(capacity > 0, "zero-capacity string");
        self.new_type(TypeKind::String {
            range: Range::new(0, capacity as i32),
        })
    }

    pub fn get_record_type(&mut self, fields: Vec<Field>, variant: Option<TypeId>) -> TypeId {
        self.new_type(TypeKind::Record { fields, variant })
    }

    pub fn get_variant_type(&mut self, fields: Vec<Field>) -> TypeId {
        self.new_type(TypeKind::Variant { fields })
    }

    pub fn get_set_type(&mut self, element: Option<TypeId>, range: Option<Range>) -> TypeId {
        self.new_type(TypeKind::Set { element, range })
    }

    pub fn get_file_type(&mut self, element: TypeId) -> TypeId {
        self.new_type(TypeKind::File { element })
    }

    pub fn get_pointer_type(&mut self, pointee: TypeId) -> TypeId {
        self.new_type(TypeKind::Pointer(Pointee::Resolved(pointee)))
    }

    /// Pointer to a type that has not been declared yet. The name is
    /// resolved later by `TypeRegistry::fix_up_incomplete`.
    pub fn get_incomplete_pointer_type(&mut self, name: &str) -> TypeId {
        self.new_type(TypeKind::Pointer(Pointee::Pending(name.to_string())))
    }

    pub fn get_func_ptr_type(&mut self, signature: FuncSignature) -> TypeId {
        self.new_type(TypeKind::FuncPtr(signature))
    }

    pub fn get_function_type(&mut self, result: TypeId) -> TypeId {
        self.new_type(TypeKind::Function { result })
    }

    pub fn get_enum_type(&mut self, values: Vec<String>) -> TypeId {
        assert!(!values.is_empty(), "enum needs at least one value");
        self.new_type(TypeKind::Enum(values))
    }

    /// A class. Vtable slots are assigned here: overriding methods take the
    /// slot of the overridden base virtual, new virtuals append after the
    /// base vtable.
    pub fn get_class_type(
        &mut self,
        name: &str,
        base: Option<TypeId>,
        fields: Vec<Field>,
        mut methods: Vec<MemberFunc>,
        variant: Option<TypeId>,
    ) -> TypeId {
        let mut next_slot = base.map(|b| self.class_num_virtual_funcs(b)).unwrap_or(0);
        for m in methods.iter_mut() {
            if m.is_override {
                let base_slot =
                    base.and_then(|b| self.class_virtual_slot(b, &m.name));
                match base_slot {
                    Some(slot) => m.virt_index = Some(slot),
                    None => {
                        // Override without a base virtual introduces a slot.
                        m.virt_index = Some(next_slot);
                        next_slot += 1;
                    }
                }
            } else if m.is_virtual {
                m.virt_index = Some(next_slot);
                next_slot += 1;
            }
        }
        self.new_type(TypeKind::Class(ClassInfo {
            name: name.to_string(),
            base,
            fields,
            methods,
            variant,
        }))
    }

    // Predicates. Subranges report their host's outer kind.

    fn resolved_kind(&self, id: TypeId) -> &TypeKind {
        match self.get_kind(id) {
            TypeKind::SubRange { host, .. } => self.resolved_kind(*host),
            k => k,
        }
    }

    pub fn is_error_type(&self, id: TypeId) -> bool {
        matches!(self.get_kind(id), TypeKind::Error)
    }

    pub fn is_integer_type(&self, id: TypeId) -> bool {
        matches!(self.resolved_kind(id), TypeKind::Integer)
    }

    pub fn is_int64_type(&self, id: TypeId) -> bool {
        matches!(self.resolved_kind(id), TypeKind::Int64)
    }

    pub fn is_real_type(&self, id: TypeId) -> bool {
        matches!(self.resolved_kind(id), TypeKind::Real)
    }

    pub fn is_char_type(&self, id: TypeId) -> bool {
        matches!(self.resolved_kind(id), TypeKind::Char)
    }

    pub fn is_boolean_type(&self, id: TypeId) -> bool {
        matches!(self.resolved_kind(id), TypeKind::Boolean)
    }

    pub fn is_void_type(&self, id: TypeId) -> bool {
        matches!(self.get_kind(id), TypeKind::Void)
    }

    pub fn is_enum_type(&self, id: TypeId) -> bool {
        matches!(self.resolved_kind(id), TypeKind::Enum(..))
    }

    pub fn is_subrange_type(&self, id: TypeId) -> bool {
        matches!(self.get_kind(id), TypeKind::SubRange { .. })
    }

    pub fn get_host_type(&self, id: TypeId) -> TypeId {
        match self.get_kind(id) {
            TypeKind::SubRange { host, .. } => *host,
            _ => panic!("this type has no host type"),
        }
    }

    pub fn is_array_type(&self, id: TypeId) -> bool {
        matches!(self.get_kind(id), TypeKind::Array { .. })
    }

    pub fn is_string_type(&self, id: TypeId) -> bool {
        matches!(self.get_kind(id), TypeKind::String { .. })
    }

    pub fn is_record_type(&self, id: TypeId) -> bool {
        matches!(self.get_kind(id), TypeKind::Record { .. })
    }

    pub fn is_variant_type(&self, id: TypeId) -> bool {
        matches!(self.get_kind(id), TypeKind::Variant { .. })
    }

    pub fn is_class_type(&self, id: TypeId) -> bool {
        matches!(self.get_kind(id), TypeKind::Class(..))
    }

    pub fn is_pointer_type(&self, id: TypeId) -> bool {
        matches!(self.get_kind(id), TypeKind::Pointer(..))
    }

    pub fn is_func_ptr_type(&self, id: TypeId) -> bool {
        matches!(self.get_kind(id), TypeKind::FuncPtr(..))
    }

    pub fn is_set_type(&self, id: TypeId) -> bool {
        matches!(self.get_kind(id), TypeKind::Set { .. })
    }

    pub fn is_file_type(&self, id: TypeId) -> bool {
        matches!(self.get_kind(id), TypeKind::File { .. } | TypeKind::Text)
    }

    pub fn is_textfile_type(&self, id: TypeId) -> bool {
        matches!(self.get_kind(id), TypeKind::Text)
    }

    /// Integral types are the ones an ordinal value can be taken from.
    pub fn is_integral_type(&self, id: TypeId) -> bool {
        matches!(
            self.resolved_kind(id),
            TypeKind::Integer
                | TypeKind::Int64
                | TypeKind::Char
                | TypeKind::Boolean
                | TypeKind::Enum(..)
        )
    }

    pub fn is_compound_type(&self, id: TypeId) -> bool {
        matches!(
            self.get_kind(id),
            TypeKind::Array { .. }
                | TypeKind::String { .. }
                | TypeKind::Record { .. }
                | TypeKind::Variant { .. }
                | TypeKind::Class(..)
                | TypeKind::Pointer(..)
                | TypeKind::FuncPtr(..)
                | TypeKind::Set { .. }
                | TypeKind::File { .. }
                | TypeKind::Text
        )
    }

    pub fn is_string_like_type(&self, id: TypeId) -> bool {
        match self.get_kind(id) {
            TypeKind::Char | TypeKind::String { .. } => true,
            TypeKind::Array { element, .. } => self.is_char_type(*element),
            TypeKind::SubRange { host, .. } => self.is_string_like_type(*host),
            _ => false,
        }
    }

    pub fn is_unsigned_type(&self, id: TypeId) -> bool {
        match self.get_kind(id) {
            TypeKind::Char | TypeKind::Boolean | TypeKind::Enum(..) => true,
            TypeKind::SubRange { range, .. } => range.start() >= 0,
            _ => false,
        }
    }

    /// Width in bits of a numeric type.
    pub fn bits(&self, id: TypeId) -> u32 {
        match self.get_kind(id) {
            TypeKind::Char => 8,
            TypeKind::Boolean => 1,
            TypeKind::Integer => 32,
            TypeKind::Int64 => 64,
            TypeKind::Real => 64,
            TypeKind::Enum(..) => 32,
            TypeKind::SubRange { host, .. } => self.bits(*host),
            _ => 0,
        }
    }

    /// The representable interval of an integral (or set) type.
    pub fn get_range(&self, id: TypeId) -> Option<Range> {
        match self.get_kind(id) {
            TypeKind::Char => Some(Range::new(0, 255)),
            TypeKind::Integer => Some(Range::new(i32::MIN, i32::MAX)),
            TypeKind::Boolean => Some(Range::new(0, 1)),
            TypeKind::Enum(values) => Some(Range::new(0, values.len() as i32 - 1)),
            TypeKind::SubRange { range, .. } => Some(*range),
            TypeKind::Set { range, .. } => *range,
            TypeKind::String { range } => Some(*range),
            _ => None,
        }
    }

    /// The constituent type of a compound type: element of an array or
    /// file, pointee of a pointer, element of a set, host of a subrange,
    /// result of a function.
    pub fn get_sub_type(&self, id: TypeId) -> Option<TypeId> {
        match self.get_kind(id) {
            TypeKind::Array { element, .. } => Some(*element),
            TypeKind::String { .. } => Some(self.char_type_id),
            TypeKind::File { element } => Some(*element),
            TypeKind::Text => Some(self.char_type_id),
            TypeKind::Pointer(Pointee::Resolved(p)) => Some(*p),
            TypeKind::Pointer(Pointee::Pending(..)) => None,
            TypeKind::Set { element, .. } => *element,
            TypeKind::SubRange { host, .. } => Some(*host),
            TypeKind::Function { result } => Some(*result),
            _ => None,
        }
    }

    pub fn array_ranges(&self, id: TypeId) -> &[Range] {
        match self.get_kind(id) {
            TypeKind::Array { ranges, .. } => ranges,
            _ => panic!("not an array type"),
        }
    }

    /// Element stride per dimension, in elements: the product of the sizes
    /// of all subsequent ranges (row-major, rightmost index varies
    /// fastest).
    pub fn array_strides(&self, id: TypeId) -> Vec<u64> {
        let ranges = self.array_ranges(id);
        let mut strides = vec![0u64; ranges.len()];
        let mut acc = 1u64;
        for (i, r) in ranges.iter().enumerate().rev() {
            strides[i] = acc;
            acc *= r.size();
        }
        strides
    }

    pub fn array_element_count(&self, id: TypeId) -> u64 {
        self.array_ranges(id).iter().map(|r| r.size()).product()
    }

    // Records and classes.

    pub fn record_fields(&self, id: TypeId) -> &[Field] {
        match self.get_kind(id) {
            TypeKind::Record { fields, .. } => fields,
            TypeKind::Variant { fields } => fields,
            _ => panic!("not a record type"),
        }
    }

    pub fn record_variant(&self, id: TypeId) -> Option<TypeId> {
        match self.get_kind(id) {
            TypeKind::Record { variant, .. } => *variant,
            _ => panic!("not a record type"),
        }
    }

    pub fn record_field_index(&self, id: TypeId, name: &str) -> Option<usize> {
        self.record_fields(id).iter().position(|f| f.name == name)
    }

    pub fn class_info(&self, id: TypeId) -> &ClassInfo {
        match self.get_kind(id) {
            TypeKind::Class(info) => info,
            _ => panic!("not a class type"),
        }
    }

    /// Looks a field up through the inheritance chain. Returns the name of
    /// the class that declares the field together with the index of the
    /// field inside that class.
    pub fn class_field_lookup(&self, id: TypeId, name: &str) -> Option<(String, usize)> {
        let info = self.class_info(id);
        if let Some(idx) = info.fields.iter().position(|f| f.name == name) {
            return Some((info.name.clone(), idx));
        }
        info.base.and_then(|b| self.class_field_lookup(b, name))
    }

    pub fn class_field_count(&self, id: TypeId) -> usize {
        let info = self.class_info(id);
        info.fields.len() + info.base.map(|b| self.class_field_count(b)).unwrap_or(0)
    }

    pub fn class_member_func(&self, id: TypeId, name: &str) -> Option<&MemberFunc> {
        let info = self.class_info(id);
        if let Some(m) = info.methods.iter().find(|m| m.name == name) {
            return Some(m);
        }
        info.base.and_then(|b| self.class_member_func(b, name))
    }

    /// Number of vtable slots of a class, including the inherited ones.
    pub fn class_num_virtual_funcs(&self, id: TypeId) -> usize {
        let info = self.class_info(id);
        let base_slots = info.base.map(|b| self.class_num_virtual_funcs(b)).unwrap_or(0);
        let own_new = info
            .methods
            .iter()
            .filter(|m| m.virt_index.map(|s| s >= base_slots).unwrap_or(false))
            .count();
        base_slots + own_new
    }

    fn class_virtual_slot(&self, id: TypeId, name: &str) -> Option<usize> {
        let info = self.class_info(id);
        if let Some(m) = info.methods.iter().find(|m| m.name == name) {
            return m.virt_index;
        }
        info.base.and_then(|b| self.class_virtual_slot(b, name))
    }

    // Pointers.

    pub fn pointer_is_incomplete(&self, id: TypeId) -> bool {
        matches!(self.get_kind(id), TypeKind::Pointer(Pointee::Pending(..)))
    }

    pub fn pointer_pending_name(&self, id: TypeId) -> Option<&str> {
        match self.get_kind(id) {
            TypeKind::Pointer(Pointee::Pending(name)) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn pointer_pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.get_kind(id) {
            TypeKind::Pointer(Pointee::Resolved(p)) => Some(*p),
            _ => None,
        }
    }

    fn pointer_resolve(&mut self, id: TypeId, target: TypeId) {
        match &mut self.types[id.0] {
            TypeKind::Pointer(p) => *p = Pointee::Resolved(target),
            _ => panic!("not a pointer type"),
        }
    }

    // Sets.

    pub fn set_element(&self, id: TypeId) -> Option<TypeId> {
        match self.get_kind(id) {
            TypeKind::Set { element, .. } => *element,
            _ => panic!("not a set type"),
        }
    }

    pub fn set_range(&self, id: TypeId) -> Option<Range> {
        match self.get_kind(id) {
            TypeKind::Set { range, .. } => *range,
            _ => panic!("not a set type"),
        }
    }

    pub fn set_update_range(&mut self, id: TypeId, r: Range) {
        match &mut self.types[id.0] {
            TypeKind::Set { range, .. } => *range = Some(r),
            _ => panic!("not a set type"),
        }
    }

    pub fn set_update_element(&mut self, id: TypeId, elem: TypeId) {
        match &mut self.types[id.0] {
            TypeKind::Set { element, .. } => *element = Some(elem),
            _ => panic!("not a set type"),
        }
    }

    /// Number of 32-bit words a set over `range` occupies.
    pub fn set_words(&self, id: TypeId) -> u32 {
        let range = self.set_range(id).expect("set has no range yet");
        ((range.size() as u32) + (SET_BITS - 1)) / SET_BITS
    }

    /// Derives the range of a set from the range of its element type,
    /// clamped to `[0, MAX_SET_SIZE - 1]` when the element range is too
    /// wide to be represented.
    pub fn set_range_from_element(&self, elem: TypeId) -> Option<Range> {
        let r = self.get_range(elem)?;
        if r.size() > MAX_SET_SIZE as u64 {
            Some(Range::new(0, MAX_SET_SIZE as i32 - 1))
        } else {
            Some(r)
        }
    }

    // Structural equality.

    pub fn same_as(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        match (self.get_kind(a), self.get_kind(b)) {
            (TypeKind::Integer, TypeKind::Integer)
            | (TypeKind::Int64, TypeKind::Int64)
            | (TypeKind::Real, TypeKind::Real)
            | (TypeKind::Char, TypeKind::Char)
            | (TypeKind::Boolean, TypeKind::Boolean)
            | (TypeKind::Void, TypeKind::Void)
            | (TypeKind::Text, TypeKind::Text) => true,
            (TypeKind::Enum(v1), TypeKind::Enum(v2)) => v1 == v2,
            (
                TypeKind::SubRange {
                    host: h1,
                    range: r1,
                },
                TypeKind::SubRange {
                    host: h2,
                    range: r2,
                },
            ) => r1 == r2 && self.same_as(*h1, *h2),
            (
                TypeKind::Array {
                    element: e1,
                    ranges: r1,
                },
                TypeKind::Array {
                    element: e2,
                    ranges: r2,
                },
            ) => r1 == r2 && self.same_as(*e1, *e2),
            (TypeKind::String { range: r1 }, TypeKind::String { range: r2 }) => r1 == r2,
            (
                TypeKind::Record {
                    fields: f1,
                    variant: v1,
                },
                TypeKind::Record {
                    fields: f2,
                    variant: v2,
                },
            ) => {
                self.same_fields(f1, f2)
                    && match (v1, v2) {
                        (None, None) => true,
                        (Some(x), Some(y)) => self.same_as(*x, *y),
                        _ => false,
                    }
            }
            (TypeKind::Variant { fields: f1 }, TypeKind::Variant { fields: f2 }) => {
                self.same_fields(f1, f2)
            }
            (TypeKind::Class(c1), TypeKind::Class(c2)) => {
                c1.name == c2.name
                    && match (c1.base, c2.base) {
                        (None, None) => true,
                        (Some(x), Some(y)) => self.same_as(x, y),
                        _ => false,
                    }
                    && self.same_fields(&c1.fields, &c2.fields)
            }
            (TypeKind::Pointer(p1), TypeKind::Pointer(p2)) => match (p1, p2) {
                (Pointee::Resolved(x), Pointee::Resolved(y)) => self.same_as(*x, *y),
                (Pointee::Pending(n1), Pointee::Pending(n2)) => n1 == n2,
                _ => false,
            },
            (TypeKind::FuncPtr(s1), TypeKind::FuncPtr(s2)) => {
                s1.params.len() == s2.params.len()
                    && self.same_as(s1.result, s2.result)
                    && s1
                        .params
                        .iter()
                        .zip(s2.params.iter())
                        .all(|(p1, p2)| p1.by_ref == p2.by_ref && self.same_as(p1.ty, p2.ty))
            }
            (TypeKind::Function { result: r1 }, TypeKind::Function { result: r2 }) => {
                self.same_as(*r1, *r2)
            }
            (
                TypeKind::Set {
                    element: e1,
                    range: r1,
                },
                TypeKind::Set {
                    element: e2,
                    range: r2,
                },
            ) => {
                let elems_same = match (e1, e2) {
                    (None, None) => true,
                    (Some(x), Some(y)) => self.same_as(*x, *y),
                    _ => false,
                };
                elems_same && r1 == r2
            }
            (TypeKind::File { element: e1 }, TypeKind::File { element: e2 }) => {
                self.same_as(*e1, *e2)
            }
            _ => false,
        }
    }

    fn same_fields(&self, f1: &[Field], f2: &[Field]) -> bool {
        f1.len() == f2.len()
            && f1
                .iter()
                .zip(f2.iter())
                .all(|(a, b)| a.name == b.name && self.same_as(a.ty, b.ty))
    }

    /// Result type of a binary operation over `a` and `b`, or None when
    /// the operands are incompatible. Commutative. The operator-dependent
    /// rules (char + char, pointer vs nil, range vs literal, set
    /// inference) live in the semantic analyser.
    pub fn compatible_type(&self, a: TypeId, b: TypeId) -> Option<TypeId> {
        if self.is_error_type(a) || self.is_error_type(b) {
            return Some(self.error_type_id);
        }
        if self.same_as(a, b) {
            return Some(a);
        }

        // Numeric lattice: integer < int64 < real.
        let num_rank = |id: TypeId| {
            if self.is_integer_type(id) {
                Some(0)
            } else if self.is_int64_type(id) {
                Some(1)
            } else if self.is_real_type(id) {
                Some(2)
            } else {
                None
            }
        };
        if let (Some(ra), Some(rb)) = (num_rank(a), num_rank(b)) {
            return Some(match ra.max(rb) {
                0 => self.integer_type_id,
                1 => self.int64_type_id,
                _ => self.real_type_id,
            });
        }

        // Char against char is covered by same_as; other string-like mixes
        // meet in the canonical string type.
        if self.is_string_like_type(a) && self.is_string_like_type(b) {
            // The canonical string capacity; a fresh node is not needed for
            // the relation itself, the analyser synthesises one.
            return Some(a);
        }

        // A subrange meets its own base kind in the host type.
        if self.is_subrange_type(a) && self.base_kind_matches(a, b) {
            return Some(self.get_host_type(a));
        }
        if self.is_subrange_type(b) && self.base_kind_matches(b, a) {
            return Some(self.get_host_type(b));
        }

        None
    }

    fn base_kind_matches(&self, subrange: TypeId, other: TypeId) -> bool {
        let host = self.get_host_type(subrange);
        (self.is_integer_type(host) && self.is_integer_type(other))
            || (self.is_char_type(host) && self.is_char_type(other))
            || (self.is_boolean_type(host) && self.is_boolean_type(other))
            || (self.is_enum_type(host) && self.same_as_resolved(host, other))
    }

    fn same_as_resolved(&self, a: TypeId, b: TypeId) -> bool {
        match (self.resolved_kind(a), self.resolved_kind(b)) {
            (TypeKind::Enum(v1), TypeKind::Enum(v2)) => v1 == v2,
            _ => false,
        }
    }

    /// May a value of type `src` be stored into a location of type `dst`?
    /// Returns the type the stored value takes. Widens integer to real and
    /// integer to int64; the converse narrowings are rejected. The
    /// literal-dependent and lvalue-dependent cases (range <- literal,
    /// pointer <- nil, char array <- string literal, set propagation) live
    /// in the semantic analyser.
    pub fn assignable_type(&self, dst: TypeId, src: TypeId) -> Option<TypeId> {
        if self.is_error_type(dst) || self.is_error_type(src) {
            return Some(self.error_type_id);
        }
        if self.same_as(dst, src) {
            return Some(dst);
        }

        let src_is_intlike = self.is_integer_type(src) || self.is_int64_type(src);
        if self.is_real_type(dst) && (src_is_intlike || self.is_real_type(src)) {
            return Some(dst);
        }
        if self.is_int64_type(dst) && self.is_integer_type(src) {
            return Some(dst);
        }
        // Never a real into an integer location.
        if (self.is_integer_type(dst) || self.is_int64_type(dst)) && self.is_real_type(src) {
            return None;
        }

        // A subrange accepts its host kind (the in-range check for literals
        // is done by the analyser); the host accepts any subrange of it.
        if self.is_subrange_type(dst) && self.base_kind_matches(dst, src) {
            return Some(dst);
        }
        if self.is_subrange_type(src) && self.base_kind_matches(src, dst) {
            return Some(dst);
        }

        // Sets: element types must agree when both are known; absent
        // information is filled in by the analyser from the destination.
        if self.is_set_type(dst) && self.is_set_type(src) {
            let ok = match (self.set_element(dst), self.set_element(src)) {
                (Some(x), Some(y)) => self.same_as(x, y),
                _ => true,
            };
            return if ok { Some(dst) } else { None };
        }

        if self.is_string_type(dst) && self.is_string_like_type(src) {
            return Some(dst);
        }

        None
    }

    // Size and alignment, in target bytes.

    pub fn size_bytes(&self, id: TypeId) -> u64 {
        match self.get_kind(id) {
            TypeKind::Error | TypeKind::Void => 0,
            TypeKind::Char | TypeKind::Boolean => 1,
            TypeKind::Integer => 4,
            TypeKind::Int64 | TypeKind::Real => 8,
            TypeKind::Enum(..) => 4,
            TypeKind::SubRange { host, .. } => self.size_bytes(*host),
            TypeKind::Array { element, ranges } => {
                let elems: u64 = ranges.iter().map(|r| r.size()).product();
                self.size_bytes(*element) * elems
            }
            TypeKind::String { range } => range.size(),
            TypeKind::Record { fields, variant } => {
                let mut offset = 0u64;
                for f in fields {
                    offset = align_to(offset, self.align_bytes(f.ty));
                    offset += self.size_bytes(f.ty);
                }
                if let Some(v) = variant {
                    offset = align_to(offset, self.align_bytes(*v));
                    offset += self.size_bytes(*v);
                }
                let size = align_to(offset, self.align_bytes(id));
                size.max(1)
            }
            // The variant part overlaps all its fields at one offset.
            TypeKind::Variant { fields } => fields
                .iter()
                .map(|f| self.size_bytes(f.ty))
                .max()
                .unwrap_or(1),
            TypeKind::Class(info) => {
                let mut offset = 0u64;
                if self.class_num_virtual_funcs(id) > 0 {
                    offset = 8; // vtable pointer
                }
                offset += info.base.map(|b| self.class_fields_size(b)).unwrap_or(0);
                for f in &info.fields {
                    offset = align_to(offset, self.align_bytes(f.ty));
                    offset += self.size_bytes(f.ty);
                }
                if let Some(v) = info.variant {
                    offset = align_to(offset, self.align_bytes(v));
                    offset += self.size_bytes(v);
                }
                align_to(offset, self.align_bytes(id)).max(1)
            }
            TypeKind::Pointer(..) | TypeKind::FuncPtr(..) => 8,
            TypeKind::Function { .. } => 8,
            TypeKind::Set { range, .. } => {
                let range = range.expect("sizing a set without a range");
                let words = ((range.size() as u32) + (SET_BITS - 1)) / SET_BITS;
                words as u64 * 4
            }
            // Opaque handle plus a one-element buffer of the component.
            TypeKind::File { element } => 8 + align_to(self.size_bytes(*element), 8),
            TypeKind::Text => 16,
        }
    }

    fn class_fields_size(&self, id: TypeId) -> u64 {
        let info = self.class_info(id);
        let mut offset = info.base.map(|b| self.class_fields_size(b)).unwrap_or(0);
        for f in &info.fields {
            offset = align_to(offset, self.align_bytes(f.ty));
            offset += self.size_bytes(f.ty);
        }
        offset
    }

    pub fn align_bytes(&self, id: TypeId) -> u64 {
        match self.get_kind(id) {
            TypeKind::Error | TypeKind::Void => 1,
            TypeKind::Char | TypeKind::Boolean | TypeKind::String { .. } => 1,
            TypeKind::Integer | TypeKind::Enum(..) => 4,
            TypeKind::Int64 | TypeKind::Real => 8,
            TypeKind::SubRange { host, .. } => self.align_bytes(*host),
            TypeKind::Array { element, .. } => self.align_bytes(*element),
            TypeKind::Record { fields, variant } => {
                let mut a = fields
                    .iter()
                    .map(|f| self.align_bytes(f.ty))
                    .max()
                    .unwrap_or(1);
                if let Some(v) = variant {
                    a = a.max(self.align_bytes(*v));
                }
                a
            }
            TypeKind::Variant { fields } => fields
                .iter()
                .map(|f| self.align_bytes(f.ty))
                .max()
                .unwrap_or(1),
            TypeKind::Class(info) => {
                let mut a = if self.class_num_virtual_funcs(id) > 0 { 8 } else { 1 };
                a = a.max(
                    info.fields
                        .iter()
                        .map(|f| self.align_bytes(f.ty))
                        .max()
                        .unwrap_or(1),
                );
                if let Some(b) = info.base {
                    a = a.max(self.align_bytes(b));
                }
                a
            }
            TypeKind::Pointer(..) | TypeKind::FuncPtr(..) | TypeKind::Function { .. } => 8,
            TypeKind::Set { .. } => 4,
            TypeKind::File { .. } | TypeKind::Text => 8,
        }
    }

    /// Byte offset of field `index` inside a record (fixed fields first,
    /// the variant part after them, overlapping its own fields at one
    /// offset).
    pub fn record_field_offset(&self, id: TypeId, index: usize) -> u64 {
        let fields = self.record_fields(id);
        assert!(index < fields.len(), "field index out of range");
        let mut offset = 0u64;
        for (i, f) in fields.iter().enumerate() {
            offset = align_to(offset, self.align_bytes(f.ty));
            if i == index {
                return offset;
            }
            offset += self.size_bytes(f.ty);
        }
        unreachable!();
    }

    /// Byte offset of the variant part of a record.
    pub fn record_variant_offset(&self, id: TypeId) -> u64 {
        let variant = self.record_variant(id).expect("record has no variant part");
        let mut offset = 0u64;
        for f in self.record_fields(id) {
            offset = align_to(offset, self.align_bytes(f.ty));
            offset += self.size_bytes(f.ty);
        }
        align_to(offset, self.align_bytes(variant))
    }

    // Naming, for diagnostics.

    pub fn get_type_name(&self, id: TypeId) -> String {
        match self.get_kind(id) {
            TypeKind::Error => "<error>".to_string(),
            TypeKind::Integer => "integer".to_string(),
            TypeKind::Int64 => "int64".to_string(),
            TypeKind::Real => "real".to_string(),
            TypeKind::Char => "char".to_string(),
            TypeKind::Boolean => "boolean".to_string(),
            TypeKind::Void => "void".to_string(),
            TypeKind::Enum(values) => format!("({})", values.join(", ")),
            TypeKind::SubRange { range, .. } => format!("{}", range),
            TypeKind::Array { element, ranges } => format!(
                "array [{}] of {}",
                ranges
                    .iter()
                    .map(|r| r.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                self.get_type_name(*element)
            ),
            TypeKind::String { range } => format!("string[{}]", range.end()),
            TypeKind::Record { .. } => "record".to_string(),
            TypeKind::Variant { .. } => "variant".to_string(),
            TypeKind::Class(info) => info.name.clone(),
            TypeKind::Pointer(Pointee::Resolved(p)) => format!("^{}", self.get_type_name(*p)),
            TypeKind::Pointer(Pointee::Pending(name)) => format!("^{} (incomplete)", name),
            TypeKind::FuncPtr(..) => "function pointer".to_string(),
            TypeKind::Function { result } => {
                format!("function: {}", self.get_type_name(*result))
            }
            TypeKind::Set { element, .. } => match element {
                Some(e) => format!("set of {}", self.get_type_name(*e)),
                None => "set".to_string(),
            },
            TypeKind::File { element } => format!("file of {}", self.get_type_name(*element)),
            TypeKind::Text => "text".to_string(),
        }
    }
}

impl Default for TypeSystem {
    fn default() -> TypeSystem {
        TypeSystem::new()
    }
}

fn align_to(value: u64, align: u64) -> u64 {
    debug_assert!(align > 0);
    if value % align == 0 {
        value
    } else {
        value + (align - value % align)
    }
}

/// An enumerator registered in the `enums` table: the enum type that owns
/// it and its ordinal value.
#[derive(Debug, Clone, Copy)]
pub struct EnumValue {
    pub owner: TypeId,
    pub value: i64,
}

/// Two scoped symbol tables, `types` and `enums`, with a nested-level
/// discipline. The built-in type names are bound at construction.
pub struct TypeRegistry {
    types: ScopedMap<TypeId>,
    enums: ScopedMap<EnumValue>,
}

impl TypeRegistry {
    pub fn new(ts: &TypeSystem) -> TypeRegistry {
        let mut registry = TypeRegistry {
            types: ScopedMap::new(),
            enums: ScopedMap::new(),
        };
        registry.types.add("integer", ts.get_integer_type());
        registry.types.add("real", ts.get_real_type());
        registry.types.add("char", ts.get_char_type());
        registry.types.add("boolean", ts.get_boolean_type());
        // Boolean behaves as the predefined enumeration (false, true).
        registry.enums.add(
            "false",
            EnumValue {
                owner: ts.get_boolean_type(),
                value: 0,
            },
        );
        registry.enums.add(
            "true",
            EnumValue {
                owner: ts.get_boolean_type(),
                value: 1,
            },
        );
        registry
    }

    pub fn new_level(&mut self) {
        self.types.new_level();
        self.enums.new_level();
    }

    pub fn drop_level(&mut self) {
        self.types.drop_level();
        self.enums.drop_level();
    }

    /// Binds `name` in the current level. When the type is an enum, also
    /// registers every enumerator; a duplicate enumerator is logged and
    /// skipped, not fatal.
    pub fn add(&mut self, ts: &TypeSystem, name: &str, ty: TypeId) -> bool {
        self.register_enum_values(ts, ty);
        self.types.add(name, ty)
    }

    /// Registers the enumerators of an enum type into the `enums` table.
    /// Registering the same enum twice is harmless; a clash with a value of
    /// a different enum is logged and skipped.
    pub fn register_enum_values(&mut self, ts: &TypeSystem, ty: TypeId) {
        let values = match ts.get_kind(ty) {
            TypeKind::Enum(values) => values.clone(),
            _ => return,
        };
        for (i, v) in values.iter().enumerate() {
            if let Some(existing) = self.enums.find_in_current_level(v) {
                if existing.owner == ty {
                    continue;
                }
            }
            if !self.enums.add(
                v,
                EnumValue {
                    owner: ty,
                    value: i as i64,
                },
            ) {
                log::warn!("enumerated value by name '{}' already exists", v);
            }
        }
    }

    pub fn find(&self, name: &str) -> Option<TypeId> {
        self.types.find(name)
    }

    pub fn is_type_name(&self, name: &str) -> bool {
        self.types.contains(name)
    }

    pub fn is_enum_value(&self, name: &str) -> bool {
        self.enums.contains(name)
    }

    pub fn find_enum_value(&self, name: &str) -> Option<EnumValue> {
        self.enums.find(name)
    }

    /// Resolves one forward-declared pointer. Failure is diagnosed and the
    /// pointer stays incomplete; resolving an already complete pointer is a
    /// no-op.
    pub fn fix_up_incomplete(
        &self,
        ts: &mut TypeSystem,
        ptr: TypeId,
        diagnostics: &mut Diagnostics,
        loc: SpanLoc,
    ) {
        let name = match ts.pointer_pending_name(ptr) {
            Some(name) => name.to_string(),
            None => return,
        };
        match self.find(&name) {
            Some(target) => ts.pointer_resolve(ptr, target),
            None => diagnostics.error(
                loc,
                format!("forward declared pointer type not declared: {}", name),
            ),
        }
    }
}
