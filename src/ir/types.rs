//! Type and member descriptors consumed by the IR.
//!
//! The optimizer never resolves types itself; a front end hands it fully resolved
//! descriptors. This module defines the minimal descriptor model the transforms need:
//!
//! - [`Type`] - the type of an SSA value (primitives, pointers and named types)
//! - [`IntegerSpec`] - bit width and signedness of an integer type
//! - [`TypeDef`] / [`FieldDef`] / [`MethodDef`] - named types and their members
//! - [`AccessRules`] - visibility checks used by scalar replacement and inlining
//!
//! Named descriptors are shared through `Arc` handles ([`TypeRef`], [`FieldRef`],
//! [`MethodRef`]) and compare by a process-wide unique id, never structurally. Field lists
//! are installed once after the owning type is created so that types may refer to
//! themselves through pointer-typed fields.

use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock, Weak,
    },
};

static NEXT_DESCRIPTOR_ID: AtomicU64 = AtomicU64::new(1);

fn next_descriptor_id() -> u64 {
    NEXT_DESCRIPTOR_ID.fetch_add(1, Ordering::Relaxed)
}

/// Bit width and signedness of an integer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntegerSpec {
    bits: u16,
    signed: bool,
}

impl IntegerSpec {
    /// 8-bit signed integer.
    pub const I8: Self = Self::new(8, true);
    /// 16-bit signed integer.
    pub const I16: Self = Self::new(16, true);
    /// 32-bit signed integer.
    pub const I32: Self = Self::new(32, true);
    /// 64-bit signed integer.
    pub const I64: Self = Self::new(64, true);
    /// 8-bit unsigned integer.
    pub const U8: Self = Self::new(8, false);
    /// 16-bit unsigned integer.
    pub const U16: Self = Self::new(16, false);
    /// 32-bit unsigned integer.
    pub const U32: Self = Self::new(32, false);
    /// 64-bit unsigned integer.
    pub const U64: Self = Self::new(64, false);

    /// Creates an integer spec. Widths above 64 bits are clamped to 64.
    #[must_use]
    pub const fn new(bits: u16, signed: bool) -> Self {
        let bits = if bits > 64 { 64 } else { bits };
        Self { bits, signed }
    }

    /// Returns the bit width.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.bits
    }

    /// Returns true for signed integers.
    #[must_use]
    pub const fn is_signed(self) -> bool {
        self.signed
    }

    /// Returns the same width with unsigned interpretation.
    #[must_use]
    pub const fn unsigned(self) -> Self {
        Self::new(self.bits, false)
    }

    /// Returns the same width with signed interpretation.
    #[must_use]
    pub const fn signed(self) -> Self {
        Self::new(self.bits, true)
    }

    /// Smallest representable value.
    #[must_use]
    pub fn min_value(self) -> i128 {
        if self.signed {
            -(1i128 << (self.bits - 1))
        } else {
            0
        }
    }

    /// Largest representable value.
    #[must_use]
    pub fn max_value(self) -> i128 {
        if self.signed {
            (1i128 << (self.bits - 1)) - 1
        } else {
            (1i128 << self.bits) - 1
        }
    }

    /// Returns true if `value` fits without wrapping.
    #[must_use]
    pub fn is_representable(self, value: i128) -> bool {
        value >= self.min_value() && value <= self.max_value()
    }

    /// Wraps an arbitrary value into the range of this spec (two's complement).
    #[must_use]
    pub fn normalize(self, value: i128) -> i128 {
        let mask = (1u128 << self.bits) - 1;
        let raw = (value as u128) & mask;
        if self.signed && (raw >> (self.bits - 1)) & 1 == 1 {
            raw as i128 - (1i128 << self.bits)
        } else {
            raw as i128
        }
    }

    /// Size of a value of this spec in bytes.
    #[must_use]
    pub fn byte_size(self) -> usize {
        usize::from(self.bits).div_ceil(8)
    }
}

impl fmt::Display for IntegerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", if self.signed { "i" } else { "u" }, self.bits)
    }
}

/// How a pointer refers to its pointee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PointerKind {
    /// Pointer to stack-allocated or otherwise short-lived storage (`alloca`).
    Transient,
    /// Reference to a garbage-collected box (`box`, `new_object`).
    Box,
    /// Interior reference, such as a field address or an unboxed payload.
    Reference,
}

/// The type of an SSA value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value. Used for the result of void calls.
    Void,
    /// Boolean.
    Bool,
    /// Integer with the given width and signedness.
    Int(IntegerSpec),
    /// 32-bit IEEE float.
    Float32,
    /// 64-bit IEEE float.
    Float64,
    /// Pointer to a value of `element` type.
    Pointer {
        /// Pointee type.
        element: Arc<Type>,
        /// Pointer flavor.
        kind: PointerKind,
    },
    /// A named struct or class type.
    Named(TypeRef),
}

impl Type {
    /// Builds a pointer type.
    #[must_use]
    pub fn pointer(element: Type, kind: PointerKind) -> Self {
        Type::Pointer {
            element: Arc::new(element),
            kind,
        }
    }

    /// Returns the integer spec for integer types.
    #[must_use]
    pub fn integer_spec(&self) -> Option<IntegerSpec> {
        match self {
            Type::Int(spec) => Some(*spec),
            _ => None,
        }
    }

    /// Returns true for integer types.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(self, Type::Int(_))
    }

    /// Returns true for pointer types.
    #[must_use]
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer { .. })
    }

    /// Returns the pointee of a pointer type.
    #[must_use]
    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Pointer { element, .. } => Some(element),
            _ => None,
        }
    }

    /// Returns the pointer flavor of a pointer type.
    #[must_use]
    pub fn pointer_kind(&self) -> Option<PointerKind> {
        match self {
            Type::Pointer { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Returns the named type definition, if any.
    #[must_use]
    pub fn as_named(&self) -> Option<&TypeRef> {
        match self {
            Type::Named(def) => Some(def),
            _ => None,
        }
    }

    /// Returns the definition of a named struct (value) type.
    #[must_use]
    pub fn as_struct(&self) -> Option<&TypeRef> {
        self.as_named().filter(|def| def.kind() == TypeKind::Struct)
    }

    /// Returns true if values of this type can be null.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        match self {
            Type::Pointer { .. } => true,
            Type::Named(def) => def.kind() == TypeKind::Class,
            _ => false,
        }
    }

    /// Estimates the in-memory size of a value of this type in bytes.
    ///
    /// Used by the inliner's gain model; precision only affects heuristics.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        match self {
            Type::Void => 0,
            Type::Bool => 1,
            Type::Int(spec) => spec.byte_size(),
            Type::Float32 => 4,
            Type::Float64 | Type::Pointer { .. } => 8,
            Type::Named(def) => match def.kind() {
                TypeKind::Class => 8,
                TypeKind::Struct => def
                    .instance_fields()
                    .map(|field| field.field_type().estimated_size())
                    .sum(),
            },
        }
    }

    /// Calls `visit` for every named type mentioned by this type.
    pub fn visit_named(&self, visit: &mut impl FnMut(&TypeRef)) {
        match self {
            Type::Pointer { element, .. } => element.visit_named(visit),
            Type::Named(def) => visit(def),
            _ => {}
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Bool => f.write_str("bool"),
            Type::Int(spec) => write!(f, "{spec}"),
            Type::Float32 => f.write_str("f32"),
            Type::Float64 => f.write_str("f64"),
            Type::Pointer { element, kind } => match kind {
                PointerKind::Transient => write!(f, "{element}*"),
                PointerKind::Box => write!(f, "box<{element}>"),
                PointerKind::Reference => write!(f, "ref<{element}>"),
            },
            Type::Named(def) => f.write_str(def.name()),
        }
    }
}

/// Visibility of a type or member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Visible everywhere.
    Public,
    /// Visible within the defining module.
    Internal,
    /// Visible within the declaring type only.
    Private,
}

/// Whether a named type has value or reference semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// Value type, stored inline; eligible for scalar replacement.
    Struct,
    /// Reference type, always heap allocated.
    Class,
}

/// Shared handle to a [`TypeDef`].
pub type TypeRef = Arc<TypeDef>;
/// Shared handle to a [`FieldDef`].
pub type FieldRef = Arc<FieldDef>;
/// Shared handle to a [`MethodDef`].
pub type MethodRef = Arc<MethodDef>;

/// A named struct or class type.
pub struct TypeDef {
    id: u64,
    name: String,
    module: Arc<str>,
    access: Access,
    kind: TypeKind,
    fields: OnceLock<Vec<FieldRef>>,
}

impl TypeDef {
    /// Creates a type without fields. Install fields with [`TypeDef::define_fields`].
    #[must_use]
    pub fn new(name: impl Into<String>, module: &str, kind: TypeKind, access: Access) -> TypeRef {
        Arc::new(Self {
            id: next_descriptor_id(),
            name: name.into(),
            module: Arc::from(module),
            access,
            kind,
            fields: OnceLock::new(),
        })
    }

    /// Installs the field list. Returns false if fields were already defined.
    pub fn define_fields(&self, fields: Vec<FieldRef>) -> bool {
        self.fields.set(fields).is_ok()
    }

    /// Convenience for defining public instance fields from `(name, type)` pairs.
    pub fn define_public_fields(self: &Arc<Self>, fields: &[(&str, Type)]) -> bool {
        let fields = fields
            .iter()
            .map(|(name, ty)| FieldDef::new(self, *name, ty.clone(), Access::Public, false))
            .collect();
        self.define_fields(fields)
    }

    /// Unique id of this type.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Type name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Defining module.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Type visibility.
    #[must_use]
    pub fn access(&self) -> Access {
        self.access
    }

    /// Struct or class.
    #[must_use]
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// All fields, static and instance, in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldRef] {
        self.fields.get().map_or(&[], Vec::as_slice)
    }

    /// Instance fields in layout order.
    pub fn instance_fields(&self) -> impl Iterator<Item = &FieldRef> {
        self.fields().iter().filter(|field| !field.is_static())
    }

    /// Position of `field` among the instance fields.
    #[must_use]
    pub fn instance_field_index(&self, field: &FieldDef) -> Option<usize> {
        self.instance_fields().position(|f| f.id() == field.id())
    }
}

impl PartialEq for TypeDef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeDef {}

impl Hash for TypeDef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeDef({})", self.name)
    }
}

/// A field of a named type.
pub struct FieldDef {
    id: u64,
    name: String,
    owner: Weak<TypeDef>,
    field_type: Type,
    access: Access,
    is_static: bool,
}

impl FieldDef {
    /// Creates a field declared by `owner`.
    #[must_use]
    pub fn new(
        owner: &TypeRef,
        name: impl Into<String>,
        field_type: Type,
        access: Access,
        is_static: bool,
    ) -> FieldRef {
        Arc::new(Self {
            id: next_descriptor_id(),
            name: name.into(),
            owner: Arc::downgrade(owner),
            field_type,
            access,
            is_static,
        })
    }

    /// Unique id of this field.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Field name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The declaring type, if it is still alive.
    #[must_use]
    pub fn declaring_type(&self) -> Option<TypeRef> {
        self.owner.upgrade()
    }

    /// Type of the field's value.
    #[must_use]
    pub fn field_type(&self) -> &Type {
        &self.field_type
    }

    /// Field visibility.
    #[must_use]
    pub fn access(&self) -> Access {
        self.access
    }

    /// True for static fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.is_static
    }
}

impl PartialEq for FieldDef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for FieldDef {}

impl Hash for FieldDef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldDef({})", self.name)
    }
}

/// A method signature plus the metadata the optimizer needs.
pub struct MethodDef {
    id: u64,
    name: String,
    module: Arc<str>,
    declaring_type: Option<TypeRef>,
    access: Access,
    is_static: bool,
    is_constructor: bool,
    parameters: Vec<Type>,
    return_type: Type,
    generic_definition: Option<MethodRef>,
}

impl MethodDef {
    /// Creates a public static method.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        module: &str,
        parameters: Vec<Type>,
        return_type: Type,
    ) -> Self {
        Self {
            id: next_descriptor_id(),
            name: name.into(),
            module: Arc::from(module),
            declaring_type: None,
            access: Access::Public,
            is_static: true,
            is_constructor: false,
            parameters,
            return_type,
            generic_definition: None,
        }
    }

    /// Sets the declaring type.
    #[must_use]
    pub fn with_declaring_type(mut self, declaring_type: TypeRef) -> Self {
        self.declaring_type = Some(declaring_type);
        self
    }

    /// Sets the visibility.
    #[must_use]
    pub fn with_access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    /// Marks the method as an instance method taking an implicit `this`.
    #[must_use]
    pub fn as_instance(mut self) -> Self {
        self.is_static = false;
        self
    }

    /// Marks the method as an instance constructor.
    #[must_use]
    pub fn as_constructor(mut self) -> Self {
        self.is_static = false;
        self.is_constructor = true;
        self.return_type = Type::Void;
        self
    }

    /// Records the generic definition this method instantiates.
    #[must_use]
    pub fn with_generic_definition(mut self, definition: MethodRef) -> Self {
        self.generic_definition = Some(definition);
        self
    }

    /// Finishes construction.
    #[must_use]
    pub fn into_ref(self) -> MethodRef {
        Arc::new(self)
    }

    /// Unique id of this method.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Method name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Defining module.
    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    /// Declaring type, if any.
    #[must_use]
    pub fn declaring_type(&self) -> Option<&TypeRef> {
        self.declaring_type.as_ref()
    }

    /// Method visibility.
    #[must_use]
    pub fn access(&self) -> Access {
        self.access
    }

    /// True for static methods.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// True for instance constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.is_constructor
    }

    /// Explicit parameter types, excluding `this`.
    #[must_use]
    pub fn parameters(&self) -> &[Type] {
        &self.parameters
    }

    /// Return type.
    #[must_use]
    pub fn return_type(&self) -> &Type {
        &self.return_type
    }

    /// The type of the implicit `this` parameter for instance methods.
    #[must_use]
    pub fn this_type(&self) -> Option<Type> {
        if self.is_static {
            return None;
        }
        let declaring = self.declaring_type.as_ref()?;
        let kind = match declaring.kind() {
            TypeKind::Class => PointerKind::Box,
            TypeKind::Struct => PointerKind::Reference,
        };
        Some(Type::pointer(Type::Named(declaring.clone()), kind))
    }

    /// Follows generic instantiations back to the method that defines them.
    #[must_use]
    pub fn root_definition(&self) -> &MethodDef {
        let mut current = self;
        while let Some(definition) = &current.generic_definition {
            current = definition;
        }
        current
    }
}

impl PartialEq for MethodDef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MethodDef {}

impl Hash for MethodDef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MethodDef({})", self.name)
    }
}

impl fmt::Display for MethodDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.declaring_type {
            Some(declaring) => write!(f, "{}::{}", declaring.name(), self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A member whose accessibility can be checked.
#[derive(Debug, Clone, Copy)]
pub enum Member<'a> {
    /// A named type.
    Type(&'a TypeDef),
    /// A field.
    Field(&'a FieldDef),
    /// A method.
    Method(&'a MethodDef),
}

/// Visibility checks between a method and the members it references.
pub struct AccessRules;

impl AccessRules {
    /// Returns true if code in `from` may reference `member`.
    #[must_use]
    pub fn can_access(from: &MethodDef, member: Member<'_>) -> bool {
        match member {
            Member::Type(def) => Self::type_accessible(from, def),
            Member::Field(field) => match field.declaring_type() {
                Some(owner) => {
                    Self::type_accessible(from, &owner)
                        && Self::member_accessible(from, field.access(), &owner)
                }
                None => false,
            },
            Member::Method(method) => {
                if from.module() != method.module() && method.access() != Access::Public {
                    return false;
                }
                match method.declaring_type() {
                    Some(owner) => {
                        Self::type_accessible(from, owner)
                            && Self::member_accessible(from, method.access(), owner)
                    }
                    None => method.access() != Access::Private || from.module() == method.module(),
                }
            }
        }
    }

    /// Returns true if every named type mentioned by `ty` is accessible from `from`.
    #[must_use]
    pub fn can_access_type(from: &MethodDef, ty: &Type) -> bool {
        let mut accessible = true;
        ty.visit_named(&mut |def| accessible &= Self::type_accessible(from, def));
        accessible
    }

    fn type_accessible(from: &MethodDef, def: &TypeDef) -> bool {
        match def.access() {
            Access::Public => true,
            Access::Internal => from.module() == def.module(),
            Access::Private => from.declaring_type().is_some_and(|own| own.id() == def.id()),
        }
    }

    fn member_accessible(from: &MethodDef, access: Access, owner: &TypeDef) -> bool {
        match access {
            Access::Public => true,
            Access::Internal => from.module() == owner.module(),
            Access::Private => from.declaring_type().is_some_and(|own| own.id() == owner.id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_normalize() {
        assert_eq!(IntegerSpec::I8.normalize(200), -56);
        assert_eq!(IntegerSpec::U8.normalize(-1), 255);
        assert_eq!(IntegerSpec::I64.normalize(i128::from(i64::MAX) + 1), i128::from(i64::MIN));
        assert_eq!(IntegerSpec::U32.max_value(), i128::from(u32::MAX));
        assert!(IntegerSpec::I16.is_representable(-32768));
        assert!(!IntegerSpec::I16.is_representable(32768));
    }

    #[test]
    fn test_struct_size_is_sum_of_fields() {
        let point = TypeDef::new("Point", "app", TypeKind::Struct, Access::Public);
        point.define_public_fields(&[
            ("x", Type::Int(IntegerSpec::I32)),
            ("y", Type::Int(IntegerSpec::I64)),
        ]);
        assert_eq!(Type::Named(point.clone()).estimated_size(), 12);
        assert_eq!(point.instance_fields().count(), 2);
        assert!(!point.define_fields(Vec::new()));
    }

    #[test]
    fn test_access_rules() {
        let hidden = TypeDef::new("Hidden", "lib", TypeKind::Struct, Access::Internal);
        let secret = FieldDef::new(&hidden, "secret", Type::Bool, Access::Private, false);
        hidden.define_fields(vec![secret.clone()]);

        let outside = MethodDef::new("main", "app", Vec::new(), Type::Void);
        let inside = MethodDef::new("helper", "lib", Vec::new(), Type::Void);
        let member = MethodDef::new("get", "lib", Vec::new(), Type::Bool)
            .with_declaring_type(hidden.clone());

        assert!(!AccessRules::can_access(&outside, Member::Type(&hidden)));
        assert!(AccessRules::can_access(&inside, Member::Type(&hidden)));
        assert!(!AccessRules::can_access(&inside, Member::Field(&secret)));
        assert!(AccessRules::can_access(&member, Member::Field(&secret)));
    }

    #[test]
    fn test_root_definition() {
        let generic = MethodDef::new("map", "lib", Vec::new(), Type::Void).into_ref();
        let instance = MethodDef::new("map<int>", "lib", Vec::new(), Type::Void)
            .with_generic_definition(generic.clone());
        assert_eq!(instance.root_definition().id(), generic.id());
    }
}
