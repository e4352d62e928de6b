//! Compile-time constant values.
//!
//! [`Constant`] is the literal carried by `constant` instructions and the value space of
//! switch cases. Integer constants are always kept normalized to their [`IntegerSpec`], so
//! two constants compare equal exactly when they denote the same runtime value. Floats
//! compare by bit pattern, which makes constants usable as hash keys.

use std::{
    fmt,
    hash::{Hash, Hasher},
};

use crate::ir::{IntegerSpec, Type};

/// An integer literal normalized to its spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntegerConstant {
    value: i128,
    spec: IntegerSpec,
}

impl IntegerConstant {
    /// Creates an integer constant, wrapping `value` into the range of `spec`.
    #[must_use]
    pub fn new(value: i128, spec: IntegerSpec) -> Self {
        Self {
            value: spec.normalize(value),
            spec,
        }
    }

    /// The mathematical value.
    #[must_use]
    pub fn value(self) -> i128 {
        self.value
    }

    /// The integer spec.
    #[must_use]
    pub fn spec(self) -> IntegerSpec {
        self.spec
    }

    /// True if the value is zero.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.value == 0
    }

    /// The raw two's complement bit pattern, zero-extended.
    #[must_use]
    pub fn bits(self) -> u128 {
        (self.value as u128) & ((1u128 << self.spec.bits()) - 1)
    }

    /// Converts to another spec with wrapping semantics.
    #[must_use]
    pub fn cast(self, spec: IntegerSpec) -> Self {
        Self::new(self.value, spec)
    }
}

impl fmt::Display for IntegerConstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.value, self.spec)
    }
}

/// A literal value.
#[derive(Debug, Clone, Copy)]
pub enum Constant {
    /// The null reference.
    Null,
    /// The default value of the instruction's result type.
    Default,
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Int(IntegerConstant),
    /// 32-bit float literal.
    Float32(f32),
    /// 64-bit float literal.
    Float64(f64),
}

impl Constant {
    /// Builds an integer constant.
    #[must_use]
    pub fn int(value: i128, spec: IntegerSpec) -> Self {
        Constant::Int(IntegerConstant::new(value, spec))
    }

    /// Builds a signed 32-bit integer constant.
    #[must_use]
    pub fn i32(value: i32) -> Self {
        Self::int(i128::from(value), IntegerSpec::I32)
    }

    /// The concrete literal that `default` denotes for `ty`, where one exists.
    ///
    /// Returns `None` for struct types and `void`, whose default has no literal form.
    #[must_use]
    pub fn default_of(ty: &Type) -> Option<Constant> {
        match ty {
            Type::Bool => Some(Constant::Bool(false)),
            Type::Int(spec) => Some(Self::int(0, *spec)),
            Type::Float32 => Some(Constant::Float32(0.0)),
            Type::Float64 => Some(Constant::Float64(0.0)),
            Type::Pointer { .. } => Some(Constant::Null),
            Type::Named(_) if ty.is_nullable() => Some(Constant::Null),
            _ => None,
        }
    }

    /// Replaces `default` with its concrete literal for `ty` when possible.
    #[must_use]
    pub fn specialize(self, ty: &Type) -> Constant {
        match self {
            Constant::Default => Self::default_of(ty).unwrap_or(Constant::Default),
            other => other,
        }
    }

    /// Returns the integer payload.
    #[must_use]
    pub fn as_int(&self) -> Option<IntegerConstant> {
        match self {
            Constant::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the boolean payload.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Constant::Bool(value) => Some(*value),
            _ => None,
        }
    }

    /// True for the null literal.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Constant::Null)
    }
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Null, Constant::Null) | (Constant::Default, Constant::Default) => true,
            (Constant::Bool(a), Constant::Bool(b)) => a == b,
            (Constant::Int(a), Constant::Int(b)) => a == b,
            (Constant::Float32(a), Constant::Float32(b)) => a.to_bits() == b.to_bits(),
            (Constant::Float64(a), Constant::Float64(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constant::Null | Constant::Default => {}
            Constant::Bool(value) => value.hash(state),
            Constant::Int(value) => value.hash(state),
            Constant::Float32(value) => value.to_bits().hash(state),
            Constant::Float64(value) => value.to_bits().hash(state),
        }
    }
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Null => f.write_str("null"),
            Constant::Default => f.write_str("default"),
            Constant::Bool(value) => write!(f, "{value}"),
            Constant::Int(value) => write!(f, "{value}"),
            Constant::Float32(value) => write!(f, "{value}f32"),
            Constant::Float64(value) => write!(f, "{value}f64"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_constants_normalize() {
        assert_eq!(Constant::int(256, IntegerSpec::U8), Constant::int(0, IntegerSpec::U8));
        assert_ne!(Constant::int(1, IntegerSpec::U8), Constant::int(1, IntegerSpec::I8));
        assert_eq!(IntegerConstant::new(-1, IntegerSpec::I16).bits(), 0xffff);
    }

    #[test]
    fn test_default_specialization() {
        let ty = Type::Int(IntegerSpec::I32);
        assert_eq!(Constant::Default.specialize(&ty), Constant::i32(0));
        assert_eq!(Constant::Default.specialize(&Type::Bool), Constant::Bool(false));
        assert_eq!(Constant::Default.specialize(&Type::Void), Constant::Default);
    }

    #[test]
    fn test_float_equality_is_bitwise() {
        assert_eq!(Constant::Float64(f64::NAN), Constant::Float64(f64::NAN));
        assert_ne!(Constant::Float32(0.0), Constant::Float32(-0.0));
    }
}
