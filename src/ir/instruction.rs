//! Instructions: a prototype applied to an argument list.

use std::fmt;

use crate::ir::{
    ArithOp, Constant, FieldRef, InstructionPrototype, Intrinsic, MethodLookup, MethodRef, Type,
    ValueTag,
};

/// An immutable (prototype, arguments) pair.
///
/// Named instructions live in basic blocks and define a [`ValueTag`]; anonymous
/// instructions are embedded in block flows (switch scrutinees, return values and the risky
/// operation of a try flow).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Instruction {
    prototype: InstructionPrototype,
    arguments: Vec<ValueTag>,
}

impl Instruction {
    /// Creates an instruction.
    #[must_use]
    pub fn new(prototype: InstructionPrototype, arguments: Vec<ValueTag>) -> Self {
        debug_assert_eq!(
            prototype.parameter_count(),
            arguments.len(),
            "argument count mismatch for {prototype}"
        );
        Self {
            prototype,
            arguments,
        }
    }

    /// `copy(value)`.
    #[must_use]
    pub fn copy(result_type: Type, value: ValueTag) -> Self {
        Self::new(InstructionPrototype::Copy { result_type }, vec![value])
    }

    /// A literal.
    #[must_use]
    pub fn constant(value: Constant, result_type: Type) -> Self {
        Self::new(InstructionPrototype::constant(value, result_type), Vec::new())
    }

    /// `default` of the given type.
    #[must_use]
    pub fn default_value(result_type: Type) -> Self {
        Self::constant(Constant::Default, result_type)
    }

    /// `alloca<T>`.
    #[must_use]
    pub fn alloca(element_type: Type) -> Self {
        Self::new(InstructionPrototype::Alloca { element_type }, Vec::new())
    }

    /// `load<T>(pointer)`.
    #[must_use]
    pub fn load(element_type: Type, pointer: ValueTag) -> Self {
        Self::new(InstructionPrototype::Load { element_type }, vec![pointer])
    }

    /// `store<T>(pointer, value)`.
    #[must_use]
    pub fn store(element_type: Type, pointer: ValueTag, value: ValueTag) -> Self {
        Self::new(
            InstructionPrototype::Store { element_type },
            vec![pointer, value],
        )
    }

    /// `box<T>(value)`.
    #[must_use]
    pub fn boxed(element_type: Type, value: ValueTag) -> Self {
        Self::new(InstructionPrototype::Box { element_type }, vec![value])
    }

    /// `unbox<T>(box)`.
    #[must_use]
    pub fn unbox(element_type: Type, value: ValueTag) -> Self {
        Self::new(InstructionPrototype::Unbox { element_type }, vec![value])
    }

    /// `get_field_pointer<field>(base)`.
    #[must_use]
    pub fn get_field_pointer(field: FieldRef, base: ValueTag) -> Self {
        Self::new(InstructionPrototype::GetFieldPointer { field }, vec![base])
    }

    /// `reinterpret_cast<T>(pointer)`.
    #[must_use]
    pub fn reinterpret_cast(target_type: Type, pointer: ValueTag) -> Self {
        Self::new(InstructionPrototype::ReinterpretCast { target_type }, vec![pointer])
    }

    /// An arithmetic intrinsic over homogeneous operands.
    #[must_use]
    pub fn arith(op: ArithOp, operand_type: Type, arguments: Vec<ValueTag>) -> Self {
        Self::new(InstructionPrototype::arith(op, operand_type), arguments)
    }

    /// A static call.
    #[must_use]
    pub fn call(callee: MethodRef, arguments: Vec<ValueTag>) -> Self {
        Self::new(
            InstructionPrototype::Call {
                callee,
                lookup: MethodLookup::Static,
            },
            arguments,
        )
    }

    /// `new_object<ctor>(args)`.
    #[must_use]
    pub fn new_object(constructor: MethodRef, arguments: Vec<ValueTag>) -> Self {
        Self::new(InstructionPrototype::NewObject { constructor }, arguments)
    }

    /// An exception intrinsic (`capture`, `throw` or `rethrow`).
    #[must_use]
    pub fn exception(intrinsic: Intrinsic, argument_type: Type, argument: ValueTag) -> Self {
        let result_type = match intrinsic {
            Intrinsic::Capture => argument_type.clone(),
            _ => Type::Void,
        };
        Self::new(
            InstructionPrototype::Intrinsic {
                intrinsic,
                result_type,
                parameter_types: vec![argument_type],
            },
            vec![argument],
        )
    }

    /// The prototype.
    #[must_use]
    pub fn prototype(&self) -> &InstructionPrototype {
        &self.prototype
    }

    /// The arguments.
    #[must_use]
    pub fn arguments(&self) -> &[ValueTag] {
        &self.arguments
    }

    /// Type of the value this instruction produces.
    #[must_use]
    pub fn result_type(&self) -> Type {
        self.prototype.result_type()
    }

    /// Returns a copy with a new argument list.
    #[must_use]
    pub fn with_arguments(&self, arguments: Vec<ValueTag>) -> Self {
        Self::new(self.prototype.clone(), arguments)
    }

    /// Returns a copy with every argument passed through `map`.
    #[must_use]
    pub fn map_arguments(&self, mut map: impl FnMut(&ValueTag) -> ValueTag) -> Self {
        Self {
            prototype: self.prototype.clone(),
            arguments: self.arguments.iter().map(&mut map).collect(),
        }
    }

    /// The source of a `copy`.
    #[must_use]
    pub fn copy_source(&self) -> Option<&ValueTag> {
        match self.prototype {
            InstructionPrototype::Copy { .. } => self.arguments.first(),
            _ => None,
        }
    }

    /// The pointer of a `load`.
    #[must_use]
    pub fn load_pointer(&self) -> Option<&ValueTag> {
        match self.prototype {
            InstructionPrototype::Load { .. } => self.arguments.first(),
            _ => None,
        }
    }

    /// The pointer of a `store`.
    #[must_use]
    pub fn store_pointer(&self) -> Option<&ValueTag> {
        match self.prototype {
            InstructionPrototype::Store { .. } => self.arguments.first(),
            _ => None,
        }
    }

    /// The stored value of a `store`.
    #[must_use]
    pub fn store_value(&self) -> Option<&ValueTag> {
        match self.prototype {
            InstructionPrototype::Store { .. } => self.arguments.get(1),
            _ => None,
        }
    }

    /// The base pointer and field of a `get_field_pointer`.
    #[must_use]
    pub fn field_pointer(&self) -> Option<(&ValueTag, &FieldRef)> {
        match &self.prototype {
            InstructionPrototype::GetFieldPointer { field } => {
                self.arguments.first().map(|base| (base, field))
            }
            _ => None,
        }
    }

    /// The literal of a `constant`.
    #[must_use]
    pub fn constant_value(&self) -> Option<Constant> {
        match &self.prototype {
            InstructionPrototype::Constant { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// The operand of a `box`.
    #[must_use]
    pub fn boxed_value(&self) -> Option<&ValueTag> {
        match self.prototype {
            InstructionPrototype::Box { .. } => self.arguments.first(),
            _ => None,
        }
    }

    /// The box operand of an `unbox`.
    #[must_use]
    pub fn unboxed_value(&self) -> Option<&ValueTag> {
        match self.prototype {
            InstructionPrototype::Unbox { .. } => self.arguments.first(),
            _ => None,
        }
    }

    /// The pointer operand of a `reinterpret_cast`.
    #[must_use]
    pub fn cast_source(&self) -> Option<&ValueTag> {
        match self.prototype {
            InstructionPrototype::ReinterpretCast { .. } => self.arguments.first(),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.prototype)?;
        for (index, argument) in self.arguments.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{argument}")?;
        }
        f.write_str(")")
    }
}
