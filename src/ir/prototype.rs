//! Instruction prototypes: the closed set of operations an instruction may perform.
//!
//! A prototype captures everything about an operation except its arguments: the operation
//! kind, its static type information, and its effect specification. Instructions pair a
//! prototype with an argument list (see [`crate::ir::Instruction`]).
//!
//! # Effects
//!
//! Every prototype declares an [`EffectFlags`] set. The effectful-instruction analysis, the
//! alias and memory analyses, and the instruction-ordering oracle are all derived from these
//! flags, so adding a prototype only requires declaring its effects here.

use std::fmt;

use bitflags::bitflags;
use strum::{EnumIter, IntoStaticStr};

use crate::ir::{Constant, FieldRef, MethodRef, PointerKind, Type};

bitflags! {
    /// Side effects and result facts declared by a prototype.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct EffectFlags: u8 {
        /// Reads memory through a pointer or global state.
        const READS_MEMORY = 0x01;
        /// Writes memory through a pointer or global state.
        const WRITES_MEMORY = 0x02;
        /// May transfer control to an exception handler.
        const MAY_THROW = 0x04;
        /// Allocates fresh storage; each execution yields a distinct object.
        const ALLOCATES = 0x08;
        /// The result is a pointer that is never null.
        const NON_NULL_RESULT = 0x10;
    }
}

/// Whether executing an instruction can raise an exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionSpec {
    /// Never throws.
    NoThrow,
    /// Throws for some inputs.
    MayThrow,
    /// Always throws; control never falls through.
    AlwaysThrow,
}

/// Arithmetic and relational operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ArithOp {
    /// Wrapping addition.
    Add,
    /// Wrapping subtraction.
    Sub,
    /// Wrapping multiplication.
    Mul,
    /// Division; integer division by zero throws.
    Div,
    /// Remainder; integer remainder by zero throws.
    Rem,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise exclusive or.
    Xor,
    /// Left shift.
    Shl,
    /// Right shift; arithmetic for signed operands.
    Shr,
    /// Bitwise or logical negation.
    Not,
    /// Arithmetic negation.
    Neg,
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// Numeric conversion to the result type.
    Convert,
}

impl ArithOp {
    /// Number of operands.
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            ArithOp::Not | ArithOp::Neg | ArithOp::Convert => 1,
            _ => 2,
        }
    }

    /// True for operators that produce a boolean.
    #[must_use]
    pub fn is_relational(self) -> bool {
        matches!(
            self,
            ArithOp::Eq | ArithOp::Ne | ArithOp::Lt | ArithOp::Le | ArithOp::Gt | ArithOp::Ge
        )
    }

    /// True for operators where `a op b == b op a`.
    #[must_use]
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            ArithOp::Add
                | ArithOp::Mul
                | ArithOp::And
                | ArithOp::Or
                | ArithOp::Xor
                | ArithOp::Eq
                | ArithOp::Ne
        )
    }

    /// True for operators where `(a op b) op c == a op (b op c)` on integers.
    #[must_use]
    pub fn is_associative(self) -> bool {
        matches!(
            self,
            ArithOp::Add | ArithOp::Mul | ArithOp::And | ArithOp::Or | ArithOp::Xor
        )
    }
}

/// Built-in operations that are not memory or call primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    /// An arithmetic or relational operator.
    Arith(ArithOp),
    /// Wraps a thrown value into a captured exception.
    Capture,
    /// Throws its argument.
    Throw,
    /// Rethrows a captured exception.
    Rethrow,
}

impl fmt::Display for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intrinsic::Arith(op) => {
                let name: &'static str = op.into();
                write!(f, "arith.{name}")
            }
            Intrinsic::Capture => f.write_str("exception.capture"),
            Intrinsic::Throw => f.write_str("exception.throw"),
            Intrinsic::Rethrow => f.write_str("exception.rethrow"),
        }
    }
}

/// How a call selects its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodLookup {
    /// The callee is known statically.
    Static,
    /// The callee is selected through the receiver's dynamic type.
    Virtual,
}

/// The operation performed by an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InstructionPrototype {
    /// Arithmetic, relational and exception intrinsics.
    Intrinsic {
        /// Which intrinsic.
        intrinsic: Intrinsic,
        /// Result type.
        result_type: Type,
        /// Operand types.
        parameter_types: Vec<Type>,
    },
    /// Allocates one element of storage on the stack.
    Alloca {
        /// Element type.
        element_type: Type,
    },
    /// Allocates a counted array of elements on the stack. Argument: count.
    AllocaArray {
        /// Element type.
        element_type: Type,
    },
    /// Loads through a pointer. Argument: pointer.
    Load {
        /// Loaded type.
        element_type: Type,
    },
    /// Stores through a pointer and yields the stored value. Arguments: pointer, value.
    Store {
        /// Stored type.
        element_type: Type,
    },
    /// Yields its argument unchanged.
    Copy {
        /// Result type.
        result_type: Type,
    },
    /// Allocates a box initialized with its argument.
    Box {
        /// Boxed type.
        element_type: Type,
    },
    /// Yields a reference to the payload of a box. Argument: box.
    Unbox {
        /// Payload type.
        element_type: Type,
    },
    /// Yields the address of an instance field. Argument: base pointer.
    GetFieldPointer {
        /// The field.
        field: FieldRef,
    },
    /// Yields a literal.
    Constant {
        /// The literal.
        value: Constant,
        /// Result type.
        result_type: Type,
    },
    /// Calls a method. Arguments: `this` (instance methods only), then parameters.
    Call {
        /// Target method.
        callee: MethodRef,
        /// Dispatch kind.
        lookup: MethodLookup,
    },
    /// Allocates an object and runs its constructor. Arguments: constructor parameters.
    NewObject {
        /// Constructor.
        constructor: MethodRef,
    },
    /// Reinterprets a pointer as another pointer type.
    ReinterpretCast {
        /// Result type.
        target_type: Type,
    },
}

impl InstructionPrototype {
    /// An arithmetic intrinsic with homogeneous operand types.
    #[must_use]
    pub fn arith(op: ArithOp, operand_type: Type) -> Self {
        let result_type = if op.is_relational() {
            Type::Bool
        } else {
            operand_type.clone()
        };
        InstructionPrototype::Intrinsic {
            intrinsic: Intrinsic::Arith(op),
            result_type,
            parameter_types: vec![operand_type; op.arity()],
        }
    }

    /// A conversion from `from` to `to`.
    #[must_use]
    pub fn convert(from: Type, to: Type) -> Self {
        InstructionPrototype::Intrinsic {
            intrinsic: Intrinsic::Arith(ArithOp::Convert),
            result_type: to,
            parameter_types: vec![from],
        }
    }

    /// A literal of the given type.
    #[must_use]
    pub fn constant(value: Constant, result_type: Type) -> Self {
        InstructionPrototype::Constant { value, result_type }
    }

    /// Returns the arithmetic operator for arithmetic intrinsics.
    #[must_use]
    pub fn arith_op(&self) -> Option<ArithOp> {
        match self {
            InstructionPrototype::Intrinsic {
                intrinsic: Intrinsic::Arith(op),
                ..
            } => Some(*op),
            _ => None,
        }
    }

    /// Returns the intrinsic, if this is an intrinsic prototype.
    #[must_use]
    pub fn intrinsic(&self) -> Option<Intrinsic> {
        match self {
            InstructionPrototype::Intrinsic { intrinsic, .. } => Some(*intrinsic),
            _ => None,
        }
    }

    /// Type of the value the instruction defines.
    #[must_use]
    pub fn result_type(&self) -> Type {
        match self {
            InstructionPrototype::Intrinsic { result_type, .. }
            | InstructionPrototype::Copy { result_type }
            | InstructionPrototype::Constant { result_type, .. } => result_type.clone(),
            InstructionPrototype::Alloca { element_type }
            | InstructionPrototype::AllocaArray { element_type } => {
                Type::pointer(element_type.clone(), PointerKind::Transient)
            }
            InstructionPrototype::Load { element_type }
            | InstructionPrototype::Store { element_type } => element_type.clone(),
            InstructionPrototype::Box { element_type } => {
                Type::pointer(element_type.clone(), PointerKind::Box)
            }
            InstructionPrototype::Unbox { element_type } => {
                Type::pointer(element_type.clone(), PointerKind::Reference)
            }
            InstructionPrototype::GetFieldPointer { field } => {
                Type::pointer(field.field_type().clone(), PointerKind::Reference)
            }
            InstructionPrototype::Call { callee, .. } => callee.return_type().clone(),
            InstructionPrototype::NewObject { constructor } => match constructor.declaring_type()
            {
                Some(declaring) => Type::pointer(Type::Named(declaring.clone()), PointerKind::Box),
                None => Type::Void,
            },
            InstructionPrototype::ReinterpretCast { target_type } => target_type.clone(),
        }
    }

    /// Number of arguments an instruction with this prototype takes.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        match self {
            InstructionPrototype::Intrinsic {
                parameter_types, ..
            } => parameter_types.len(),
            InstructionPrototype::Alloca { .. } | InstructionPrototype::Constant { .. } => 0,
            InstructionPrototype::Store { .. } => 2,
            InstructionPrototype::Call { callee, .. } => {
                callee.parameters().len() + usize::from(!callee.is_static())
            }
            InstructionPrototype::NewObject { constructor } => constructor.parameters().len(),
            _ => 1,
        }
    }

    /// Declared effects.
    #[must_use]
    pub fn effects(&self) -> EffectFlags {
        match self {
            InstructionPrototype::Intrinsic {
                intrinsic,
                result_type,
                ..
            } => match intrinsic {
                Intrinsic::Arith(ArithOp::Div | ArithOp::Rem) if result_type.is_integer() => {
                    EffectFlags::MAY_THROW
                }
                Intrinsic::Arith(_) | Intrinsic::Capture => EffectFlags::empty(),
                Intrinsic::Throw | Intrinsic::Rethrow => EffectFlags::MAY_THROW,
            },
            InstructionPrototype::Alloca { .. }
            | InstructionPrototype::AllocaArray { .. }
            | InstructionPrototype::Box { .. } => {
                EffectFlags::ALLOCATES | EffectFlags::NON_NULL_RESULT
            }
            InstructionPrototype::Load { .. } => EffectFlags::READS_MEMORY,
            InstructionPrototype::Store { .. } => EffectFlags::WRITES_MEMORY,
            InstructionPrototype::Copy { .. }
            | InstructionPrototype::Constant { .. }
            | InstructionPrototype::ReinterpretCast { .. } => EffectFlags::empty(),
            InstructionPrototype::Unbox { .. } => {
                EffectFlags::MAY_THROW | EffectFlags::NON_NULL_RESULT
            }
            InstructionPrototype::GetFieldPointer { .. } => EffectFlags::NON_NULL_RESULT,
            InstructionPrototype::Call { .. } => {
                EffectFlags::READS_MEMORY | EffectFlags::WRITES_MEMORY | EffectFlags::MAY_THROW
            }
            InstructionPrototype::NewObject { .. } => EffectFlags::all(),
        }
    }

    /// Declared exception behavior.
    #[must_use]
    pub fn exception_spec(&self) -> ExceptionSpec {
        match self.intrinsic() {
            Some(Intrinsic::Throw | Intrinsic::Rethrow) => ExceptionSpec::AlwaysThrow,
            _ if self.effects().contains(EffectFlags::MAY_THROW) => ExceptionSpec::MayThrow,
            _ => ExceptionSpec::NoThrow,
        }
    }

    /// True if removing or reordering the instruction could change observable behavior.
    #[must_use]
    pub fn is_effectful(&self) -> bool {
        self.effects()
            .intersects(EffectFlags::WRITES_MEMORY | EffectFlags::MAY_THROW)
    }

    /// True if two instructions with this prototype and equal arguments always yield
    /// interchangeable values.
    #[must_use]
    pub fn is_value_numberable(&self) -> bool {
        !self.effects().intersects(
            EffectFlags::READS_MEMORY
                | EffectFlags::WRITES_MEMORY
                | EffectFlags::MAY_THROW
                | EffectFlags::ALLOCATES,
        ) && !matches!(
            self,
            InstructionPrototype::Intrinsic {
                intrinsic: Intrinsic::Capture,
                ..
            }
        )
    }
}

impl fmt::Display for InstructionPrototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstructionPrototype::Intrinsic {
                intrinsic,
                result_type,
                ..
            } => write!(f, "{intrinsic}<{result_type}>"),
            InstructionPrototype::Alloca { element_type } => write!(f, "alloca<{element_type}>"),
            InstructionPrototype::AllocaArray { element_type } => {
                write!(f, "alloca_array<{element_type}>")
            }
            InstructionPrototype::Load { element_type } => write!(f, "load<{element_type}>"),
            InstructionPrototype::Store { element_type } => write!(f, "store<{element_type}>"),
            InstructionPrototype::Copy { result_type } => write!(f, "copy<{result_type}>"),
            InstructionPrototype::Box { element_type } => write!(f, "box<{element_type}>"),
            InstructionPrototype::Unbox { element_type } => write!(f, "unbox<{element_type}>"),
            InstructionPrototype::GetFieldPointer { field } => {
                write!(f, "get_field_pointer<{}>", field.name())
            }
            InstructionPrototype::Constant { value, result_type } => {
                write!(f, "const<{value}, {result_type}>")
            }
            InstructionPrototype::Call { callee, lookup } => match lookup {
                MethodLookup::Static => write!(f, "call<{callee}>"),
                MethodLookup::Virtual => write!(f, "callvirt<{callee}>"),
            },
            InstructionPrototype::NewObject { constructor } => {
                write!(f, "new_object<{constructor}>")
            }
            InstructionPrototype::ReinterpretCast { target_type } => {
                write!(f, "reinterpret_cast<{target_type}>")
            }
        }
    }
}
