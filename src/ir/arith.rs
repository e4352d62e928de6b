//! Constant evaluation of arithmetic intrinsics.
//!
//! [`evaluate_intrinsic`] is the default evaluator used by constant propagation and by the
//! operator reassociation transform. It folds an arithmetic or relational intrinsic applied
//! to constant arguments, following the runtime semantics of the IR:
//!
//! - integer arithmetic wraps to the result's [`IntegerSpec`]
//! - shift amounts are taken modulo the operand width
//! - integer division or remainder by zero is not folded (the instruction throws at runtime)
//! - relational operators honor the signedness of their operand spec
//!
//! Anything the evaluator does not understand yields `None`, which callers treat as "not
//! a constant".

use std::cmp::Ordering;

use crate::ir::{ArithOp, Constant, InstructionPrototype, IntegerConstant, IntegerSpec, Type};

/// Folds an arithmetic intrinsic applied to constant arguments.
#[must_use]
pub fn evaluate_intrinsic(prototype: &InstructionPrototype, arguments: &[Constant]) -> Option<Constant> {
    let InstructionPrototype::Intrinsic {
        result_type,
        parameter_types,
        ..
    } = prototype
    else {
        return None;
    };
    let op = prototype.arith_op()?;
    if arguments.len() != op.arity() || parameter_types.len() != arguments.len() {
        return None;
    }

    let args: Vec<Constant> = arguments
        .iter()
        .zip(parameter_types)
        .map(|(arg, ty)| arg.specialize(ty))
        .collect();

    match (op, args.as_slice()) {
        (ArithOp::Convert, [value]) => convert(*value, result_type),
        (_, [value]) => evaluate_unary(op, *value),
        (_, [lhs, rhs]) => evaluate_binary(op, *lhs, *rhs, result_type),
        _ => None,
    }
}

fn evaluate_unary(op: ArithOp, value: Constant) -> Option<Constant> {
    match (op, value) {
        (ArithOp::Not, Constant::Bool(b)) => Some(Constant::Bool(!b)),
        (ArithOp::Not, Constant::Int(i)) => Some(Constant::int(!i.value(), i.spec())),
        (ArithOp::Neg, Constant::Int(i)) => Some(Constant::int(-i.value(), i.spec())),
        (ArithOp::Neg, Constant::Float32(f)) => Some(Constant::Float32(-f)),
        (ArithOp::Neg, Constant::Float64(f)) => Some(Constant::Float64(-f)),
        _ => None,
    }
}

fn evaluate_binary(op: ArithOp, lhs: Constant, rhs: Constant, result_type: &Type) -> Option<Constant> {
    if op.is_relational() {
        return compare(op, lhs, rhs).map(Constant::Bool);
    }

    match (lhs, rhs) {
        (Constant::Int(a), Constant::Int(b)) => {
            integer_binary(op, a, b, result_type.integer_spec().unwrap_or(a.spec()))
        }
        (Constant::Bool(a), Constant::Bool(b)) => match op {
            ArithOp::And => Some(Constant::Bool(a & b)),
            ArithOp::Or => Some(Constant::Bool(a | b)),
            ArithOp::Xor => Some(Constant::Bool(a ^ b)),
            _ => None,
        },
        (Constant::Float32(a), Constant::Float32(b)) => {
            float_binary(op, f64::from(a), f64::from(b)).map(|v| Constant::Float32(v as f32))
        }
        (Constant::Float64(a), Constant::Float64(b)) => {
            float_binary(op, a, b).map(Constant::Float64)
        }
        _ => None,
    }
}

fn integer_binary(
    op: ArithOp,
    a: IntegerConstant,
    b: IntegerConstant,
    spec: IntegerSpec,
) -> Option<Constant> {
    let (x, y) = (a.value(), b.value());
    let shift = || (b.bits() % u128::from(a.spec().bits())) as u32;
    let value = match op {
        ArithOp::Add => x.wrapping_add(y),
        ArithOp::Sub => x.wrapping_sub(y),
        ArithOp::Mul => x.wrapping_mul(y),
        ArithOp::Div => {
            if y == 0 {
                return None;
            }
            x.wrapping_div(y)
        }
        ArithOp::Rem => {
            if y == 0 {
                return None;
            }
            x.wrapping_rem(y)
        }
        ArithOp::And => x & y,
        ArithOp::Or => x | y,
        ArithOp::Xor => x ^ y,
        ArithOp::Shl => x.wrapping_shl(shift()),
        ArithOp::Shr => x.wrapping_shr(shift()),
        _ => return None,
    };
    Some(Constant::int(value, spec))
}

fn float_binary(op: ArithOp, a: f64, b: f64) -> Option<f64> {
    match op {
        ArithOp::Add => Some(a + b),
        ArithOp::Sub => Some(a - b),
        ArithOp::Mul => Some(a * b),
        ArithOp::Div => Some(a / b),
        ArithOp::Rem => Some(a % b),
        _ => None,
    }
}

fn compare(op: ArithOp, lhs: Constant, rhs: Constant) -> Option<bool> {
    let ordering = match (lhs, rhs) {
        (Constant::Int(a), Constant::Int(b)) if a.spec() == b.spec() => a.value().cmp(&b.value()),
        (Constant::Bool(a), Constant::Bool(b)) => a.cmp(&b),
        (Constant::Null, Constant::Null) => Ordering::Equal,
        (Constant::Float32(a), Constant::Float32(b)) => return float_compare(op, f64::from(a), f64::from(b)),
        (Constant::Float64(a), Constant::Float64(b)) => return float_compare(op, a, b),
        _ => return None,
    };
    Some(match op {
        ArithOp::Eq => ordering == Ordering::Equal,
        ArithOp::Ne => ordering != Ordering::Equal,
        ArithOp::Lt => ordering == Ordering::Less,
        ArithOp::Le => ordering != Ordering::Greater,
        ArithOp::Gt => ordering == Ordering::Greater,
        ArithOp::Ge => ordering != Ordering::Less,
        _ => return None,
    })
}

fn float_compare(op: ArithOp, a: f64, b: f64) -> Option<bool> {
    Some(match op {
        ArithOp::Eq => a == b,
        ArithOp::Ne => a != b,
        ArithOp::Lt => a < b,
        ArithOp::Le => a <= b,
        ArithOp::Gt => a > b,
        ArithOp::Ge => a >= b,
        _ => return None,
    })
}

fn convert(value: Constant, target: &Type) -> Option<Constant> {
    match (value, target) {
        (Constant::Int(i), Type::Int(spec)) => Some(Constant::Int(i.cast(*spec))),
        (Constant::Bool(b), Type::Int(spec)) => Some(Constant::int(i128::from(b), *spec)),
        (Constant::Int(i), Type::Bool) => Some(Constant::Bool(!i.is_zero())),
        (Constant::Int(i), Type::Float32) => Some(Constant::Float32(i.value() as f32)),
        (Constant::Int(i), Type::Float64) => Some(Constant::Float64(i.value() as f64)),
        (Constant::Float32(f), Type::Int(spec)) => float_to_int(f64::from(f), *spec),
        (Constant::Float64(f), Type::Int(spec)) => float_to_int(f, *spec),
        (Constant::Float32(f), Type::Float64) => Some(Constant::Float64(f64::from(f))),
        (Constant::Float64(f), Type::Float32) => Some(Constant::Float32(f as f32)),
        (same @ Constant::Bool(_), Type::Bool)
        | (same @ Constant::Float32(_), Type::Float32)
        | (same @ Constant::Float64(_), Type::Float64) => Some(same),
        _ => None,
    }
}

fn float_to_int(value: f64, spec: IntegerSpec) -> Option<Constant> {
    let truncated = value.trunc();
    if !truncated.is_finite() {
        return None;
    }
    let wide = truncated as i128;
    if !spec.is_representable(wide) {
        return None;
    }
    Some(Constant::int(wide, spec))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int32() -> Type {
        Type::Int(IntegerSpec::I32)
    }

    fn eval(op: ArithOp, args: &[Constant]) -> Option<Constant> {
        evaluate_intrinsic(&InstructionPrototype::arith(op, int32()), args)
    }

    #[test]
    fn test_wrapping_arithmetic() {
        assert_eq!(
            eval(ArithOp::Add, &[Constant::i32(i32::MAX), Constant::i32(1)]),
            Some(Constant::i32(i32::MIN))
        );
        assert_eq!(eval(ArithOp::Mul, &[Constant::i32(6), Constant::i32(7)]), Some(Constant::i32(42)));
        assert_eq!(eval(ArithOp::Sub, &[Constant::i32(1), Constant::i32(3)]), Some(Constant::i32(-2)));
    }

    #[test]
    fn test_division_by_zero_is_not_folded() {
        assert_eq!(eval(ArithOp::Div, &[Constant::i32(1), Constant::i32(0)]), None);
        assert_eq!(eval(ArithOp::Rem, &[Constant::i32(7), Constant::i32(0)]), None);
        assert_eq!(eval(ArithOp::Div, &[Constant::i32(-7), Constant::i32(2)]), Some(Constant::i32(-3)));
    }

    #[test]
    fn test_relational_signedness() {
        let unsigned = Type::Int(IntegerSpec::U32);
        let lt = InstructionPrototype::arith(ArithOp::Lt, unsigned);
        let big = Constant::int(-1, IntegerSpec::U32);
        let small = Constant::int(1, IntegerSpec::U32);
        assert_eq!(evaluate_intrinsic(&lt, &[small, big]), Some(Constant::Bool(true)));
        assert_eq!(eval(ArithOp::Lt, &[Constant::i32(-1), Constant::i32(1)]), Some(Constant::Bool(true)));
    }

    #[test]
    fn test_default_arguments_are_specialized() {
        assert_eq!(eval(ArithOp::Add, &[Constant::Default, Constant::i32(5)]), Some(Constant::i32(5)));
    }

    #[test]
    fn test_shifts() {
        let spec = IntegerSpec::U64;
        let shl = InstructionPrototype::arith(ArithOp::Shl, Type::Int(spec));
        assert_eq!(
            evaluate_intrinsic(&shl, &[Constant::int(1, spec), Constant::int(63, spec)]),
            Some(Constant::int(1 << 63, spec))
        );
        assert_eq!(eval(ArithOp::Shr, &[Constant::i32(-8), Constant::i32(1)]), Some(Constant::i32(-4)));
    }

    #[test]
    fn test_convert() {
        let widen = InstructionPrototype::convert(Type::Int(IntegerSpec::I8), int32());
        assert_eq!(
            evaluate_intrinsic(&widen, &[Constant::int(-5, IntegerSpec::I8)]),
            Some(Constant::i32(-5))
        );
        let to_unsigned = InstructionPrototype::convert(int32(), Type::Int(IntegerSpec::U8));
        assert_eq!(
            evaluate_intrinsic(&to_unsigned, &[Constant::i32(-1)]),
            Some(Constant::int(255, IntegerSpec::U8))
        );
    }
}
