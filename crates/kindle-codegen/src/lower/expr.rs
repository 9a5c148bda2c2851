//! Arithmetic and conversions

use super::MethodRenderer;
use crate::error::CodegenResult;
use crate::ir::{BinOp, CastOp, Instr, IrType, Operand, Value};
use kindle_model::{BinaryOp, CastDirection, IntegerSubtype, NumericType, Var};

fn numeric_type(ty: NumericType) -> IrType {
    IrType::of_kind(ty.kind())
}

impl<'p, 'b, 's> MethodRenderer<'p, 'b, 's> {
    pub(super) fn lower_binary(
        &mut self,
        operator: BinaryOp,
        receiver: Var,
        first: Var,
        second: Var,
        operand: NumericType,
    ) -> CodegenResult<()> {
        let ty = numeric_type(operand);
        self.expect_type(first, &ty)?;
        let lhs = self.var(first);
        let dest = self.var(receiver);

        if operator == BinaryOp::Compare {
            self.expect_type(second, &ty)?;
            self.expect_type(receiver, &IrType::I32)?;
            let routine = match operand {
                NumericType::Int => "rt.cmp.i32",
                NumericType::Long => "rt.cmp.i64",
                NumericType::Float => "rt.cmp.float",
                NumericType::Double => "rt.cmp.double",
            };
            let args = vec![Operand::new(ty, lhs), self.operand(second)?];
            self.f.assign(
                &dest,
                Instr::Call {
                    ret: IrType::I32,
                    callee: Value::global(routine),
                    args,
                },
            );
            return Ok(());
        }

        self.expect_type(receiver, &ty)?;
        let shift = matches!(
            operator,
            BinaryOp::ShiftLeft | BinaryOp::ShiftRight | BinaryOp::ShiftRightUnsigned
        );
        let rhs = if shift {
            self.shift_amount(second, &ty)?
        } else {
            self.expect_type(second, &ty)?;
            self.var(second)
        };

        let op = if operand.is_float() {
            match operator {
                BinaryOp::Add => BinOp::FAdd,
                BinaryOp::Subtract => BinOp::FSub,
                BinaryOp::Multiply => BinOp::FMul,
                BinaryOp::Divide => BinOp::FDiv,
                BinaryOp::Modulo => BinOp::FRem,
                other => {
                    return Err(self.mismatch(format!("{:?} on {} operands", other, ty)));
                }
            }
        } else {
            match operator {
                BinaryOp::Add => BinOp::Add,
                BinaryOp::Subtract => BinOp::Sub,
                BinaryOp::Multiply => BinOp::Mul,
                BinaryOp::Divide => BinOp::SDiv,
                BinaryOp::Modulo => BinOp::SRem,
                BinaryOp::And => BinOp::And,
                BinaryOp::Or => BinOp::Or,
                BinaryOp::Xor => BinOp::Xor,
                BinaryOp::ShiftLeft => BinOp::Shl,
                BinaryOp::ShiftRight => BinOp::AShr,
                BinaryOp::ShiftRightUnsigned => BinOp::LShr,
                BinaryOp::Compare => {
                    return Err(self.malformed("three-way compare lowered as arithmetic"));
                }
            }
        };
        self.f.assign(&dest, Instr::Binary { op, ty, lhs, rhs });
        Ok(())
    }

    /// Shift distances are `int`, masked to the operand width
    fn shift_amount(&mut self, amount: Var, ty: &IrType) -> CodegenResult<Value> {
        self.expect_type(amount, &IrType::I32)?;
        let mut value = self.var(amount);
        if *ty == IrType::I64 {
            value = self.f.define(Instr::Cast {
                op: CastOp::SExt,
                value: value.typed(IrType::I32),
                to: IrType::I64,
            });
        }
        let mask = match ty.bits() {
            Some(bits) => i64::from(bits) - 1,
            None => 31,
        };
        Ok(self.f.define(Instr::Binary {
            op: BinOp::And,
            ty: ty.clone(),
            lhs: value,
            rhs: Value::Int(mask),
        }))
    }

    pub(super) fn lower_negate(&mut self, receiver: Var, operand: Var, ty: NumericType) -> CodegenResult<()> {
        let ir_ty = numeric_type(ty);
        self.expect_type(operand, &ir_ty)?;
        self.expect_type(receiver, &ir_ty)?;
        let value = self.var(operand);
        let dest = self.var(receiver);
        let instr = if ty.is_float() {
            Instr::FNeg { ty: ir_ty, value }
        } else {
            Instr::Binary {
                op: BinOp::Sub,
                ty: ir_ty,
                lhs: Value::Int(0),
                rhs: value,
            }
        };
        self.f.assign(&dest, instr);
        Ok(())
    }

    pub(super) fn lower_numeric_cast(
        &mut self,
        receiver: Var,
        value: Var,
        from: NumericType,
        to: NumericType,
    ) -> CodegenResult<()> {
        let from_ty = numeric_type(from);
        let to_ty = numeric_type(to);
        self.expect_type(value, &from_ty)?;
        self.expect_type(receiver, &to_ty)?;
        let source = self.var(value);
        if from == to {
            return self.copy_into(receiver, to_ty, source);
        }

        let op = match (from.is_float(), to.is_float()) {
            (false, false) if from == NumericType::Int => CastOp::SExt,
            (false, false) => CastOp::Trunc,
            (false, true) => CastOp::SiToFp,
            (true, false) => CastOp::FpToSi,
            (true, true) if from == NumericType::Float => CastOp::FpExt,
            (true, true) => CastOp::FpTrunc,
        };
        let dest = self.var(receiver);
        self.f.assign(
            &dest,
            Instr::Cast {
                op,
                value: source.typed(from_ty),
                to: to_ty,
            },
        );
        Ok(())
    }

    /// Narrowing and widening between `int` and its sub-types: both
    /// directions truncate to the sub-type width and extend back, signed
    /// for `byte`/`short`, unsigned for `char`
    pub(super) fn lower_integer_cast(
        &mut self,
        receiver: Var,
        value: Var,
        subtype: IntegerSubtype,
        _direction: CastDirection,
    ) -> CodegenResult<()> {
        self.expect_type(value, &IrType::I32)?;
        self.expect_type(receiver, &IrType::I32)?;
        let (narrow, extend) = match subtype {
            IntegerSubtype::Byte => (IrType::I8, CastOp::SExt),
            IntegerSubtype::Short => (IrType::I16, CastOp::SExt),
            IntegerSubtype::Char => (IrType::I16, CastOp::ZExt),
        };
        let source = self.var(value);
        let truncated = self.f.define(Instr::Cast {
            op: CastOp::Trunc,
            value: source.typed(IrType::I32),
            to: narrow.clone(),
        });
        let dest = self.var(receiver);
        self.f.assign(
            &dest,
            Instr::Cast {
                op: extend,
                value: truncated.typed(narrow),
                to: IrType::I32,
            },
        );
        Ok(())
    }
}
