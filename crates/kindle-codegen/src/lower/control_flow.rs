//! Phis and terminators

use super::frame::landing_label;
use super::{block_label, MethodRenderer};
use crate::error::CodegenResult;
use crate::ir::{Instr, IntPredicate, IrType, Operand, PhiSource, Term, Value};
use kindle_model::{BinaryBranchCondition, BlockId, BranchCondition, Terminator, Var};

impl<'p, 'b, 's> MethodRenderer<'p, 'b, 's> {
    /// One IR phi per source phi, with an incoming per IR edge into the
    /// block: normal edges leave the source block's last split, handler
    /// edges leave its landing pad
    pub(super) fn lower_phis(&mut self, id: BlockId) -> CodegenResult<()> {
        let body = self.body;
        let block = &body.blocks[id.index()];
        for phi in &block.phis {
            let ty = self.reg_type(phi.receiver)?;
            let mut incomings: Vec<(Value, PhiSource)> = Vec::new();
            if id == BlockId(0) {
                incomings.push((Value::Undef, PhiSource::Label(self.entry_label.clone())));
            }
            for incoming in &phi.incomings {
                self.expect_type(incoming.value, &ty)?;
                let value = self.var(incoming.value);
                let Some(source) = body.block(incoming.source) else {
                    return Err(self.malformed(format!("phi source {} does not exist", incoming.source)));
                };
                for _ in 0..edge_count(&source.terminator, id) {
                    incomings.push((value.clone(), PhiSource::Block(incoming.source)));
                }
                if self.throwing.contains(&incoming.source) {
                    let handler_edges = source.try_catches.iter().filter(|tc| tc.handler == id).count();
                    for _ in 0..handler_edges {
                        incomings.push((value.clone(), PhiSource::Label(landing_label(incoming.source))));
                    }
                }
            }
            let dest = self.var(phi.receiver);
            self.f.phi(dest, ty, incomings);
        }
        Ok(())
    }

    pub(super) fn lower_terminator(&mut self, terminator: &Terminator) -> CodegenResult<()> {
        match terminator {
            Terminator::Jump { target } => {
                self.f.terminate(Term::Br(block_label(*target)));
            }
            Terminator::Branch {
                condition,
                operand,
                consequent,
                alternative,
            } => {
                let cond = self.branch_condition(*condition, *operand)?;
                self.f.terminate(Term::CondBr {
                    cond,
                    then_label: block_label(*consequent),
                    else_label: block_label(*alternative),
                });
            }
            Terminator::BinaryBranch {
                condition,
                first,
                second,
                consequent,
                alternative,
            } => {
                let cond = self.binary_branch_condition(*condition, *first, *second)?;
                self.f.terminate(Term::CondBr {
                    cond,
                    then_label: block_label(*consequent),
                    else_label: block_label(*alternative),
                });
            }
            Terminator::Switch {
                condition,
                table,
                default,
            } => {
                self.expect_type(*condition, &IrType::I32)?;
                let cases = table
                    .iter()
                    .map(|(value, target)| (i64::from(*value), block_label(*target)))
                    .collect();
                let value = self.var(*condition);
                self.f.terminate(Term::Switch {
                    ty: IrType::I32,
                    value,
                    default: block_label(*default),
                    cases,
                });
            }
            Terminator::Exit { value } => self.lower_exit(*value)?,
            Terminator::Raise { exception } => {
                self.expect_reference(*exception)?;
                let exception = self.var(*exception);
                self.f.call(
                    IrType::Void,
                    Value::global("rt.throw"),
                    vec![Operand::ptr(exception)],
                );
                let site = self.begin_site(&[])?;
                let target = self.exception_target(site);
                self.f.terminate(Term::Br(target));
            }
            Terminator::Unreachable => {
                self.f.terminate(Term::Unreachable);
            }
        }
        Ok(())
    }

    fn lower_exit(&mut self, value: Option<Var>) -> CodegenResult<()> {
        let ret = self.f.ret_type().clone();
        match (value, ret == IrType::Void) {
            (None, true) => self.return_value(None),
            (Some(var), false) => {
                self.expect_type(var, &ret)?;
                let value = self.var(var);
                self.return_value(Some(value));
            }
            (Some(var), true) => {
                return Err(self.mismatch(format!("void method returns {}", var)));
            }
            (None, false) => {
                return Err(self.malformed(format!("missing {} return value", ret)));
            }
        }
        Ok(())
    }

    /// Test of one operand against zero or null
    fn branch_condition(&mut self, condition: BranchCondition, operand: Var) -> CodegenResult<Value> {
        let ty = self.reg_type(operand)?;
        let is_pointer = ty == IrType::Ptr;
        let pred = match condition {
            BranchCondition::Null => IntPredicate::Eq,
            BranchCondition::NotNull => IntPredicate::Ne,
            BranchCondition::Equal => IntPredicate::Eq,
            BranchCondition::NotEqual => IntPredicate::Ne,
            BranchCondition::Less => IntPredicate::Slt,
            BranchCondition::LessOrEqual => IntPredicate::Sle,
            BranchCondition::Greater => IntPredicate::Sgt,
            BranchCondition::GreaterOrEqual => IntPredicate::Sge,
        };
        let null_test = matches!(condition, BranchCondition::Null | BranchCondition::NotNull);
        let ordering = !matches!(pred, IntPredicate::Eq | IntPredicate::Ne);
        if null_test && !is_pointer {
            return Err(self.mismatch(format!("null test on {} operand {}", ty, operand)));
        }
        if !is_pointer && !ty.is_integer() {
            return Err(self.mismatch(format!("branch on {} operand {}", ty, operand)));
        }
        if ordering && is_pointer {
            return Err(self.mismatch(format!("ordered comparison of reference {}", operand)));
        }

        let zero = Value::zero_of(&ty);
        let lhs = self.var(operand);
        Ok(self.f.define(Instr::Icmp {
            pred,
            ty,
            lhs,
            rhs: zero,
        }))
    }

    fn binary_branch_condition(
        &mut self,
        condition: BinaryBranchCondition,
        first: Var,
        second: Var,
    ) -> CodegenResult<Value> {
        let ty = self.reg_type(first)?;
        self.expect_type(second, &ty)?;
        let (pred, references) = match condition {
            BinaryBranchCondition::Equal => (IntPredicate::Eq, false),
            BinaryBranchCondition::NotEqual => (IntPredicate::Ne, false),
            BinaryBranchCondition::ReferenceEqual => (IntPredicate::Eq, true),
            BinaryBranchCondition::ReferenceNotEqual => (IntPredicate::Ne, true),
        };
        if references != (ty == IrType::Ptr) || !(ty == IrType::Ptr || ty.is_integer()) {
            return Err(self.mismatch(format!("{:?} on {} operands", condition, ty)));
        }
        let lhs = self.var(first);
        let rhs = self.var(second);
        Ok(self.f.define(Instr::Icmp { pred, ty, lhs, rhs }))
    }
}

/// Number of IR edges a lowered terminator has into `target`
fn edge_count(terminator: &Terminator, target: BlockId) -> usize {
    match terminator {
        Terminator::Jump { target: t } => usize::from(*t == target),
        Terminator::Branch {
            consequent,
            alternative,
            ..
        }
        | Terminator::BinaryBranch {
            consequent,
            alternative,
            ..
        } => usize::from(*consequent == target) + usize::from(*alternative == target),
        Terminator::Switch { table, default, .. } => {
            table.iter().filter(|(_, t)| *t == target).count() + usize::from(*default == target)
        }
        Terminator::Exit { .. } | Terminator::Raise { .. } | Terminator::Unreachable => 0,
    }
}
