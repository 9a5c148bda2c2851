//! Structural validation of method bodies
//!
//! The backend assumes every block and variable a body references exists,
//! every block is terminated, and phi incomings name actual predecessors.
//! `validate_program` checks those assumptions up front so lowering can
//! index without further checks.

use crate::body::{BlockId, Body, Var};
use crate::class::ClassDef;
use crate::error::{ModelError, ModelResult};
use crate::program::Program;
use rustc_hash::FxHashSet;

/// Validate every method body in the program
pub fn validate_program(program: &Program) -> ModelResult<()> {
    for class in program.classes() {
        validate_class(class)?;
    }
    Ok(())
}

pub fn validate_class(class: &ClassDef) -> ModelResult<()> {
    for method in &class.methods {
        if let Some(body) = &method.body {
            let name = format!("{}.{}", class.name, method.desc);
            validate_body(&name, body)?;
        }
    }
    Ok(())
}

/// Validate a single body; `method` is only used in error messages
pub fn validate_body(method: &str, body: &Body) -> ModelResult<()> {
    if body.blocks.is_empty() {
        return Err(ModelError::MalformedBody {
            method: method.to_string(),
            message: "body has no blocks".to_string(),
        });
    }

    let check_block = |block: BlockId| -> ModelResult<()> {
        if block.index() < body.blocks.len() {
            Ok(())
        } else {
            Err(ModelError::UnknownBlock {
                method: method.to_string(),
                block: block.0,
            })
        }
    };
    let check_var = |var: Var| -> ModelResult<()> {
        if var.index() < body.variables.len() {
            Ok(())
        } else {
            Err(ModelError::UnknownVariable {
                method: method.to_string(),
                var: var.0,
            })
        }
    };

    let mut predecessors: Vec<Vec<BlockId>> = vec![Vec::new(); body.blocks.len()];

    for (index, block) in body.blocks.iter().enumerate() {
        let id = BlockId(index as u32);
        if !block.is_terminated() {
            return Err(ModelError::MissingTerminator {
                method: method.to_string(),
                block: id.0,
            });
        }
        for succ in body.successors(id) {
            check_block(succ)?;
            predecessors[succ.index()].push(id);
        }
        for phi in &block.phis {
            check_var(phi.receiver)?;
            for incoming in &phi.incomings {
                check_block(incoming.source)?;
                check_var(incoming.value)?;
            }
        }
        for instr in &block.instructions {
            if let Some(def) = instr.defined() {
                check_var(def)?;
            }
            for used in instr.used() {
                check_var(used)?;
            }
        }
        for used in block.terminator.used() {
            check_var(used)?;
        }
        if let Some(var) = block.exception_variable {
            check_var(var)?;
        }
    }

    for (index, block) in body.blocks.iter().enumerate() {
        for phi in &block.phis {
            for incoming in &phi.incomings {
                if !predecessors[index].contains(&incoming.source) {
                    return Err(ModelError::MalformedBody {
                        method: method.to_string(),
                        message: format!(
                            "phi {} in b{} has incoming from b{}, which is not a predecessor",
                            phi.receiver, index, incoming.source.0
                        ),
                    });
                }
            }
        }
    }

    validate_handler_inputs(method, body)
}

/// A handler is entered from the protected block's landing pad, which only
/// the definitions made before the block's first call site dominate. Values
/// defined from that site on may not flow into the handler.
fn validate_handler_inputs(method: &str, body: &Body) -> ModelResult<()> {
    for (index, block) in body.blocks.iter().enumerate() {
        if block.try_catches.is_empty() {
            continue;
        }
        let Some(first_site) = block.instructions.iter().position(|instr| instr.is_call_site()) else {
            continue;
        };
        let late: FxHashSet<Var> = block.instructions[first_site..]
            .iter()
            .filter_map(|instr| instr.defined())
            .collect();
        if late.is_empty() {
            continue;
        }
        let protected = BlockId(index as u32);
        let unavailable = |var: Var, handler: BlockId| ModelError::MalformedBody {
            method: method.to_string(),
            message: format!(
                "{} reaches handler b{} but is defined after the first call site of b{}",
                var, handler.0, index
            ),
        };

        for tc in &block.try_catches {
            let handler = &body.blocks[tc.handler.index()];
            for phi in &handler.phis {
                for incoming in &phi.incomings {
                    if incoming.source == protected && late.contains(&incoming.value) {
                        return Err(unavailable(incoming.value, tc.handler));
                    }
                }
            }
            if tc.handler == protected {
                continue;
            }
            let uses = handler
                .instructions
                .iter()
                .flat_map(|instr| instr.used())
                .chain(handler.terminator.used());
            for used in uses {
                if late.contains(&used) {
                    return Err(unavailable(used, tc.handler));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::{BasicBlock, Incoming, Instruction, InvocationKind, Phi, Terminator};
    use crate::builder::static_body;
    use crate::descriptor::{MethodDescriptor, MethodRef};
    use crate::types::{ValueType, VariableKind};

    fn exit_block() -> BasicBlock {
        let mut block = BasicBlock::new();
        block.terminator = Terminator::Exit { value: None };
        block
    }

    #[test]
    fn test_valid_body() {
        let mut body = Body::default();
        body.variables.push(VariableKind::Int);
        let mut entry = BasicBlock::new();
        entry.instructions.push(Instruction::IntConstant {
            receiver: Var(0),
            value: 1,
        });
        entry.terminator = Terminator::Exit {
            value: Some(Var(0)),
        };
        body.blocks.push(entry);
        assert!(validate_body("f", &body).is_ok());
    }

    #[test]
    fn test_unknown_variable() {
        let mut body = Body::default();
        let mut entry = BasicBlock::new();
        entry.terminator = Terminator::Exit {
            value: Some(Var(3)),
        };
        body.blocks.push(entry);
        assert!(matches!(
            validate_body("f", &body),
            Err(ModelError::UnknownVariable { var: 3, .. })
        ));
    }

    #[test]
    fn test_unknown_jump_target() {
        let mut body = Body::default();
        let mut entry = BasicBlock::new();
        entry.terminator = Terminator::Jump { target: BlockId(7) };
        body.blocks.push(entry);
        assert!(matches!(
            validate_body("f", &body),
            Err(ModelError::UnknownBlock { block: 7, .. })
        ));
    }

    #[test]
    fn test_missing_terminator() {
        let mut body = Body::default();
        body.blocks.push(BasicBlock::new());
        assert!(matches!(
            validate_body("f", &body),
            Err(ModelError::MissingTerminator { block: 0, .. })
        ));
    }

    #[test]
    fn test_phi_from_non_predecessor() {
        let mut body = Body::default();
        body.variables.push(VariableKind::Int);
        let mut entry = BasicBlock::new();
        entry.terminator = Terminator::Jump { target: BlockId(1) };
        let mut join = exit_block();
        join.phis.push(Phi {
            receiver: Var(0),
            incomings: vec![Incoming {
                source: BlockId(2),
                value: Var(0),
            }],
        });
        body.blocks.push(entry);
        body.blocks.push(join);
        body.blocks.push(exit_block());
        assert!(matches!(
            validate_body("f", &body),
            Err(ModelError::MalformedBody { .. })
        ));
    }

    fn call_f(b: &mut crate::builder::BodyBuilder) {
        let f = MethodRef::new("Main", MethodDescriptor::new("f", vec![], ValueType::Void));
        b.invoke(InvocationKind::Static, f, None, vec![]);
    }

    /// `try { f(); x = 7; f(); } catch { merged = phi(x) }`
    fn late_value_into_handler(define_first: bool) -> Body {
        let (mut b, _) = static_body(&[]);
        let handler = b.create_block();
        let done = b.create_block();
        b.try_catch(None, handler);
        let x = if define_first {
            let x = b.const_int(7);
            call_f(&mut b);
            x
        } else {
            call_f(&mut b);
            b.const_int(7)
        };
        call_f(&mut b);
        b.jump(done);

        b.switch_to_block(handler);
        let merged = b.var(VariableKind::Int);
        b.phi(merged, &[(BlockId(0), x)]);
        b.exit(None);

        b.switch_to_block(done);
        b.exit(None);
        b.finish()
    }

    #[test]
    fn test_handler_phi_from_value_defined_after_call_site() {
        assert!(matches!(
            validate_body("f", &late_value_into_handler(false)),
            Err(ModelError::MalformedBody { .. })
        ));
    }

    #[test]
    fn test_handler_phi_from_value_defined_before_call_site() {
        assert!(validate_body("f", &late_value_into_handler(true)).is_ok());
    }

    #[test]
    fn test_handler_use_of_call_result() {
        let (mut b, _) = static_body(&[]);
        let handler = b.create_block();
        b.try_catch(None, handler);
        let get = MethodRef::new("Main", MethodDescriptor::new("get", vec![], ValueType::INT));
        let result = b.invoke(InvocationKind::Static, get, None, vec![]);
        b.exit(result);

        b.switch_to_block(handler);
        b.exit(result);
        assert!(matches!(
            validate_body("f", &b.finish()),
            Err(ModelError::MalformedBody { .. })
        ));
    }
}
