//! Allocation, field and array access, type tests

use super::MethodRenderer;
use crate::emit::metadata::{array_class_symbol, ITABLE_TAG_LOWER};
use crate::error::{CodegenError, CodegenResult};
use crate::ir::{BinOp, CastOp, Instr, IntPredicate, IrType, Operand, PhiSource, Term, Value};
use crate::mangle;
use crate::tags::TagRange;
use kindle_model::{ArrayKind, FieldRef, PrimitiveType, ValueType, Var, VariableKind};

/// Element index of the length in `%rt.Array`
const ARRAY_LENGTH: i64 = 1;
/// Element index of the element class in `%rt.Array`
const ARRAY_ELEMENT_CLASS: i64 = 2;

/// What an object array's element class must satisfy
enum ElementCheck {
    Any,
    Tags(Vec<TagRange>),
    Class(Value),
}

/// Extension that widens a stored value of this type to its register type
fn widening(ty: &ValueType) -> CastOp {
    match ty {
        ValueType::Primitive(PrimitiveType::Boolean | PrimitiveType::Char) => CastOp::ZExt,
        _ => CastOp::SExt,
    }
}

fn element_widening(kind: ArrayKind) -> CastOp {
    match kind {
        ArrayKind::Char => CastOp::ZExt,
        _ => CastOp::SExt,
    }
}

impl<'p, 'b, 's> MethodRenderer<'p, 'b, 's> {
    // ========================================================================
    // Allocation
    // ========================================================================

    pub(super) fn lower_construct(&mut self, receiver: Var, class: &str) -> CodegenResult<()> {
        let backend = self.backend;
        let def = backend
            .program()
            .lookup(class)
            .ok_or_else(|| CodegenError::missing_class(class))?;
        if def.is_interface || backend.layouts().layout(class).is_none() {
            return Err(self.mismatch(format!("cannot instantiate {}", class)));
        }
        self.expect_type(receiver, &IrType::Ptr)?;
        let dest = self.var(receiver);
        self.f.assign(
            &dest,
            Instr::Call {
                ret: IrType::Ptr,
                callee: Value::global("rt.alloc"),
                args: vec![Operand::ptr(Value::global(mangle::vtable_symbol(class)))],
            },
        );
        Ok(())
    }

    pub(super) fn lower_construct_array(
        &mut self,
        receiver: Var,
        item_type: &ValueType,
        size: Var,
    ) -> CodegenResult<()> {
        if item_type.is_void() {
            return Err(self.mismatch("array of void"));
        }
        self.expect_type(size, &IrType::I32)?;
        self.expect_type(receiver, &IrType::Ptr)?;
        let kind = item_type.array_element_kind();
        let element = IrType::element(kind);
        let element_size = element.scalar_size().unwrap_or(8);

        let count = self.var(size);
        let dest = self.var(receiver);
        self.f.assign(
            &dest,
            Instr::Call {
                ret: IrType::Ptr,
                callee: Value::global("rt.allocArray"),
                args: vec![
                    Operand::ptr(Value::global(array_class_symbol(kind))),
                    Operand::i32(element_size as i32),
                    Operand::new(IrType::I32, count),
                ],
            },
        );

        if kind == ArrayKind::Object {
            let element_class = self.class_constant(item_type)?;
            let slot = self.f.define(Instr::Gep {
                base: IrType::named("rt.Array"),
                ptr: dest,
                indices: vec![Value::Int(0), Value::Int(ARRAY_ELEMENT_CLASS)],
            });
            self.f.emit(Instr::Store {
                value: Operand::ptr(element_class),
                ptr: slot,
            });
        }
        Ok(())
    }

    pub(super) fn lower_clone_array(&mut self, receiver: Var, array: Var) -> CodegenResult<()> {
        self.array_kind(array)?;
        self.expect_type(receiver, &IrType::Ptr)?;
        let source = self.var(array);
        let dest = self.var(receiver);
        self.f.assign(
            &dest,
            Instr::Call {
                ret: IrType::Ptr,
                callee: Value::global("rt.cloneArray"),
                args: vec![Operand::ptr(source)],
            },
        );
        Ok(())
    }

    /// Metadata global describing values of a reference type
    fn class_constant(&self, ty: &ValueType) -> CodegenResult<Value> {
        match ty {
            ValueType::Object(class) => {
                if self.backend.program().lookup(class).is_none() {
                    return Err(CodegenError::missing_class(class.clone()));
                }
                Ok(Value::global(mangle::vtable_symbol(class)))
            }
            ValueType::Array(item) => Ok(Value::global(array_class_symbol(item.array_element_kind()))),
            other => Err(CodegenError::unsupported(format!("class constant of {}", other))),
        }
    }

    pub(super) fn lower_class_constant(&mut self, receiver: Var, ty: &ValueType) -> CodegenResult<()> {
        let value = self.class_constant(ty)?;
        self.copy_into(receiver, IrType::Ptr, value)
    }

    // ========================================================================
    // Fields
    // ========================================================================

    /// Address of a field: the static global, or the element of the
    /// instance's structure
    fn field_address(&mut self, instance: Option<Var>, field: &FieldRef) -> CodegenResult<(Value, ValueType)> {
        let backend = self.backend;
        let missing = || CodegenError::MissingField {
            field: format!("{}.{}", field.class, field.name),
        };

        let Some(instance) = instance else {
            let (owner, def) = backend.program().resolve_field(field).ok_or_else(missing)?;
            if !def.is_static {
                return Err(self.mismatch(format!("static access to instance field {}.{}", owner, field.name)));
            }
            return Ok((Value::global(mangle::field_name(owner, &def.name)), def.ty.clone()));
        };

        self.expect_reference(instance)?;
        let slot = backend.layouts().field(field).ok_or_else(missing)?;
        let ptr = self.var(instance);
        let address = self.f.define(Instr::Gep {
            base: IrType::named(mangle::class_type(&field.class)),
            ptr,
            indices: vec![Value::Int(0), Value::Int(i64::from(slot.index))],
        });
        Ok((address, slot.ty.clone()))
    }

    pub(super) fn lower_get_field(
        &mut self,
        receiver: Var,
        instance: Option<Var>,
        field: &FieldRef,
        field_type: &ValueType,
    ) -> CodegenResult<()> {
        let (address, declared) = self.field_address(instance, field)?;
        self.check_field_type(field, field_type, &declared)?;
        let storage = IrType::storage(&declared);
        let register = IrType::of_value(&declared);
        self.expect_type(receiver, &register)?;

        let dest = self.var(receiver);
        if storage == register {
            self.f.assign(&dest, Instr::Load { ty: storage, ptr: address });
        } else {
            let loaded = self.f.define(Instr::Load {
                ty: storage.clone(),
                ptr: address,
            });
            self.f.assign(
                &dest,
                Instr::Cast {
                    op: widening(&declared),
                    value: loaded.typed(storage),
                    to: register,
                },
            );
        }
        Ok(())
    }

    pub(super) fn lower_put_field(
        &mut self,
        instance: Option<Var>,
        field: &FieldRef,
        value: Var,
        field_type: &ValueType,
    ) -> CodegenResult<()> {
        let (address, declared) = self.field_address(instance, field)?;
        self.check_field_type(field, field_type, &declared)?;
        let storage = IrType::storage(&declared);
        let register = IrType::of_value(&declared);
        self.expect_type(value, &register)?;

        let source = self.var(value);
        let stored = self.narrow(source, &register, &storage);
        self.f.emit(Instr::Store {
            value: stored.typed(storage),
            ptr: address,
        });
        Ok(())
    }

    fn check_field_type(&self, field: &FieldRef, used: &ValueType, declared: &ValueType) -> CodegenResult<()> {
        if used.kind() != declared.kind() && !(used.is_reference() && declared.is_reference()) {
            return Err(self.mismatch(format!(
                "field {}.{} is {} but accessed as {}",
                field.class, field.name, declared, used
            )));
        }
        Ok(())
    }

    /// Truncate a register value to a narrower storage type
    fn narrow(&mut self, value: Value, register: &IrType, storage: &IrType) -> Value {
        if register == storage {
            return value;
        }
        self.f.define(Instr::Cast {
            op: CastOp::Trunc,
            value: value.typed(register.clone()),
            to: storage.clone(),
        })
    }

    // ========================================================================
    // Arrays
    // ========================================================================

    fn array_kind(&self, array: Var) -> CodegenResult<ArrayKind> {
        match self.kind(array)? {
            VariableKind::Array(kind) => Ok(kind),
            other => Err(self.mismatch(format!("{} is {}, not an array", array, other))),
        }
    }

    pub(super) fn lower_array_length(&mut self, receiver: Var, array: Var) -> CodegenResult<()> {
        self.array_kind(array)?;
        self.expect_type(receiver, &IrType::I32)?;
        let ptr = self.var(array);
        let length = self.f.define(Instr::Gep {
            base: IrType::named("rt.Array"),
            ptr,
            indices: vec![Value::Int(0), Value::Int(ARRAY_LENGTH)],
        });
        let dest = self.var(receiver);
        self.f.assign(
            &dest,
            Instr::Load {
                ty: IrType::I32,
                ptr: length,
            },
        );
        Ok(())
    }

    /// Address of an element; the data follows the array header
    fn element_address(&mut self, array: Var, index: Var, element: &IrType) -> CodegenResult<Value> {
        self.expect_type(index, &IrType::I32)?;
        let ptr = self.var(array);
        let data = self.f.define(Instr::Gep {
            base: IrType::named("rt.Array"),
            ptr,
            indices: vec![Value::Int(1)],
        });
        let index = self.var(index);
        Ok(self.f.define(Instr::Gep {
            base: element.clone(),
            ptr: data,
            indices: vec![index],
        }))
    }

    pub(super) fn lower_get_element(&mut self, receiver: Var, array: Var, index: Var) -> CodegenResult<()> {
        let kind = self.array_kind(array)?;
        let element = IrType::element(kind);
        let register = IrType::of_kind(kind.element_kind());
        self.expect_type(receiver, &register)?;
        let address = self.element_address(array, index, &element)?;

        let dest = self.var(receiver);
        if element == register {
            self.f.assign(&dest, Instr::Load { ty: element, ptr: address });
        } else {
            let loaded = self.f.define(Instr::Load {
                ty: element.clone(),
                ptr: address,
            });
            self.f.assign(
                &dest,
                Instr::Cast {
                    op: element_widening(kind),
                    value: loaded.typed(element),
                    to: register,
                },
            );
        }
        Ok(())
    }

    pub(super) fn lower_put_element(&mut self, array: Var, index: Var, value: Var) -> CodegenResult<()> {
        let kind = self.array_kind(array)?;
        let element = IrType::element(kind);
        let register = IrType::of_kind(kind.element_kind());
        self.expect_type(value, &register)?;
        let address = self.element_address(array, index, &element)?;
        let source = self.var(value);
        let stored = self.narrow(source, &register, &element);
        self.f.emit(Instr::Store {
            value: stored.typed(element),
            ptr: address,
        });
        Ok(())
    }

    // ========================================================================
    // Type tests
    // ========================================================================

    pub(super) fn lower_is_instance(&mut self, receiver: Var, value: Var, ty: &ValueType) -> CodegenResult<()> {
        self.expect_reference(value)?;
        self.expect_type(receiver, &IrType::I32)?;
        let backend = self.backend;
        let value_kind = self.kind(value)?;

        match ty {
            ValueType::Object(class) => {
                if backend.program().lookup(class).is_none() {
                    return Err(CodegenError::missing_class(class.clone()));
                }
                // Every object, arrays included, is an instance of the root
                if *class == backend.config().root_class {
                    return self.null_test(receiver, value);
                }
                if matches!(value_kind, VariableKind::Array(_)) {
                    return self.copy_into(receiver, IrType::I32, Value::Int(0));
                }
                let ranges = backend.tags().ranges(class).unwrap_or_default();
                if ranges.is_empty() {
                    return self.copy_into(receiver, IrType::I32, Value::Int(0));
                }
                self.tag_test(receiver, value, &ranges);
                Ok(())
            }
            ValueType::Array(item) => {
                let kind = item.array_element_kind();
                if kind == ArrayKind::Object {
                    return self.object_array_test(receiver, value, item);
                }
                if value_kind == VariableKind::Array(kind) {
                    return self.null_test(receiver, value);
                }
                self.array_class_test(receiver, value, kind);
                Ok(())
            }
            other => Err(self.mismatch(format!("type test against {}", other))),
        }
    }

    fn null_test(&mut self, receiver: Var, value: Var) -> CodegenResult<()> {
        let ptr = self.var(value);
        let present = self.f.define(Instr::Icmp {
            pred: IntPredicate::Ne,
            ty: IrType::Ptr,
            lhs: ptr,
            rhs: Value::Null,
        });
        self.widen_flag(receiver, present);
        Ok(())
    }

    fn widen_flag(&mut self, receiver: Var, flag: Value) {
        let dest = self.var(receiver);
        self.f.assign(
            &dest,
            Instr::Cast {
                op: CastOp::ZExt,
                value: flag.typed(IrType::I1),
                to: IrType::I32,
            },
        );
    }

    /// Branch around a null reference, compute `test` on the object's
    /// class metadata and merge the result
    fn guarded_test<F>(&mut self, receiver: Var, value: Var, test: F)
    where
        F: FnOnce(&mut Self, Value) -> Value,
    {
        let prefix = self.f.current_label().to_string();
        let ptr = self.var(value);
        let is_null = self.f.define(Instr::Icmp {
            pred: IntPredicate::Eq,
            ty: IrType::Ptr,
            lhs: ptr.clone(),
            rhs: Value::Null,
        });
        let from = self.f.current_label().to_string();
        let done = self.f.split_block(&prefix);
        let check = self.f.split_block(&prefix);
        self.f.terminate(Term::CondBr {
            cond: is_null,
            then_label: done.clone(),
            else_label: check.clone(),
        });

        self.f.switch_to(&check);
        let class = self.f.define(Instr::Load {
            ty: IrType::Ptr,
            ptr,
        });
        let result = test(self, class);
        let tested = self.f.current_label().to_string();
        self.f.terminate(Term::Br(done.clone()));

        self.f.switch_to(&done);
        let flag = self.f.fresh();
        self.f.phi(
            flag.clone(),
            IrType::I1,
            vec![
                (Value::Bool(false), PhiSource::Label(from)),
                (result, PhiSource::Label(tested)),
            ],
        );
        self.widen_flag(receiver, flag);
    }

    /// The class's tag lies in one of `ranges`
    fn tag_test(&mut self, receiver: Var, value: Var, ranges: &[TagRange]) {
        self.guarded_test(receiver, value, |this, class| this.tag_in_ranges(class, ranges));
    }

    fn tag_in_ranges(&mut self, class: Value, ranges: &[TagRange]) -> Value {
        let tag_ptr = self.f.define(Instr::Gep {
            base: IrType::named("rt.itable"),
            ptr: class,
            indices: vec![Value::Int(0), Value::Int(i64::from(ITABLE_TAG_LOWER))],
        });
        let tag = self.f.define(Instr::Load {
            ty: IrType::I32,
            ptr: tag_ptr,
        });
        let mut result: Option<Value> = None;
        for range in ranges {
            let above = self.f.define(Instr::Icmp {
                pred: IntPredicate::Sge,
                ty: IrType::I32,
                lhs: tag.clone(),
                rhs: Value::Int(i64::from(range.lower)),
            });
            let below = self.f.define(Instr::Icmp {
                pred: IntPredicate::Slt,
                ty: IrType::I32,
                lhs: tag.clone(),
                rhs: Value::Int(i64::from(range.upper)),
            });
            let inside = self.f.define(Instr::Binary {
                op: BinOp::And,
                ty: IrType::I1,
                lhs: above,
                rhs: below,
            });
            result = Some(match result {
                Some(previous) => self.f.define(Instr::Binary {
                    op: BinOp::Or,
                    ty: IrType::I1,
                    lhs: previous,
                    rhs: inside,
                }),
                None => inside,
            });
        }
        result.unwrap_or(Value::Bool(false))
    }

    /// An object array whose element class is a subtype of `item`. Arrays
    /// nested in the element type are matched by their runtime class only.
    fn object_array_test(&mut self, receiver: Var, value: Var, item: &ValueType) -> CodegenResult<()> {
        let backend = self.backend;
        let element_check = match item {
            ValueType::Object(class) if *class == backend.config().root_class => ElementCheck::Any,
            ValueType::Object(class) => {
                if backend.program().lookup(class).is_none() {
                    return Err(CodegenError::missing_class(class.clone()));
                }
                let ranges = backend.tags().ranges(class).unwrap_or_default();
                if ranges.is_empty() {
                    return self.copy_into(receiver, IrType::I32, Value::Int(0));
                }
                ElementCheck::Tags(ranges)
            }
            ValueType::Array(inner) => {
                ElementCheck::Class(Value::global(array_class_symbol(inner.array_element_kind())))
            }
            other => return Err(self.mismatch(format!("array of {}", other))),
        };
        if let ElementCheck::Any = element_check {
            self.array_class_test(receiver, value, ArrayKind::Object);
            return Ok(());
        }

        let array = self.var(value);
        self.guarded_test(receiver, value, |this, class| {
            let is_array = this.f.define(Instr::Icmp {
                pred: IntPredicate::Eq,
                ty: IrType::Ptr,
                lhs: class,
                rhs: Value::global(array_class_symbol(ArrayKind::Object)),
            });
            let prefix = this.f.current_label().to_string();
            let from = prefix.clone();
            let merged = this.f.split_block(&prefix);
            let element = this.f.split_block(&prefix);
            this.f.terminate(Term::CondBr {
                cond: is_array,
                then_label: element.clone(),
                else_label: merged.clone(),
            });

            this.f.switch_to(&element);
            // object arrays always carry their element class
            let slot = this.f.define(Instr::Gep {
                base: IrType::named("rt.Array"),
                ptr: array,
                indices: vec![Value::Int(0), Value::Int(ARRAY_ELEMENT_CLASS)],
            });
            let element_class = this.f.define(Instr::Load {
                ty: IrType::Ptr,
                ptr: slot,
            });
            let matches = match &element_check {
                ElementCheck::Tags(ranges) => this.tag_in_ranges(element_class, ranges),
                ElementCheck::Class(expected) => this.f.define(Instr::Icmp {
                    pred: IntPredicate::Eq,
                    ty: IrType::Ptr,
                    lhs: element_class,
                    rhs: expected.clone(),
                }),
                ElementCheck::Any => Value::Bool(true),
            };
            let tested = this.f.current_label().to_string();
            this.f.terminate(Term::Br(merged.clone()));

            this.f.switch_to(&merged);
            let flag = this.f.fresh();
            this.f.phi(
                flag.clone(),
                IrType::I1,
                vec![
                    (Value::Bool(false), PhiSource::Label(from)),
                    (matches, PhiSource::Label(tested)),
                ],
            );
            flag
        });
        Ok(())
    }

    /// The object's class is the runtime array class of `kind`
    fn array_class_test(&mut self, receiver: Var, value: Var, kind: ArrayKind) {
        self.guarded_test(receiver, value, |this, class| {
            this.f.define(Instr::Icmp {
                pred: IntPredicate::Eq,
                ty: IrType::Ptr,
                lhs: class,
                rhs: Value::global(array_class_symbol(kind)),
            })
        });
    }
}
