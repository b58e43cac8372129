//! Args, locals and the `Debug` object, and the rules for reading the value of an operand and for
//! storing into a target.

use crate::{
    exec::{Executor, Operand, ParseMode},
    namespace::{AmlHandle, NodeObject},
    object::{SharedBytes, Variable},
    op_region::{read_buffer_field, write_buffer_field},
    AmlError,
};
use log::warn;

/// Where a store to a node ends up.
enum StoreTarget {
    Name(Variable),
    Field,
    BufferField { buffer: SharedBytes, bit_offset: u64, bit_length: u64 },
}

impl Variable {
    /// Whether this object refers to another object, so reading and writing through it is possible.
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Variable::NodeRef(_)
                | Variable::ArgRef(..)
                | Variable::LocalRef(..)
                | Variable::StringIndex(..)
                | Variable::BufferIndex(..)
                | Variable::PackageIndex(..)
        )
    }
}

impl Executor<'_> {
    /*
     * ArgObj := Arg0Op | Arg1Op | Arg2Op | Arg3Op | Arg4Op | Arg5Op | Arg6Op
     * LocalObj := Local0Op | Local1Op | Local2Op | Local3Op | Local4Op | Local5Op | Local6Op | Local7Op
     */
    pub(crate) fn parse_arg(&mut self, index: usize, mode: ParseMode) -> Result<(), AmlError> {
        if mode.is_reference() {
            self.operands.push(Operand::Arg(index));
            return Ok(());
        }
        let value = self.invocation()?.args.lock()[index].clone();
        self.push_value(mode, value);
        Ok(())
    }

    pub(crate) fn parse_local(&mut self, index: usize, mode: ParseMode) -> Result<(), AmlError> {
        if mode.is_reference() {
            self.operands.push(Operand::Local(index));
            return Ok(());
        }
        let value = self.invocation()?.locals.lock()[index].clone();
        self.push_value(mode, value);
        Ok(())
    }

    /// The `Debug` object can only be written to. Reading it gives an uninitialized object.
    pub(crate) fn parse_debug(&mut self, mode: ParseMode) {
        if mode.is_reference() {
            self.operands.push(Operand::Debug);
        } else {
            self.push_value(mode, Variable::None);
        }
    }

    /// Get the value of a node. Names give their object, fields are read from their region, and
    /// everything else is represented by a reference to the node.
    pub(crate) fn load_node(&self, handle: AmlHandle) -> Result<Variable, AmlError> {
        let (handle, target) = {
            let namespace = self.interpreter.namespace.lock();
            let handle = namespace.resolve_alias(handle);
            let target = match &namespace.node(handle)?.object {
                NodeObject::Name(object) => return Ok(object.clone()),
                NodeObject::Field(_) => StoreTarget::Field,
                NodeObject::BufferField { buffer, bit_offset, bit_length } => StoreTarget::BufferField {
                    buffer: buffer.clone(),
                    bit_offset: *bit_offset,
                    bit_length: *bit_length,
                },
                _ => return Ok(Variable::NodeRef(handle)),
            };
            (handle, target)
        };

        match target {
            StoreTarget::BufferField { buffer, bit_offset, bit_length } => {
                read_buffer_field(&buffer, bit_offset, bit_length)
            }
            _ => self.interpreter.read_field(handle),
        }
    }

    /// Get the value of an operand that was parsed in a `Reference` mode. References held in args
    /// are followed, so that a method can operate on an object passed to it with `RefOf`.
    pub(crate) fn read_operand(&self, operand: &Operand) -> Result<Variable, AmlError> {
        match operand {
            Operand::Object(object) => Ok(object.clone()),
            Operand::Resolved(handle) => self.load_node(*handle),
            Operand::Unresolved { scope, name } => {
                let handle = self.interpreter.namespace.lock().resolve(*scope, name);
                self.load_node(handle.ok_or(AmlError::NoSuchNode)?)
            }
            Operand::Arg(index) => {
                let value = self.invocation()?.args.lock()[*index].clone();
                if value.is_reference() {
                    self.deref(&value)
                } else {
                    Ok(value)
                }
            }
            Operand::Local(index) => Ok(self.invocation()?.locals.lock()[*index].clone()),
            Operand::Debug | Operand::Null => Ok(Variable::None),
        }
    }

    /// Get the object that a reference refers to.
    pub(crate) fn deref(&self, reference: &Variable) -> Result<Variable, AmlError> {
        match reference {
            Variable::NodeRef(handle) => self.load_node(*handle),
            Variable::ArgRef(invocation, index) => Ok(invocation.args.lock()[*index].clone()),
            Variable::LocalRef(invocation, index) => Ok(invocation.locals.lock()[*index].clone()),
            Variable::StringIndex(bytes, index) | Variable::BufferIndex(bytes, index) => {
                let byte = bytes.lock().get(*index).copied().ok_or(AmlError::OutOfBounds)?;
                Ok(Variable::Integer(u64::from(byte)))
            }
            Variable::PackageIndex(package, index) => {
                let element = package.lock().get(*index).cloned().ok_or(AmlError::OutOfBounds)?;
                match element {
                    Variable::UnresolvedName { scope, name } => {
                        let handle = self.interpreter.namespace.lock().resolve(scope, &name);
                        let Some(handle) = handle else {
                            warn!("Package element refers to {}, which does not exist", name);
                            return Err(AmlError::NoSuchNode);
                        };
                        Ok(Variable::NodeRef(handle))
                    }
                    element => Ok(element),
                }
            }
            other => {
                warn!("Tried to dereference something that isn't a reference: {:?}", other);
                Err(AmlError::TypeMismatch)
            }
        }
    }

    /// Store `value` into `target`. With `convert` set, stores into a named object convert the value
    /// to the type the object already has (as `Store` does). Otherwise the object is replaced (as
    /// `CopyObject` does).
    pub(crate) fn store(&self, target: &Operand, value: Variable, convert: bool) -> Result<(), AmlError> {
        match target {
            Operand::Null => Ok(()),
            Operand::Debug => {
                self.interpreter.handler.handle_debug(&value);
                Ok(())
            }
            Operand::Resolved(handle) => self.store_node(*handle, value, convert),
            Operand::Unresolved { scope, name } => {
                let handle = self.interpreter.namespace.lock().resolve(*scope, name);
                let Some(handle) = handle else {
                    warn!("Tried to store into {}, which does not exist", name);
                    return Err(AmlError::NoSuchNode);
                };
                self.store_node(handle, value, convert)
            }
            Operand::Arg(index) => {
                let invocation = self.invocation()?;
                let current = invocation.args.lock()[*index].clone();
                if current.is_reference() {
                    return self.store_through(&current, value, convert);
                }
                let copy = value.deep_clone();
                invocation.args.lock()[*index] = copy;
                Ok(())
            }
            Operand::Local(index) => {
                let copy = value.deep_clone();
                self.invocation()?.locals.lock()[*index] = copy;
                Ok(())
            }
            Operand::Object(reference) if reference.is_reference() => self.store_through(reference, value, convert),
            Operand::Object(other) => {
                warn!("Tried to store into something that can't be written to: {:?}", other);
                Err(AmlError::TypeMismatch)
            }
        }
    }

    fn store_through(&self, reference: &Variable, value: Variable, convert: bool) -> Result<(), AmlError> {
        match reference {
            Variable::NodeRef(handle) => self.store_node(*handle, value, convert),
            Variable::ArgRef(invocation, index) => {
                let copy = value.deep_clone();
                invocation.args.lock()[*index] = copy;
                Ok(())
            }
            Variable::LocalRef(invocation, index) => {
                let copy = value.deep_clone();
                invocation.locals.lock()[*index] = copy;
                Ok(())
            }
            Variable::StringIndex(bytes, index) | Variable::BufferIndex(bytes, index) => {
                let byte = value.implicit_integer()? as u8;
                let mut bytes = bytes.lock();
                *bytes.get_mut(*index).ok_or(AmlError::OutOfBounds)? = byte;
                Ok(())
            }
            Variable::PackageIndex(package, index) => {
                let copy = value.deep_clone();
                let mut package = package.lock();
                *package.get_mut(*index).ok_or(AmlError::OutOfBounds)? = copy;
                Ok(())
            }
            _ => Err(AmlError::TypeMismatch),
        }
    }

    fn store_node(&self, handle: AmlHandle, value: Variable, convert: bool) -> Result<(), AmlError> {
        let (handle, target) = {
            let namespace = self.interpreter.namespace.lock();
            let handle = namespace.resolve_alias(handle);
            let target = match &namespace.node(handle)?.object {
                NodeObject::Name(object) => StoreTarget::Name(object.clone()),
                NodeObject::Field(_) => StoreTarget::Field,
                NodeObject::BufferField { buffer, bit_offset, bit_length } => StoreTarget::BufferField {
                    buffer: buffer.clone(),
                    bit_offset: *bit_offset,
                    bit_length: *bit_length,
                },
                other => {
                    warn!("Can't store into a node of type {:?}", other.typ());
                    return Err(AmlError::TypeMismatch);
                }
            };
            (handle, target)
        };

        match target {
            StoreTarget::Name(current) => {
                if convert {
                    match &current {
                        Variable::Integer(_) => {
                            let value = Variable::Integer(value.coerce_to_integer()?);
                            return self.replace_name(handle, value);
                        }
                        Variable::String(bytes) => return value.coerce_into_string(bytes),
                        Variable::Buffer(bytes) => return value.coerce_into_buffer(bytes),
                        _ => (),
                    }
                }
                self.replace_name(handle, value.deep_clone())
            }
            StoreTarget::Field => self.interpreter.write_field(handle, &value),
            StoreTarget::BufferField { buffer, bit_offset, bit_length } => {
                write_buffer_field(&buffer, bit_offset, bit_length, &value)
            }
        }
    }

    fn replace_name(&self, handle: AmlHandle, value: Variable) -> Result<(), AmlError> {
        let mut namespace = self.interpreter.namespace.lock();
        match &mut namespace.node_mut(handle)?.object {
            NodeObject::Name(object) => *object = value,
            _ => return Err(AmlError::TypeMismatch),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{object::Variable, test_utils::*, AmlError};
    use alloc::vec;

    #[test]
    fn store_converts_to_the_target_type() {
        let aml = aml![
            [0x08], *b"INT0", [0x0a, 0x05],                                 // Name(INT0, 5)
            [0x08], *b"STR0", [0x0d], *b"abc", [0x00],                      // Name(STR0, "abc")
            [0x08], *b"BUF0", pkg(0x11, &[0x0a, 0x02]),                     // Name(BUF0, Buffer(2) {})
            method("MAIN", 0, &aml![
                [0x70, 0x0d], *b"1f", [0x00], *b"INT0",                     // Store("1f", INT0)
                [0x70, 0x0a, 0xab], *b"STR0",                               // Store(0xab, STR0)
                [0x70, 0x0c, 0x01, 0x02, 0x03, 0x04], *b"BUF0",             // Store(0x04030201, BUF0)
            ]),
        ];
        let interpreter = populated(&aml);
        interpreter.eval_path("\\MAIN", &[]).unwrap();

        assert_eq!(interpreter.eval_path("\\INT0", &[]).unwrap().as_integer(), Ok(0x1f));
        assert_eq!(interpreter.eval_path("\\STR0", &[]).unwrap().bytes().unwrap(), b"00000000000000AB".to_vec());
        assert_eq!(interpreter.eval_path("\\BUF0", &[]).unwrap().bytes().unwrap(), vec![0x01, 0x02]);
    }

    #[test]
    fn copy_object_replaces_the_target() {
        let aml = aml![
            [0x08], *b"INT0", [0x0a, 0x05],
            method("MAIN", 0, &aml![[0x9d, 0x0d], *b"xyz", [0x00], *b"INT0"]), // CopyObject("xyz", INT0)
        ];
        let interpreter = populated(&aml);
        interpreter.eval_path("\\MAIN", &[]).unwrap();
        assert_eq!(interpreter.eval_path("\\INT0", &[]).unwrap().bytes().unwrap(), b"xyz".to_vec());
    }

    #[test]
    fn store_through_references() {
        let body = aml![
            [0x70, 0x0a, 0x03, 0x60],                          // Store(3, Local0)
            [0x70, 0x71, 0x60, 0x68],                          // Store(RefOf(Local0), Arg0)
            [0x70, 0x0a, 0x09, 0x68],                          // Store(9, Arg0), which writes Local0
            [0x72, 0x60, 0x83, 0x68, 0x62],                    // Add(Local0, DerefOf(Arg0), Local2)
            [0xa4, 0x62],                                      // Return(Local2)
        ];
        let interpreter = populated(&method("MAIN", 1, &body));
        assert_eq!(interpreter.eval_path("\\MAIN", &[Variable::Integer(0)]).unwrap().as_integer(), Ok(18));
    }

    #[test]
    fn args_and_locals_outside_methods() {
        let interpreter = populated(&[]);
        let root = interpreter.namespace.lock().root();
        let aml = aml![[0x08], *b"NUM0", [0x60]]; // Name(NUM0, Local0)
        assert_eq!(interpreter.populate(root, &aml), Err(AmlError::ExecutionFailure));
    }
}
