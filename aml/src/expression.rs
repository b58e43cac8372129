//! Operators: everything that takes some operands, produces a result, and optionally stores it into
//! a target.

use crate::{
    exec::{Executor, Operand, ParseMode},
    namespace::{AmlName, NodeObject, NodeType},
    object::{compare, from_bcd, to_bcd, MatchOp, ObjectType, Variable},
    opcode::Opcode,
    sync::{SyncState, NO_WAIT, WAIT_FOREVER},
    AmlError,
};
use alloc::{sync::Arc, vec::Vec};
use byteorder::{ByteOrder, LittleEndian};
use log::{trace, warn};

use ParseMode::{ImmediateByte, ImmediateDWord, ImmediateWord, Object, OptionalReference, Reference};

/// `Acquire` and `Wait` use this timeout to wait forever.
const TIMEOUT_FOREVER: u64 = 0xffff;
/// `Stall` is meant for delays of up to 100us. Longer ones are still performed, but warned about.
const MAX_STALL: u64 = 100;
/// The small resource data type `End Tag`, with a length of 1.
const END_TAG: u8 = 0x79;

/// The modes to parse each operand of an operator in. `None` means the opcode isn't an operator.
pub(crate) fn op_modes(opcode: Opcode) -> Option<&'static [ParseMode]> {
    Some(match opcode {
        /*
         * DefAdd := AddOp Operand Operand Target
         * (and the same for the other binary operators)
         */
        Opcode::Add
        | Opcode::Subtract
        | Opcode::Multiply
        | Opcode::Mod
        | Opcode::And
        | Opcode::Nand
        | Opcode::Or
        | Opcode::Nor
        | Opcode::Xor
        | Opcode::ShiftLeft
        | Opcode::ShiftRight
        | Opcode::Concat
        | Opcode::ConcatRes
        | Opcode::ToString
        | Opcode::Index => &[Object, Object, Reference],

        /*
         * DefDivide := DivideOp Dividend Divisor Remainder Quotient
         */
        Opcode::Divide => &[Object, Object, Reference, Reference],

        /*
         * DefNot := NotOp Operand Target
         * (and the same for the other unary operators and conversions)
         */
        Opcode::Not
        | Opcode::FindSetLeftBit
        | Opcode::FindSetRightBit
        | Opcode::FromBCD
        | Opcode::ToBCD
        | Opcode::ToBuffer
        | Opcode::ToDecimalString
        | Opcode::ToHexString
        | Opcode::ToInteger
        | Opcode::Store
        | Opcode::CopyObject => &[Object, Reference],

        /*
         * DefMid := MidOp MidObj TermArg TermArg Target
         */
        Opcode::Mid => &[Object, Object, Object, Reference],

        Opcode::LAnd
        | Opcode::LOr
        | Opcode::LEqual
        | Opcode::LNotEqual
        | Opcode::LLess
        | Opcode::LLessEqual
        | Opcode::LGreater
        | Opcode::LGreaterEqual => &[Object, Object],
        Opcode::LNot | Opcode::DerefOf | Opcode::Stall | Opcode::Sleep => &[Object],

        Opcode::Increment
        | Opcode::Decrement
        | Opcode::RefOf
        | Opcode::SizeOf
        | Opcode::ObjectType
        | Opcode::Release
        | Opcode::Signal
        | Opcode::Reset => &[Reference],

        /*
         * DefCondRefOf := CondRefOfOp SuperName Target
         */
        Opcode::CondRefOf => &[OptionalReference, Reference],

        /*
         * DefMatch := MatchOp SearchPkg MatchOpcode Operand MatchOpcode Operand StartIndex
         */
        Opcode::Match => &[Object, ImmediateByte, Object, ImmediateByte, Object, Object],

        /*
         * DefNotify := NotifyOp NotifyObject NotifyValue
         * DefAcquire := AcquireOp MutexObject Timeout
         * DefWait := WaitOp EventObject Operand
         * DefFatal := FatalOp FatalType FatalCode FatalArg
         */
        Opcode::Notify => &[Reference, Object],
        Opcode::Acquire => &[Reference, ImmediateWord],
        Opcode::Wait => &[Reference, Object],
        Opcode::Fatal => &[ImmediateByte, ImmediateDWord, Object],

        _ => return None,
    })
}

fn logical(value: bool) -> Variable {
    Variable::Integer(if value { u64::MAX } else { 0 })
}

impl Executor<'_> {
    /// Perform an operator once all of its operands have been gathered, storing into its targets
    /// and returning its result.
    pub(crate) fn reduce_op(&mut self, opcode: Opcode, operands: Vec<Operand>) -> Result<Variable, AmlError> {
        trace!("Reducing {:?}", opcode);

        match opcode {
            Opcode::Add
            | Opcode::Subtract
            | Opcode::Multiply
            | Opcode::Mod
            | Opcode::And
            | Opcode::Nand
            | Opcode::Or
            | Opcode::Nor
            | Opcode::Xor
            | Opcode::ShiftLeft
            | Opcode::ShiftRight => {
                let [left, right, target] = &operands[..] else { panic!() };
                let (left, right) = (left.integer()?, right.integer()?);
                let result = match opcode {
                    Opcode::Add => left.wrapping_add(right),
                    Opcode::Subtract => left.wrapping_sub(right),
                    Opcode::Multiply => left.wrapping_mul(right),
                    Opcode::Mod => {
                        if right == 0 {
                            warn!("Mod by zero");
                            return Err(AmlError::ExecutionFailure);
                        }
                        left % right
                    }
                    Opcode::And => left & right,
                    Opcode::Nand => !(left & right),
                    Opcode::Or => left | right,
                    Opcode::Nor => !(left | right),
                    Opcode::Xor => left ^ right,
                    Opcode::ShiftLeft => left.checked_shl(right.try_into().unwrap_or(u32::MAX)).unwrap_or(0),
                    _ => left.checked_shr(right.try_into().unwrap_or(u32::MAX)).unwrap_or(0),
                };
                self.mutate(target, Variable::Integer(result))
            }

            Opcode::Divide => {
                let [dividend, divisor, remainder, quotient] = &operands[..] else { panic!() };
                let (dividend, divisor) = (dividend.integer()?, divisor.integer()?);
                if divisor == 0 {
                    warn!("Divide by zero");
                    return Err(AmlError::ExecutionFailure);
                }
                self.store(remainder, Variable::Integer(dividend % divisor), true)?;
                self.mutate(quotient, Variable::Integer(dividend / divisor))
            }

            Opcode::Increment | Opcode::Decrement => {
                let [target] = &operands[..] else { panic!() };
                let value = self.read_operand(target)?.implicit_integer()?;
                let value = if opcode == Opcode::Increment { value.wrapping_add(1) } else { value.wrapping_sub(1) };
                self.mutate(target, Variable::Integer(value))
            }

            Opcode::Not | Opcode::FindSetLeftBit | Opcode::FindSetRightBit | Opcode::FromBCD | Opcode::ToBCD => {
                let [operand, target] = &operands[..] else { panic!() };
                let operand = operand.integer()?;
                let result = match opcode {
                    Opcode::Not => !operand,
                    // Both of these are one-based, and give zero if no bits are set
                    Opcode::FindSetLeftBit => 64 - u64::from(operand.leading_zeros()),
                    Opcode::FindSetRightBit if operand == 0 => 0,
                    Opcode::FindSetRightBit => u64::from(operand.trailing_zeros()) + 1,
                    Opcode::FromBCD => from_bcd(operand),
                    _ => to_bcd(operand),
                };
                self.mutate(target, Variable::Integer(result))
            }

            Opcode::LAnd | Opcode::LOr => {
                let [left, right] = &operands[..] else { panic!() };
                let (left, right) = (left.integer()? != 0, right.integer()? != 0);
                Ok(logical(if opcode == Opcode::LAnd { left && right } else { left || right }))
            }
            Opcode::LNot => {
                let [operand] = &operands[..] else { panic!() };
                Ok(logical(operand.integer()? == 0))
            }
            Opcode::LEqual
            | Opcode::LNotEqual
            | Opcode::LLess
            | Opcode::LLessEqual
            | Opcode::LGreater
            | Opcode::LGreaterEqual => {
                let [left, right] = &operands[..] else { panic!() };
                let (op, negate) = match opcode {
                    Opcode::LEqual => (MatchOp::Equal, false),
                    Opcode::LNotEqual => (MatchOp::Equal, true),
                    Opcode::LLess => (MatchOp::Less, false),
                    Opcode::LLessEqual => (MatchOp::LessEqual, false),
                    Opcode::LGreater => (MatchOp::Greater, false),
                    _ => (MatchOp::GreaterEqual, false),
                };
                Ok(logical(compare(op, left.object()?, right.object()?)? != negate))
            }

            Opcode::Concat => {
                let [left, right, target] = &operands[..] else { panic!() };
                let result = self.concat(left.object()?, right.object()?)?;
                self.mutate(target, result)
            }

            /*
             * ConcatRes joins two resource templates. Each one's end tag is dropped, and a new end
             * tag is added with a checksum that makes the whole template sum to zero.
             */
            Opcode::ConcatRes => {
                let [left, right, target] = &operands[..] else { panic!() };
                let (left, right) = (left.object()?.bytes()?, right.object()?.bytes()?);
                if left.len() == 1 || right.len() == 1 {
                    warn!("ConcatRes on a resource template that only has half an end tag");
                    return Err(AmlError::UnexpectedResult);
                }

                let mut result = Vec::with_capacity(left.len() + right.len());
                result.extend_from_slice(&left[..left.len().saturating_sub(2)]);
                result.extend_from_slice(&right[..right.len().saturating_sub(2)]);
                result.push(END_TAG);
                let sum = result.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte));
                result.push(0u8.wrapping_sub(sum));
                self.emplace(target, Variable::buffer_from(result))
            }

            Opcode::Mid => {
                let [source, index, length, target] = &operands[..] else { panic!() };
                let source = source.object()?;
                let (index, length) = (index.integer()? as usize, length.integer()? as usize);
                let bytes = source.bytes()?;

                /*
                 * A range that runs off the end is cut short. Only ranges that go strictly past
                 * the end are cut; a range that ends exactly at the end is already fine.
                 */
                let (start, length) = if index >= bytes.len() {
                    (0, 0)
                } else if index.saturating_add(length) > bytes.len() {
                    (index, bytes.len() - index)
                } else {
                    (index, length)
                };
                let slice = &bytes[start..(start + length)];

                let result = match source {
                    Variable::String(_) => Variable::new_string(slice),
                    _ => Variable::buffer_from(slice.to_vec()),
                };
                self.mutate(target, result)
            }

            Opcode::ToBuffer | Opcode::ToDecimalString | Opcode::ToHexString | Opcode::ToInteger => {
                let [operand, target] = &operands[..] else { panic!() };
                let operand = operand.object()?;
                let result = match opcode {
                    Opcode::ToBuffer => operand.to_buffer()?,
                    Opcode::ToDecimalString => operand.to_decimal_string()?,
                    Opcode::ToHexString => operand.to_hex_string()?,
                    _ => operand.to_integer()?,
                };
                self.emplace(target, result)
            }
            Opcode::ToString => {
                let [operand, length, target] = &operands[..] else { panic!() };
                let max_length = match length.integer()? {
                    u64::MAX => None,
                    length => Some(length as usize),
                };
                let result = operand.object()?.to_aml_string(max_length)?;
                self.emplace(target, result)
            }

            Opcode::Store => {
                let [value, target] = &operands[..] else { panic!() };
                let value = value.object()?.clone();
                self.store(target, value.clone(), true)?;
                Ok(value)
            }
            Opcode::CopyObject => {
                let [value, target] = &operands[..] else { panic!() };
                self.emplace(target, value.object()?.clone())
            }

            Opcode::Index => {
                let [source, index, target] = &operands[..] else { panic!() };
                let index = index.integer()? as usize;
                let reference = match source.object()? {
                    Variable::String(string) if index < string.lock().len() => {
                        Variable::StringIndex(string.clone(), index)
                    }
                    Variable::Buffer(buffer) if index < buffer.lock().len() => {
                        Variable::BufferIndex(buffer.clone(), index)
                    }
                    Variable::Package(package) if index < package.lock().len() => {
                        Variable::PackageIndex(package.clone(), index)
                    }
                    Variable::String(_) | Variable::Buffer(_) | Variable::Package(_) => {
                        warn!("Index {} is out of bounds", index);
                        return Err(AmlError::OutOfBounds);
                    }
                    other => {
                        warn!("Tried to index into something that isn't a string, buffer or package: {:?}", other);
                        return Err(AmlError::TypeMismatch);
                    }
                };
                self.mutate(target, reference)
            }

            Opcode::Match => {
                let [package, op1, operand1, op2, operand2, start] = &operands[..] else { panic!() };
                let (op1, op2) = (MatchOp::from_code(op1.integer()?)?, MatchOp::from_code(op2.integer()?)?);
                let (operand1, operand2) = (operand1.object()?, operand2.object()?);
                let elements = match package.object()? {
                    Variable::Package(package) => package.lock().clone(),
                    _ => return Err(AmlError::TypeMismatch),
                };

                for (i, element) in elements.iter().enumerate().skip(start.integer()? as usize) {
                    if element.is_none() {
                        continue;
                    }
                    if compare(op1, element, operand1)? && compare(op2, element, operand2)? {
                        return Ok(Variable::Integer(i as u64));
                    }
                }
                Ok(Variable::Integer(u64::MAX))
            }

            Opcode::DerefOf => {
                let [reference] = &operands[..] else { panic!() };
                match reference.object()? {
                    Variable::String(string) => {
                        let string = string.lock().clone();
                        let path = core::str::from_utf8(&string).map_err(|_| AmlError::InvalidName(None))?;
                        let name = AmlName::from_str(path)?;
                        let handle = self.interpreter.namespace.lock().resolve(self.scope()?, &name);
                        self.load_node(handle.ok_or(AmlError::NoSuchNode)?)
                    }
                    reference => self.deref(reference),
                }
            }
            Opcode::RefOf => {
                let [operand] = &operands[..] else { panic!() };
                self.reference_to(operand)
            }
            Opcode::CondRefOf => {
                let [operand, target] = &operands[..] else { panic!() };
                if let Operand::Null = operand {
                    return Ok(logical(false));
                }
                let reference = self.reference_to(operand)?;
                self.emplace(target, reference)?;
                Ok(logical(true))
            }

            Opcode::SizeOf => {
                let [operand] = &operands[..] else { panic!() };
                let size = match self.read_operand(operand)? {
                    Variable::String(string) => string.lock().len(),
                    Variable::Buffer(buffer) => buffer.lock().len(),
                    Variable::Package(package) => package.lock().len(),
                    other => {
                        warn!("SizeOf an object that isn't a string, buffer or package: {:?}", other);
                        return Err(AmlError::TypeMismatch);
                    }
                };
                Ok(Variable::Integer(size as u64))
            }
            Opcode::ObjectType => {
                let [operand] = &operands[..] else { panic!() };
                let typ = match operand {
                    Operand::Resolved(handle) => {
                        let namespace = self.interpreter.namespace.lock();
                        let handle = namespace.resolve_alias(*handle);
                        namespace.node(handle)?.object.object_type()
                    }
                    Operand::Debug => ObjectType::Debug,
                    operand => match self.read_operand(operand)? {
                        Variable::NodeRef(handle) => {
                            let namespace = self.interpreter.namespace.lock();
                            namespace.node(handle)?.object.object_type()
                        }
                        value if value.is_reference() => self.deref(&value)?.object_type(),
                        value => value.object_type(),
                    },
                };
                Ok(Variable::Integer(typ.code()))
            }

            Opcode::Notify => {
                let [object, value] = &operands[..] else { panic!() };
                let Operand::Resolved(handle) = object else {
                    warn!("Notify target isn't a named object");
                    return Err(AmlError::TypeMismatch);
                };
                let value = value.integer()?;
                let notify_override = {
                    let namespace = self.interpreter.namespace.lock();
                    let node = namespace.node(*handle)?;
                    match node.object.typ() {
                        NodeType::Device | NodeType::Processor | NodeType::ThermalZone => (),
                        other => {
                            warn!("Notify on {} which is a {:?}", namespace.path_of(*handle), other);
                            return Err(AmlError::TypeMismatch);
                        }
                    }
                    node.notify_override.clone()
                };

                match notify_override {
                    Some(notify_override) => notify_override(*handle, value),
                    None => self.interpreter.handler.handle_notify(*handle, value),
                }
                Ok(Variable::None)
            }

            Opcode::Acquire | Opcode::Wait => {
                let [object, timeout] = &operands[..] else { panic!() };
                let state = self.sync_state(object, opcode)?;
                let deadline = match timeout.integer()? {
                    0 => NO_WAIT,
                    milliseconds if milliseconds >= TIMEOUT_FOREVER => WAIT_FOREVER,
                    // The timeout is in milliseconds, and the timer ticks every 100ns
                    milliseconds => self.interpreter.handler.timer()?.saturating_add(milliseconds * 10_000),
                };

                let handler = &*self.interpreter.handler;
                let done = if opcode == Opcode::Acquire {
                    state.lock(handler, deadline)?
                } else {
                    state.wait(handler, deadline)?
                };
                // Both return `True` if they timed out
                Ok(logical(!done))
            }
            Opcode::Release | Opcode::Signal | Opcode::Reset => {
                let [object] = &operands[..] else { panic!() };
                let state = self.sync_state(object, opcode)?;
                let handler = &*self.interpreter.handler;
                match opcode {
                    Opcode::Release => state.unlock(handler)?,
                    Opcode::Signal => state.signal(handler)?,
                    _ => state.reset(),
                }
                Ok(Variable::None)
            }

            Opcode::Stall => {
                let [microseconds] = &operands[..] else { panic!() };
                let microseconds = match microseconds.integer()? {
                    0 => 1,
                    us if us > MAX_STALL => {
                        warn!("Stall for {}us, which is longer than should be used", us);
                        us
                    }
                    us => us,
                };
                self.interpreter.handler.stall(microseconds)?;
                Ok(Variable::None)
            }
            Opcode::Sleep => {
                let [milliseconds] = &operands[..] else { panic!() };
                self.interpreter.handler.sleep(milliseconds.integer()?.max(1))?;
                Ok(Variable::None)
            }

            Opcode::Fatal => {
                let [typ, code, arg] = &operands[..] else { panic!() };
                let (typ, code, arg) = (typ.integer()? as u8, code.integer()? as u32, arg.integer()?);
                warn!("Fatal error in AML: type {:#x}, code {:#x}, arg {:#x}", typ, code, arg);
                self.interpreter.handler.handle_fatal_error(typ, code, arg);
                Err(AmlError::ExecutionFailure)
            }

            _ => panic!("{:?} is not an operator", opcode),
        }
    }

    /// Store the result of an operator into its target, converting it to the type of the target.
    fn mutate(&self, target: &Operand, result: Variable) -> Result<Variable, AmlError> {
        self.store(target, result.clone(), true)?;
        Ok(result)
    }

    /// Store the result of an operator into its target, replacing the target's value outright.
    fn emplace(&self, target: &Operand, result: Variable) -> Result<Variable, AmlError> {
        self.store(target, result.clone(), false)?;
        Ok(result)
    }

    fn reference_to(&self, operand: &Operand) -> Result<Variable, AmlError> {
        match operand {
            Operand::Resolved(handle) => Ok(Variable::NodeRef(*handle)),
            Operand::Unresolved { scope, name } => {
                let handle = self.interpreter.namespace.lock().resolve(*scope, name);
                Ok(Variable::NodeRef(handle.ok_or(AmlError::NoSuchNode)?))
            }
            Operand::Arg(index) => Ok(Variable::ArgRef(self.invocation()?, *index)),
            Operand::Local(index) => Ok(Variable::LocalRef(self.invocation()?, *index)),
            Operand::Object(reference) if reference.is_reference() => Ok(reference.clone()),
            other => {
                warn!("Can't take a reference to {:?}", other);
                Err(AmlError::TypeMismatch)
            }
        }
    }

    fn sync_state(&self, object: &Operand, opcode: Opcode) -> Result<Arc<SyncState>, AmlError> {
        let handle = match object {
            Operand::Resolved(handle) => *handle,
            operand => match self.read_operand(operand)? {
                Variable::NodeRef(handle) => handle,
                _ => return Err(AmlError::TypeMismatch),
            },
        };

        let namespace = self.interpreter.namespace.lock();
        match (&namespace.node(namespace.resolve_alias(handle))?.object, opcode) {
            (NodeObject::Mutex(state), Opcode::Acquire | Opcode::Release) => Ok(state.clone()),
            (NodeObject::Event(state), Opcode::Wait | Opcode::Signal | Opcode::Reset) => Ok(state.clone()),
            (other, _) => {
                warn!("{:?} on a node of type {:?}", opcode, other.typ());
                Err(AmlError::TypeMismatch)
            }
        }
    }

    /*
     * Concat converts its second operand to the type of its first. Integers are concatenated into
     * a buffer of both, as 64-bit integers. Anything that isn't an integer, string or buffer is
     * first replaced by a string describing its type.
     */
    fn concat(&self, left: &Variable, right: &Variable) -> Result<Variable, AmlError> {
        let left = self.concat_operand(left)?;
        let right = self.concat_operand(right)?;

        match left {
            Variable::Integer(left) => {
                let mut bytes = alloc::vec![0u8; 16];
                LittleEndian::write_u64(&mut bytes[0..8], left);
                LittleEndian::write_u64(&mut bytes[8..16], right.coerce_to_integer()?);
                Ok(Variable::buffer_from(bytes))
            }
            Variable::Buffer(left) => {
                let mut bytes = left.lock().clone();
                bytes.extend_from_slice(&right.to_buffer()?.bytes()?);
                Ok(Variable::buffer_from(bytes))
            }
            Variable::String(left) => {
                let mut bytes = left.lock().clone();
                let suffix = Variable::new_string(&[]);
                if let Variable::String(suffix) = &suffix {
                    right.coerce_into_string(suffix)?;
                }
                bytes.extend_from_slice(&suffix.bytes()?);
                Ok(Variable::new_string(&bytes))
            }
            _ => Err(AmlError::TypeMismatch),
        }
    }

    fn concat_operand(&self, operand: &Variable) -> Result<Variable, AmlError> {
        let typ = match operand {
            Variable::Integer(_) | Variable::String(_) | Variable::Buffer(_) => return Ok(operand.clone()),
            Variable::NodeRef(handle) => self.interpreter.namespace.lock().node(*handle)?.object.object_type(),
            other => other.object_type(),
        };
        Ok(Variable::new_string(typ.type_string().as_bytes()))
    }
}
