//! `aml_vm` is an interpreter for ACPI Machine Language, the bytecode that firmware ships in the
//! DSDT and SSDTs. Tables are loaded into an [`Interpreter`], which builds the namespace they
//! describe, and control methods can then be evaluated by path or by handle.
//!
//! The interpreter talks to the hardware, and to the rest of the kernel, through the [`Handler`]
//! trait. Most of its methods are optional: an access the host doesn't support fails the
//! evaluation with [`AmlError::Unsupported`].

#![no_std]

#[cfg(test)]
extern crate std;

extern crate alloc;

pub mod ec;
pub mod name_object;
pub mod namespace;
pub mod object;
pub mod op_region;
pub mod pci_routing;
pub mod power;
pub mod resource;
pub mod sync;

mod exec;
mod expression;
mod misc;
mod opcode;
mod pkg_length;
mod statement;
mod term_object;

#[cfg(test)]
mod test_utils;

use alloc::{boxed::Box, collections::BTreeMap, sync::Arc};
use exec::{Executor, MAX_ARGS};
use log::{info, trace};
use name_object::NameSeg;
use namespace::{AmlHandle, AmlName, MethodCode, Namespace, NodeObject};
use object::Variable;
use op_region::{read_buffer_field, RegionHandler, RegionSpace};
use spinning_top::Spinlock;
use sync::SyncState;

/// The length of the header at the start of every System Description Table.
const SDT_HEADER_LENGTH: usize = 36;

pub struct Interpreter {
    pub(crate) handler: Box<dyn Handler>,
    pub namespace: Spinlock<Namespace>,
    region_handlers: Spinlock<BTreeMap<RegionSpace, Arc<dyn RegionHandler>>>,
}

impl Interpreter {
    pub fn new<H>(handler: H) -> Interpreter
    where
        H: Handler + 'static,
    {
        Interpreter {
            handler: Box::new(handler),
            namespace: Spinlock::new(Namespace::new()),
            region_handlers: Spinlock::new(BTreeMap::new()),
        }
    }

    /// Load a DSDT or SSDT. `table` is the whole table, including its header.
    pub fn load_table(&self, table: &[u8]) -> Result<(), AmlError> {
        if table.len() < SDT_HEADER_LENGTH {
            return Err(AmlError::RunOutOfStream);
        }
        let root = self.namespace.lock().root();
        Executor::new(self).populate(Arc::from(table), SDT_HEADER_LENGTH, root)
    }

    /// Execute the term list `code` in the scope of `parent`, installing the objects it declares.
    pub fn populate(&self, parent: AmlHandle, code: &[u8]) -> Result<(), AmlError> {
        Executor::new(self).populate(Arc::from(code), 0, parent)
    }

    /// Evaluate the object at `handle`. Methods are invoked with `args`; any other object just
    /// produces a copy of its value.
    pub fn eval(&self, handle: AmlHandle, args: &[Variable]) -> Result<Variable, AmlError> {
        if args.len() > MAX_ARGS {
            return Err(AmlError::IllegalArguments);
        }

        let (handle, object) = {
            let namespace = self.namespace.lock();
            let handle = namespace.resolve_alias(handle);
            let object = match &namespace.node(handle)?.object {
                NodeObject::Name(value) => Evaluated::Value(value.deep_clone()),
                NodeObject::Method { code, .. } => Evaluated::Method(code.clone()),
                NodeObject::Field(_) => Evaluated::Field,
                NodeObject::BufferField { buffer, bit_offset, bit_length } => {
                    Evaluated::Value(read_buffer_field(buffer, *bit_offset, *bit_length)?)
                }
                _ => return Err(AmlError::TypeMismatch),
            };
            (handle, object)
        };
        trace!("Evaluating {:?} with {} arguments", handle, args.len());

        match object {
            Evaluated::Method(MethodCode::Native(method)) => method(args),
            Evaluated::Method(MethodCode::Aml { table, start, end }) => {
                Executor::new(self).call(handle, table, start, end, args)
            }
            _ if !args.is_empty() => Err(AmlError::IllegalArguments),
            Evaluated::Value(value) => Ok(value),
            Evaluated::Field => self.read_field(handle),
        }
    }

    /// Evaluate the object at the absolute path `path`, such as `\_SB.PCI0._CRS`.
    pub fn eval_path(&self, path: &str, args: &[Variable]) -> Result<Variable, AmlError> {
        let handle = self.namespace.lock().lookup(path)?;
        self.eval(handle, args)
    }

    /// Route accesses to every operation region in `space` through `handler`, unless the region
    /// has its own override.
    pub fn install_region_handler(&self, space: RegionSpace, handler: Arc<dyn RegionHandler>) {
        self.region_handlers.lock().insert(space, handler);
    }

    /// Check if `device` is identified by `id`, either through its `_HID` or one of its `_CID`s.
    /// `id` should be an integer for an EISA ID, or a string otherwise.
    pub fn device_has_id(&self, device: AmlHandle, id: &Variable) -> Result<bool, AmlError> {
        for name in [*b"_HID", *b"_CID"] {
            let Some(child) = self.namespace.lock().child(device, NameSeg(name)) else {
                continue;
            };

            let found = match self.eval(child, &[])? {
                Variable::Package(elements) => elements.lock().iter().any(|element| ids_match(element, id)),
                other => ids_match(&other, id),
            };
            if found {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

enum Evaluated {
    Value(Variable),
    Method(MethodCode),
    Field,
}

fn ids_match(left: &Variable, right: &Variable) -> bool {
    match (left, right) {
        (Variable::Integer(left), Variable::Integer(right)) => left == right,
        (Variable::String(_), Variable::String(_)) => left.bytes().ok() == right.bytes().ok(),
        _ => false,
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum AmlError {
    OutOfMemory,
    TypeMismatch,
    NoSuchNode,
    OutOfBounds,
    ExecutionFailure,
    IllegalArguments,
    UnexpectedResult,
    EndReached,
    /// The host, or the interpreter, doesn't support something the AML tried to do.
    Unsupported,

    RunOutOfStream,
    InvalidPkgLength,
    InvalidNameSeg,
    InvalidName(Option<AmlName>),
    EmptyNamesAreInvalid,
    InvalidNormalizedName(AmlName),
    RootHasNoParent,
    NameCollision(AmlName),

    InvalidFieldFlags,
    FieldInvalidAddress,
    FieldInvalidAccessSize,

    ResourceDescriptorTooShort,

    PrtInvalidAddress,
    PrtInvalidPin,
    PrtInvalidSource,
    PrtInvalidGsi,
    PrtNoEntry,
}

/// This trait represents the interface from the `Interpreter` to the hosting kernel, and allows
/// AML to interact with the underlying hardware. Everything has a default implementation, so a
/// host only needs to provide the capabilities its firmware actually uses.
pub trait Handler: Send + Sync {
    fn read_u8(&self, _address: usize) -> Result<u8, AmlError> {
        Err(AmlError::Unsupported)
    }
    fn read_u16(&self, _address: usize) -> Result<u16, AmlError> {
        Err(AmlError::Unsupported)
    }
    fn read_u32(&self, _address: usize) -> Result<u32, AmlError> {
        Err(AmlError::Unsupported)
    }
    fn read_u64(&self, _address: usize) -> Result<u64, AmlError> {
        Err(AmlError::Unsupported)
    }

    fn write_u8(&self, _address: usize, _value: u8) -> Result<(), AmlError> {
        Err(AmlError::Unsupported)
    }
    fn write_u16(&self, _address: usize, _value: u16) -> Result<(), AmlError> {
        Err(AmlError::Unsupported)
    }
    fn write_u32(&self, _address: usize, _value: u32) -> Result<(), AmlError> {
        Err(AmlError::Unsupported)
    }
    fn write_u64(&self, _address: usize, _value: u64) -> Result<(), AmlError> {
        Err(AmlError::Unsupported)
    }

    fn read_io_u8(&self, _port: u16) -> Result<u8, AmlError> {
        Err(AmlError::Unsupported)
    }
    fn read_io_u16(&self, _port: u16) -> Result<u16, AmlError> {
        Err(AmlError::Unsupported)
    }
    fn read_io_u32(&self, _port: u16) -> Result<u32, AmlError> {
        Err(AmlError::Unsupported)
    }

    fn write_io_u8(&self, _port: u16, _value: u8) -> Result<(), AmlError> {
        Err(AmlError::Unsupported)
    }
    fn write_io_u16(&self, _port: u16, _value: u16) -> Result<(), AmlError> {
        Err(AmlError::Unsupported)
    }
    fn write_io_u32(&self, _port: u16, _value: u32) -> Result<(), AmlError> {
        Err(AmlError::Unsupported)
    }

    fn read_pci_u8(&self, _segment: u16, _bus: u8, _device: u8, _function: u8, _offset: u16) -> Result<u8, AmlError> {
        Err(AmlError::Unsupported)
    }
    fn read_pci_u16(&self, _segment: u16, _bus: u8, _device: u8, _function: u8, _offset: u16) -> Result<u16, AmlError> {
        Err(AmlError::Unsupported)
    }
    fn read_pci_u32(&self, _segment: u16, _bus: u8, _device: u8, _function: u8, _offset: u16) -> Result<u32, AmlError> {
        Err(AmlError::Unsupported)
    }

    fn write_pci_u8(
        &self,
        _segment: u16,
        _bus: u8,
        _device: u8,
        _function: u8,
        _offset: u16,
        _value: u8,
    ) -> Result<(), AmlError> {
        Err(AmlError::Unsupported)
    }
    fn write_pci_u16(
        &self,
        _segment: u16,
        _bus: u8,
        _device: u8,
        _function: u8,
        _offset: u16,
        _value: u16,
    ) -> Result<(), AmlError> {
        Err(AmlError::Unsupported)
    }
    fn write_pci_u32(
        &self,
        _segment: u16,
        _bus: u8,
        _device: u8,
        _function: u8,
        _offset: u16,
        _value: u32,
    ) -> Result<(), AmlError> {
        Err(AmlError::Unsupported)
    }

    /// A monotonic timer, in units of 100 nanoseconds.
    fn timer(&self) -> Result<u64, AmlError> {
        Err(AmlError::Unsupported)
    }

    /// Sleep for at least the given number of **milliseconds**. An implementation may round to the closest sleep
    /// time supported, and should relinquish the processor.
    fn sleep(&self, _milliseconds: u64) -> Result<(), AmlError> {
        Err(AmlError::Unsupported)
    }

    /// Stall for at least the given number of **microseconds**. An implementation should not relinquish control of
    /// the processor during the stall. By default, this spins on [`Handler::timer`].
    fn stall(&self, microseconds: u64) -> Result<(), AmlError> {
        let deadline = self.timer()?.saturating_add(microseconds.saturating_mul(10));
        while self.timer()? < deadline {
            core::hint::spin_loop();
        }
        Ok(())
    }

    /// Block until `state` is woken with [`Handler::sync_wake`], as long as its value is still
    /// `expected` when the wait starts. Returns `true` if `deadline` (in [`Handler::timer`] units)
    /// passed first. Spurious wakeups are fine.
    fn sync_wait(&self, _state: &SyncState, _expected: u32, _deadline: u64) -> Result<bool, AmlError> {
        Err(AmlError::Unsupported)
    }

    fn sync_wake(&self, _state: &SyncState) -> Result<(), AmlError> {
        Err(AmlError::Unsupported)
    }

    /// Find the `index`th table with the given signature, including its header.
    fn scan_table(&self, _signature: [u8; 4], _index: usize) -> Result<Option<&[u8]>, AmlError> {
        Err(AmlError::Unsupported)
    }

    /// Called when AML notifies a node that doesn't have a notify override.
    fn handle_notify(&self, _node: AmlHandle, _value: u64) {}

    /// Called when AML stores to the `Debug` object.
    fn handle_debug(&self, value: &Variable) {
        info!("AML debug: {:?}", value);
    }

    fn handle_fatal_error(&self, fatal_type: u8, fatal_code: u32, fatal_arg: u64) {
        panic!(
            "AML raised a fatal error: type = {:#x}, code = {:#x}, argument = {:#x}",
            fatal_type, fatal_code, fatal_arg
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use alloc::{vec, vec::Vec};

    fn dword(value: &Variable) -> [u8; 4] {
        (value.as_integer().unwrap() as u32).to_le_bytes()
    }

    #[test]
    fn names_evaluate_to_copies() {
        let interpreter = populated(&aml![[0x08], *b"BUF0", pkg(0x11, &[0x0a, 0x03, 0x01, 0x02, 0x03])]);

        let value = interpreter.eval_path("\\BUF0", &[]).unwrap();
        if let Variable::Buffer(bytes) = &value {
            bytes.lock()[0] = 0xff;
        }
        assert_eq!(interpreter.eval_path("\\BUF0", &[]).unwrap().bytes(), Ok(vec![0x01, 0x02, 0x03]));
        assert_eq!(interpreter.eval_path("\\BUF0", &[Variable::Integer(1)]).err(), Some(AmlError::IllegalArguments));
        assert_eq!(interpreter.eval_path("\\NONE", &[]).err(), Some(AmlError::NoSuchNode));
    }

    #[test]
    fn argument_limit() {
        let interpreter = populated(&method("MAIN", 0, &[0xa4, 0x01]));
        let args = vec![Variable::Integer(0); 8];
        assert_eq!(interpreter.eval_path("\\MAIN", &args).err(), Some(AmlError::IllegalArguments));
        assert_eq!(interpreter.eval_path("\\MAIN", &args[..7]).unwrap().as_integer(), Ok(1));
    }

    #[test]
    fn load_table_skips_the_header() {
        let mut table = vec![0u8; 36];
        table[0..4].copy_from_slice(b"DSDT");
        table.extend(method("MAIN", 0, &[0xa4, 0x0a, 0x2a]));

        let interpreter = Interpreter::new(TestHandler::new());
        interpreter.load_table(&table).unwrap();
        assert_eq!(interpreter.eval_path("\\MAIN", &[]).unwrap().as_integer(), Ok(42));
        assert_eq!(interpreter.load_table(&table[..20]), Err(AmlError::RunOutOfStream));
    }

    #[test]
    fn os_identification() {
        // If (_OSI("Windows 2012")) { Return (One) } Return (Zero)
        let body = aml![pkg(0xa0, &aml![*b"_OSI", [0x0d], *b"Windows 2012", [0x00, 0xa4, 0x01]]), [0xa4, 0x00]];
        let interpreter = populated(&method("WIN8", 0, &body));
        assert_eq!(interpreter.eval_path("\\WIN8", &[]).unwrap().as_integer(), Ok(1));

        let osi = |name: &[u8]| interpreter.eval_path("\\_OSI", &[Variable::new_string(name)]).unwrap().as_integer();
        assert_eq!(osi(b"Windows 2009"), Ok(0xffff_ffff));
        assert_eq!(osi(b"Linux"), Ok(0));
        assert_eq!(interpreter.eval_path("\\_REV", &[]).unwrap().as_integer(), Ok(2));
    }

    #[test]
    fn device_ids() {
        let hid = object::eisaid("PNP0C09");
        let cid = object::eisaid("PNP0C0A");
        let cids = pkg(0x12, &aml![[0x02, 0x0c], dword(&cid), [0x0d], *b"ACPI0003", [0x00]]);
        let device = ext_pkg(0x82, &aml![*b"DEV0", [0x08], *b"_HID", [0x0c], dword(&hid), [0x08], *b"_CID", cids]);
        let interpreter = populated(&device);

        let (root, dev) = {
            let namespace = interpreter.namespace.lock();
            (namespace.root(), namespace.lookup("\\DEV0").unwrap())
        };
        assert_eq!(interpreter.device_has_id(dev, &hid), Ok(true));
        assert_eq!(interpreter.device_has_id(dev, &cid), Ok(true));
        assert_eq!(interpreter.device_has_id(dev, &Variable::new_string(b"ACPI0003")), Ok(true));
        assert_eq!(interpreter.device_has_id(dev, &object::eisaid("PNP0A03")), Ok(false));
        assert_eq!(interpreter.device_has_id(root, &hid), Ok(false));
    }

    #[test]
    fn overrides() {
        let aml = aml![
            method("MAIN", 0, &[0xa4, 0x0a, 0x05]),
            ext_pkg(0x82, b"DEV0"),
            method("NTFY", 0, &aml![[0x86], *b"DEV0", [0x0a, 0x80]]), // Notify(DEV0, 0x80)
        ];
        let handler = TestHandler::new();
        let interpreter = Interpreter::new(handler.clone());
        let root = interpreter.namespace.lock().root();
        interpreter.populate(root, &aml).unwrap();
        let (main, dev) = {
            let namespace = interpreter.namespace.lock();
            (namespace.lookup("\\MAIN").unwrap(), namespace.lookup("\\DEV0").unwrap())
        };

        interpreter
            .namespace
            .lock()
            .set_method_override(main, Arc::new(|args: &[Variable]| Ok(Variable::Integer(100 + args.len() as u64))))
            .unwrap();
        let args = [Variable::Integer(1), Variable::Integer(2)];
        assert_eq!(interpreter.eval(main, &args).unwrap().as_integer(), Ok(102));

        interpreter.eval_path("\\NTFY", &[]).unwrap();
        assert_eq!(handler.notifications(), vec![(dev, 0x80)]);

        let notifications: Arc<Spinlock<Vec<(AmlHandle, u64)>>> = Arc::new(Spinlock::new(Vec::new()));
        let recorder = notifications.clone();
        interpreter
            .namespace
            .lock()
            .set_notify_override(dev, Arc::new(move |node, value| recorder.lock().push((node, value))))
            .unwrap();
        interpreter.eval_path("\\NTFY", &[]).unwrap();
        assert_eq!(*notifications.lock(), vec![(dev, 0x80)]);
        assert_eq!(handler.notifications().len(), 1);
    }

    #[test]
    fn fields_evaluate_to_their_contents() {
        let aml = aml![
            // OperationRegion(MEM0, SystemMemory, 0x1000, 0x10)
            [0x5b, 0x80], *b"MEM0", [0x00, 0x0b, 0x00, 0x10, 0x0a, 0x10],
            // Field(MEM0, ByteAcc) { FLD0, 8 }
            ext_pkg(0x81, &aml![*b"MEM0", [0x01], *b"FLD0", [0x08]]),
        ];
        let handler = TestHandler::new();
        handler.write_memory(0x1000, &[0x5a]);
        let interpreter = Interpreter::new(handler);
        let root = interpreter.namespace.lock().root();
        interpreter.populate(root, &aml).unwrap();

        assert_eq!(interpreter.eval_path("\\FLD0", &[]).unwrap().as_integer(), Ok(0x5a));
    }
}
