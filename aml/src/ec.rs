//! A driver for the ACPI Embedded Controller. It implements `RegionHandler`, so it can be installed
//! for the `EmbeddedControl` address space with [`Interpreter::install_region_handler`].

use crate::{
    name_object::NameSeg,
    namespace::AmlHandle,
    object::{eisaid, Variable},
    op_region::{OpRegion, RegionHandler},
    resource::{resource_descriptors, Resource},
    AmlError,
    Handler,
    Interpreter,
};
use bit_field::BitField;
use byteorder::{ByteOrder, LittleEndian};
use log::warn;

const EC_PNP_ID: &str = "PNP0C09";
const ECDT_SIGNATURE: [u8; 4] = *b"ECDT";

/*
 * The ECDT starts with the standard table header, followed by the Generic Address Structures of
 * the command/status register and then the data register.
 */
const ECDT_CONTROL_OFFSET: usize = 36;
const ECDT_DATA_OFFSET: usize = 48;
const GAS_LENGTH: usize = 12;
const GAS_SYSTEM_IO: u8 = 1;

const EC_READ: u8 = 0x80;
const EC_WRITE: u8 = 0x81;
const EC_BURST_ENABLE: u8 = 0x82;
const EC_BURST_DISABLE: u8 = 0x83;
const EC_QUERY: u8 = 0x84;

const BURST_ACK: u8 = 0x90;

/// Status register bits
const STATUS_OBF: usize = 0;
const STATUS_IBF: usize = 1;
const STATUS_BURST: usize = 4;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EmbeddedController {
    pub command_port: u16,
    pub data_port: u16,
}

impl EmbeddedController {
    /// Find the EC through the ECDT, which lets it be used before the namespace has been populated.
    /// Returns `Ok(None)` if there's no ECDT.
    pub fn from_ecdt(handler: &dyn Handler) -> Result<Option<EmbeddedController>, AmlError> {
        let Some(ecdt) = handler.scan_table(ECDT_SIGNATURE, 0)? else {
            warn!("Couldn't find an ECDT to initialize the EC from");
            return Ok(None);
        };
        if ecdt.len() < ECDT_DATA_OFFSET + GAS_LENGTH {
            return Err(AmlError::OutOfBounds);
        }

        let port = |gas: &[u8], register: &str| -> Result<u16, AmlError> {
            if gas[0] != GAS_SYSTEM_IO {
                warn!("Unsupported address space {:#x} for the EC {} register", gas[0], register);
                return Err(AmlError::Unsupported);
            }
            u16::try_from(LittleEndian::read_u64(&gas[4..12])).map_err(|_| AmlError::FieldInvalidAddress)
        };

        Ok(Some(EmbeddedController {
            command_port: port(&ecdt[ECDT_CONTROL_OFFSET..(ECDT_CONTROL_OFFSET + GAS_LENGTH)], "command")?,
            data_port: port(&ecdt[ECDT_DATA_OFFSET..(ECDT_DATA_OFFSET + GAS_LENGTH)], "data")?,
        }))
    }

    /// Set up the EC from its device in the namespace. The first I/O port of its `_CRS` is the data
    /// register, and the second the command/status register.
    pub fn from_device(interpreter: &Interpreter, device: AmlHandle) -> Result<EmbeddedController, AmlError> {
        if !interpreter.device_has_id(device, &eisaid(EC_PNP_ID))? {
            warn!("Device {:?} is not an Embedded Controller", device);
            return Err(AmlError::IllegalArguments);
        }

        let crs = interpreter.namespace.lock().child(device, NameSeg(*b"_CRS"));
        let Some(crs) = crs else {
            warn!("Embedded Controller has no _CRS");
            return Err(AmlError::NoSuchNode);
        };
        let crs = match interpreter.eval(crs, &[])? {
            Variable::Buffer(bytes) => bytes.lock().clone(),
            _ => return Err(AmlError::TypeMismatch),
        };

        let mut ports = resource_descriptors(&crs).filter_map(|resource| match resource {
            Ok(Resource::Io(io)) => Some(Ok(io.base)),
            Ok(other) => {
                warn!("Unexpected resource in the EC's _CRS: {:?}", other);
                None
            }
            Err(err) => Some(Err(err)),
        });
        let data_port = ports.next().ok_or(AmlError::UnexpectedResult)??;
        let command_port = ports.next().ok_or(AmlError::UnexpectedResult)??;

        Ok(EmbeddedController { command_port, data_port })
    }

    fn status(&self, handler: &dyn Handler) -> Result<u8, AmlError> {
        handler.read_io_u8(self.command_port)
    }

    fn wait_input_empty(&self, handler: &dyn Handler) -> Result<(), AmlError> {
        while self.status(handler)?.get_bit(STATUS_IBF) {}
        Ok(())
    }

    fn wait_output_full(&self, handler: &dyn Handler) -> Result<(), AmlError> {
        while !self.status(handler)?.get_bit(STATUS_OBF) {}
        Ok(())
    }

    /*
     * In burst mode, the EC doesn't generate SCIs or SMIs that aren't critical. It leaves burst
     * mode by itself if it's idle, or in burst mode, for too long.
     */
    fn enable_burst(&self, handler: &dyn Handler) -> Result<(), AmlError> {
        handler.write_io_u8(self.command_port, EC_BURST_ENABLE)?;
        self.wait_output_full(handler)?;
        let ack = handler.read_io_u8(self.data_port)?;
        if ack != BURST_ACK {
            warn!("Enabling EC burst mode failed: got {:#x}", ack);
            return Err(AmlError::UnexpectedResult);
        }
        Ok(())
    }

    fn disable_burst(&self, handler: &dyn Handler) -> Result<(), AmlError> {
        self.wait_input_empty(handler)?;
        handler.write_io_u8(self.command_port, EC_BURST_DISABLE)?;
        while self.status(handler)?.get_bit(STATUS_BURST) {}
        Ok(())
    }

    pub fn read_byte(&self, handler: &dyn Handler, offset: u8) -> Result<u8, AmlError> {
        self.wait_input_empty(handler)?;
        handler.write_io_u8(self.command_port, EC_READ)?;
        self.wait_input_empty(handler)?;
        handler.write_io_u8(self.data_port, offset)?;
        self.wait_output_full(handler)?;
        handler.read_io_u8(self.data_port)
    }

    pub fn write_byte(&self, handler: &dyn Handler, offset: u8, value: u8) -> Result<(), AmlError> {
        self.wait_input_empty(handler)?;
        handler.write_io_u8(self.command_port, EC_WRITE)?;
        self.wait_input_empty(handler)?;
        handler.write_io_u8(self.data_port, offset)?;
        self.wait_input_empty(handler)?;
        handler.write_io_u8(self.data_port, value)
    }

    /// Ask the EC which event it raised an SCI for. The result is the `xx` of the `_Qxx` method
    /// that should be run.
    pub fn query(&self, handler: &dyn Handler) -> Result<u8, AmlError> {
        self.enable_burst(handler)?;
        handler.write_io_u8(self.command_port, EC_QUERY)?;
        self.wait_output_full(handler)?;
        self.disable_burst(handler)?;
        handler.read_io_u8(self.data_port)
    }

    fn check_offset(offset: u64, width: u8) -> Result<u8, AmlError> {
        if offset + u64::from(width / 8) > 0x100 {
            return Err(AmlError::FieldInvalidAddress);
        }
        Ok(offset as u8)
    }
}

impl RegionHandler for EmbeddedController {
    fn read(&self, handler: &dyn Handler, _region: &OpRegion, offset: u64, width: u8) -> Result<u64, AmlError> {
        let offset = Self::check_offset(offset, width)?;
        let bytes = width / 8;
        if bytes == 1 {
            return Ok(u64::from(self.read_byte(handler, offset)?));
        }

        self.enable_burst(handler)?;
        let mut value = 0;
        for i in 0..bytes {
            match self.read_byte(handler, offset + i) {
                Ok(byte) => value |= u64::from(byte) << (i * 8),
                Err(err) => {
                    let _ = self.disable_burst(handler);
                    return Err(err);
                }
            }
        }
        self.disable_burst(handler)?;
        Ok(value)
    }

    fn write(
        &self,
        handler: &dyn Handler,
        _region: &OpRegion,
        offset: u64,
        width: u8,
        value: u64,
    ) -> Result<(), AmlError> {
        let offset = Self::check_offset(offset, width)?;
        let bytes = width / 8;
        if bytes == 1 {
            return self.write_byte(handler, offset, value as u8);
        }

        self.enable_burst(handler)?;
        for i in 0..bytes {
            let byte = value.get_bits((usize::from(i) * 8)..(usize::from(i) * 8 + 8)) as u8;
            if let Err(err) = self.write_byte(handler, offset + i, byte) {
                let _ = self.disable_burst(handler);
                return Err(err);
            }
        }
        self.disable_burst(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        namespace::{NamespaceNode, NodeObject},
        op_region::RegionSpace,
        test_utils::TestHandler,
    };
    use alloc::{collections::VecDeque, sync::Arc, vec, vec::Vec};
    use spinning_top::Spinlock;

    const DATA: u16 = 0x62;
    const COMMAND: u16 = 0x66;

    #[derive(Default)]
    struct EcState {
        ram: Vec<u8>,
        output: VecDeque<u8>,
        command: Option<u8>,
        address: Option<u8>,
        burst: bool,
        commands: Vec<u8>,
    }

    /// Emulates the EC's side of the command protocol. Input is consumed instantly, so IBF is never
    /// set.
    struct EcHandler(Spinlock<EcState>);

    impl EcHandler {
        fn new() -> EcHandler {
            let mut state = EcState::default();
            state.ram = (0..=255).collect();
            EcHandler(Spinlock::new(state))
        }
    }

    impl Handler for EcHandler {
        fn read_io_u8(&self, port: u16) -> Result<u8, AmlError> {
            let mut state = self.0.lock();
            match port {
                COMMAND => {
                    let mut status = 0u8;
                    status.set_bit(STATUS_OBF, !state.output.is_empty());
                    status.set_bit(STATUS_BURST, state.burst);
                    Ok(status)
                }
                DATA => Ok(state.output.pop_front().unwrap_or(0xff)),
                _ => Err(AmlError::Unsupported),
            }
        }

        fn write_io_u8(&self, port: u16, value: u8) -> Result<(), AmlError> {
            let mut state = self.0.lock();
            match port {
                COMMAND => {
                    state.commands.push(value);
                    match value {
                        EC_READ | EC_WRITE => state.command = Some(value),
                        EC_BURST_ENABLE => {
                            state.burst = true;
                            state.output.push_back(BURST_ACK);
                        }
                        EC_BURST_DISABLE => state.burst = false,
                        EC_QUERY => state.output.push_back(0x42),
                        _ => panic!("Unknown EC command {:#x}", value),
                    }
                }
                DATA => match (state.command, state.address) {
                    (Some(EC_READ), None) => {
                        let byte = state.ram[value as usize];
                        state.output.push_back(byte);
                        state.command = None;
                    }
                    (Some(EC_WRITE), None) => state.address = Some(value),
                    (Some(EC_WRITE), Some(address)) => {
                        state.ram[address as usize] = value;
                        state.command = None;
                        state.address = None;
                    }
                    _ => panic!("Unexpected write to the EC data port"),
                },
                _ => return Err(AmlError::Unsupported),
            }
            Ok(())
        }
    }

    const EC: EmbeddedController = EmbeddedController { command_port: COMMAND, data_port: DATA };
    const REGION: OpRegion = OpRegion { space: RegionSpace::EmbeddedControl, base: 0, length: 0x100 };

    #[test]
    fn byte_accesses() {
        let handler = EcHandler::new();
        assert_eq!(EC.read_byte(&handler, 0x10), Ok(0x10));
        EC.write_byte(&handler, 0x10, 0xaa).unwrap();
        assert_eq!(EC.read_byte(&handler, 0x10), Ok(0xaa));
        assert_eq!(handler.0.lock().commands, vec![EC_READ, EC_WRITE, EC_READ]);
    }

    #[test]
    fn wide_accesses_use_burst_mode() {
        let handler = EcHandler::new();
        assert_eq!(RegionHandler::read(&EC, &handler, &REGION, 0x20, 32), Ok(0x23222120));
        RegionHandler::write(&EC, &handler, &REGION, 0x30, 16, 0xbeef).unwrap();
        assert_eq!(&handler.0.lock().ram[0x30..0x32], &[0xef, 0xbe]);

        let state = handler.0.lock();
        assert!(!state.burst);
        assert_eq!(state.commands[0], EC_BURST_ENABLE);
        assert_eq!(state.commands[5], EC_BURST_DISABLE);
    }

    #[test]
    fn query() {
        let handler = EcHandler::new();
        assert_eq!(EC.query(&handler), Ok(0x42));
        assert_eq!(handler.0.lock().commands, vec![EC_BURST_ENABLE, EC_QUERY, EC_BURST_DISABLE]);
    }

    #[test]
    fn from_ecdt() {
        let handler = TestHandler::new();
        assert_eq!(EmbeddedController::from_ecdt(&handler), Ok(None));

        let mut ecdt = vec![0u8; 65];
        ecdt[0..4].copy_from_slice(b"ECDT");
        ecdt[36] = GAS_SYSTEM_IO;
        LittleEndian::write_u64(&mut ecdt[40..48], 0x66);
        ecdt[48] = GAS_SYSTEM_IO;
        LittleEndian::write_u64(&mut ecdt[52..60], 0x62);
        handler.add_table(*b"ECDT", ecdt);

        assert_eq!(EmbeddedController::from_ecdt(&handler), Ok(Some(EC)));
    }

    #[test]
    fn from_device() {
        let interpreter = Interpreter::new(TestHandler::new());
        let ec = {
            let mut namespace = interpreter.namespace.lock();
            let sb = namespace.lookup("\\_SB").unwrap();
            let node = |name: &str, object| NamespaceNode::new(NameSeg::from_str(name).unwrap(), object);
            let ec = namespace.install(node("EC0", NodeObject::Device), sb).unwrap();
            namespace.install(node("_HID", NodeObject::Name(eisaid(EC_PNP_ID))), ec).unwrap();
            #[rustfmt::skip]
            let crs = vec![
                0x47, 0x01, 0x62, 0x00, 0x62, 0x00, 0x00, 0x01,
                0x47, 0x01, 0x66, 0x00, 0x66, 0x00, 0x00, 0x01,
                0x79, 0x00,
            ];
            namespace.install(node("_CRS", NodeObject::Name(Variable::buffer_from(crs))), ec).unwrap();
            ec
        };

        assert_eq!(EmbeddedController::from_device(&interpreter, ec), Ok(EC));
        let sb = interpreter.namespace.lock().lookup("\\_SB").unwrap();
        assert_eq!(EmbeddedController::from_device(&interpreter, sb), Err(AmlError::IllegalArguments));

        interpreter.install_region_handler(RegionSpace::EmbeddedControl, Arc::new(EC));
    }
}
