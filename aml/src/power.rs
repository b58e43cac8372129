//! Fixed-hardware power management: switching the platform into ACPI mode, handling the SCI
//! events of the PM1 register blocks, entering sleep states and resetting the system. The
//! locations of the fixed-hardware registers come from the FADT.

use crate::{
    name_object::NameSeg,
    namespace::{AmlHandle, NodeType},
    object::Variable,
    op_region::RegionSpace,
    AmlError,
    Handler,
    Interpreter,
};
use alloc::vec::Vec;
use bit_field::BitField;
use byteorder::{ByteOrder, LittleEndian};
use log::{debug, info, warn};

const FADT_SIGNATURE: [u8; 4] = *b"FACP";

/*
 * Offsets of the FADT fields we use. The revision is part of the standard table header, and
 * everything else follows it. Fields from the Reset Register onwards only exist in ACPI 2.0 and
 * later tables, and the sleep registers in ACPI 5.0 and later.
 */
const FADT_REVISION: usize = 8;
const FADT_SMI_COMMAND: usize = 48;
const FADT_ACPI_ENABLE: usize = 52;
const FADT_ACPI_DISABLE: usize = 53;
const FADT_PM1A_EVENT_BLOCK: usize = 56;
const FADT_PM1B_EVENT_BLOCK: usize = 60;
const FADT_PM1A_CONTROL_BLOCK: usize = 64;
const FADT_PM1B_CONTROL_BLOCK: usize = 68;
const FADT_PM1_EVENT_LENGTH: usize = 88;
const FADT_FLAGS: usize = 112;
const FADT_RESET_REGISTER: usize = 116;
const FADT_RESET_VALUE: usize = 128;
const FADT_SLEEP_CONTROL_REGISTER: usize = 244;
const FADT_SLEEP_STATUS_REGISTER: usize = 256;

const GAS_LENGTH: usize = 12;

/// FADT flags
const FLAG_RESET_REG_SUP: usize = 10;
const FLAG_HW_REDUCED_ACPI: usize = 20;

/// PM1 control register bits
const PM1_SCI_EN: usize = 0;
const PM1_SLP_TYP: core::ops::Range<usize> = 10..13;
const PM1_SLP_EN: usize = 13;

/// PM1 status and enable register bits
pub const EVENT_TIMER: u16 = 1 << 0;
pub const EVENT_POWER_BUTTON: u16 = 1 << 8;
pub const EVENT_SLEEP_BUTTON: u16 = 1 << 9;
pub const EVENT_WAKE: u16 = 1 << 15;

/// Sleep control register bits, on hardware-reduced platforms
const SLEEP_CONTROL_SLP_TYP: core::ops::Range<usize> = 2..5;
const SLEEP_CONTROL_SLP_EN: usize = 5;

/// `_STA` bits
const STA_PRESENT: usize = 0;
const STA_FUNCTIONING: usize = 3;

const ACPI_ENABLE_ATTEMPTS: usize = 100;

/// A register described by a Generic Address Structure.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GenericAddress {
    pub space: RegionSpace,
    pub bit_width: u8,
    pub bit_offset: u8,
    pub access_size: u8,
    /// For `PciConfig` registers, which are always on segment 0 and bus 0, this is of the format:
    /// ```ignore
    /// 64              48              32              16               0
    ///  +---------------+---------------+---------------+---------------+
    ///  |  reserved (0) |    device     |   function    |    offset     |
    ///  +---------------+---------------+---------------+---------------+
    /// ```
    pub address: u64,
}

impl GenericAddress {
    pub fn from_bytes(bytes: &[u8]) -> Result<GenericAddress, AmlError> {
        if bytes.len() < GAS_LENGTH {
            return Err(AmlError::OutOfBounds);
        }
        Ok(GenericAddress {
            space: RegionSpace::from(bytes[0]),
            bit_width: bytes[1],
            bit_offset: bytes[2],
            access_size: bytes[3],
            address: LittleEndian::read_u64(&bytes[4..12]),
        })
    }

    pub fn write_u8(&self, handler: &dyn Handler, value: u8) -> Result<(), AmlError> {
        match self.space {
            RegionSpace::SystemMemory => {
                handler.write_u8(usize::try_from(self.address).map_err(|_| AmlError::FieldInvalidAddress)?, value)
            }
            RegionSpace::SystemIO => {
                handler.write_io_u8(u16::try_from(self.address).map_err(|_| AmlError::FieldInvalidAddress)?, value)
            }
            RegionSpace::PciConfig => handler.write_pci_u8(
                0,
                0,
                self.address.get_bits(32..48) as u8,
                self.address.get_bits(16..32) as u8,
                self.address.get_bits(0..16) as u16,
                value,
            ),
            other => {
                warn!("Unsupported address space {:?} for a fixed hardware register", other);
                Err(AmlError::Unsupported)
            }
        }
    }
}

/// The fixed-hardware registers the FADT describes, and the values used to drive them.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FixedHardware {
    pub revision: u8,
    pub smi_command_port: u16,
    pub acpi_enable: u8,
    pub acpi_disable: u8,
    pub pm1a_event_block: u16,
    pub pm1b_event_block: u16,
    pub pm1a_control_block: u16,
    pub pm1b_control_block: u16,
    pub pm1_event_length: u8,
    pub hardware_reduced: bool,
    /// The reset register, and the value to write to it. `None` if the platform doesn't support
    /// resetting through it.
    pub reset: Option<(GenericAddress, u8)>,
    pub sleep_control: Option<GenericAddress>,
    pub sleep_status: Option<GenericAddress>,
}

impl FixedHardware {
    /// Find the fixed-hardware registers through the FADT. Returns `Ok(None)` if there's no FADT.
    pub fn from_fadt(handler: &dyn Handler) -> Result<Option<FixedHardware>, AmlError> {
        let Some(fadt) = handler.scan_table(FADT_SIGNATURE, 0)? else {
            warn!("Couldn't find a FADT");
            return Ok(None);
        };
        if fadt.len() < FADT_FLAGS + 4 {
            return Err(AmlError::OutOfBounds);
        }

        let port = |offset: usize| -> Result<u16, AmlError> {
            let value = LittleEndian::read_u32(&fadt[offset..(offset + 4)]);
            u16::try_from(value).map_err(|_| AmlError::FieldInvalidAddress)
        };
        let register = |offset: usize| -> Result<Option<GenericAddress>, AmlError> {
            match fadt.get(offset..(offset + GAS_LENGTH)) {
                Some(bytes) => {
                    let register = GenericAddress::from_bytes(bytes)?;
                    Ok(if register.address == 0 { None } else { Some(register) })
                }
                None => Ok(None),
            }
        };

        let flags = LittleEndian::read_u32(&fadt[FADT_FLAGS..(FADT_FLAGS + 4)]);
        let reset = match (register(FADT_RESET_REGISTER)?, fadt.get(FADT_RESET_VALUE)) {
            (Some(register), Some(&value)) if flags.get_bit(FLAG_RESET_REG_SUP) => Some((register, value)),
            _ => None,
        };

        Ok(Some(FixedHardware {
            revision: fadt[FADT_REVISION],
            smi_command_port: port(FADT_SMI_COMMAND)?,
            acpi_enable: fadt[FADT_ACPI_ENABLE],
            acpi_disable: fadt[FADT_ACPI_DISABLE],
            pm1a_event_block: port(FADT_PM1A_EVENT_BLOCK)?,
            pm1b_event_block: port(FADT_PM1B_EVENT_BLOCK)?,
            pm1a_control_block: port(FADT_PM1A_CONTROL_BLOCK)?,
            pm1b_control_block: port(FADT_PM1B_CONTROL_BLOCK)?,
            pm1_event_length: fadt[FADT_PM1_EVENT_LENGTH],
            hardware_reduced: flags.get_bit(FLAG_HW_REDUCED_ACPI),
            reset,
            sleep_control: register(FADT_SLEEP_CONTROL_REGISTER)?,
            sleep_status: register(FADT_SLEEP_STATUS_REGISTER)?,
        }))
    }

    /// Switch the platform from legacy mode into ACPI mode. This runs the `_INI` methods of the
    /// devices under `\_SB`, tells the firmware which interrupt model the OS uses through `\_PIC`
    /// (0 for the PIC, 1 for the APIC and 2 for the SAPIC), and then asks the firmware to hand the
    /// fixed hardware over to the OS.
    pub fn enable_acpi(&self, interpreter: &Interpreter, mode: u32) -> Result<(), AmlError> {
        let ini = interpreter.namespace.lock().lookup("\\_SB._INI").ok();
        if let Some(ini) = ini {
            call_optional(interpreter, ini, &[]);
        }
        let system_bus = interpreter.namespace.lock().lookup("\\_SB")?;
        initialize_devices(interpreter, system_bus);

        let pic = interpreter.namespace.lock().lookup("\\_PIC").ok();
        if let Some(pic) = pic {
            call_optional(interpreter, pic, &[Variable::Integer(u64::from(mode))]);
        }

        if self.hardware_reduced {
            info!("Hardware-reduced platform is always in ACPI mode");
            return Ok(());
        }

        let handler = &*interpreter.handler;
        if self.smi_command_port != 0 {
            handler.write_io_u8(self.smi_command_port, self.acpi_enable)?;
            handler.sleep(10)?;
        }

        let mut enabled = false;
        for _ in 0..ACPI_ENABLE_ATTEMPTS {
            if handler.read_io_u16(self.pm1a_control_block)?.get_bit(PM1_SCI_EN) {
                enabled = true;
                break;
            }
            handler.sleep(10)?;
        }
        if !enabled {
            warn!("Firmware did not set SCI_EN after the switch to ACPI mode");
        }

        self.set_sci_event(handler, EVENT_POWER_BUTTON | EVENT_SLEEP_BUTTON | EVENT_WAKE)?;
        self.read_sci_event(handler)?;
        info!("ACPI mode enabled");
        Ok(())
    }

    /// Hand the fixed hardware back to the firmware.
    pub fn disable_acpi(&self, handler: &dyn Handler) -> Result<(), AmlError> {
        if self.hardware_reduced {
            warn!("Hardware-reduced platforms can't leave ACPI mode");
            return Err(AmlError::Unsupported);
        }

        self.set_sci_event(handler, 0)?;
        self.read_sci_event(handler)?;
        for block in [self.pm1a_control_block, self.pm1b_control_block] {
            if block != 0 {
                let mut control = handler.read_io_u16(block)?;
                control.set_bit(PM1_SCI_EN, false);
                handler.write_io_u16(block, control)?;
            }
        }
        if self.smi_command_port != 0 {
            handler.write_io_u8(self.smi_command_port, self.acpi_disable)?;
        }
        Ok(())
    }

    /// Read the PM1 status registers, acknowledging every event that was pending. This is what an
    /// SCI handler should call to find out which fixed events fired.
    pub fn read_sci_event(&self, handler: &dyn Handler) -> Result<u16, AmlError> {
        if self.hardware_reduced {
            return Ok(0);
        }

        let mut events = 0;
        for block in [self.pm1a_event_block, self.pm1b_event_block] {
            if block != 0 {
                let status = handler.read_io_u16(block)?;
                /*
                 * The status bits are cleared by writing ones to them.
                 */
                handler.write_io_u16(block, status)?;
                events |= status;
            }
        }
        Ok(events)
    }

    /// Set which fixed events raise an SCI. The enable registers are the second half of each PM1
    /// event block.
    pub fn set_sci_event(&self, handler: &dyn Handler, events: u16) -> Result<(), AmlError> {
        if self.hardware_reduced {
            return Ok(());
        }

        let enable_offset = u16::from(self.pm1_event_length / 2);
        for block in [self.pm1a_event_block, self.pm1b_event_block] {
            if block != 0 {
                handler.write_io_u16(block + enable_offset, events)?;
            }
        }
        Ok(())
    }

    /// Put the system into sleep state `state` (S0 to S5). The firmware's `\_Sx` package gives
    /// the values to program into the sleep type fields, and `\_PTS` (and `\_GTS` on old
    /// platforms) is run first. Returns `AmlError::Unsupported` if the firmware doesn't support
    /// the state. If it does, this only returns once the system has woken up again, or straight
    /// away on hardware that doesn't do anything.
    pub fn enter_sleep(&self, interpreter: &Interpreter, state: u8) -> Result<(), AmlError> {
        if state > 5 {
            return Err(AmlError::IllegalArguments);
        }

        let (root, sleep_object) = {
            let namespace = interpreter.namespace.lock();
            let root = namespace.root();
            (root, namespace.child(root, NameSeg([b'_', b'S', b'0' + state, b'_'])))
        };
        let Some(sleep_object) = sleep_object else {
            debug!("Sleep state S{} is not supported by the firmware", state);
            return Err(AmlError::Unsupported);
        };
        let package = interpreter.eval(sleep_object, &[])?;
        let sleep_type_a = package.package_get(0)?.implicit_integer()?;
        let sleep_type_b = package.package_get(1)?.implicit_integer()?;

        info!("Entering sleep state S{}", state);
        let argument = [Variable::Integer(u64::from(state))];
        let prepare = interpreter.namespace.lock().child(root, NameSeg(*b"_PTS"));
        if let Some(prepare) = prepare {
            call_optional(interpreter, prepare, &argument);
        }
        if self.revision < 5 {
            let going_to_sleep = interpreter.namespace.lock().child(root, NameSeg(*b"_GTS"));
            if let Some(going_to_sleep) = going_to_sleep {
                call_optional(interpreter, going_to_sleep, &argument);
            }
        }

        let handler = &*interpreter.handler;
        if self.hardware_reduced {
            let Some(sleep_control) = self.sleep_control else {
                warn!("Hardware-reduced platform has no sleep control register");
                return Err(AmlError::Unsupported);
            };
            let mut control = 0u8;
            control.set_bits(SLEEP_CONTROL_SLP_TYP, sleep_type_a.get_bits(0..3) as u8);
            control.set_bit(SLEEP_CONTROL_SLP_EN, true);
            return sleep_control.write_u8(handler, control);
        }

        write_sleep_type(handler, self.pm1a_control_block, sleep_type_a)?;
        if self.pm1b_control_block != 0 {
            write_sleep_type(handler, self.pm1b_control_block, sleep_type_b)?;
        }
        Ok(())
    }

    /// Tell the firmware the system has woken up from sleep state `state`, through `\_WAK`.
    pub fn wake(&self, interpreter: &Interpreter, state: u8) -> Result<(), AmlError> {
        if state > 5 {
            return Err(AmlError::IllegalArguments);
        }

        let wake = interpreter.namespace.lock().lookup("\\_WAK").ok();
        if let Some(wake) = wake {
            interpreter.eval(wake, &[Variable::Integer(u64::from(state))])?;
        }
        info!("Woke up from sleep state S{}", state);
        Ok(())
    }

    /// Reset the system through the FADT's reset register.
    pub fn reset(&self, handler: &dyn Handler) -> Result<(), AmlError> {
        let Some((register, value)) = self.reset else {
            warn!("Platform doesn't support resetting through the reset register");
            return Err(AmlError::Unsupported);
        };
        register.write_u8(handler, value)
    }
}

fn write_sleep_type(handler: &dyn Handler, block: u16, sleep_type: u64) -> Result<(), AmlError> {
    let mut control = handler.read_io_u16(block)?;
    control.set_bits(PM1_SLP_TYP, sleep_type.get_bits(0..3) as u16);
    control.set_bit(PM1_SLP_EN, true);
    handler.write_io_u16(block, control)
}

/// Evaluate `_STA` of `device`. A device without one is present and functioning, and one whose
/// `_STA` fails is treated as absent.
pub fn device_status(interpreter: &Interpreter, device: AmlHandle) -> u64 {
    let status = interpreter.namespace.lock().child(device, NameSeg(*b"_STA"));
    let Some(status) = status else {
        return 0x0f;
    };
    match interpreter.eval(status, &[]).and_then(|value| value.implicit_integer()) {
        Ok(status) => status,
        Err(err) => {
            warn!("Failed to evaluate _STA of {:?}, ignoring the device: {:?}", device, err);
            0
        }
    }
}

/// Run `_INI` on the devices below `parent` that are present. Children of devices that are absent
/// but functioning are still visited.
pub fn initialize_devices(interpreter: &Interpreter, parent: AmlHandle) {
    let devices: Vec<AmlHandle> = {
        let namespace = interpreter.namespace.lock();
        namespace.children(parent).filter(|&child| namespace.node_type(child) == Some(NodeType::Device)).collect()
    };

    for device in devices {
        let status = device_status(interpreter, device);
        if status.get_bit(STA_PRESENT) {
            let ini = interpreter.namespace.lock().child(device, NameSeg(*b"_INI"));
            if let Some(ini) = ini {
                call_optional(interpreter, ini, &[]);
            }
        }
        if status.get_bit(STA_PRESENT) || status.get_bit(STA_FUNCTIONING) {
            initialize_devices(interpreter, device);
        }
    }
}

/// Evaluate a firmware hook whose failure shouldn't stop the operation that runs it.
fn call_optional(interpreter: &Interpreter, handle: AmlHandle, args: &[Variable]) {
    if let Err(err) = interpreter.eval(handle, args) {
        let path = interpreter.namespace.lock().path_of(handle);
        warn!("Evaluating {} failed: {:?}", path, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use alloc::{vec, vec::Vec};

    const SMI_COMMAND: u16 = 0xb2;
    const PM1A_EVENT: u16 = 0x400;
    const PM1A_CONTROL: u16 = 0x404;
    const RESET_PORT: u16 = 0xcf9;
    const SLEEP_CONTROL: usize = 0x1000;

    fn fadt(flags: u32) -> Vec<u8> {
        let mut fadt = vec![0u8; 276];
        fadt[0..4].copy_from_slice(b"FACP");
        LittleEndian::write_u32(&mut fadt[4..8], 276);
        fadt[FADT_REVISION] = 6;
        LittleEndian::write_u32(&mut fadt[FADT_SMI_COMMAND..], SMI_COMMAND.into());
        fadt[FADT_ACPI_ENABLE] = 0xf0;
        fadt[FADT_ACPI_DISABLE] = 0xf1;
        LittleEndian::write_u32(&mut fadt[FADT_PM1A_EVENT_BLOCK..], PM1A_EVENT.into());
        LittleEndian::write_u32(&mut fadt[FADT_PM1A_CONTROL_BLOCK..], PM1A_CONTROL.into());
        fadt[FADT_PM1_EVENT_LENGTH] = 4;
        LittleEndian::write_u32(&mut fadt[FADT_FLAGS..], flags);

        // SystemIO, 8 bits wide, byte access
        fadt[FADT_RESET_REGISTER..(FADT_RESET_REGISTER + 4)].copy_from_slice(&[1, 8, 0, 1]);
        LittleEndian::write_u64(&mut fadt[(FADT_RESET_REGISTER + 4)..], RESET_PORT.into());
        fadt[FADT_RESET_VALUE] = 0x06;

        // SystemMemory, 8 bits wide, byte access
        fadt[FADT_SLEEP_CONTROL_REGISTER..(FADT_SLEEP_CONTROL_REGISTER + 4)].copy_from_slice(&[0, 8, 0, 1]);
        LittleEndian::write_u64(&mut fadt[(FADT_SLEEP_CONTROL_REGISTER + 4)..], SLEEP_CONTROL as u64);
        fadt
    }

    fn interpreter_with_fadt(flags: u32, aml: &[u8]) -> (Interpreter, TestHandler, FixedHardware) {
        let handler = TestHandler::new();
        handler.add_table(FADT_SIGNATURE, fadt(flags));
        let hardware = FixedHardware::from_fadt(&handler).unwrap().unwrap();

        let interpreter = Interpreter::new(handler.clone());
        let root = interpreter.namespace.lock().root();
        interpreter.populate(root, aml).unwrap();
        (interpreter, handler, hardware)
    }

    /// `Name (_S5, Package () { 5, 5, 0, 0 })`, with `_PTS` and `_WAK` recording their argument
    /// in `PTSV`.
    fn sleep_aml() -> Vec<u8> {
        aml![
            [0x08],
            *b"_S5_",
            pkg(0x12, &[0x04, 0x0a, 0x05, 0x0a, 0x05, 0x00, 0x00]),
            [0x08],
            *b"PTSV",
            [0x00],
            method("_PTS", 1, &aml![[0x70, 0x68], *b"PTSV"]),
            // Store (Add (Arg0, 0x10), PTSV); Return (Package () { 0, 0 })
            method("_WAK", 1, &aml![[0x70, 0x72, 0x68, 0x0a, 0x10, 0x00], *b"PTSV", [0xa4], pkg(0x12, &[0x02, 0, 0])]),
        ]
    }

    fn device(name: &[u8; 4], body: &[u8]) -> Vec<u8> {
        ext_pkg(0x82, &aml![name, body])
    }

    fn ptsv(interpreter: &Interpreter) -> u64 {
        interpreter.eval_path("\\PTSV", &[]).unwrap().as_integer().unwrap()
    }

    #[test]
    fn parses_the_fadt() {
        let handler = TestHandler::new();
        assert_eq!(FixedHardware::from_fadt(&handler), Ok(None));

        handler.add_table(FADT_SIGNATURE, fadt(1 << FLAG_RESET_REG_SUP));
        let hardware = FixedHardware::from_fadt(&handler).unwrap().unwrap();
        assert_eq!(hardware.smi_command_port, SMI_COMMAND);
        assert_eq!((hardware.acpi_enable, hardware.acpi_disable), (0xf0, 0xf1));
        assert_eq!(hardware.pm1a_event_block, PM1A_EVENT);
        assert_eq!(hardware.pm1b_event_block, 0);
        assert_eq!(hardware.pm1a_control_block, PM1A_CONTROL);
        assert!(!hardware.hardware_reduced);
        let Some((reset, 0x06)) = hardware.reset else { panic!() };
        assert_eq!(reset.space, RegionSpace::SystemIO);
        assert_eq!(reset.address, u64::from(RESET_PORT));
        assert_eq!(hardware.sleep_control.map(|register| register.space), Some(RegionSpace::SystemMemory));
        assert_eq!(hardware.sleep_status, None);

        let truncated = TestHandler::new();
        truncated.add_table(FADT_SIGNATURE, fadt(0)[..100].to_vec());
        assert_eq!(FixedHardware::from_fadt(&truncated), Err(AmlError::OutOfBounds));
    }

    #[test]
    fn enters_and_leaves_sleep_states() {
        let (interpreter, handler, hardware) = interpreter_with_fadt(0, &sleep_aml());
        handler.write_io_u16(PM1A_CONTROL, 0x0001).unwrap();

        hardware.enter_sleep(&interpreter, 5).unwrap();
        assert_eq!(ptsv(&interpreter), 5);
        // SLP_TYP = 5 and SLP_EN, with SCI_EN left alone
        assert_eq!(handler.read_io_u16(PM1A_CONTROL), Ok(0x3401));

        hardware.wake(&interpreter, 5).unwrap();
        assert_eq!(ptsv(&interpreter), 0x15);

        assert_eq!(hardware.enter_sleep(&interpreter, 3), Err(AmlError::Unsupported));
        assert_eq!(hardware.enter_sleep(&interpreter, 6), Err(AmlError::IllegalArguments));
        assert_eq!(ptsv(&interpreter), 0x15);
    }

    #[test]
    fn hardware_reduced_sleep() {
        let (interpreter, handler, hardware) = interpreter_with_fadt(1 << FLAG_HW_REDUCED_ACPI, &sleep_aml());
        assert!(hardware.hardware_reduced);

        hardware.enter_sleep(&interpreter, 5).unwrap();
        assert_eq!(handler.read_memory(SLEEP_CONTROL, 1), vec![0x34]);
        assert_eq!(handler.read_io_u16(PM1A_CONTROL), Ok(0));
        assert_eq!(hardware.disable_acpi(&handler), Err(AmlError::Unsupported));
    }

    #[test]
    fn enables_acpi_mode() {
        let increment = aml![[0x75, 0x5c], *b"INIC"];
        let ini = method("_INI", 0, &increment);
        let aml = aml![
            [0x08],
            *b"INIC",
            [0x00],
            [0x08],
            *b"PICM",
            [0x0a, 0xff],
            method("_PIC", 1, &aml![[0x70, 0x68], *b"PICM"]),
            pkg(
                0x10,
                &aml![
                    [0x5c],
                    *b"_SB_",
                    ini,
                    device(b"DEV0", &aml![ini, device(b"DEV1", &ini)]),
                    // Absent, so neither it nor its children are initialized
                    device(b"DEV2", &aml![[0x08], *b"_STA", [0x00], ini, device(b"DEV3", &ini)]),
                    // Functioning but not present, so only its children are initialized
                    device(b"DEV4", &aml![[0x08], *b"_STA", [0x0a, 0x08], ini, device(b"DEV5", &ini)]),
                ]
            ),
        ];
        let (interpreter, handler, hardware) = interpreter_with_fadt(0, &aml);
        handler.write_io_u16(PM1A_EVENT, EVENT_TIMER | EVENT_POWER_BUTTON).unwrap();
        // The firmware has already set SCI_EN
        handler.write_io_u16(PM1A_CONTROL, 0x0001).unwrap();

        hardware.enable_acpi(&interpreter, 1).unwrap();
        assert_eq!(interpreter.eval_path("\\INIC", &[]).unwrap().as_integer(), Ok(4));
        assert_eq!(interpreter.eval_path("\\PICM", &[]).unwrap().as_integer(), Ok(1));
        assert_eq!(handler.read_io(SMI_COMMAND), 0xf0);
        assert_eq!(
            handler.read_io_u16(PM1A_EVENT + 2),
            Ok(EVENT_POWER_BUTTON | EVENT_SLEEP_BUTTON | EVENT_WAKE)
        );

        hardware.disable_acpi(&handler).unwrap();
        assert_eq!(handler.read_io_u16(PM1A_EVENT + 2), Ok(0));
        assert_eq!(handler.read_io_u16(PM1A_CONTROL), Ok(0));
        assert_eq!(handler.read_io(SMI_COMMAND), 0xf1);
    }

    #[test]
    fn sci_events() {
        let handler = TestHandler::new();
        handler.add_table(FADT_SIGNATURE, fadt(0));
        let hardware = FixedHardware::from_fadt(&handler).unwrap().unwrap();

        handler.write_io_u16(PM1A_EVENT, EVENT_SLEEP_BUTTON).unwrap();
        assert_eq!(hardware.read_sci_event(&handler), Ok(EVENT_SLEEP_BUTTON));
        hardware.set_sci_event(&handler, EVENT_POWER_BUTTON).unwrap();
        assert_eq!(handler.read_io_u16(PM1A_EVENT + 2), Ok(EVENT_POWER_BUTTON));
    }

    #[test]
    fn reset_register() {
        let handler = TestHandler::new();
        handler.add_table(FADT_SIGNATURE, fadt(1 << FLAG_RESET_REG_SUP));
        FixedHardware::from_fadt(&handler).unwrap().unwrap().reset(&handler).unwrap();
        assert_eq!(handler.read_io(RESET_PORT), 0x06);

        let unsupported = TestHandler::new();
        unsupported.add_table(FADT_SIGNATURE, fadt(0));
        let hardware = FixedHardware::from_fadt(&unsupported).unwrap().unwrap();
        assert_eq!(hardware.reset(&unsupported), Err(AmlError::Unsupported));
    }
}
