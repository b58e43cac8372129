use crate::{
    namespace::{AmlHandle, AmlName, NodeObject, NodeType},
    object::{eisaid, SharedBytes, Variable},
    AmlError,
    Handler,
    Interpreter,
};
use alloc::{sync::Arc, vec, vec::Vec};
use bit_field::BitField;
use bitvec::{field::BitField as _, order::Lsb0, view::BitView};
use byteorder::{ByteOrder, LittleEndian};
use core::fmt;
use log::{trace, warn};

const PCI_ROOT_BUS_ID: &str = "PNP0A03";
const PCIE_ROOT_BUS_ID: &str = "PNP0A08";

#[derive(Clone, Debug)]
pub struct OpRegion {
    pub space: RegionSpace,
    pub base: u64,
    pub length: u64,
}

/// Handles accesses to an operation region, in place of the built-in transports. `offset` is
/// relative to the region's base and `width` is the access width in bits (8, 16, 32 or 64).
pub trait RegionHandler: Send + Sync {
    fn read(&self, handler: &dyn Handler, region: &OpRegion, offset: u64, width: u8) -> Result<u64, AmlError>;
    fn write(
        &self,
        handler: &dyn Handler,
        region: &OpRegion,
        offset: u64,
        width: u8,
        value: u64,
    ) -> Result<(), AmlError>;
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum RegionSpace {
    SystemMemory,
    SystemIO,
    PciConfig,
    EmbeddedControl,
    SmBus,
    SystemCmos,
    PciBarTarget,
    Ipmi,
    GeneralPurposeIo,
    GenericSerialBus,
    Pcc,
    Oem(u8),
}

impl From<u8> for RegionSpace {
    fn from(value: u8) -> Self {
        match value {
            0 => RegionSpace::SystemMemory,
            1 => RegionSpace::SystemIO,
            2 => RegionSpace::PciConfig,
            3 => RegionSpace::EmbeddedControl,
            4 => RegionSpace::SmBus,
            5 => RegionSpace::SystemCmos,
            6 => RegionSpace::PciBarTarget,
            7 => RegionSpace::Ipmi,
            8 => RegionSpace::GeneralPurposeIo,
            9 => RegionSpace::GenericSerialBus,
            10 => RegionSpace::Pcc,
            _ => RegionSpace::Oem(value),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FieldAccessType {
    Any,
    Byte,
    Word,
    DWord,
    QWord,
    Buffer,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FieldUpdateRule {
    Preserve,
    WriteAsOnes,
    WriteAsZeros,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct FieldFlags(pub u8);

impl FieldFlags {
    pub fn access_type(&self) -> Result<FieldAccessType, AmlError> {
        match self.0.get_bits(0..4) {
            0 => Ok(FieldAccessType::Any),
            1 => Ok(FieldAccessType::Byte),
            2 => Ok(FieldAccessType::Word),
            3 => Ok(FieldAccessType::DWord),
            4 => Ok(FieldAccessType::QWord),
            5 => Ok(FieldAccessType::Buffer),
            _ => Err(AmlError::InvalidFieldFlags),
        }
    }

    pub fn lock_rule(&self) -> bool {
        self.0.get_bit(4)
    }

    pub fn update_rule(&self) -> Result<FieldUpdateRule, AmlError> {
        match self.0.get_bits(5..7) {
            0 => Ok(FieldUpdateRule::Preserve),
            1 => Ok(FieldUpdateRule::WriteAsOnes),
            2 => Ok(FieldUpdateRule::WriteAsZeros),
            _ => Err(AmlError::InvalidFieldFlags),
        }
    }

    /// Replace the access type, as an `AccessField` inside a field list does.
    pub fn with_access_type(self, access_type: u8) -> FieldFlags {
        let mut flags = self.0;
        flags.set_bits(0..4, access_type.get_bits(0..4));
        FieldFlags(flags)
    }
}

#[derive(Clone, Copy, Debug)]
pub enum FieldKind {
    Normal { region: AmlHandle },
    Bank { region: AmlHandle, bank: AmlHandle, bank_value: u64 },
    Index { index: AmlHandle, data: AmlHandle },
}

/// A named field of an operation region. `bit_offset` is relative to the start of the region (or,
/// for index fields, to the start of the data addressed through the index register).
#[derive(Clone, Copy)]
pub struct FieldUnit {
    pub kind: FieldKind,
    pub bit_offset: u64,
    pub bit_length: u64,
    pub flags: FieldFlags,
}

impl FieldUnit {
    pub fn node_type(&self) -> NodeType {
        match self.kind {
            FieldKind::Normal { .. } => NodeType::Field,
            FieldKind::Bank { .. } => NodeType::BankField,
            FieldKind::Index { .. } => NodeType::IndexField,
        }
    }
}

impl fmt::Debug for FieldUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}(offset = {}, length = {}, flags = {:#x})",
            self.node_type(),
            self.bit_offset,
            self.bit_length,
            self.flags.0
        )
    }
}

impl Interpreter {
    /// Read the value of a field unit. Fields of up to 64 bits produce an integer, longer ones a
    /// buffer.
    pub fn read_field(&self, field: AmlHandle) -> Result<Variable, AmlError> {
        let field = self.field_unit(field)?;
        if let FieldKind::Bank { bank, bank_value, .. } = field.kind {
            self.write_field(bank, &Variable::Integer(bank_value))?;
        }

        let mut bytes = vec![0u8; ((field.bit_length + 7) / 8) as usize];
        self.read_field_bits(&field, &mut bytes)?;

        if bytes.len() > 8 {
            Ok(Variable::buffer_from(bytes))
        } else {
            let mut value = [0u8; 8];
            value[..bytes.len()].copy_from_slice(&bytes);
            Ok(Variable::Integer(LittleEndian::read_u64(&value)))
        }
    }

    pub fn write_field(&self, field: AmlHandle, value: &Variable) -> Result<(), AmlError> {
        let field = self.field_unit(field)?;
        if let FieldKind::Bank { bank, bank_value, .. } = field.kind {
            self.write_field(bank, &Variable::Integer(bank_value))?;
        }

        let source = source_bytes(value, field.bit_length)?;
        self.write_field_bits(&field, &source)
    }

    fn field_unit(&self, field: AmlHandle) -> Result<FieldUnit, AmlError> {
        let namespace = self.namespace.lock();
        match namespace.node(field)?.object {
            NodeObject::Field(unit) => Ok(unit),
            _ => Err(AmlError::TypeMismatch),
        }
    }

    fn access_width(&self, field: &FieldUnit) -> Result<u64, AmlError> {
        Ok(match field.flags.access_type()? {
            FieldAccessType::Byte => 8,
            FieldAccessType::Word => 16,
            FieldAccessType::DWord => 32,
            FieldAccessType::QWord => 64,
            FieldAccessType::Any | FieldAccessType::Buffer => {
                let max_width = match field.kind {
                    FieldKind::Normal { region } | FieldKind::Bank { region, .. } => {
                        match self.region(region)?.0.space {
                            RegionSpace::SystemMemory => 64,
                            _ => 32,
                        }
                    }
                    FieldKind::Index { .. } => 32,
                };
                field.bit_length.next_power_of_two().clamp(8, max_width)
            }
        })
    }

    /*
     * Fields are accessed in chunks of the access width, each aligned to the access width. A chunk
     * may only be partly covered by the field, at its start and end.
     */
    fn read_field_bits(&self, field: &FieldUnit, destination: &mut [u8]) -> Result<(), AmlError> {
        let width = self.access_width(field)?;
        let mut offset = (field.bit_offset & !(width - 1)) / 8;
        let destination = destination.view_bits_mut::<Lsb0>();

        let mut progress = 0;
        while progress < field.bit_length {
            let bit_offset = (field.bit_offset + progress) & (width - 1);
            let access_bits = u64::min(field.bit_length - progress, width - bit_offset);

            let value = self.perform_read(field, offset, width)?;
            let value = value.get_bits((bit_offset as usize)..((bit_offset + access_bits) as usize));
            destination[(progress as usize)..((progress + access_bits) as usize)].store_le(value);

            progress += access_bits;
            offset += width / 8;
        }
        Ok(())
    }

    fn write_field_bits(&self, field: &FieldUnit, source: &[u8]) -> Result<(), AmlError> {
        let width = self.access_width(field)?;
        let update_rule = field.flags.update_rule()?;
        let mut offset = (field.bit_offset & !(width - 1)) / 8;
        let source = source.view_bits::<Lsb0>();

        let mut progress = 0;
        while progress < field.bit_length {
            let bit_offset = (field.bit_offset + progress) & (width - 1);
            let access_bits = u64::min(field.bit_length - progress, width - bit_offset);

            let mut value = match update_rule {
                FieldUpdateRule::Preserve => self.perform_read(field, offset, width)?,
                FieldUpdateRule::WriteAsOnes => u64::MAX,
                FieldUpdateRule::WriteAsZeros => 0,
            };
            let new_bits: u64 = source[(progress as usize)..((progress + access_bits) as usize)].load_le();
            value.set_bits((bit_offset as usize)..((bit_offset + access_bits) as usize), new_bits);
            if width < 64 {
                value.set_bits((width as usize)..64, 0);
            }

            self.perform_write(field, offset, width, value)?;

            progress += access_bits;
            offset += width / 8;
        }
        Ok(())
    }

    fn perform_read(&self, field: &FieldUnit, offset: u64, width: u64) -> Result<u64, AmlError> {
        match field.kind {
            FieldKind::Normal { region } | FieldKind::Bank { region, .. } => {
                self.region_read(region, offset, width as u8)
            }
            FieldKind::Index { index, data } => {
                self.write_field(index, &Variable::Integer(offset))?;
                self.read_field(data)?.implicit_integer()
            }
        }
    }

    fn perform_write(&self, field: &FieldUnit, offset: u64, width: u64, value: u64) -> Result<(), AmlError> {
        match field.kind {
            FieldKind::Normal { region } | FieldKind::Bank { region, .. } => {
                self.region_write(region, offset, width as u8, value)
            }
            FieldKind::Index { index, data } => {
                self.write_field(index, &Variable::Integer(offset))?;
                self.write_field(data, &Variable::Integer(value))
            }
        }
    }

    fn region(&self, region: AmlHandle) -> Result<(OpRegion, Option<Arc<dyn RegionHandler>>), AmlError> {
        let namespace = self.namespace.lock();
        match &namespace.node(region)?.object {
            NodeObject::OpRegion { region, handler } => Ok((region.clone(), handler.clone())),
            _ => Err(AmlError::TypeMismatch),
        }
    }

    /// Find a handler for a region: one set on the region itself wins over one installed for its
    /// whole address space.
    fn region_handler(
        &self,
        region: &OpRegion,
        node_handler: Option<Arc<dyn RegionHandler>>,
    ) -> Option<Arc<dyn RegionHandler>> {
        node_handler.or_else(|| self.region_handlers.lock().get(&region.space).cloned())
    }

    /// Perform a single access of `width` bits at `offset` bytes into the region.
    pub fn region_read(&self, region_node: AmlHandle, offset: u64, width: u8) -> Result<u64, AmlError> {
        let (region, node_handler) = self.region(region_node)?;
        if let Some(handler) = self.region_handler(&region, node_handler) {
            trace!("{}-bit read from overridden region ({:?}) at {:#x}", width, region.space, region.base + offset);
            return handler.read(&*self.handler, &region, offset, width);
        }

        let address = region.base + offset;
        match region.space {
            RegionSpace::SystemMemory => {
                if address & (u64::from(width / 8) - 1) != 0 {
                    warn!("Unaligned {}-bit read from memory at {:#x}", width, address);
                }
                let address = usize::try_from(address).map_err(|_| AmlError::FieldInvalidAddress)?;
                match width {
                    8 => Ok(u64::from(self.handler.read_u8(address)?)),
                    16 => Ok(u64::from(self.handler.read_u16(address)?)),
                    32 => Ok(u64::from(self.handler.read_u32(address)?)),
                    64 => self.handler.read_u64(address),
                    _ => Err(AmlError::FieldInvalidAccessSize),
                }
            }
            RegionSpace::SystemIO => {
                let port = u16::try_from(address).map_err(|_| AmlError::FieldInvalidAddress)?;
                match width {
                    8 => Ok(u64::from(self.handler.read_io_u8(port)?)),
                    16 => Ok(u64::from(self.handler.read_io_u16(port)?)),
                    32 => Ok(u64::from(self.handler.read_io_u32(port)?)),
                    _ => Err(AmlError::FieldInvalidAccessSize),
                }
            }
            RegionSpace::PciConfig => {
                let pci = self.pci_address(region_node)?;
                let offset = u16::try_from(address).map_err(|_| AmlError::FieldInvalidAddress)?;
                let PciAddress { segment, bus, device, function } = pci;
                match width {
                    8 => Ok(u64::from(self.handler.read_pci_u8(segment, bus, device, function, offset)?)),
                    16 => Ok(u64::from(self.handler.read_pci_u16(segment, bus, device, function, offset)?)),
                    32 => Ok(u64::from(self.handler.read_pci_u32(segment, bus, device, function, offset)?)),
                    _ => Err(AmlError::FieldInvalidAccessSize),
                }
            }
            other => {
                warn!("No handler for accesses to regions in address space {:?}", other);
                Err(AmlError::Unsupported)
            }
        }
    }

    pub fn region_write(&self, region_node: AmlHandle, offset: u64, width: u8, value: u64) -> Result<(), AmlError> {
        let (region, node_handler) = self.region(region_node)?;
        if let Some(handler) = self.region_handler(&region, node_handler) {
            trace!(
                "{}-bit write of {:#x} to overridden region ({:?}) at {:#x}",
                width,
                value,
                region.space,
                region.base + offset
            );
            return handler.write(&*self.handler, &region, offset, width, value);
        }

        let address = region.base + offset;
        match region.space {
            RegionSpace::SystemMemory => {
                if address & (u64::from(width / 8) - 1) != 0 {
                    warn!("Unaligned {}-bit write to memory at {:#x}", width, address);
                }
                let address = usize::try_from(address).map_err(|_| AmlError::FieldInvalidAddress)?;
                match width {
                    8 => self.handler.write_u8(address, value as u8),
                    16 => self.handler.write_u16(address, value as u16),
                    32 => self.handler.write_u32(address, value as u32),
                    64 => self.handler.write_u64(address, value),
                    _ => Err(AmlError::FieldInvalidAccessSize),
                }
            }
            RegionSpace::SystemIO => {
                let port = u16::try_from(address).map_err(|_| AmlError::FieldInvalidAddress)?;
                match width {
                    8 => self.handler.write_io_u8(port, value as u8),
                    16 => self.handler.write_io_u16(port, value as u16),
                    32 => self.handler.write_io_u32(port, value as u32),
                    _ => Err(AmlError::FieldInvalidAccessSize),
                }
            }
            RegionSpace::PciConfig => {
                let pci = self.pci_address(region_node)?;
                let offset = u16::try_from(address).map_err(|_| AmlError::FieldInvalidAddress)?;
                match width {
                    8 => self.handler.write_pci_u8(pci.segment, pci.bus, pci.device, pci.function, offset, value as u8),
                    16 => {
                        self.handler.write_pci_u16(pci.segment, pci.bus, pci.device, pci.function, offset, value as u16)
                    }
                    32 => {
                        self.handler.write_pci_u32(pci.segment, pci.bus, pci.device, pci.function, offset, value as u32)
                    }
                    _ => Err(AmlError::FieldInvalidAccessSize),
                }
            }
            other => {
                warn!("No handler for accesses to regions in address space {:?}", other);
                Err(AmlError::Unsupported)
            }
        }
    }

    /// Work out which function's configuration space a `PciConfig` region refers to. `_SEG` and
    /// `_BBN` come from the PCI root bridge above the region's device, and `_ADR` from the device
    /// itself. Each defaults to zero when it isn't present, which matches a legacy system with a
    /// single segment group and root bus.
    fn pci_address(&self, region: AmlHandle) -> Result<PciAddress, AmlError> {
        let (device, root_bus) = {
            let namespace = self.namespace.lock();
            let device = namespace.parent(region).ok_or(AmlError::NoSuchNode)?;
            let bus = namespace.parent(device).ok_or(AmlError::NoSuchNode)?;
            (device, bus)
        };
        let root_bus = self.find_pci_root(root_bus)?;

        let search = |scope: AmlHandle, name: &str| -> Result<u64, AmlError> {
            let handle = {
                let name = AmlName::from_str(name)?;
                self.namespace.lock().resolve(scope, &name)
            };
            match handle {
                Some(handle) => self.eval(handle, &[])?.implicit_integer(),
                None => Ok(0),
            }
        };

        let (segment, bus) = match root_bus {
            Some(root_bus) => (search(root_bus, "_SEG")?, search(root_bus, "_BBN")?),
            None => {
                warn!("PCI region {:?} has no root bridge, assuming segment 0 and bus 0", region);
                (0, 0)
            }
        };
        let adr = search(device, "_ADR")?;

        Ok(PciAddress {
            segment: segment as u16,
            bus: bus as u8,
            device: adr.get_bits(16..24) as u8,
            function: adr.get_bits(0..8) as u8,
        })
    }

    fn find_pci_root(&self, mut node: AmlHandle) -> Result<Option<AmlHandle>, AmlError> {
        let pci_id = eisaid(PCI_ROOT_BUS_ID);
        let pcie_id = eisaid(PCIE_ROOT_BUS_ID);
        loop {
            if self.device_has_id(node, &pci_id)? || self.device_has_id(node, &pcie_id)? {
                return Ok(Some(node));
            }
            match self.namespace.lock().parent(node) {
                Some(parent) => node = parent,
                None => return Ok(None),
            }
        }
    }
}

struct PciAddress {
    segment: u16,
    bus: u8,
    device: u8,
    function: u8,
}

/// The bytes to write into a field, padded with zeros to cover `bit_length` bits.
fn source_bytes(value: &Variable, bit_length: u64) -> Result<Vec<u8>, AmlError> {
    let mut bytes = match value {
        Variable::Integer(value) => value.to_le_bytes().to_vec(),
        Variable::String(bytes) | Variable::Buffer(bytes) => bytes.lock().clone(),
        _ => return Err(AmlError::TypeMismatch),
    };
    let needed = ((bit_length + 7) / 8) as usize;
    if bytes.len() < needed {
        bytes.resize(needed, 0);
    }
    Ok(bytes)
}

fn check_buffer_bounds(buffer: &[u8], bit_offset: u64, bit_length: u64) -> Result<(), AmlError> {
    match bit_offset.checked_add(bit_length) {
        Some(end) if bit_length != 0 && end <= (buffer.len() as u64) * 8 => Ok(()),
        _ => Err(AmlError::OutOfBounds),
    }
}

/// Read a buffer field: `bit_length` bits starting at `bit_offset` of a shared buffer.
pub fn read_buffer_field(buffer: &SharedBytes, bit_offset: u64, bit_length: u64) -> Result<Variable, AmlError> {
    let buffer = buffer.lock();
    check_buffer_bounds(&buffer, bit_offset, bit_length)?;

    let bits = &buffer.view_bits::<Lsb0>()[(bit_offset as usize)..((bit_offset + bit_length) as usize)];
    if bit_length <= 64 {
        Ok(Variable::Integer(bits.load_le::<u64>()))
    } else {
        let mut bytes = vec![0u8; ((bit_length + 7) / 8) as usize];
        bytes.view_bits_mut::<Lsb0>()[..(bit_length as usize)].copy_from_bitslice(bits);
        Ok(Variable::buffer_from(bytes))
    }
}

pub fn write_buffer_field(
    buffer: &SharedBytes,
    bit_offset: u64,
    bit_length: u64,
    value: &Variable,
) -> Result<(), AmlError> {
    // Take a copy of the source first, as it can be the very buffer we're writing into.
    let source = source_bytes(value, bit_length)?;

    let mut buffer = buffer.lock();
    check_buffer_bounds(&buffer, bit_offset, bit_length)?;
    buffer.view_bits_mut::<Lsb0>()[(bit_offset as usize)..((bit_offset + bit_length) as usize)]
        .copy_from_bitslice(&source.view_bits::<Lsb0>()[..(bit_length as usize)]);
    Ok(())
}
