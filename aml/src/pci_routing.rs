//! Routing of PCI interrupt pins to interrupt controller inputs, through the `_PRT` objects of PCI
//! root bridges.

use crate::{
    name_object::NameSeg,
    namespace::{AmlHandle, AmlName},
    object::{eisaid, Variable},
    resource::{resource_descriptors, InterruptPolarity, InterruptTrigger, Resource},
    AmlError,
    Interpreter,
};
use alloc::vec::Vec;
use bit_field::BitField;
use log::{debug, warn};

pub use crate::resource::IrqDescriptor;

const PCI_ROOT_PNP_ID: &str = "PNP0A03";
const PCIE_ROOT_PNP_ID: &str = "PNP0A08";

/// Offset of the Interrupt Pin register in a function's configuration space.
const PCI_INTERRUPT_PIN: u16 = 0x3d;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Pin {
    IntA,
    IntB,
    IntC,
    IntD,
}

impl Pin {
    /// Decode the Interrupt Pin register of a PCI function, which numbers the pins from 1. Zero
    /// means the function doesn't use an interrupt pin.
    pub fn from_config(value: u8) -> Option<Pin> {
        match value {
            1 => Some(Pin::IntA),
            2 => Some(Pin::IntB),
            3 => Some(Pin::IntC),
            4 => Some(Pin::IntD),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub enum PciRouteType {
    /// The interrupt is hard-coded to a specific GSI
    Gsi(u32),

    /// The interrupt is allocated by a link device, which describes the interrupt it's currently
    /// using in its `_CRS`. `index` selects the descriptor within it.
    LinkObject { link: AmlHandle, index: usize },
}

#[derive(Clone, Debug)]
pub struct PciRoute {
    pub device: u16,
    /// `None` if the route applies to every function of the device.
    pub function: Option<u16>,
    pub pin: Pin,
    pub route_type: PciRouteType,
}

/// A `PciRoutingTable` is used to interpret the data in a `_PRT` object, which provides a mapping
/// from PCI interrupt pins to the inputs of the interrupt controller. One of these objects must be
/// present under each PCI root bridge, and consists of a package of packages, each of which
/// describes the mapping of a single PCI interrupt pin.
#[derive(Clone, Debug)]
pub struct PciRoutingTable {
    entries: Vec<PciRoute>,
}

impl PciRoutingTable {
    pub fn from_prt_path(interpreter: &Interpreter, path: &str) -> Result<PciRoutingTable, AmlError> {
        let prt = interpreter.namespace.lock().lookup(path)?;
        PciRoutingTable::from_prt(interpreter, prt)
    }

    /// Evaluate the `_PRT` object `prt` and decode its entries. Returns `AmlError::TypeMismatch` if
    /// it doesn't produce a package of packages, and the various `AmlError::Prt*` errors if the
    /// entries themselves are invalid.
    pub fn from_prt(interpreter: &Interpreter, prt: AmlHandle) -> Result<PciRoutingTable, AmlError> {
        let bridge = interpreter.namespace.lock().parent(prt).ok_or(AmlError::RootHasNoParent)?;
        let Variable::Package(table) = interpreter.eval(prt, &[])? else {
            warn!("_PRT did not evaluate to a package");
            return Err(AmlError::TypeMismatch);
        };
        let table = table.lock().clone();

        let mut entries = Vec::with_capacity(table.len());
        for entry in &table {
            let Variable::Package(fields) = entry else {
                return Err(AmlError::TypeMismatch);
            };
            let fields = fields.lock().clone();
            let [address, pin, source, source_index] = &fields[..] else {
                warn!("_PRT entry has {} fields instead of 4", fields.len());
                return Err(AmlError::UnexpectedResult);
            };

            /*
             * Each inner package has the following structure:
             *   | Field      | Type      | Description                                               |
             *   | -----------|-----------|-----------------------------------------------------------|
             *   | Address    | Dword     | Address of the device. Same format as _ADR objects (high  |
             *   |            |           | word = #device, low word = #function)                     |
             *   | -----------|-----------|-----------------------------------------------------------|
             *   | Pin        | Byte      | The PCI pin (0 = INTA, 1 = INTB, 2 = INTC, 3 = INTD)      |
             *   | -----------|-----------|-----------------------------------------------------------|
             *   | Source     | Byte or   | Name of the device that allocates the interrupt to which  |
             *   |            | NamePath  | the above pin is connected. Can be fully qualified,       |
             *   |            |           | relative, or a simple NameSeg that utilizes namespace     |
             *   |            |           | search rules. Instead, if this is a byte value of 0, the  |
             *   |            |           | interrupt is allocated out of the GSI pool, and Source    |
             *   |            |           | Index should be utilised.                                 |
             *   | -----------|-----------|-----------------------------------------------------------|
             *   | Source     | Dword     | Index that indicates which resource descriptor in the     |
             *   | Index      |           | resource template of the device pointed to in the Source  |
             *   |            |           | field this interrupt is allocated from. If the Source     |
             *   |            |           | is zero, then this field is the GSI number to which the   |
             *   |            |           | pin is connected.                                         |
             *   | -----------|-----------|-----------------------------------------------------------|
             */
            let address = address.as_integer().map_err(|_| AmlError::PrtInvalidAddress)?;
            if address > u64::from(u32::MAX) {
                return Err(AmlError::PrtInvalidAddress);
            }
            let function = address.get_bits(0..16) as u16;
            let pin = match pin.as_integer() {
                Ok(0) => Pin::IntA,
                Ok(1) => Pin::IntB,
                Ok(2) => Pin::IntC,
                Ok(3) => Pin::IntD,
                _ => return Err(AmlError::PrtInvalidPin),
            };
            let source_index = source_index.as_integer().map_err(|_| AmlError::PrtInvalidSource)?;

            let route_type = match source {
                Variable::Integer(0) => {
                    PciRouteType::Gsi(u32::try_from(source_index).map_err(|_| AmlError::PrtInvalidGsi)?)
                }
                Variable::Integer(_) => return Err(AmlError::PrtInvalidSource),
                other => PciRouteType::LinkObject {
                    link: resolve_link(interpreter, bridge, other)?,
                    index: usize::try_from(source_index).map_err(|_| AmlError::PrtInvalidSource)?,
                },
            };

            entries.push(PciRoute {
                device: address.get_bits(16..32) as u16,
                function: if function == 0xffff { None } else { Some(function) },
                pin,
                route_type,
            });
        }

        Ok(PciRoutingTable { entries })
    }

    pub fn entries(&self) -> &[PciRoute] {
        &self.entries
    }

    /// Get the interrupt input that a given PCI interrupt pin is wired to. Returns
    /// `AmlError::PrtNoEntry` if the table doesn't contain an entry for the given address and pin.
    pub fn route(
        &self,
        interpreter: &Interpreter,
        device: u16,
        function: u16,
        pin: Pin,
    ) -> Result<IrqDescriptor, AmlError> {
        let entry = self
            .entries
            .iter()
            .find(|entry| {
                entry.device == device && entry.function.map_or(true, |f| f == function) && entry.pin == pin
            })
            .ok_or(AmlError::PrtNoEntry)?;

        match entry.route_type {
            PciRouteType::Gsi(gsi) => Ok(IrqDescriptor {
                is_consumer: true,
                trigger: InterruptTrigger::Level,
                polarity: InterruptPolarity::ActiveLow,
                is_shared: true,
                is_wake_capable: false,
                irqs: if gsi < 64 { 1 << gsi } else { 0 },
                irq: gsi,
            }),
            PciRouteType::LinkObject { link, index } => {
                let crs = interpreter.namespace.lock().child(link, NameSeg(*b"_CRS"));
                let Some(crs) = crs else {
                    warn!("Interrupt link {:?} has no _CRS", link);
                    return Err(AmlError::NoSuchNode);
                };
                let crs = match interpreter.eval(crs, &[])? {
                    Variable::Buffer(bytes) => bytes.lock().clone(),
                    _ => return Err(AmlError::TypeMismatch),
                };

                match resource_descriptors(&crs).nth(index) {
                    Some(Ok(Resource::Irq(descriptor))) => Ok(descriptor),
                    Some(Err(err)) => Err(err),
                    other => {
                        warn!("Resource {} of an interrupt link is not an interrupt: {:?}", index, other);
                        Err(AmlError::UnexpectedResult)
                    }
                }
            }
        }
    }
}

/// Find the node a `_PRT` source names. Names in the package are resolved with the search rules,
/// from the scope the package was declared in. Strings are resolved from the root bridge.
fn resolve_link(interpreter: &Interpreter, bridge: AmlHandle, source: &Variable) -> Result<AmlHandle, AmlError> {
    let namespace = interpreter.namespace.lock();
    let link = match source {
        Variable::NodeRef(handle) => Some(*handle),
        Variable::UnresolvedName { scope, name } => namespace.resolve(*scope, name),
        Variable::String(_) => {
            let bytes = source.bytes()?;
            let name = core::str::from_utf8(&bytes).map_err(|_| AmlError::PrtInvalidSource)?;
            namespace.resolve(bridge, &AmlName::from_str(name)?)
        }
        _ => return Err(AmlError::PrtInvalidSource),
    };

    match link {
        Some(link) => Ok(namespace.resolve_alias(link)),
        None => {
            warn!("Interrupt link {:?} named by _PRT does not exist", source);
            Err(AmlError::NoSuchNode)
        }
    }
}

/// Find the `_PRT` of the root bridge of PCI segment `segment` and bus `bus`, and route `pin` of
/// the given function through it.
pub fn pci_route_pin(
    interpreter: &Interpreter,
    segment: u16,
    bus: u8,
    device: u8,
    function: u8,
    pin: Pin,
) -> Result<IrqDescriptor, AmlError> {
    let Some(bridge) = find_root_bridge(interpreter, segment, bus)? else {
        warn!("No PCI root bridge for segment {:#x}, bus {:#x}", segment, bus);
        return Err(AmlError::NoSuchNode);
    };
    let prt = interpreter.namespace.lock().child(bridge, NameSeg(*b"_PRT"));
    let Some(prt) = prt else {
        warn!("PCI root bridge {:?} has no _PRT", bridge);
        return Err(AmlError::NoSuchNode);
    };

    PciRoutingTable::from_prt(interpreter, prt)?.route(interpreter, device.into(), function.into(), pin)
}

/// Route the interrupt of a PCI function, reading the pin it uses from its configuration space.
/// Returns `Ok(None)` if the function doesn't use an interrupt pin.
pub fn pci_route(
    interpreter: &Interpreter,
    segment: u16,
    bus: u8,
    device: u8,
    function: u8,
) -> Result<Option<IrqDescriptor>, AmlError> {
    let value = interpreter.handler.read_pci_u8(segment, bus, device, function, PCI_INTERRUPT_PIN)?;
    match Pin::from_config(value) {
        Some(pin) => pci_route_pin(interpreter, segment, bus, device, function, pin).map(Some),
        None => {
            debug!("PCI function {:x}:{:x}.{:x} has no interrupt pin", bus, device, function);
            Ok(None)
        }
    }
}

fn find_root_bridge(interpreter: &Interpreter, segment: u16, bus: u8) -> Result<Option<AmlHandle>, AmlError> {
    let candidates: Vec<AmlHandle> = {
        let namespace = interpreter.namespace.lock();
        let system_bus = namespace.lookup("\\_SB")?;
        namespace.children(system_bus).collect()
    };

    for candidate in candidates {
        let is_root = [PCI_ROOT_PNP_ID, PCIE_ROOT_PNP_ID]
            .iter()
            .any(|id| matches!(interpreter.device_has_id(candidate, &eisaid(id)), Ok(true)));
        if !is_root {
            continue;
        }

        let (Some(bridge_segment), Some(bridge_bus)) =
            (optional_integer(interpreter, candidate, *b"_SEG"), optional_integer(interpreter, candidate, *b"_BBN"))
        else {
            continue;
        };
        if bridge_segment == u64::from(segment) && bridge_bus == u64::from(bus) {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Evaluate an optional integer object of `device`. A missing object reads as zero, and one that
/// can't be evaluated as `None`.
fn optional_integer(interpreter: &Interpreter, device: AmlHandle, name: [u8; 4]) -> Option<u64> {
    let child = interpreter.namespace.lock().child(device, NameSeg(name));
    let Some(child) = child else {
        return Some(0);
    };
    match interpreter.eval(child, &[]).and_then(|value| value.implicit_integer()) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!("Failed to evaluate {:?} of {:?}: {:?}", NameSeg(name), device, err);
            None
        }
    }
}
