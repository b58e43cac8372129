use crate::AmlError;
use bit_field::BitField;
use byteorder::{ByteOrder, LittleEndian};
use log::debug;

const SMALL_IRQ: u8 = 0x04;
const SMALL_IO: u8 = 0x08;
const SMALL_FIXED_IO: u8 = 0x09;
const SMALL_END_TAG: u8 = 0x0f;

const LARGE_FIXED_MEMORY_32: u8 = 0x06;
const LARGE_EXTENDED_IRQ: u8 = 0x09;

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Resource {
    Irq(IrqDescriptor),
    Io(IoPortDescriptor),
    FixedMemory32 { writable: bool, base: u32, length: u32 },
    /// A descriptor this crate doesn't decode, with its type byte (the small item type, or the large
    /// item tag with bit 7 set).
    Other(u8),
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InterruptTrigger {
    Edge,
    Level,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InterruptPolarity {
    ActiveHigh,
    ActiveLow,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct IrqDescriptor {
    pub is_consumer: bool,
    pub trigger: InterruptTrigger,
    pub polarity: InterruptPolarity,
    pub is_shared: bool,
    pub is_wake_capable: bool,
    /// A legacy IRQ descriptor can describe several interrupts, as a bitmap of IRQs 0 to 15. An
    /// extended descriptor always has a single bit set, unless it describes an interrupt above 63.
    pub irqs: u64,
    /// The first interrupt number of an extended descriptor.
    pub irq: u32,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct IoPortDescriptor {
    pub decodes_16_bit: bool,
    pub base: u16,
    pub alignment: u8,
    pub length: u8,
}

/// Iterates over the descriptors of a resource template (the buffer returned by `_CRS`), stopping
/// at the end tag.
pub struct ResourceDescriptors<'a> {
    bytes: &'a [u8],
    offset: usize,
    done: bool,
}

pub fn resource_descriptors(bytes: &[u8]) -> ResourceDescriptors<'_> {
    ResourceDescriptors { bytes, offset: 0, done: false }
}

impl Iterator for ResourceDescriptors<'_> {
    type Item = Result<Resource, AmlError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match next_descriptor(&self.bytes[self.offset..]) {
            Ok((Some(resource), size)) => {
                self.offset += size;
                Some(Ok(resource))
            }
            Ok((None, _)) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}

/// The number of bytes of a resource template that come before its end tag. `ConcatRes` uses this
/// to join two templates.
pub fn template_length(bytes: &[u8]) -> Result<usize, AmlError> {
    let mut offset = 0;
    loop {
        match next_descriptor(&bytes[offset..])? {
            (Some(_), size) => offset += size,
            (None, _) => return Ok(offset),
        }
    }
}

/// Decode the descriptor at the start of `bytes`, returning it along with its total size. The end
/// tag decodes to `None`. Running out of bytes without finding an end tag is treated as an end tag.
fn next_descriptor(bytes: &[u8]) -> Result<(Option<Resource>, usize), AmlError> {
    let Some(&header) = bytes.first() else {
        return Ok((None, 0));
    };

    /*
     * If bit 7 of Byte 0 is set, it's a large descriptor. If not, it's a small descriptor.
     */
    if header.get_bit(7) {
        /*
         * The descriptor type is encoded in Bits 0-6 of Byte 0. Bytes 1 and 2 hold the length of
         * the data items that follow.
         */
        if bytes.len() < 3 {
            return Err(AmlError::ResourceDescriptorTooShort);
        }
        let length = LittleEndian::read_u16(&bytes[1..3]) as usize;
        let size = 3 + length;
        if bytes.len() < size {
            return Err(AmlError::ResourceDescriptorTooShort);
        }

        let resource = match header.get_bits(0..7) {
            LARGE_FIXED_MEMORY_32 => fixed_memory_descriptor(&bytes[..size])?,
            LARGE_EXTENDED_IRQ => extended_interrupt_descriptor(&bytes[..size])?,
            other => {
                debug!("Skipping large resource descriptor of type {:#x}", other);
                Resource::Other(header)
            }
        };
        Ok((Some(resource), size))
    } else {
        /*
         * Byte 0 has the format:
         *    | Bits        | Field             |
         *    |-------------|-------------------|
         *    | 0-2         | Length - n bytes  |
         *    | 3-6         | Small item type   |
         *    | 7           | 0 = small item    |
         */
        let length = header.get_bits(0..3) as usize;
        let size = 1 + length;
        let descriptor_type = header.get_bits(3..7);
        if descriptor_type == SMALL_END_TAG {
            return Ok((None, size));
        }
        if bytes.len() < size {
            return Err(AmlError::ResourceDescriptorTooShort);
        }

        let resource = match descriptor_type {
            SMALL_IRQ => irq_format_descriptor(&bytes[..size])?,
            SMALL_IO => io_port_descriptor(&bytes[..size])?,
            SMALL_FIXED_IO => fixed_io_port_descriptor(&bytes[..size])?,
            other => {
                debug!("Skipping small resource descriptor of type {:#x}", other);
                Resource::Other(other)
            }
        };
        Ok((Some(resource), size))
    }
}

fn irq_format_descriptor(bytes: &[u8]) -> Result<Resource, AmlError> {
    /*
     * Bytes 1 and 2 hold a mask of IRQs 0 to 15. The optional Byte 3 holds the IRQ information:
     *      Bit 0: 1 if edge-triggered, 0 if level-triggered
     *      Bit 3: 1 if active-low, 0 if active-high
     *      Bit 4: 1 if the interrupt is shared with other devices
     *      Bit 5: 1 if the interrupt is capable of waking the system
     * Without it, interrupts are edge-triggered, active-high and exclusive.
     */
    if bytes.len() < 3 {
        return Err(AmlError::ResourceDescriptorTooShort);
    }

    let irqs = u64::from(LittleEndian::read_u16(&bytes[1..3]));
    let info = bytes.get(3).copied().unwrap_or(0b0000_0001);

    Ok(Resource::Irq(IrqDescriptor {
        is_consumer: true,
        trigger: if info.get_bit(0) { InterruptTrigger::Edge } else { InterruptTrigger::Level },
        polarity: if info.get_bit(3) { InterruptPolarity::ActiveLow } else { InterruptPolarity::ActiveHigh },
        is_shared: info.get_bit(4),
        is_wake_capable: info.get_bit(5),
        irqs,
        irq: if irqs == 0 { 0 } else { irqs.trailing_zeros() },
    }))
}

fn io_port_descriptor(bytes: &[u8]) -> Result<Resource, AmlError> {
    /*
     * Byte 1 has the decode flag in Bit 0. Bytes 2-3 and 4-5 hold the minimum and maximum base
     * addresses, Byte 6 the alignment and Byte 7 the number of ports. Only the minimum base is
     * reported.
     */
    if bytes.len() < 8 {
        return Err(AmlError::ResourceDescriptorTooShort);
    }

    Ok(Resource::Io(IoPortDescriptor {
        decodes_16_bit: bytes[1].get_bit(0),
        base: LittleEndian::read_u16(&bytes[2..4]),
        alignment: bytes[6],
        length: bytes[7],
    }))
}

fn fixed_io_port_descriptor(bytes: &[u8]) -> Result<Resource, AmlError> {
    if bytes.len() < 4 {
        return Err(AmlError::ResourceDescriptorTooShort);
    }

    Ok(Resource::Io(IoPortDescriptor {
        decodes_16_bit: false,
        base: LittleEndian::read_u16(&bytes[1..3]).get_bits(0..10),
        alignment: 1,
        length: bytes[3],
    }))
}

fn fixed_memory_descriptor(bytes: &[u8]) -> Result<Resource, AmlError> {
    if bytes.len() < 12 {
        return Err(AmlError::ResourceDescriptorTooShort);
    }

    Ok(Resource::FixedMemory32 {
        writable: bytes[3].get_bit(0),
        base: LittleEndian::read_u32(&bytes[4..8]),
        length: LittleEndian::read_u32(&bytes[8..12]),
    })
}

fn extended_interrupt_descriptor(bytes: &[u8]) -> Result<Resource, AmlError> {
    /*
     * --- Extended Interrupt Descriptor ---
     * Byte 3 contains the Interrupt Vector Flags:
     *      Bit 0: 1 if device consumes the resource, 0 if it produces it
     *      Bit 1: 1 if edge-triggered, 0 if level-triggered
     *      Bit 2: 1 = active-low, 0 = active-high
     *      Bit 3: 1 if interrupt is shared with other devices
     *      Bit 4: 1 if this interrupt is capable of waking the system, 0 if it is not
     * Byte 4 contains the number of interrupt numbers that follow.
     *
     * From Byte 5 onwards, there are `n` interrupt numbers, each of which is encoded as a
     * 4-byte little-endian number. Only the first is reported.
     */
    if bytes.len() < 9 || bytes[4] == 0 {
        return Err(AmlError::ResourceDescriptorTooShort);
    }

    let irq = LittleEndian::read_u32(&bytes[5..9]);
    Ok(Resource::Irq(IrqDescriptor {
        is_consumer: bytes[3].get_bit(0),
        trigger: if bytes[3].get_bit(1) { InterruptTrigger::Edge } else { InterruptTrigger::Level },
        polarity: if bytes[3].get_bit(2) { InterruptPolarity::ActiveLow } else { InterruptPolarity::ActiveHigh },
        is_shared: bytes[3].get_bit(3),
        is_wake_capable: bytes[3].get_bit(4),
        irqs: if irq < 64 { 1 << irq } else { 0 },
        irq,
    }))
}
