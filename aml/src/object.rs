use crate::{
    exec::Invocation,
    namespace::{AmlHandle, AmlName},
    AmlError,
};
use alloc::{format, string::String, sync::Arc, vec, vec::Vec};
use bit_field::BitField;
use byteorder::{ByteOrder, LittleEndian};
use core::{cmp::Ordering, fmt, fmt::Write};
use log::warn;
use spinning_top::Spinlock;

pub type SharedBytes = Arc<Spinlock<Vec<u8>>>;
pub type SharedPackage = Arc<Spinlock<Vec<Variable>>>;

/// A dynamically-typed AML value.
///
/// Strings, buffers and packages live behind a shared payload: cloning a `Variable` (with
/// `Clone`) bumps the reference count and both copies observe later mutations. This is how AML
/// references into buffers and packages work. To get an independent copy, as `Store` does, use
/// [`Variable::deep_clone`].
#[derive(Clone, Default)]
pub enum Variable {
    #[default]
    None,
    Integer(u64),
    /// The bytes of the string, without a terminating NUL.
    String(SharedBytes),
    Buffer(SharedBytes),
    Package(SharedPackage),
    NodeRef(AmlHandle),
    ArgRef(Arc<Invocation>, usize),
    LocalRef(Arc<Invocation>, usize),
    StringIndex(SharedBytes, usize),
    BufferIndex(SharedBytes, usize),
    PackageIndex(SharedPackage, usize),
    /// A name inside a package initializer. These are only resolved when they're used.
    UnresolvedName {
        scope: AmlHandle,
        name: AmlName,
    },
}

impl Variable {
    pub fn new_string(bytes: &[u8]) -> Variable {
        Variable::String(Arc::new(Spinlock::new(bytes.to_vec())))
    }

    pub fn new_buffer(size: usize) -> Variable {
        Variable::Buffer(Arc::new(Spinlock::new(vec![0; size])))
    }

    pub fn buffer_from(bytes: Vec<u8>) -> Variable {
        Variable::Buffer(Arc::new(Spinlock::new(bytes)))
    }

    /// Create a package of `size` uninitialized elements.
    pub fn new_package(size: usize) -> Variable {
        Variable::Package(Arc::new(Spinlock::new(vec![Variable::None; size])))
    }

    pub fn package_from(elements: Vec<Variable>) -> Variable {
        Variable::Package(Arc::new(Spinlock::new(elements)))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Variable::None)
    }

    pub fn as_integer(&self) -> Result<u64, AmlError> {
        match self {
            Variable::Integer(value) => Ok(*value),
            _ => Err(AmlError::TypeMismatch),
        }
    }

    /// Get the value of this object as an integer, applying the implicit source operand
    /// conversions for strings (interpreted as hex) and buffers (little-endian).
    pub fn implicit_integer(&self) -> Result<u64, AmlError> {
        match self {
            Variable::Integer(value) => Ok(*value),
            Variable::String(string) => Ok(hex_prefix_value(&string.lock())),
            Variable::Buffer(buffer) => Ok(le_prefix_value(&buffer.lock())),
            _ => Err(AmlError::TypeMismatch),
        }
    }

    /// Copy the bytes of a string or buffer.
    pub fn bytes(&self) -> Result<Vec<u8>, AmlError> {
        match self {
            Variable::String(bytes) | Variable::Buffer(bytes) => Ok(bytes.lock().clone()),
            _ => Err(AmlError::TypeMismatch),
        }
    }

    pub fn string_len(&self) -> Result<usize, AmlError> {
        match self {
            Variable::String(string) => Ok(string.lock().len()),
            _ => Err(AmlError::TypeMismatch),
        }
    }

    pub fn buffer_len(&self) -> Result<usize, AmlError> {
        match self {
            Variable::Buffer(buffer) => Ok(buffer.lock().len()),
            _ => Err(AmlError::TypeMismatch),
        }
    }

    pub fn package_len(&self) -> Result<usize, AmlError> {
        match self {
            Variable::Package(package) => Ok(package.lock().len()),
            _ => Err(AmlError::TypeMismatch),
        }
    }

    /// Get a (shallow) copy of an element of a package.
    pub fn package_get(&self, index: usize) -> Result<Variable, AmlError> {
        match self {
            Variable::Package(package) => package.lock().get(index).cloned().ok_or(AmlError::OutOfBounds),
            _ => Err(AmlError::TypeMismatch),
        }
    }

    pub fn package_set(&self, index: usize, value: Variable) -> Result<(), AmlError> {
        match self {
            Variable::Package(package) => {
                let mut package = package.lock();
                let slot = package.get_mut(index).ok_or(AmlError::OutOfBounds)?;
                *slot = value;
                Ok(())
            }
            _ => Err(AmlError::TypeMismatch),
        }
    }

    /// Produce a copy of this object that does not share its payload with the original. Packages
    /// are copied element by element.
    pub fn deep_clone(&self) -> Variable {
        match self {
            Variable::String(string) => Variable::new_string(&string.lock()),
            Variable::Buffer(buffer) => Variable::buffer_from(buffer.lock().clone()),
            Variable::Package(package) => {
                /*
                 * Take a shallow snapshot first, so we don't hold the lock while cloning
                 * elements (which might be this very package).
                 */
                let elements = package.lock().clone();
                Variable::package_from(elements.iter().map(Variable::deep_clone).collect())
            }
            other => other.clone(),
        }
    }

    /// Replace `self` with a deep copy of `source`. The copy is built before `self` is touched, so
    /// this is fine even when both share a payload.
    pub fn assign_clone(&mut self, source: &Variable) {
        let copy = source.deep_clone();
        *self = copy;
    }

    pub fn resize_buffer(&self, size: usize) -> Result<(), AmlError> {
        match self {
            Variable::Buffer(buffer) => {
                buffer.lock().resize(size, 0);
                Ok(())
            }
            _ => Err(AmlError::TypeMismatch),
        }
    }

    /// Grow or shrink a string. New characters are spaces.
    pub fn resize_string(&self, length: usize) -> Result<(), AmlError> {
        match self {
            Variable::String(string) => {
                let mut string = string.lock();
                let current = string.len();
                if length > string.capacity() {
                    string.reserve_exact(length - current);
                }
                string.resize(length, b' ');
                Ok(())
            }
            _ => Err(AmlError::TypeMismatch),
        }
    }

    pub fn resize_package(&self, size: usize) -> Result<(), AmlError> {
        match self {
            Variable::Package(package) => {
                /*
                 * Elements dropped by a shrink are finalized outside the lock, as they might hold
                 * the last reference to something that needs to lock this package.
                 */
                let removed = {
                    let mut package = package.lock();
                    if size < package.len() {
                        package.split_off(size)
                    } else {
                        package.resize(size, Variable::None);
                        Vec::new()
                    }
                };
                drop(removed);
                Ok(())
            }
            _ => Err(AmlError::TypeMismatch),
        }
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            Variable::None => ObjectType::Uninitialized,
            Variable::Integer(_) => ObjectType::Integer,
            Variable::String(_) | Variable::StringIndex(..) => ObjectType::String,
            Variable::Buffer(_) | Variable::BufferIndex(..) => ObjectType::Buffer,
            Variable::Package(_) | Variable::PackageIndex(..) => ObjectType::Package,
            Variable::NodeRef(_) | Variable::ArgRef(..) | Variable::LocalRef(..) => ObjectType::Reference,
            Variable::UnresolvedName { .. } => ObjectType::Reference,
        }
    }

    /*
     * Explicit conversions.
     */

    pub fn to_buffer(&self) -> Result<Variable, AmlError> {
        match self {
            Variable::Integer(value) => {
                let mut bytes = vec![0; 8];
                LittleEndian::write_u64(&mut bytes, *value);
                Ok(Variable::buffer_from(bytes))
            }
            Variable::Buffer(_) => Ok(self.deep_clone()),
            Variable::String(string) => {
                let string = string.lock();
                if string.is_empty() {
                    return Ok(Variable::new_buffer(0));
                }
                let mut bytes = Vec::with_capacity(string.len() + 1);
                bytes.extend_from_slice(&string);
                bytes.push(0);
                Ok(Variable::buffer_from(bytes))
            }
            _ => {
                warn!("ToBuffer: unsupported object type {:?}", self.object_type());
                Err(AmlError::IllegalArguments)
            }
        }
    }

    /// Convert a buffer to a string, stopping at the first NUL or after `max_length` bytes.
    pub fn to_aml_string(&self, max_length: Option<usize>) -> Result<Variable, AmlError> {
        match self {
            Variable::Buffer(buffer) => {
                let buffer = buffer.lock();
                let mut length = buffer.iter().position(|&b| b == 0).unwrap_or(buffer.len());
                if let Some(max_length) = max_length {
                    length = usize::min(length, max_length);
                }
                Ok(Variable::new_string(&buffer[..length]))
            }
            _ => {
                warn!("ToString: unsupported object type {:?}", self.object_type());
                Err(AmlError::IllegalArguments)
            }
        }
    }

    pub fn to_decimal_string(&self) -> Result<Variable, AmlError> {
        match self {
            Variable::Integer(value) => Ok(Variable::new_string(format!("{}", value).as_bytes())),
            Variable::Buffer(buffer) => {
                let buffer = buffer.lock();
                let mut string = String::new();
                for (i, byte) in buffer.iter().enumerate() {
                    if i > 0 {
                        string.push(',');
                    }
                    let _ = write!(string, "{}", byte);
                }
                Ok(Variable::new_string(string.as_bytes()))
            }
            Variable::String(_) => Ok(self.deep_clone()),
            _ => {
                warn!("ToDecimalString: unsupported object type {:?}", self.object_type());
                Err(AmlError::IllegalArguments)
            }
        }
    }

    pub fn to_hex_string(&self) -> Result<Variable, AmlError> {
        match self {
            Variable::Integer(value) => Ok(Variable::new_string(format!("0x{:X}", value).as_bytes())),
            Variable::Buffer(buffer) => {
                let buffer = buffer.lock();
                let mut string = String::new();
                for (i, byte) in buffer.iter().enumerate() {
                    if i > 0 {
                        string.push(',');
                    }
                    let _ = write!(string, "0x{:02X}", byte);
                }
                Ok(Variable::new_string(string.as_bytes()))
            }
            Variable::String(_) => Ok(self.deep_clone()),
            _ => {
                warn!("ToHexString: unsupported object type {:?}", self.object_type());
                Err(AmlError::IllegalArguments)
            }
        }
    }

    pub fn to_integer(&self) -> Result<Variable, AmlError> {
        match self {
            Variable::Integer(value) => Ok(Variable::Integer(*value)),
            Variable::Buffer(buffer) => Ok(Variable::Integer(le_prefix_value(&buffer.lock()))),
            Variable::String(string) => Ok(Variable::Integer(parse_integer(&string.lock())?)),
            _ => {
                warn!("ToInteger: unsupported object type {:?}", self.object_type());
                Err(AmlError::IllegalArguments)
            }
        }
    }

    /*
     * Implicit conversions, applied when storing into an object that already has a type. The
     * target keeps its type (and, for buffers, its size).
     */

    /// Convert `self` into an integer, as if it were stored into an integer object.
    pub fn coerce_to_integer(&self) -> Result<u64, AmlError> {
        self.implicit_integer()
    }

    /// Overwrite the contents of the string `target` with `self`, converted to a string.
    pub fn coerce_into_string(&self, target: &SharedBytes) -> Result<(), AmlError> {
        let bytes = match self {
            Variable::Integer(value) => format!("{:016X}", value).into_bytes(),
            Variable::String(string) => string.lock().clone(),
            Variable::Buffer(buffer) => {
                let buffer = buffer.lock();
                let mut string = String::new();
                for (i, byte) in buffer.iter().enumerate() {
                    if i > 0 {
                        string.push(' ');
                    }
                    let _ = write!(string, "0x{:02X}", byte);
                }
                string.into_bytes()
            }
            _ => return Err(AmlError::TypeMismatch),
        };
        *target.lock() = bytes;
        Ok(())
    }

    /// Overwrite the contents of the buffer `target` with `self`. The buffer keeps its size: it is
    /// zeroed, and then as much of the source as fits is copied in.
    pub fn coerce_into_buffer(&self, target: &SharedBytes) -> Result<(), AmlError> {
        let source = match self {
            Variable::Integer(value) => {
                let mut bytes = vec![0; 8];
                LittleEndian::write_u64(&mut bytes, *value);
                bytes
            }
            Variable::String(bytes) | Variable::Buffer(bytes) => bytes.lock().clone(),
            _ => return Err(AmlError::TypeMismatch),
        };

        let mut target = target.lock();
        target.iter_mut().for_each(|b| *b = 0);
        let length = usize::min(source.len(), target.len());
        target[..length].copy_from_slice(&source[..length]);
        Ok(())
    }
}

impl From<u64> for Variable {
    fn from(value: u64) -> Self {
        Variable::Integer(value)
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        /*
         * Packages can contain references to themselves, so we never block on a payload lock here.
         */
        match self {
            Variable::None => write!(f, "None"),
            Variable::Integer(value) => write!(f, "Integer({:#x})", value),
            Variable::String(string) => match string.try_lock() {
                Some(string) => write!(f, "String({:?})", String::from_utf8_lossy(&string)),
                None => write!(f, "String(<locked>)"),
            },
            Variable::Buffer(buffer) => match buffer.try_lock() {
                Some(buffer) => write!(f, "Buffer({:x?})", &buffer[..]),
                None => write!(f, "Buffer(<locked>)"),
            },
            Variable::Package(package) => match package.try_lock() {
                Some(package) => f.debug_tuple("Package").field(&&package[..]).finish(),
                None => write!(f, "Package(<locked>)"),
            },
            Variable::NodeRef(handle) => write!(f, "NodeRef({:?})", handle),
            Variable::ArgRef(_, index) => write!(f, "ArgRef({})", index),
            Variable::LocalRef(_, index) => write!(f, "LocalRef({})", index),
            Variable::StringIndex(_, index) => write!(f, "StringIndex({})", index),
            Variable::BufferIndex(_, index) => write!(f, "BufferIndex({})", index),
            Variable::PackageIndex(_, index) => write!(f, "PackageIndex({})", index),
            Variable::UnresolvedName { name, .. } => write!(f, "UnresolvedName({})", name),
        }
    }
}

/// The object type codes returned by `ObjectType`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObjectType {
    Uninitialized,
    Integer,
    String,
    Buffer,
    Package,
    FieldUnit,
    Device,
    Event,
    Method,
    Mutex,
    OpRegion,
    PowerResource,
    Processor,
    ThermalZone,
    BufferField,
    Debug,
    Reference,
}

impl ObjectType {
    pub fn code(self) -> u64 {
        match self {
            ObjectType::Uninitialized => 0,
            ObjectType::Integer => 1,
            ObjectType::String => 2,
            ObjectType::Buffer => 3,
            ObjectType::Package => 4,
            ObjectType::FieldUnit => 5,
            ObjectType::Device => 6,
            ObjectType::Event => 7,
            ObjectType::Method => 8,
            ObjectType::Mutex => 9,
            ObjectType::OpRegion => 10,
            ObjectType::PowerResource => 11,
            ObjectType::Processor => 12,
            ObjectType::ThermalZone => 13,
            ObjectType::BufferField => 14,
            ObjectType::Debug => 16,
            ObjectType::Reference => 0,
        }
    }

    /// The string `Concat` substitutes for an operand that isn't an integer, string or buffer.
    pub fn type_string(self) -> &'static str {
        match self {
            ObjectType::Uninitialized => "[Uninitialized Object]",
            ObjectType::Package => "[Package Object]",
            ObjectType::FieldUnit => "[Field Object]",
            ObjectType::Device => "[Device Object]",
            ObjectType::Event => "[Event Object]",
            ObjectType::Method => "[Control Method]",
            ObjectType::Mutex => "[Mutex Object]",
            ObjectType::OpRegion => "[Region Object]",
            ObjectType::PowerResource => "[Power Object]",
            ObjectType::Processor => "[Processor Object]",
            ObjectType::ThermalZone => "[Thermal Zone]",
            ObjectType::BufferField => "[Buffer Field]",
            ObjectType::Debug => "[Debug Object]",
            ObjectType::Reference => "[Reference Object]",
            ObjectType::Integer | ObjectType::String | ObjectType::Buffer => "",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct MethodFlags(pub u8);

impl MethodFlags {
    pub fn arg_count(&self) -> usize {
        self.0.get_bits(0..3) as usize
    }

    pub fn serialize(&self) -> bool {
        self.0.get_bit(3)
    }

    pub fn sync_level(&self) -> u8 {
        self.0.get_bits(4..8)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MatchOp {
    True,
    Equal,
    LessEqual,
    Less,
    GreaterEqual,
    Greater,
}

impl MatchOp {
    pub fn from_code(code: u64) -> Result<MatchOp, AmlError> {
        Ok(match code {
            0 => MatchOp::True,
            1 => MatchOp::Equal,
            2 => MatchOp::LessEqual,
            3 => MatchOp::Less,
            4 => MatchOp::GreaterEqual,
            5 => MatchOp::Greater,
            _ => return Err(AmlError::UnexpectedResult),
        })
    }

    fn test(self, ordering: Ordering) -> bool {
        match self {
            MatchOp::True => true,
            MatchOp::Equal => ordering == Ordering::Equal,
            MatchOp::LessEqual => ordering != Ordering::Greater,
            MatchOp::Less => ordering == Ordering::Less,
            MatchOp::GreaterEqual => ordering != Ordering::Less,
            MatchOp::Greater => ordering == Ordering::Greater,
        }
    }
}

/// Compare `left <op> right`. The type of `left` decides how the comparison is done, and `right`
/// is converted to that type first.
pub fn compare(op: MatchOp, left: &Variable, right: &Variable) -> Result<bool, AmlError> {
    if op == MatchOp::True {
        return Ok(true);
    }

    let ordering = match left {
        Variable::Integer(left) => {
            let right = right.to_integer()?.as_integer()?;
            left.cmp(&right)
        }
        Variable::Buffer(left) => {
            let right = right.to_buffer()?.bytes()?;
            compare_bytes(&left.lock(), &right)
        }
        Variable::String(left) => {
            let right = match right {
                Variable::String(_) => right.bytes()?,
                Variable::Integer(_) => {
                    let mut digits = right.to_hex_string()?.bytes()?;
                    // The "0x" prefix isn't part of the implicit conversion.
                    digits.drain(..2);
                    digits
                }
                other => other.to_hex_string()?.bytes()?,
            };
            compare_bytes(&left.lock(), &right)
        }
        _ => return Err(AmlError::TypeMismatch),
    };

    Ok(op.test(ordering))
}

/// Byte-lexicographic comparison over the common prefix, with the length as a tiebreak.
fn compare_bytes(left: &[u8], right: &[u8]) -> Ordering {
    let common = usize::min(left.len(), right.len());
    match left[..common].cmp(&right[..common]) {
        Ordering::Equal => left.len().cmp(&right.len()),
        other => other,
    }
}

/// Parse an explicit integer string: `0x`/`0X` followed by hex digits, or decimal digits only.
fn parse_integer(string: &[u8]) -> Result<u64, AmlError> {
    if string.len() >= 2 && string[0] == b'0' && (string[1] == b'x' || string[1] == b'X') {
        let mut value: u64 = 0;
        for &c in &string[2..] {
            let digit = (c as char).to_digit(16).ok_or_else(|| {
                warn!("ToInteger: hexadecimal string contains non-hex character {:#x}", c);
                AmlError::IllegalArguments
            })?;
            value = value.wrapping_shl(4) | u64::from(digit);
        }
        Ok(value)
    } else {
        let mut value: u64 = 0;
        for &c in string {
            if !c.is_ascii_digit() {
                warn!("ToInteger: decimal string contains non-decimal character {:#x}", c);
                return Err(AmlError::IllegalArguments);
            }
            value = value.wrapping_mul(10).wrapping_add(u64::from(c - b'0'));
        }
        Ok(value)
    }
}

/// The implicit string-to-integer conversion: up to 16 leading hex digits.
fn hex_prefix_value(string: &[u8]) -> u64 {
    string
        .iter()
        .take(16)
        .map_while(|&c| (c as char).to_digit(16))
        .fold(0, |value, digit| (value << 4) | u64::from(digit))
}

/// The first (up to) 8 bytes of a buffer, as a little-endian integer.
fn le_prefix_value(buffer: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    let length = usize::min(8, buffer.len());
    bytes[..length].copy_from_slice(&buffer[..length]);
    LittleEndian::read_u64(&bytes)
}

pub fn to_bcd(mut value: u64) -> u64 {
    let mut result = 0;
    let mut shift = 0;
    // 20 decimal digits fit in a u64, but only 16 BCD digits do.
    while value != 0 && shift < 64 {
        result |= (value % 10) << shift;
        value /= 10;
        shift += 4;
    }
    result
}

pub fn from_bcd(bcd: u64) -> u64 {
    let mut result: u64 = 0;
    let mut multiplier: u64 = 1;
    for i in 0..16 {
        let nibble = bcd.get_bits((i * 4)..(i * 4 + 4));
        if nibble > 9 {
            warn!("FromBCD: nibble {} of {:#x} is not a decimal digit", i, bcd);
        }
        result = result.wrapping_add(nibble.wrapping_mul(multiplier));
        multiplier = multiplier.wrapping_mul(10);
    }
    result
}

/// Encode a PNP ID such as `PNP0C09` into its compressed EISA form. Strings that aren't 7
/// characters long are returned as strings, which is how `_HID`s that aren't EISA IDs look.
pub fn eisaid(id: &str) -> Variable {
    let bytes = id.as_bytes();
    if bytes.len() != 7 {
        return Variable::new_string(bytes);
    }

    let hex = |c: u8| (c as char).to_digit(16).unwrap_or(0);
    let mut value: u32 = 0;
    value.set_bits(26..31, u32::from(bytes[0].wrapping_sub(0x40)) & 0x1f);
    value.set_bits(21..26, u32::from(bytes[1].wrapping_sub(0x40)) & 0x1f);
    value.set_bits(16..21, u32::from(bytes[2].wrapping_sub(0x40)) & 0x1f);
    value.set_bits(12..16, hex(bytes[3]));
    value.set_bits(8..12, hex(bytes[4]));
    value.set_bits(4..8, hex(bytes[5]));
    value.set_bits(0..4, hex(bytes[6]));

    Variable::Integer(u64::from(value.swap_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(v: &Variable) -> String {
        String::from_utf8(v.bytes().unwrap()).unwrap()
    }

    #[test]
    fn clone_is_independent() {
        let original = Variable::new_string(b"hello");
        let copy = original.deep_clone();
        copy.resize_string(2).unwrap();
        assert_eq!(string(&original), "hello");
        assert_eq!(string(&copy), "he");

        let package = Variable::package_from(vec![Variable::buffer_from(vec![1, 2, 3]), Variable::Integer(4)]);
        let copy = package.deep_clone();
        if let Variable::Buffer(inner) = copy.package_get(0).unwrap() {
            inner.lock()[0] = 0xff;
        }
        assert_eq!(package.package_get(0).unwrap().bytes().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn self_clone_keeps_content() {
        let mut buffer = Variable::buffer_from(vec![1, 2, 3, 4]);
        let alias = buffer.clone();
        buffer.assign_clone(&alias);
        assert_eq!(buffer.bytes().unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(alias.bytes().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn shallow_copies_share_payload() {
        let buffer = Variable::new_buffer(4);
        let payload = match &buffer {
            Variable::Buffer(payload) => payload.clone(),
            _ => unreachable!(),
        };
        let aliases: Vec<Variable> = (0..4).map(|_| buffer.clone()).collect();
        assert_eq!(Arc::strong_count(&payload), 6);

        drop(aliases);
        drop(buffer);
        assert_eq!(Arc::strong_count(&payload), 1);
    }

    #[test]
    fn payloads_are_freed_exactly_once() {
        use crate::test_utils::*;

        let body = aml![
            [0x08], *b"BUF0", pkg(0x11, &[0x0a, 0x04, 0x01, 0x02, 0x03, 0x04]), // Name(BUF0, Buffer(4) { 1, 2, 3, 4 })
            [0x8a], *b"BUF0", [0x00], *b"DWD0",                              // CreateDWordField(BUF0, 0, DWD0)
            // Name(PKG0, Package(2) { 5, Package(1) { "abc" } })
            [0x08], *b"PKG0", pkg(0x12, &aml![[0x02, 0x0a, 0x05], pkg(0x12, &aml![[0x01, 0x0d], *b"abc", [0x00]])]),
            [0x70], *b"BUF0", [0x88], *b"PKG0", [0x00, 0x00],                // Store(BUF0, Index(PKG0, 0))
            [0x70, 0x71], *b"PKG0", [0x60],                                  // Store(RefOf(PKG0), Local0)
            [0x70, 0x83, 0x60, 0x61],                                        // Store(DerefOf(Local0), Local1)
            [0xa4], *b"PKG0",                                                // Return(PKG0)
        ];
        let aml = method("MAIN", 0, &body);

        let before = live_allocations();
        {
            let interpreter = populated(&aml);
            for _ in 0..2 {
                let result = interpreter.eval_path("\\MAIN", &[]).unwrap();
                assert_eq!(result.package_get(0).unwrap().bytes(), Ok(vec![1, 2, 3, 4]));
                let copy = result.deep_clone();
                copy.resize_package(4).unwrap();
                drop(result);
                assert_eq!(copy.package_len(), Ok(4));
            }

            let shared = Variable::new_string(b"shared");
            let mut aliases: Vec<Variable> = (0..3).map(|_| shared.clone()).collect();
            aliases[0].assign_clone(&shared);
            drop(shared);
            assert_eq!(string(&aliases[2]), "shared");
        }
        assert_eq!(live_allocations(), before);
    }

    #[test]
    fn resizes() {
        let buffer = Variable::buffer_from(vec![1, 2]);
        buffer.resize_buffer(4).unwrap();
        assert_eq!(buffer.bytes().unwrap(), vec![1, 2, 0, 0]);
        buffer.resize_buffer(1).unwrap();
        assert_eq!(buffer.bytes().unwrap(), vec![1]);

        let package = Variable::new_package(2);
        package.resize_package(5).unwrap();
        assert_eq!(package.package_len(), Ok(5));
        package.resize_package(1).unwrap();
        assert_eq!(package.package_len(), Ok(1));
    }

    #[test]
    fn integer_string_round_trips() {
        for value in [0, 1, 42, 0x1234_5678_9abc, 0xffff_ffff_ffff_ffff] {
            let hex = Variable::Integer(value).to_hex_string().unwrap();
            assert_eq!(hex.to_integer().unwrap().as_integer(), Ok(value));
            let decimal = Variable::Integer(value).to_decimal_string().unwrap();
            assert_eq!(decimal.to_integer().unwrap().as_integer(), Ok(value));
        }
    }

    #[test]
    fn string_to_integer_rejects_junk() {
        assert_eq!(Variable::new_string(b"0xfeG").to_integer().err(), Some(AmlError::IllegalArguments));
        assert_eq!(Variable::new_string(b"12a").to_integer().err(), Some(AmlError::IllegalArguments));
        assert_eq!(Variable::new_string(b"0XfF").to_integer().unwrap().as_integer(), Ok(255));
    }

    #[test]
    fn buffer_conversions() {
        let buffer = Variable::Integer(0x0102).to_buffer().unwrap();
        assert_eq!(buffer.bytes().unwrap(), vec![2, 1, 0, 0, 0, 0, 0, 0]);
        assert_eq!(buffer.to_integer().unwrap().as_integer(), Ok(0x0102));

        assert_eq!(Variable::new_string(b"AB").to_buffer().unwrap().bytes().unwrap(), vec![b'A', b'B', 0]);
        assert_eq!(Variable::new_string(b"").to_buffer().unwrap().bytes().unwrap(), vec![]);

        let text = Variable::buffer_from(vec![b'a', b'b', b'c', 0, b'd']);
        assert_eq!(string(&text.to_aml_string(None).unwrap()), "abc");
        assert_eq!(string(&text.to_aml_string(Some(2)).unwrap()), "ab");

        let bytes = Variable::buffer_from(vec![0x0a, 0xff]);
        assert_eq!(string(&bytes.to_hex_string().unwrap()), "0x0A,0xFF");
        assert_eq!(string(&bytes.to_decimal_string().unwrap()), "10,255");
    }

    #[test]
    fn implicit_coercions() {
        let target = Arc::new(Spinlock::new(vec![0xaa; 4]));
        Variable::Integer(0x11223344_55667788).coerce_into_buffer(&target).unwrap();
        assert_eq!(*target.lock(), vec![0x88, 0x77, 0x66, 0x55]);

        let target = Arc::new(Spinlock::new(Vec::new()));
        Variable::Integer(0xab).coerce_into_string(&target).unwrap();
        assert_eq!(&target.lock()[..], b"00000000000000AB");

        assert_eq!(Variable::new_string(b"1fzz").coerce_to_integer(), Ok(0x1f));
    }

    #[test]
    fn match_comparisons() {
        let one = Variable::Integer(1);
        let two = Variable::Integer(2);
        assert_eq!(compare(MatchOp::Less, &one, &two), Ok(true));
        assert_eq!(compare(MatchOp::GreaterEqual, &one, &two), Ok(false));
        assert_eq!(compare(MatchOp::True, &Variable::None, &two), Ok(true));

        let abc = Variable::new_string(b"abc");
        let ab = Variable::new_string(b"ab");
        assert_eq!(compare(MatchOp::Greater, &abc, &ab), Ok(true));
        assert_eq!(compare(MatchOp::Equal, &abc, &Variable::new_string(b"abc")), Ok(true));

        let buffer = Variable::buffer_from(vec![1, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(compare(MatchOp::Equal, &buffer, &one), Ok(true));
        assert_eq!(MatchOp::from_code(6), Err(AmlError::UnexpectedResult));
    }

    #[test]
    fn bcd() {
        assert_eq!(to_bcd(1234), 0x1234);
        assert_eq!(from_bcd(0x1234), 1234);
        assert_eq!(from_bcd(to_bcd(9_876_543_210)), 9_876_543_210);
    }

    #[test]
    fn eisa_ids() {
        assert_eq!(eisaid("PNP0C09").as_integer(), Ok(0x090cd041));
        assert_eq!(eisaid("PNP0A03").as_integer(), Ok(0x030ad041));
        assert!(matches!(eisaid("ACPI0003"), Variable::String(_)));
    }
}
