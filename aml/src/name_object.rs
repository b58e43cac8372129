use crate::{
    namespace::{AmlName, NameComponent},
    opcode::AmlStream,
    AmlError,
};
use alloc::vec::Vec;
use core::{fmt, str};

pub const NULL_NAME: u8 = 0x00;
pub const DUAL_NAME_PREFIX: u8 = 0x2e;
pub const MULTI_NAME_PREFIX: u8 = 0x2f;
pub const ROOT_CHAR: u8 = b'\\';
pub const PREFIX_CHAR: u8 = b'^';

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NameSeg(pub(crate) [u8; 4]);

impl NameSeg {
    pub fn from_str(string: &str) -> Result<NameSeg, AmlError> {
        // Each NameSeg can only have four chars, and must have at least one
        if string.is_empty() || string.len() > 4 {
            return Err(AmlError::InvalidNameSeg);
        }

        // We pre-fill the array with '_', so it will already be correct if the length is < 4
        let mut seg = [b'_'; 4];
        let bytes = string.as_bytes();

        if !is_lead_name_char(bytes[0]) {
            return Err(AmlError::InvalidNameSeg);
        }
        seg[0] = bytes[0];

        for (i, &byte) in bytes.iter().enumerate().skip(1) {
            if !is_name_char(byte) {
                return Err(AmlError::InvalidNameSeg);
            }
            seg[i] = byte;
        }

        Ok(NameSeg(seg))
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Result<NameSeg, AmlError> {
        if !is_lead_name_char(bytes[0]) || !bytes[1..].iter().all(|&b| is_name_char(b)) {
            return Err(AmlError::InvalidNameSeg);
        }
        Ok(NameSeg(bytes))
    }

    pub fn as_str(&self) -> &str {
        /*
         * This is safe, because we always check that all the bytes are valid ASCII, so every
         * `NameSeg` will be valid UTF8.
         */
        unsafe { str::from_utf8_unchecked(&self.0) }
    }

    pub fn as_bytes(&self) -> [u8; 4] {
        self.0
    }
}

// A list of ASCII codes is pretty much never useful, so we always just show it as a string
impl fmt::Debug for NameSeg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

pub fn is_lead_name_char(byte: u8) -> bool {
    byte.is_ascii_uppercase() || byte == b'_'
}

pub fn is_name_char(byte: u8) -> bool {
    is_lead_name_char(byte) || byte.is_ascii_digit()
}

/// Returns `true` if `byte` can start a `NameString` in a term position. Digits are included
/// because they never start an opcode, so a stray digit is treated as a (bad) name.
pub fn starts_name_string(byte: u8) -> bool {
    byte.is_ascii_digit()
        || is_lead_name_char(byte)
        || byte == ROOT_CHAR
        || byte == PREFIX_CHAR
        || byte == DUAL_NAME_PREFIX
        || byte == MULTI_NAME_PREFIX
}

impl AmlStream<'_> {
    /// Decode a `NameString`:
    ///     NameString := <RootChar NamePath> | <PrefixPath NamePath>
    ///     PrefixPath := Nothing | <'^' PrefixPath>
    ///     NamePath := NameSeg | DualNamePath | MultiNamePath | NullName
    /// A lone `NullName` produces an empty relative name, which callers treat as "no name".
    pub fn namestring(&mut self) -> Result<AmlName, AmlError> {
        let mut components = Vec::new();

        match self.peek()? {
            ROOT_CHAR => {
                self.next()?;
                components.push(NameComponent::Root);
            }
            PREFIX_CHAR => {
                while self.peek()? == PREFIX_CHAR {
                    self.next()?;
                    components.push(NameComponent::Prefix);
                }
            }
            _ => (),
        }

        match self.next()? {
            NULL_NAME => (),
            DUAL_NAME_PREFIX => {
                for _ in 0..2 {
                    components.push(NameComponent::Segment(self.name_seg()?));
                }
            }
            MULTI_NAME_PREFIX => {
                let count = self.next()?;
                for _ in 0..count {
                    components.push(NameComponent::Segment(self.name_seg()?));
                }
            }
            first_char => {
                let seg = [first_char, self.next()?, self.next()?, self.next()?];
                components.push(NameComponent::Segment(NameSeg::from_bytes(seg)?));
            }
        }

        Ok(AmlName::from_components(components))
    }

    fn name_seg(&mut self) -> Result<NameSeg, AmlError> {
        NameSeg::from_bytes([self.next()?, self.next()?, self.next()?, self.next()?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Result<(AmlName, usize), AmlError> {
        let mut stream = AmlStream::new(bytes, 0, bytes.len());
        let name = stream.namestring()?;
        Ok((name, stream.pc()))
    }

    #[test]
    fn test_name_seg() {
        assert_eq!(NameSeg::from_bytes(*b"AF3Z"), Ok(NameSeg(*b"AF3Z")));
        assert_eq!(NameSeg::from_bytes([0xff, b'E', b'A', b'7']), Err(AmlError::InvalidNameSeg));
        assert_eq!(NameSeg::from_bytes(*b"3ABC"), Err(AmlError::InvalidNameSeg));
        assert_eq!(NameSeg::from_str("_SB"), Ok(NameSeg(*b"_SB_")));
        assert_eq!(NameSeg::from_str("FOOBAR"), Err(AmlError::InvalidNameSeg));
    }

    #[test]
    fn test_name_paths() {
        assert_eq!(decode(b"\\\x2eABC_DEF_"), Ok((AmlName::from_str("\\ABC.DEF").unwrap(), 10)));
        assert_eq!(decode(b"\x2eABC_DEF_"), Ok((AmlName::from_str("ABC.DEF").unwrap(), 9)));
        assert_eq!(decode(b"^^^ABCD\x0a"), Ok((AmlName::from_str("^^^ABCD").unwrap(), 7)));
        assert_eq!(decode(b"\x2f\x03A___B___C___"), Ok((AmlName::from_str("A.B.C").unwrap(), 14)));
        assert_eq!(decode(b"\\\x00"), Ok((AmlName::root(), 2)));
        assert_eq!(decode(b"\x2eA"), Err(AmlError::RunOutOfStream));
    }

    #[test]
    fn test_name_string_starters() {
        assert!(starts_name_string(b'\\'));
        assert!(starts_name_string(b'^'));
        assert!(starts_name_string(b'_'));
        assert!(starts_name_string(0x2e));
        assert!(!starts_name_string(0x00));
        assert!(!starts_name_string(0x70));
    }
}
