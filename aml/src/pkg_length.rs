use crate::{opcode::AmlStream, AmlError};
use bit_field::BitField;

impl AmlStream<'_> {
    /// Decode a `PkgLength`, returning the *raw* length. This counts the bytes of the encoding
    /// itself, so the structure it describes ends at `(pc of the first PkgLength byte) + length`.
    ///
    /// ```text
    /// PkgLength := PkgLeadByte |
    ///              <PkgLeadByte ByteData> |
    ///              <PkgLeadByte ByteData ByteData> |
    ///              <PkgLeadByte ByteData ByteData ByteData>
    /// ```
    ///
    /// The same encoding is used for the bit widths in a `FieldList`.
    pub fn pkglength(&mut self) -> Result<usize, AmlError> {
        let lead_byte = self.next()?;
        let byte_count = lead_byte.get_bits(6..8);

        if byte_count == 0 {
            return Ok(lead_byte.get_bits(0..6) as usize);
        }

        let mut length = lead_byte.get_bits(0..4) as usize;
        for i in 0..byte_count {
            length |= (self.next()? as usize) << (4 + i * 8);
        }
        Ok(length)
    }

    /// Decode a `PkgLength` and turn it into the absolute end of the structure it describes,
    /// checking that it fits inside the current window.
    pub fn pkg_end(&mut self) -> Result<usize, AmlError> {
        let start = self.pc();
        let length = self.pkglength()?;
        let end = start + length;
        if end > self.limit() || end < self.pc() {
            return Err(AmlError::InvalidPkgLength);
        }
        Ok(end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(bytes: &[u8]) -> Result<(usize, usize), AmlError> {
        let mut stream = AmlStream::new(bytes, 0, bytes.len());
        let length = stream.pkglength()?;
        Ok((length, stream.pc()))
    }

    #[test]
    fn test_raw_pkg_length() {
        assert_eq!(raw(&[0x00]), Ok((0, 1)));
        assert_eq!(raw(&[0x05, 0xf5, 0x7f]), Ok((5, 1)));
        assert_eq!(raw(&[0b01000101, 0x14]), Ok((325, 2)));
        assert_eq!(raw(&[0b01000111, 0x14, 0x46]), Ok((327, 2)));
        assert_eq!(raw(&[0b10000111, 0x14, 0x46]), Ok((287047, 3)));
    }

    #[test]
    fn not_enough_pkglength() {
        assert_eq!(raw(&[0b11000000, 0xff, 0x4f]), Err(AmlError::RunOutOfStream));
        assert_eq!(raw(&[]), Err(AmlError::RunOutOfStream));
    }

    #[test]
    fn pkg_end_checks_window() {
        let code = [0x05, 0x01, 0x02, 0x03, 0x04, 0xff, 0xff, 0xff];
        let mut stream = AmlStream::new(&code, 0, code.len());
        assert_eq!(stream.pkg_end(), Ok(5));

        let mut short = AmlStream::new(&code, 0, 3);
        assert_eq!(short.pkg_end(), Err(AmlError::InvalidPkgLength));
    }
}
