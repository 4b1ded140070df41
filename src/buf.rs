use crate::DecodeError;

/// Little-endian reads off the front of a payload slice. Every getter advances
/// the slice and fails with [`DecodeError::Truncated`] instead of panicking
/// when the payload is shorter than the field.
pub trait Buf {
    fn get_u8(&mut self) -> Result<u8, DecodeError>;

    fn get_u16(&mut self) -> Result<u16, DecodeError>;

    fn get_u32(&mut self) -> Result<u32, DecodeError>;

    /// Split off the next `len` bytes verbatim.
    fn get_bytes(&mut self, len: usize) -> Result<&[u8], DecodeError>;
}

impl Buf for &[u8] {
    #[inline]
    fn get_u8(&mut self) -> Result<u8, DecodeError> {
        let data = *self;
        let (first, rest) = data.split_first().ok_or(DecodeError::Truncated)?;
        *self = rest;
        Ok(*first)
    }

    #[inline]
    fn get_u16(&mut self) -> Result<u16, DecodeError> {
        let mut bytes = [0; 2];
        bytes.copy_from_slice(self.get_bytes(2)?);
        Ok(u16::from_le_bytes(bytes))
    }

    #[inline]
    fn get_u32(&mut self) -> Result<u32, DecodeError> {
        let mut bytes = [0; 4];
        bytes.copy_from_slice(self.get_bytes(4)?);
        Ok(u32::from_le_bytes(bytes))
    }

    #[inline]
    fn get_bytes(&mut self, len: usize) -> Result<&[u8], DecodeError> {
        if self.len() < len {
            return Err(DecodeError::Truncated);
        }

        let data = *self;
        let (head, rest) = data.split_at(len);
        *self = rest;
        Ok(head)
    }
}

/// Little-endian writes into the front of a buffer. Callers size the buffer
/// from [`crate::Message::EncodedLen`], so running past the end is a bug in the
/// message definition and panics.
pub trait BufMut {
    fn put_u8(&mut self, value: u8);

    fn put_u16(&mut self, value: u16);

    fn put_u32(&mut self, value: u32);

    fn put_slice(&mut self, value: &[u8]);
}

impl BufMut for &mut [u8] {
    #[inline]
    fn put_u8(&mut self, value: u8) {
        self.put_slice(&[value]);
    }

    #[inline]
    fn put_u16(&mut self, value: u16) {
        self.put_slice(&value.to_le_bytes());
    }

    #[inline]
    fn put_u32(&mut self, value: u32) {
        self.put_slice(&value.to_le_bytes());
    }

    #[inline]
    fn put_slice(&mut self, value: &[u8]) {
        let (head, rest) = core::mem::take(self).split_at_mut(value.len());
        head.copy_from_slice(value);
        *self = rest;
    }
}
