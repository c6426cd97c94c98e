//! Bit-level reading for parameter-set parsing.

use crate::error::{BitstreamError, Error, Result};

/// A bitstream reader for parsing coded data.
///
/// Reads single bits, fixed-width values, and the unsigned Exp-Golomb values
/// H.264 parameter sets are made of.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_pos: usize,
    bit_pos: u8,
}

impl<'a> BitReader<'a> {
    /// Create a new bit reader from a byte slice.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            byte_pos: 0,
            bit_pos: 0,
        }
    }

    /// Current bit position in the stream.
    pub fn position(&self) -> usize {
        self.byte_pos * 8 + self.bit_pos as usize
    }

    /// Number of unread bits.
    pub fn remaining_bits(&self) -> usize {
        (self.data.len() * 8).saturating_sub(self.position())
    }

    /// Read a single bit.
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.byte_pos >= self.data.len() {
            return Err(BitstreamError::UnexpectedEnd.into());
        }

        let bit = (self.data[self.byte_pos] >> (7 - self.bit_pos)) & 1;
        self.bit_pos += 1;
        if self.bit_pos == 8 {
            self.bit_pos = 0;
            self.byte_pos += 1;
        }

        Ok(bit != 0)
    }

    /// Read up to 32 bits as an unsigned integer.
    pub fn read_bits(&mut self, n: u8) -> Result<u32> {
        if n > 32 {
            return Err(Error::invalid_param("Cannot read more than 32 bits at once"));
        }
        if self.remaining_bits() < n as usize {
            return Err(BitstreamError::UnexpectedEnd.into());
        }

        let mut value: u32 = 0;
        for _ in 0..n {
            value = (value << 1) | u32::from(self.read_bit()?);
        }
        Ok(value)
    }

    /// Read an unsigned 8-bit value.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_bits(8).map(|v| v as u8)
    }

    /// Read an unsigned Exp-Golomb coded value (ue(v)).
    pub fn read_ue(&mut self) -> Result<u32> {
        let mut leading_zeros = 0u8;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(BitstreamError::ExpGolombOverflow.into());
            }
        }

        if leading_zeros == 0 {
            return Ok(0);
        }

        let suffix = self.read_bits(leading_zeros)?;
        Ok((1u32 << leading_zeros) - 1 + suffix)
    }
}

/// Length of the Annex B start code at the very beginning of `data`.
///
/// Returns `Some(3)` for `00 00 01`, `Some(4)` for `00 00 00 01`, `None` otherwise.
pub fn leading_start_code(data: &[u8]) -> Option<usize> {
    if data.starts_with(&[0, 0, 1]) {
        Some(3)
    } else if data.starts_with(&[0, 0, 0, 1]) {
        Some(4)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_bits() {
        let data = [0b1010_1100, 0xFF];
        let mut reader = BitReader::new(&data);
        assert!(reader.read_bit().unwrap());
        assert_eq!(reader.read_bits(3).unwrap(), 0b010);
        assert_eq!(reader.read_bits(4).unwrap(), 0b1100);
        assert_eq!(reader.read_u8().unwrap(), 0xFF);
        assert!(reader.read_bit().is_err());
    }

    #[test]
    fn test_read_ue() {
        // 1 -> 0, 010 -> 1, 011 -> 2, 00100 -> 3
        let data = [0b1010_0110, 0b0100_0000];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_ue().unwrap(), 0);
        assert_eq!(reader.read_ue().unwrap(), 1);
        assert_eq!(reader.read_ue().unwrap(), 2);
        assert_eq!(reader.read_ue().unwrap(), 3);
    }

    #[test]
    fn test_leading_start_code() {
        assert_eq!(leading_start_code(&[0, 0, 1, 0x67]), Some(3));
        assert_eq!(leading_start_code(&[0, 0, 0, 1, 0x67]), Some(4));
        assert_eq!(leading_start_code(&[0, 1, 0x67]), None);
    }
}
