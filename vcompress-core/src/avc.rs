//! H.264 sequence parameter set header parsing.
//!
//! Only the fixed prefix of the SPS is decoded: enough to learn which
//! profile an encoder actually produced.

use crate::bitstream::{leading_start_code, BitReader};
use crate::error::{BitstreamError, Result};

/// Baseline profile.
pub const PROFILE_IDC_BASELINE: u8 = 66;
/// Main profile.
pub const PROFILE_IDC_MAIN: u8 = 77;
/// Extended profile.
pub const PROFILE_IDC_EXTENDED: u8 = 88;
/// High profile.
pub const PROFILE_IDC_HIGH: u8 = 100;

/// NAL header bytes of an SPS with `nal_ref_idc` 3, 1 and 2.
const SPS_NAL_HEADERS: [u8; 3] = [0x67, 0x27, 0x47];

/// Leading fields of a sequence parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpsHeader {
    /// `profile_idc`.
    pub profile_idc: u8,
    /// `constraint_set0..5_flag` plus reserved bits.
    pub constraint_flags: u8,
    /// `level_idc`.
    pub level_idc: u8,
    /// `seq_parameter_set_id`.
    pub seq_parameter_set_id: u32,
}

impl SpsHeader {
    /// Parse an Annex B SPS as stored in a format's `csd-0`.
    ///
    /// The block must start with a 3- or 4-byte start code followed by an
    /// SPS NAL header.
    pub fn parse(csd: &[u8]) -> Result<Self> {
        let start = leading_start_code(csd).ok_or(BitstreamError::MissingStartCode { offset: 0 })?;
        let nal = *csd.get(start).ok_or(BitstreamError::UnexpectedEnd)?;
        if !SPS_NAL_HEADERS.contains(&nal) {
            return Err(BitstreamError::Other(format!("Got non SPS NAL data: 0x{nal:02x}")).into());
        }

        let mut reader = BitReader::new(&csd[start + 1..]);
        Ok(Self {
            profile_idc: reader.read_u8()?,
            constraint_flags: reader.read_u8()?,
            level_idc: reader.read_u8()?,
            seq_parameter_set_id: reader.read_ue()?,
        })
    }

    /// Serialize as an Annex B SPS prefix with a 4-byte start code.
    ///
    /// The output ends right after `seq_parameter_set_id` followed by the RBSP
    /// stop bit, which is all [`SpsHeader::parse`] reads.
    pub fn to_annex_b(&self) -> Vec<u8> {
        let mut out = vec![0, 0, 0, 1, SPS_NAL_HEADERS[0], self.profile_idc, self.constraint_flags, self.level_idc];

        // ue(v): N leading zeros, then (value + 1) in N + 1 bits.
        let code = u64::from(self.seq_parameter_set_id) + 1;
        let len = 64 - code.leading_zeros();
        let mut bits: Vec<bool> = std::iter::repeat(false).take(len as usize - 1).collect();
        bits.extend((0..len).rev().map(|i| (code >> i) & 1 == 1));
        bits.push(true);

        for chunk in bits.chunks(8) {
            let mut byte = 0u8;
            for (i, bit) in chunk.iter().enumerate() {
                if *bit {
                    byte |= 0x80 >> i;
                }
            }
            out.push(byte);
        }
        out
    }
}
