//! H.265 (HEVC) RTP depacketization (RFC 7798).
//!
//! Key differences from H.264 (RFC 6184):
//!
//! - **2-byte NAL unit header** (vs 1-byte in H.264).
//!   The NAL type is in bits 1..6 of the first byte:
//!   ```text
//!   [F|  Type(6)  |LayerId(6)|TID(3)]
//!   ```
//!
//! - **Aggregation packets** (type 48) carry NALs with 16-bit size prefixes
//!   after the 2-byte payload header.
//!
//! - **Fragmentation units** (type 49): 2-byte payload header + 1-byte FU
//!   header with a 6-bit NAL type field:
//!   ```text
//!   FU header:  [S|E|FuType(6)]
//!   ```
//!
//! DONL fields are not expected: only `sprop-max-don-diff=0` streams are
//! supported, which is what cameras send.

use crate::error::DepacketizeError;

use super::h264::split_aggregate;

pub const NAL_VPS: u8 = 32;
pub const NAL_SPS: u8 = 33;
pub const NAL_PPS: u8 = 34;
pub const NAL_AP: u8 = 48;
pub const NAL_FU: u8 = 49;
pub const NAL_PACI: u8 = 50;

const MAX_NALU_SIZE: usize = 4 * 1024 * 1024;

pub fn nal_type(nalu: &[u8]) -> Option<u8> {
    nalu.first().map(|b| (b >> 1) & 0x3f)
}

/// Whether the access unit contains an IRAP picture (BLA, IDR or CRA,
/// types 16–21), which decodes without earlier frames.
pub fn random_access_present(nalus: &[Vec<u8>]) -> bool {
    nalus
        .iter()
        .any(|n| matches!(nal_type(n), Some(16..=21)))
}

pub fn is_parameter_set(nalu: &[u8]) -> bool {
    matches!(nal_type(nalu), Some(NAL_VPS | NAL_SPS | NAL_PPS))
}

/// Reassembles H.265 NAL units from RTP payloads.
#[derive(Debug, Default)]
pub struct H265Unpacker {
    fragment: Option<Vec<u8>>,
}

impl H265Unpacker {
    pub fn unpack(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>, DepacketizeError> {
        if payload.len() < 2 {
            return Err(DepacketizeError::Malformed(
                "payload shorter than NAL unit header".into(),
            ));
        }

        match nal_type(payload) {
            Some(NAL_FU) => self.unpack_fu(payload),
            Some(NAL_AP) => {
                self.fragment = None;
                split_aggregate(&payload[2..])
            }
            Some(NAL_PACI) => {
                self.fragment = None;
                Err(DepacketizeError::Malformed("PACI packets are not supported".into()))
            }
            _ => {
                self.fragment = None;
                Ok(vec![payload.to_vec()])
            }
        }
    }

    fn unpack_fu(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>, DepacketizeError> {
        if payload.len() < 3 {
            return Err(DepacketizeError::Malformed("FU payload too short".into()));
        }
        let fu_header = payload[2];
        let start = fu_header & 0x80 != 0;
        let end = fu_header & 0x40 != 0;
        let fu_type = fu_header & 0x3f;

        if start {
            if end {
                return Err(DepacketizeError::Malformed(
                    "FU with both start and end bits set".into(),
                ));
            }
            let mut nalu = Vec::with_capacity(payload.len() * 4);
            nalu.push((payload[0] & 0x81) | (fu_type << 1));
            nalu.push(payload[1]);
            nalu.extend_from_slice(&payload[3..]);
            self.fragment = Some(nalu);
            return Err(DepacketizeError::MorePacketsNeeded);
        }

        let Some(mut nalu) = self.fragment.take() else {
            return Err(DepacketizeError::NonStartingPacketAndNoPrevious);
        };
        nalu.extend_from_slice(&payload[3..]);
        if nalu.len() > MAX_NALU_SIZE {
            return Err(DepacketizeError::Malformed(format!(
                "NAL unit size exceeds {MAX_NALU_SIZE} bytes"
            )));
        }

        if end {
            Ok(vec![nalu])
        } else {
            self.fragment = Some(nalu);
            Err(DepacketizeError::MorePacketsNeeded)
        }
    }

    pub fn reset(&mut self) {
        self.fragment = None;
    }
}
