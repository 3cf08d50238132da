// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Wire frame header and frame check sequence (§6.2).
//!
//! Every frame is `[header][header_fcs][payload][payload_fcs]`, all
//! fields big-endian. Header and payload carry independent CRC32
//! checksums so a receiver can validate the header — and in particular
//! trust `dataset_length` — before reading the payload it describes.

use crate::constant::MsgType;
use crate::error::{Error, MarshallingError, Result};
use byteorder::{BigEndian, ByteOrder};

/// Encoded size of [`FrameHeader`] alone, not counting its FCS.
pub const HEADER_SIZE: usize = 4 + 2 + 2 + 4 + 4 + 4 + 4 + 4 + 16 + URI_FIELD_SIZE;

/// Width of the `dst_uri` wire field: a fixed, null-padded ASCII slot
/// wide enough for a destination URI (§3.1 "Listener routing"), the
/// same fixed-width-string convention `session`/`com_id` already use.
pub const URI_FIELD_SIZE: usize = 32;

/// Fixed frame header preceding every PD/MD payload (§6.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub sequence: u32,
    pub protocol_version: u16,
    pub msg_type: MsgType,
    pub com_id: u32,
    pub topo_count: u32,
    pub dataset_length: u32,
    /// Zero if unused.
    pub reply_com_id: u32,
    /// Zero if unused.
    pub reply_ip_address: u32,
    /// Zero for PD frames.
    pub session: [u8; 16],
    /// Destination URI a listener can be addressed by instead of (or
    /// alongside) `dstIP`, null-padded ASCII. All zero when the sender
    /// addressed the exchange by IP alone.
    pub dst_uri: [u8; URI_FIELD_SIZE],
}

impl FrameHeader {
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < HEADER_SIZE {
            return Err(MarshallingError::BufferTooSmall {
                needed: HEADER_SIZE,
                got: buf.len(),
            }
            .into());
        }
        BigEndian::write_u32(&mut buf[0..4], self.sequence);
        BigEndian::write_u16(&mut buf[4..6], self.protocol_version);
        buf[6..8].copy_from_slice(&self.msg_type.wire_tag());
        BigEndian::write_u32(&mut buf[8..12], self.com_id);
        BigEndian::write_u32(&mut buf[12..16], self.topo_count);
        BigEndian::write_u32(&mut buf[16..20], self.dataset_length);
        BigEndian::write_u32(&mut buf[20..24], self.reply_com_id);
        BigEndian::write_u32(&mut buf[24..28], self.reply_ip_address);
        buf[28..44].copy_from_slice(&self.session);
        buf[44..44 + URI_FIELD_SIZE].copy_from_slice(&self.dst_uri);
        Ok(())
    }

    pub fn decode(buf: &[u8]) -> Result<FrameHeader> {
        if buf.len() < HEADER_SIZE {
            return Err(MarshallingError::MalformedFrame("header too short".into()).into());
        }
        let mut tag = [0u8; 2];
        tag.copy_from_slice(&buf[6..8]);
        let msg_type = MsgType::from_wire_tag(tag)
            .ok_or_else(|| MarshallingError::MalformedFrame(format!("unknown msg type tag {:?}", tag)))?;
        let mut session = [0u8; 16];
        session.copy_from_slice(&buf[28..44]);
        let mut dst_uri = [0u8; URI_FIELD_SIZE];
        dst_uri.copy_from_slice(&buf[44..44 + URI_FIELD_SIZE]);
        Ok(FrameHeader {
            sequence: BigEndian::read_u32(&buf[0..4]),
            protocol_version: BigEndian::read_u16(&buf[4..6]),
            msg_type,
            com_id: BigEndian::read_u32(&buf[8..12]),
            topo_count: BigEndian::read_u32(&buf[12..16]),
            dataset_length: BigEndian::read_u32(&buf[16..20]),
            reply_com_id: BigEndian::read_u32(&buf[20..24]),
            reply_ip_address: BigEndian::read_u32(&buf[24..28]),
            session,
            dst_uri,
        })
    }
}

/// Packs `uri` into the fixed, null-padded wire slot. Truncates at
/// `URI_FIELD_SIZE` bytes; callers are expected to configure URIs that
/// fit (a TRDP station name, not an arbitrary string).
pub fn encode_uri(uri: &str) -> [u8; URI_FIELD_SIZE] {
    let mut out = [0u8; URI_FIELD_SIZE];
    let bytes = uri.as_bytes();
    let len = bytes.len().min(URI_FIELD_SIZE);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// Unpacks a wire URI slot, trimming trailing NUL padding. Returns
/// `None` for an all-zero slot (no URI addressing used) or invalid
/// UTF-8.
pub fn decode_uri(raw: &[u8; URI_FIELD_SIZE]) -> Option<String> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    if end == 0 {
        return None;
    }
    std::str::from_utf8(&raw[..end]).ok().map(|s| s.to_string())
}

/// Table-driven CRC32 (IEEE 802.3 polynomial, reflected), used for both
/// the header and payload FCS. No new crate: the teacher keeps low-level
/// framing to `byteorder` alone.
fn crc32_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut j = 0;
        while j < 8 {
            c = if c & 1 != 0 {
                0xEDB8_8320 ^ (c >> 1)
            } else {
                c >> 1
            };
            j += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

pub fn crc32_ieee(data: &[u8]) -> u32 {
    let table = crc32_table();
    let mut crc = 0xFFFF_FFFFu32;
    for &byte in data {
        let idx = ((crc ^ byte as u32) & 0xFF) as usize;
        crc = table[idx] ^ (crc >> 8);
    }
    !crc
}

/// Encode `header` and `payload` into one wire frame:
/// `[header][header_fcs][payload][payload_fcs]`.
pub fn encode_frame(header: &FrameHeader, payload: &[u8]) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; HEADER_SIZE];
    header.encode(&mut buf)?;
    let header_fcs = crc32_ieee(&buf);
    buf.extend_from_slice(&header_fcs.to_be_bytes());
    buf.extend_from_slice(payload);
    let payload_fcs = crc32_ieee(payload);
    buf.extend_from_slice(&payload_fcs.to_be_bytes());
    Ok(buf)
}

/// Decoded frame: header plus the payload slice, with both FCS already
/// verified.
pub struct DecodedFrame<'a> {
    pub header: FrameHeader,
    pub payload: &'a [u8],
}

pub fn decode_frame(buf: &[u8]) -> Result<DecodedFrame<'_>> {
    if buf.len() < HEADER_SIZE + 4 {
        return Err(MarshallingError::MalformedFrame("frame shorter than header+fcs".into()).into());
    }
    let header_bytes = &buf[..HEADER_SIZE];
    let header = FrameHeader::decode(header_bytes)?;
    let header_fcs = BigEndian::read_u32(&buf[HEADER_SIZE..HEADER_SIZE + 4]);
    if crc32_ieee(header_bytes) != header_fcs {
        return Err(MarshallingError::MalformedFrame("header FCS mismatch".into()).into());
    }

    let payload_start = HEADER_SIZE + 4;
    let dataset_length = header.dataset_length as usize;
    let payload_end = payload_start
        .checked_add(dataset_length)
        .ok_or_else(|| Error::from(MarshallingError::MalformedFrame("dataset_length overflow".into())))?;
    if buf.len() < payload_end + 4 {
        return Err(MarshallingError::MalformedFrame("frame shorter than declared payload".into()).into());
    }
    let payload = &buf[payload_start..payload_end];
    let payload_fcs = BigEndian::read_u32(&buf[payload_end..payload_end + 4]);
    if crc32_ieee(payload) != payload_fcs {
        return Err(MarshallingError::MalformedFrame("payload FCS mismatch".into()).into());
    }
    if buf.len() != payload_end + 4 {
        return Err(MarshallingError::MalformedFrame("trailing bytes after frame".into()).into());
    }

    Ok(DecodedFrame { header, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> FrameHeader {
        FrameHeader {
            sequence: 7,
            protocol_version: 1,
            msg_type: MsgType::Pd,
            com_id: 10001,
            topo_count: 0,
            dataset_length: 4,
            reply_com_id: 0,
            reply_ip_address: 0,
            session: [0u8; 16],
            dst_uri: [0u8; URI_FIELD_SIZE],
        }
    }

    #[test]
    fn round_trip() {
        let header = sample_header();
        let payload = [1u8, 2, 3, 4];
        let frame = encode_frame(&header, &payload).unwrap();
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.header, header);
        assert_eq!(decoded.payload, &payload);
    }

    #[test]
    fn corrupted_payload_fails_fcs() {
        let header = sample_header();
        let payload = [1u8, 2, 3, 4];
        let mut frame = encode_frame(&header, &payload).unwrap();
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        let err = decode_frame(&frame).unwrap_err();
        match err {
            Error::MarshallingErr(MarshallingError::MalformedFrame(_)) => {}
            other => panic!("expected MalformedFrame, got {:?}", other),
        }
    }

    #[test]
    fn corrupted_header_fails_fcs() {
        let header = sample_header();
        let payload = [1u8, 2, 3, 4];
        let mut frame = encode_frame(&header, &payload).unwrap();
        frame[0] ^= 0xFF;
        let err = decode_frame(&frame).unwrap_err();
        match err {
            Error::MarshallingErr(MarshallingError::MalformedFrame(_)) => {}
            other => panic!("expected MalformedFrame, got {:?}", other),
        }
    }

    #[test]
    fn round_trip_carries_dst_uri() {
        let mut header = sample_header();
        header.dst_uri = encode_uri("eth0");
        let frame = encode_frame(&header, &[]).unwrap();
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decode_uri(&decoded.header.dst_uri).as_deref(), Some("eth0"));
    }

    #[test]
    fn decode_uri_treats_all_zero_slot_as_no_uri() {
        assert_eq!(decode_uri(&[0u8; URI_FIELD_SIZE]), None);
    }

    #[test]
    fn unknown_msg_type_tag_is_malformed() {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[6] = b'Z';
        buf[7] = b'Z';
        let err = FrameHeader::decode(&buf).unwrap_err();
        match err {
            Error::MarshallingErr(MarshallingError::MalformedFrame(_)) => {}
            other => panic!("expected MalformedFrame, got {:?}", other),
        }
    }
}
