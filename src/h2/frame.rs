// File: h2/frame.rs
// SPDX-License-Identifier: MIT OR Apache-2.0
//
// Copyright (c) 2025
// - Volker Schwaberow <volker@schwaberow.de>

//! HTTP/2 frame format (RFC 7540 Section 4): the client-side subset this
//! tool emits and consumes.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, ScanError};

pub const FRAME_HEADER_SIZE: usize = 9;

/// Connection preface every client connection starts with.
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

pub mod flags {
    pub const END_STREAM: u8 = 0x1;
    pub const ACK: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// The 9-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub length: u32,
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32,
}

impl FrameHeader {
    pub fn parse(src: &[u8]) -> Result<Self> {
        if src.len() < FRAME_HEADER_SIZE {
            return Err(ScanError::Protocol("short frame header".into()));
        }
        Ok(Self {
            length: (u32::from(src[0]) << 16) | (u32::from(src[1]) << 8) | u32::from(src[2]),
            frame_type: src[3],
            flags: src[4],
            stream_id: (u32::from(src[5]) & 0x7f) << 24
                | u32::from(src[6]) << 16
                | u32::from(src[7]) << 8
                | u32::from(src[8]),
        })
    }

    pub fn write(&self, dst: &mut BytesMut) {
        dst.reserve(FRAME_HEADER_SIZE);
        dst.put_u8((self.length >> 16) as u8);
        dst.put_u8((self.length >> 8) as u8);
        dst.put_u8(self.length as u8);
        dst.put_u8(self.frame_type);
        dst.put_u8(self.flags);
        dst.put_u8(((self.stream_id >> 24) & 0x7f) as u8);
        dst.put_u8((self.stream_id >> 16) as u8);
        dst.put_u8((self.stream_id >> 8) as u8);
        dst.put_u8(self.stream_id as u8);
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

/// A parsed inbound frame: header plus payload with padding already removed
/// where the frame type defines it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Strip the pad-length octet and trailing padding from DATA/HEADERS
    /// payloads. HEADERS priority fields are dropped too; this client never
    /// acts on priority.
    pub fn stripped_payload(&self) -> Result<Bytes> {
        let mut payload = self.payload.clone();

        if matches!(self.header.frame_type, frame_type::DATA | frame_type::HEADERS)
            && self.header.has_flag(flags::PADDED)
        {
            if payload.is_empty() {
                return Err(ScanError::Protocol("PADDED frame without pad length".into()));
            }
            let pad = payload[0] as usize;
            payload = payload.slice(1..);
            if pad > payload.len() {
                return Err(ScanError::Protocol("padding larger than payload".into()));
            }
            payload = payload.slice(..payload.len() - pad);
        }

        if self.header.frame_type == frame_type::HEADERS && self.header.has_flag(flags::PRIORITY) {
            if payload.len() < 5 {
                return Err(ScanError::Protocol("HEADERS priority field truncated".into()));
            }
            payload = payload.slice(5..);
        }

        Ok(payload)
    }
}

pub fn encode_data(dst: &mut BytesMut, stream_id: u32, data: &[u8], end_stream: bool) {
    FrameHeader {
        length: data.len() as u32,
        frame_type: frame_type::DATA,
        flags: if end_stream { flags::END_STREAM } else { 0 },
        stream_id,
    }
    .write(dst);
    dst.extend_from_slice(data);
}

pub fn encode_headers(
    dst: &mut BytesMut,
    stream_id: u32,
    header_block: &[u8],
    end_stream: bool,
) {
    let mut frame_flags = flags::END_HEADERS;
    if end_stream {
        frame_flags |= flags::END_STREAM;
    }
    FrameHeader {
        length: header_block.len() as u32,
        frame_type: frame_type::HEADERS,
        flags: frame_flags,
        stream_id,
    }
    .write(dst);
    dst.extend_from_slice(header_block);
}

/// SETTINGS frame; an empty payload is a valid initial SETTINGS.
pub fn encode_settings(dst: &mut BytesMut, ack: bool) {
    FrameHeader {
        length: 0,
        frame_type: frame_type::SETTINGS,
        flags: if ack { flags::ACK } else { 0 },
        stream_id: 0,
    }
    .write(dst);
}

pub fn encode_ping_ack(dst: &mut BytesMut, opaque: &[u8]) {
    FrameHeader {
        length: 8,
        frame_type: frame_type::PING,
        flags: flags::ACK,
        stream_id: 0,
    }
    .write(dst);
    let mut payload = [0u8; 8];
    let n = opaque.len().min(8);
    payload[..n].copy_from_slice(&opaque[..n]);
    dst.extend_from_slice(&payload);
}

pub fn encode_window_update(dst: &mut BytesMut, stream_id: u32, increment: u32) {
    FrameHeader {
        length: 4,
        frame_type: frame_type::WINDOW_UPDATE,
        flags: 0,
        stream_id,
    }
    .write(dst);
    dst.put_u32(increment & 0x7fff_ffff);
}

pub fn encode_goaway(dst: &mut BytesMut, last_stream_id: u32, error_code: u32) {
    FrameHeader {
        length: 8,
        frame_type: frame_type::GOAWAY,
        flags: 0,
        stream_id: 0,
    }
    .write(dst);
    dst.put_u32(last_stream_id & 0x7fff_ffff);
    dst.put_u32(error_code);
}

/// GOAWAY payload: (last stream id, error code).
pub fn parse_goaway(payload: &[u8]) -> Result<(u32, u32)> {
    if payload.len() < 8 {
        return Err(ScanError::Protocol("GOAWAY payload truncated".into()));
    }
    let last = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7fff_ffff;
    let code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    Ok((last, code))
}

/// RST_STREAM payload: error code.
pub fn parse_rst_stream(payload: &[u8]) -> Result<u32> {
    if payload.len() < 4 {
        return Err(ScanError::Protocol("RST_STREAM payload truncated".into()));
    }
    Ok(u32::from_be_bytes([
        payload[0], payload[1], payload[2], payload[3],
    ]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_header_roundtrip() {
        let header = FrameHeader {
            length: 0x01_02_03,
            frame_type: frame_type::HEADERS,
            flags: flags::END_HEADERS | flags::END_STREAM,
            stream_id: 77,
        };
        let mut buf = BytesMut::new();
        header.write(&mut buf);
        assert_eq!(buf.len(), FRAME_HEADER_SIZE);
        assert_eq!(FrameHeader::parse(&buf).unwrap(), header);
    }

    #[test]
    fn reserved_bit_is_masked() {
        let mut buf = BytesMut::new();
        FrameHeader {
            length: 0,
            frame_type: frame_type::DATA,
            flags: 0,
            stream_id: 0xffff_ffff,
        }
        .write(&mut buf);
        let parsed = FrameHeader::parse(&buf).unwrap();
        assert_eq!(parsed.stream_id, 0x7fff_ffff);
    }

    #[test]
    fn data_frame_encoding() {
        let mut buf = BytesMut::new();
        encode_data(&mut buf, 1, b"abc", true);
        let header = FrameHeader::parse(&buf).unwrap();
        assert_eq!(header.length, 3);
        assert_eq!(header.frame_type, frame_type::DATA);
        assert!(header.has_flag(flags::END_STREAM));
        assert_eq!(&buf[FRAME_HEADER_SIZE..], b"abc");
    }

    #[test]
    fn data_frame_without_end_stream_stays_open() {
        let mut buf = BytesMut::new();
        encode_data(&mut buf, 3, b"0\r\n", false);
        let header = FrameHeader::parse(&buf).unwrap();
        assert!(!header.has_flag(flags::END_STREAM));
    }

    #[test]
    fn settings_and_goaway() {
        let mut buf = BytesMut::new();
        encode_settings(&mut buf, false);
        let header = FrameHeader::parse(&buf).unwrap();
        assert_eq!(header.length, 0);
        assert_eq!(header.stream_id, 0);

        let mut buf = BytesMut::new();
        encode_goaway(&mut buf, 5, 0x2);
        let payload = &buf[FRAME_HEADER_SIZE..];
        assert_eq!(parse_goaway(payload).unwrap(), (5, 0x2));
    }

    #[test]
    fn padded_payload_is_stripped() {
        let mut payload = vec![2u8];
        payload.extend_from_slice(b"hello");
        payload.extend_from_slice(&[0, 0]);
        let frame = Frame {
            header: FrameHeader {
                length: payload.len() as u32,
                frame_type: frame_type::DATA,
                flags: flags::PADDED,
                stream_id: 1,
            },
            payload: Bytes::from(payload),
        };
        assert_eq!(frame.stripped_payload().unwrap().as_ref(), b"hello");
    }
}
