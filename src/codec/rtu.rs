// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU frame validation: CRC16 and the `unit_id .. crc_hi` envelope around a
//! PDU. Frame *delimitation* (the inter-character silence gap) is a
//! transport concern and lives in [`crate::server::rtu`]; this module only
//! knows how to check and append the trailing CRC once a candidate frame has
//! already been accumulated.

use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::SlaveId;

const MIN_FRAME_LEN: usize = 4; // slave_id + function_code + crc_lo + crc_hi

/// Computes the Modbus CRC16 (polynomial 0xA001 reflected, seed 0xFFFF),
/// returned with the low byte in the high position so that appending it
/// big-endian yields the wire's low-byte-first order.
pub fn calc_crc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc << 8 | crc >> 8
}

fn check_crc(frame: &[u8]) -> bool {
    if frame.len() < 2 {
        return false;
    }
    let (data, crc_bytes) = frame.split_at(frame.len() - 2);
    let expected = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);
    calc_crc(data) == expected
}

/// Validates a candidate RTU frame and, if the CRC checks out, strips the
/// slave ID and CRC to return `(slave_id, pdu)`. Frames under the minimum
/// length or with a bad CRC are rejected without further interpretation —
/// the caller silently discards them per the wire contract.
pub fn parse_frame(frame: &[u8]) -> Option<(SlaveId, Bytes)> {
    if frame.len() < MIN_FRAME_LEN || !check_crc(frame) {
        return None;
    }
    let slave_id = frame[0];
    let pdu = Bytes::copy_from_slice(&frame[1..frame.len() - 2]);
    Some((slave_id, pdu))
}

/// Builds a complete outgoing frame: `slave_id || pdu || crc`.
pub fn encode_frame(slave_id: SlaveId, pdu: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(pdu.len() + 3);
    buf.put_u8(slave_id);
    buf.put_slice(pdu);
    let crc = calc_crc(&buf);
    buf.put_u16(crc);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calc_crc_matches_known_vectors() {
        assert_eq!(calc_crc(&[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02]), 0xB663);
        assert_eq!(calc_crc(&[0x01, 0x03, 0x04, 0x00, 0x20, 0x00, 0x00]), 0xFBF9);
    }

    #[test]
    fn parse_frame_accepts_valid_crc() {
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCD];
        let (slave, pdu) = parse_frame(&frame).unwrap();
        assert_eq!(slave, 0x01);
        assert_eq!(&pdu[..], &[0x03, 0x00, 0x00, 0x00, 0x0A]);
    }

    #[test]
    fn parse_frame_rejects_corrupted_crc() {
        let frame = [0x01, 0x03, 0x00, 0x00, 0x00, 0x0A, 0xC5, 0xCE];
        assert!(parse_frame(&frame).is_none());
    }

    #[test]
    fn parse_frame_rejects_short_frame() {
        assert!(parse_frame(&[0x01, 0x03, 0x00]).is_none());
    }

    #[test]
    fn encode_frame_roundtrips_through_parse() {
        let encoded = encode_frame(0x01, &[0x03, 0x04, 0x04, 0xD2, 0x16, 0x2E]);
        let (slave, pdu) = parse_frame(&encoded).unwrap();
        assert_eq!(slave, 0x01);
        assert_eq!(&pdu[..], &[0x03, 0x04, 0x04, 0xD2, 0x16, 0x2E]);
    }
}
