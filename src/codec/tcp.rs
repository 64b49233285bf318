// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! MBAP framing: splits the 7-byte TCP application header from the PDU body
//! and re-wraps outgoing PDUs. Carries no knowledge of PDU contents.

use std::io::{Error, ErrorKind, Result};

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::tcp::Header;

const HEADER_LEN: usize = 7;
const PROTOCOL_ID: u16 = 0x0000;

/// A decoded request ADU: MBAP header plus the still-unparsed PDU bytes
/// (function code followed by body).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAdu {
    pub header: Header,
    pub pdu: Bytes,
}

/// A response ADU ready to be wrapped back into an MBAP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseAdu {
    pub header: Header,
    pub pdu: Bytes,
}

#[derive(Debug, Default)]
pub struct ServerCodec;

impl Decoder for ServerCodec {
    type Item = RequestAdu;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<RequestAdu>> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let len = usize::from(BigEndian::read_u16(&buf[4..6]));
        let pdu_len = if len > 0 {
            len - 1
        } else {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("invalid MBAP length field: {len}"),
            ));
        };
        if buf.len() < HEADER_LEN + pdu_len {
            return Ok(None);
        }

        let header_data = buf.split_to(HEADER_LEN);

        let protocol_id = BigEndian::read_u16(&header_data[2..4]);
        if protocol_id != PROTOCOL_ID {
            return Err(Error::new(
                ErrorKind::InvalidData,
                format!("invalid protocol identifier: expected 0, got {protocol_id}"),
            ));
        }

        let transaction_id = BigEndian::read_u16(&header_data[0..2]);
        let unit_id = header_data[6];

        if pdu_len < 1 {
            return Err(Error::new(ErrorKind::InvalidData, "empty PDU"));
        }

        let pdu = buf.split_to(pdu_len).freeze();

        Ok(Some(RequestAdu {
            header: Header { transaction_id, unit_id },
            pdu,
        }))
    }
}

impl Encoder<ResponseAdu> for ServerCodec {
    type Error = Error;

    fn encode(&mut self, adu: ResponseAdu, buf: &mut BytesMut) -> Result<()> {
        let ResponseAdu { header, pdu } = adu;
        buf.reserve(pdu.len() + HEADER_LEN);
        buf.put_u16(header.transaction_id);
        buf.put_u16(PROTOCOL_ID);
        buf.put_u16((pdu.len() + 1) as u16);
        buf.put_u8(header.unit_id);
        buf.put_slice(&pdu);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_header_fragment() {
        let mut codec = ServerCodec;
        let mut buf = BytesMut::from(&[0x00, 0x11, 0x00, 0x00, 0x00, 0x00][..]);
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 6);
    }

    #[test]
    fn decode_partly_received_message() {
        let mut codec = ServerCodec;
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x03, 0x01, 0x03][..]);
        let res = codec.decode(&mut buf).unwrap();
        assert!(res.is_none());
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn decode_full_request() {
        let mut codec = ServerCodec;
        let mut buf = BytesMut::from(
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x0A, 0x00, 0x02][..],
        );
        let adu = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(adu.header.transaction_id, 0x0001);
        assert_eq!(adu.header.unit_id, 0x01);
        assert_eq!(&adu.pdu[..], &[0x03, 0x00, 0x0A, 0x00, 0x02]);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_rejects_invalid_protocol_id() {
        let mut codec = ServerCodec;
        let mut buf = BytesMut::from(&[0x00, 0x01, 0x12, 0x34, 0x00, 0x02, 0x01, 0x03][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }

    #[test]
    fn encode_response() {
        let mut codec = ServerCodec;
        let mut buf = BytesMut::new();
        let adu = ResponseAdu {
            header: Header { transaction_id: 0x0001, unit_id: 0x01 },
            pdu: Bytes::from_static(&[0x03, 0x04, 0x04, 0xD2, 0x16, 0x2E]),
        };
        codec.encode(adu, &mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &[0x00, 0x01, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x04, 0xD2, 0x16, 0x2E]
        );
    }
}
