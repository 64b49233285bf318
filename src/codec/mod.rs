// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Byte-level encoding and decoding of request/response PDU bodies.
//!
//! This module knows nothing about transport framing or the datastore; it
//! only maps between [`Request`]/[`Response`] and the raw bytes that follow
//! the function-code byte on the wire.

pub mod rtu;
pub mod tcp;

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use crate::frame::{
    Exception, ExceptionResponse, FileRecordRequest, FileRecordResponse, FileRecordWrite,
    FunctionCode, Request, Response,
};

/// Converts a coil value to its packed bit representation.
fn bool_to_coil_word(value: bool) -> u16 {
    if value {
        0xFF00
    } else {
        0x0000
    }
}

fn coil_word_to_bool(value: u16) -> Option<bool> {
    match value {
        0xFF00 => Some(true),
        0x0000 => Some(false),
        _ => None,
    }
}

fn packed_len(count: usize) -> usize {
    (count + 7) / 8
}

fn pack_coils(coils: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; packed_len(coils.len())];
    for (i, &coil) in coils.iter().enumerate() {
        if coil {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

fn unpack_coils(data: &[u8], count: usize) -> Vec<bool> {
    let mut coils = Vec::with_capacity(count);
    'outer: for byte in data {
        for bit in 0..8 {
            if coils.len() >= count {
                break 'outer;
            }
            coils.push((byte >> bit) & 0x01 != 0);
        }
    }
    coils
}

fn words_to_bytes(words: &[u16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(words.len() * 2);
    for &w in words {
        out.put_u16(w);
    }
    out
}

fn bytes_to_words(data: &[u8]) -> Vec<u16> {
    data.chunks_exact(2).map(BigEndian::read_u16).collect()
}

/// Parses the body following a function code into a typed [`Request`].
///
/// Performs the per-FC structural and range validation from the wire
/// contract; any failure is reported as the exception it maps to
/// (never a panic on malformed input).
pub fn decode_request(function: FunctionCode, body: &[u8]) -> Result<Request, Exception> {
    use FunctionCode as F;
    match function {
        F::ReadCoils | F::ReadDiscreteInputs | F::ReadHoldingRegisters | F::ReadInputRegisters => {
            if body.len() < 4 {
                return Err(Exception::IllegalDataValue);
            }
            let address = BigEndian::read_u16(&body[0..2]);
            let quantity = BigEndian::read_u16(&body[2..4]);
            let max = match function {
                F::ReadCoils | F::ReadDiscreteInputs => 2000,
                _ => 125,
            };
            if quantity < 1 || quantity > max {
                return Err(Exception::IllegalDataValue);
            }
            Ok(match function {
                F::ReadCoils => Request::ReadCoils(address, quantity),
                F::ReadDiscreteInputs => Request::ReadDiscreteInputs(address, quantity),
                F::ReadHoldingRegisters => Request::ReadHoldingRegisters(address, quantity),
                F::ReadInputRegisters => Request::ReadInputRegisters(address, quantity),
                _ => unreachable!(),
            })
        }
        F::WriteSingleCoil => {
            if body.len() < 4 {
                return Err(Exception::IllegalDataValue);
            }
            let address = BigEndian::read_u16(&body[0..2]);
            let raw = BigEndian::read_u16(&body[2..4]);
            let coil = coil_word_to_bool(raw).ok_or(Exception::IllegalDataValue)?;
            Ok(Request::WriteSingleCoil(address, coil))
        }
        F::WriteSingleRegister => {
            if body.len() < 4 {
                return Err(Exception::IllegalDataValue);
            }
            let address = BigEndian::read_u16(&body[0..2]);
            let value = BigEndian::read_u16(&body[2..4]);
            Ok(Request::WriteSingleRegister(address, value))
        }
        F::ReadExceptionStatus => Ok(Request::ReadExceptionStatus),
        F::Diagnostics => {
            if body.len() < 4 {
                return Err(Exception::IllegalDataValue);
            }
            let sub_function = BigEndian::read_u16(&body[0..2]);
            let data = BigEndian::read_u16(&body[2..4]);
            Ok(Request::Diagnostics(sub_function, data))
        }
        F::GetCommEventCounter => Ok(Request::GetCommEventCounter),
        F::GetCommEventLog => Ok(Request::GetCommEventLog),
        F::WriteMultipleCoils => {
            if body.len() < 5 {
                return Err(Exception::IllegalDataValue);
            }
            let address = BigEndian::read_u16(&body[0..2]);
            let quantity = BigEndian::read_u16(&body[2..4]);
            let byte_count = body[4] as usize;
            if quantity < 1 || quantity > 1968 || byte_count != packed_len(quantity as usize) {
                return Err(Exception::IllegalDataValue);
            }
            if body.len() < 5 + byte_count {
                return Err(Exception::IllegalDataValue);
            }
            let coils = unpack_coils(&body[5..5 + byte_count], quantity as usize);
            Ok(Request::WriteMultipleCoils(address, coils))
        }
        F::WriteMultipleRegisters => {
            if body.len() < 5 {
                return Err(Exception::IllegalDataValue);
            }
            let address = BigEndian::read_u16(&body[0..2]);
            let quantity = BigEndian::read_u16(&body[2..4]);
            let byte_count = body[4] as usize;
            if quantity < 1 || quantity > 123 || byte_count != quantity as usize * 2 {
                return Err(Exception::IllegalDataValue);
            }
            if body.len() < 5 + byte_count {
                return Err(Exception::IllegalDataValue);
            }
            let registers = bytes_to_words(&body[5..5 + byte_count]);
            Ok(Request::WriteMultipleRegisters(address, registers))
        }
        F::ReportSlaveId => Ok(Request::ReportSlaveId),
        F::ReadFileRecord => {
            if body.is_empty() {
                return Err(Exception::IllegalDataValue);
            }
            let byte_count = body[0] as usize;
            if byte_count < 7 || body.len() < 1 + byte_count {
                return Err(Exception::IllegalDataValue);
            }
            let mut requests = Vec::new();
            let mut offset = 1usize;
            while offset + 7 <= 1 + byte_count {
                let reference_type = body[offset];
                let file_number = BigEndian::read_u16(&body[offset + 1..offset + 3]);
                let record_number = BigEndian::read_u16(&body[offset + 3..offset + 5]);
                let record_length = BigEndian::read_u16(&body[offset + 5..offset + 7]);
                if reference_type != 0x06 || record_length > 120 {
                    return Err(Exception::IllegalDataValue);
                }
                requests.push(FileRecordRequest {
                    reference_type,
                    file_number,
                    record_number,
                    record_length,
                });
                offset += 7;
            }
            if requests.is_empty() {
                return Err(Exception::IllegalDataValue);
            }
            Ok(Request::ReadFileRecord(requests))
        }
        F::WriteFileRecord => {
            if body.is_empty() {
                return Err(Exception::IllegalDataValue);
            }
            let byte_count = body[0] as usize;
            if body.len() < 1 + byte_count {
                return Err(Exception::IllegalDataValue);
            }
            let mut writes = Vec::new();
            let mut offset = 1usize;
            while offset + 7 <= 1 + byte_count {
                let reference_type = body[offset];
                let file_number = BigEndian::read_u16(&body[offset + 1..offset + 3]);
                let record_number = BigEndian::read_u16(&body[offset + 3..offset + 5]);
                let record_length = BigEndian::read_u16(&body[offset + 5..offset + 7]);
                if reference_type != 0x06 || record_length > 120 {
                    return Err(Exception::IllegalDataValue);
                }
                let data_length = record_length as usize * 2;
                if offset + 7 + data_length > body.len() {
                    return Err(Exception::IllegalDataValue);
                }
                let registers = bytes_to_words(&body[offset + 7..offset + 7 + data_length]);
                writes.push(FileRecordWrite {
                    reference_type,
                    file_number,
                    record_number,
                    registers,
                });
                offset += 7 + data_length;
            }
            if writes.is_empty() {
                return Err(Exception::IllegalDataValue);
            }
            Ok(Request::WriteFileRecord(writes))
        }
        F::MaskWriteRegister => {
            if body.len() < 6 {
                return Err(Exception::IllegalDataValue);
            }
            let address = BigEndian::read_u16(&body[0..2]);
            let and_mask = BigEndian::read_u16(&body[2..4]);
            let or_mask = BigEndian::read_u16(&body[4..6]);
            Ok(Request::MaskWriteRegister(address, and_mask, or_mask))
        }
        F::ReadWriteMultipleRegisters => {
            if body.len() < 9 {
                return Err(Exception::IllegalDataValue);
            }
            let read_address = BigEndian::read_u16(&body[0..2]);
            let read_quantity = BigEndian::read_u16(&body[2..4]);
            let write_address = BigEndian::read_u16(&body[4..6]);
            let write_quantity = BigEndian::read_u16(&body[6..8]);
            let byte_count = body[8] as usize;
            if read_quantity < 1
                || read_quantity > 125
                || write_quantity < 1
                || write_quantity > 121
                || byte_count != write_quantity as usize * 2
            {
                return Err(Exception::IllegalDataValue);
            }
            if body.len() < 9 + byte_count {
                return Err(Exception::IllegalDataValue);
            }
            let registers = bytes_to_words(&body[9..9 + byte_count]);
            Ok(Request::ReadWriteMultipleRegisters(
                read_address,
                read_quantity,
                write_address,
                registers,
            ))
        }
        F::ReadFifoQueue => {
            if body.len() < 2 {
                return Err(Exception::IllegalDataValue);
            }
            let address = BigEndian::read_u16(&body[0..2]);
            Ok(Request::ReadFifoQueue(address))
        }
    }
}

/// Encodes a successful [`Response`] to its wire bytes, including the
/// leading function-code byte.
pub fn encode_response(response: &Response) -> Bytes {
    let mut buf = BytesMut::new();
    match response {
        Response::ReadCoils(coils) | Response::ReadDiscreteInputs(coils) => {
            let fc = if matches!(response, Response::ReadCoils(_)) {
                FunctionCode::ReadCoils
            } else {
                FunctionCode::ReadDiscreteInputs
            };
            let packed = pack_coils(coils);
            buf.put_u8(fc.as_u8());
            buf.put_u8(packed.len() as u8);
            buf.put_slice(&packed);
        }
        Response::ReadHoldingRegisters(regs) | Response::ReadInputRegisters(regs) => {
            let fc = if matches!(response, Response::ReadHoldingRegisters(_)) {
                FunctionCode::ReadHoldingRegisters
            } else {
                FunctionCode::ReadInputRegisters
            };
            let data = words_to_bytes(regs);
            buf.put_u8(fc.as_u8());
            buf.put_u8(data.len() as u8);
            buf.put_slice(&data);
        }
        Response::WriteSingleCoil(address, value) => {
            buf.put_u8(FunctionCode::WriteSingleCoil.as_u8());
            buf.put_u16(*address);
            buf.put_u16(bool_to_coil_word(*value));
        }
        Response::WriteSingleRegister(address, value) => {
            buf.put_u8(FunctionCode::WriteSingleRegister.as_u8());
            buf.put_u16(*address);
            buf.put_u16(*value);
        }
        Response::ReadExceptionStatus(status) => {
            buf.put_u8(FunctionCode::ReadExceptionStatus.as_u8());
            buf.put_u8(*status);
        }
        Response::Diagnostics(sub_function, data) => {
            buf.put_u8(FunctionCode::Diagnostics.as_u8());
            buf.put_u16(*sub_function);
            buf.put_u16(*data);
        }
        Response::GetCommEventCounter { status, event_count } => {
            buf.put_u8(FunctionCode::GetCommEventCounter.as_u8());
            buf.put_u16(*status);
            buf.put_u16(*event_count);
        }
        Response::GetCommEventLog { status, event_count, message_count } => {
            buf.put_u8(FunctionCode::GetCommEventLog.as_u8());
            buf.put_u8(6); // byte count: status + event_count + message_count, no events
            buf.put_u16(*status);
            buf.put_u16(*event_count);
            buf.put_u16(*message_count);
        }
        Response::WriteMultipleCoils(address, quantity)
        | Response::WriteMultipleRegisters(address, quantity) => {
            let fc = if matches!(response, Response::WriteMultipleCoils(..)) {
                FunctionCode::WriteMultipleCoils
            } else {
                FunctionCode::WriteMultipleRegisters
            };
            buf.put_u8(fc.as_u8());
            buf.put_u16(*address);
            buf.put_u16(*quantity);
        }
        Response::ReportSlaveId { id, run_indicator } => {
            buf.put_u8(FunctionCode::ReportSlaveId.as_u8());
            buf.put_u8((id.len() + 1) as u8);
            buf.put_slice(id);
            buf.put_u8(if *run_indicator { 0xFF } else { 0x00 });
        }
        Response::ReadFileRecord(subs) => {
            buf.put_u8(FunctionCode::ReadFileRecord.as_u8());
            let mut body = BytesMut::new();
            for sub in subs {
                let data = words_to_bytes(&sub.registers);
                body.put_u8((data.len() + 1) as u8);
                body.put_u8(sub.reference_type);
                body.put_slice(&data);
            }
            buf.put_u8(body.len() as u8);
            buf.put_slice(&body);
        }
        Response::WriteFileRecord(writes) => {
            buf.put_u8(FunctionCode::WriteFileRecord.as_u8());
            let mut body = BytesMut::new();
            for w in writes {
                body.put_u8(w.reference_type);
                body.put_u16(w.file_number);
                body.put_u16(w.record_number);
                body.put_u16(w.registers.len() as u16);
                body.put_slice(&words_to_bytes(&w.registers));
            }
            buf.put_u8(body.len() as u8);
            buf.put_slice(&body);
        }
        Response::MaskWriteRegister(address, and_mask, or_mask) => {
            buf.put_u8(FunctionCode::MaskWriteRegister.as_u8());
            buf.put_u16(*address);
            buf.put_u16(*and_mask);
            buf.put_u16(*or_mask);
        }
        Response::ReadWriteMultipleRegisters(regs) => {
            let data = words_to_bytes(regs);
            buf.put_u8(FunctionCode::ReadWriteMultipleRegisters.as_u8());
            buf.put_u8(data.len() as u8);
            buf.put_slice(&data);
        }
        Response::ReadFifoQueue(values) => {
            buf.put_u8(FunctionCode::ReadFifoQueue.as_u8());
            buf.put_u16((values.len() as u16 + 1) * 2);
            buf.put_u16(values.len() as u16);
            buf.put_slice(&words_to_bytes(values));
        }
    }
    buf.freeze()
}

/// Encodes an exception response: `function | 0x80`, followed by the
/// one-byte exception code.
pub fn encode_exception(exception: &ExceptionResponse) -> Bytes {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u8(exception.function | 0x80);
    buf.put_u8(exception.exception.code());
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_read_holding_registers() {
        let req = decode_request(FunctionCode::ReadHoldingRegisters, &[0x00, 0x0A, 0x00, 0x02])
            .unwrap();
        assert_eq!(req, Request::ReadHoldingRegisters(10, 2));
    }

    #[test]
    fn decode_read_coils_rejects_zero_quantity() {
        let err = decode_request(FunctionCode::ReadCoils, &[0x00, 0x00, 0x00, 0x00]).unwrap_err();
        assert_eq!(err, Exception::IllegalDataValue);
    }

    #[test]
    fn decode_write_single_coil_rejects_bad_value() {
        let err =
            decode_request(FunctionCode::WriteSingleCoil, &[0x00, 0x14, 0x12, 0x34]).unwrap_err();
        assert_eq!(err, Exception::IllegalDataValue);
    }

    #[test]
    fn encode_read_holding_registers_response() {
        let resp = Response::ReadHoldingRegisters(vec![1234, 5678]);
        let bytes = encode_response(&resp);
        assert_eq!(&bytes[..], &[0x03, 0x04, 0x04, 0xD2, 0x16, 0x2E]);
    }

    #[test]
    fn encode_write_single_register_echo() {
        let resp = Response::WriteSingleRegister(0x14, 0x270F);
        let bytes = encode_response(&resp);
        assert_eq!(&bytes[..], &[0x06, 0x00, 0x14, 0x27, 0x0F]);
    }

    #[test]
    fn encode_fifo_response() {
        let resp = Response::ReadFifoQueue(vec![11, 22, 33, 44, 55]);
        let bytes = encode_response(&resp);
        assert_eq!(
            &bytes[..],
            &[0x18, 0x00, 0x0C, 0x00, 0x05, 0x00, 0x0B, 0x00, 0x16, 0x00, 0x21, 0x00, 0x2C, 0x00, 0x37]
        );
    }

    #[test]
    fn exception_encodes_high_bit_and_code() {
        let exc = ExceptionResponse { function: 0x01, exception: Exception::IllegalDataValue };
        assert_eq!(&encode_exception(&exc)[..], &[0x81, 0x03]);
    }

    #[test]
    fn pack_unpack_coils_roundtrip() {
        let coils = vec![true, false, true, true, false];
        let packed = pack_coils(&coils);
        assert_eq!(packed, vec![0x0D]);
        assert_eq!(&unpack_coils(&packed, coils.len()), &coils);
    }
}
