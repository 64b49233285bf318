// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Protocol data unit types, independent of framing.

pub mod rtu;
pub mod tcp;

use std::{error, fmt};

/// A Modbus function code is represented by an unsigned 8 bit integer.
pub type RawFunctionCode = u8;

/// A Modbus protocol address, 0-based.
pub type Address = u16;

/// A single bit: `true` is `ON` / `0xFF00`, `false` is `OFF` / `0x0000`.
pub type Coil = bool;

/// A 16 bit register value.
pub type Word = u16;

/// Number of items to process.
pub type Quantity = u16;

/// The 1-byte addressing field selecting a slave on a bus or TCP endpoint.
pub type SlaveId = u8;

/// The function codes served by the datastore-backed engine.
///
/// Unknown codes never construct a variant of this enum; they are rejected
/// by [`FunctionCode::from_u8`] before dispatch ever sees them, which keeps
/// the dispatcher an exhaustive match with a single default arm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionCode {
    ReadCoils,
    ReadDiscreteInputs,
    ReadHoldingRegisters,
    ReadInputRegisters,
    WriteSingleCoil,
    WriteSingleRegister,
    ReadExceptionStatus,
    Diagnostics,
    GetCommEventCounter,
    GetCommEventLog,
    WriteMultipleCoils,
    WriteMultipleRegisters,
    ReportSlaveId,
    ReadFileRecord,
    WriteFileRecord,
    MaskWriteRegister,
    ReadWriteMultipleRegisters,
    ReadFifoQueue,
}

impl FunctionCode {
    pub fn from_u8(raw: RawFunctionCode) -> Option<Self> {
        use FunctionCode::*;
        Some(match raw {
            0x01 => ReadCoils,
            0x02 => ReadDiscreteInputs,
            0x03 => ReadHoldingRegisters,
            0x04 => ReadInputRegisters,
            0x05 => WriteSingleCoil,
            0x06 => WriteSingleRegister,
            0x07 => ReadExceptionStatus,
            0x08 => Diagnostics,
            0x0B => GetCommEventCounter,
            0x0C => GetCommEventLog,
            0x0F => WriteMultipleCoils,
            0x10 => WriteMultipleRegisters,
            0x11 => ReportSlaveId,
            0x14 => ReadFileRecord,
            0x15 => WriteFileRecord,
            0x16 => MaskWriteRegister,
            0x17 => ReadWriteMultipleRegisters,
            0x18 => ReadFifoQueue,
            _ => return None,
        })
    }

    pub fn as_u8(self) -> RawFunctionCode {
        use FunctionCode::*;
        match self {
            ReadCoils => 0x01,
            ReadDiscreteInputs => 0x02,
            ReadHoldingRegisters => 0x03,
            ReadInputRegisters => 0x04,
            WriteSingleCoil => 0x05,
            WriteSingleRegister => 0x06,
            ReadExceptionStatus => 0x07,
            Diagnostics => 0x08,
            GetCommEventCounter => 0x0B,
            GetCommEventLog => 0x0C,
            WriteMultipleCoils => 0x0F,
            WriteMultipleRegisters => 0x10,
            ReportSlaveId => 0x11,
            ReadFileRecord => 0x14,
            WriteFileRecord => 0x15,
            MaskWriteRegister => 0x16,
            ReadWriteMultipleRegisters => 0x17,
            ReadFifoQueue => 0x18,
        }
    }
}

/// A single file-record sub-request as carried by FC14/FC15.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecordRequest {
    pub reference_type: u8,
    pub file_number: u16,
    pub record_number: u16,
    pub record_length: u16,
}

/// A single file-record sub-request with its write payload (FC15).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecordWrite {
    pub reference_type: u8,
    pub file_number: u16,
    pub record_number: u16,
    pub registers: Vec<Word>,
}

/// A request body, parsed from the raw bytes following the function code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    ReadCoils(Address, Quantity),
    ReadDiscreteInputs(Address, Quantity),
    ReadHoldingRegisters(Address, Quantity),
    ReadInputRegisters(Address, Quantity),
    WriteSingleCoil(Address, Coil),
    WriteSingleRegister(Address, Word),
    ReadExceptionStatus,
    Diagnostics(u16, u16),
    GetCommEventCounter,
    GetCommEventLog,
    WriteMultipleCoils(Address, Vec<Coil>),
    WriteMultipleRegisters(Address, Vec<Word>),
    ReportSlaveId,
    ReadFileRecord(Vec<FileRecordRequest>),
    WriteFileRecord(Vec<FileRecordWrite>),
    MaskWriteRegister(Address, u16, u16),
    ReadWriteMultipleRegisters(Address, Quantity, Address, Vec<Word>),
    ReadFifoQueue(Address),
}

impl Request {
    pub fn function_code(&self) -> FunctionCode {
        use FunctionCode as F;
        match self {
            Request::ReadCoils(..) => F::ReadCoils,
            Request::ReadDiscreteInputs(..) => F::ReadDiscreteInputs,
            Request::ReadHoldingRegisters(..) => F::ReadHoldingRegisters,
            Request::ReadInputRegisters(..) => F::ReadInputRegisters,
            Request::WriteSingleCoil(..) => F::WriteSingleCoil,
            Request::WriteSingleRegister(..) => F::WriteSingleRegister,
            Request::ReadExceptionStatus => F::ReadExceptionStatus,
            Request::Diagnostics(..) => F::Diagnostics,
            Request::GetCommEventCounter => F::GetCommEventCounter,
            Request::GetCommEventLog => F::GetCommEventLog,
            Request::WriteMultipleCoils(..) => F::WriteMultipleCoils,
            Request::WriteMultipleRegisters(..) => F::WriteMultipleRegisters,
            Request::ReportSlaveId => F::ReportSlaveId,
            Request::ReadFileRecord(..) => F::ReadFileRecord,
            Request::WriteFileRecord(..) => F::WriteFileRecord,
            Request::MaskWriteRegister(..) => F::MaskWriteRegister,
            Request::ReadWriteMultipleRegisters(..) => F::ReadWriteMultipleRegisters,
            Request::ReadFifoQueue(..) => F::ReadFifoQueue,
        }
    }
}

/// A single file-record sub-response (FC14).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecordResponse {
    pub reference_type: u8,
    pub registers: Vec<Word>,
}

/// A successful response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    ReadCoils(Vec<Coil>),
    ReadDiscreteInputs(Vec<Coil>),
    ReadHoldingRegisters(Vec<Word>),
    ReadInputRegisters(Vec<Word>),
    WriteSingleCoil(Address, Coil),
    WriteSingleRegister(Address, Word),
    ReadExceptionStatus(u8),
    Diagnostics(u16, u16),
    GetCommEventCounter { status: u16, event_count: u16 },
    GetCommEventLog { status: u16, event_count: u16, message_count: u16 },
    WriteMultipleCoils(Address, Quantity),
    WriteMultipleRegisters(Address, Quantity),
    ReportSlaveId { id: Vec<u8>, run_indicator: bool },
    ReadFileRecord(Vec<FileRecordResponse>),
    WriteFileRecord(Vec<FileRecordWrite>),
    MaskWriteRegister(Address, u16, u16),
    ReadWriteMultipleRegisters(Vec<Word>),
    ReadFifoQueue(Vec<Word>),
}

/// The narrow exception taxonomy served by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    SlaveDeviceFailure = 0x04,
}

impl Exception {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn description(&self) -> &'static str {
        use Exception::*;
        match self {
            IllegalFunction => "Illegal function",
            IllegalDataAddress => "Illegal data address",
            IllegalDataValue => "Illegal data value",
            SlaveDeviceFailure => "Slave device failure",
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl error::Error for Exception {}

/// A server (slave) exception response, tagged with the function code it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    pub function: RawFunctionCode,
    pub exception: Exception,
}

impl fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Modbus function {}: {}", self.function, self.exception)
    }
}

impl error::Error for ExceptionResponse {}
