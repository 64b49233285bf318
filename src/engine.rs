// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The PDU engine: decodes function-code requests, validates them, drives
//! the datastore, and encodes the response or exception PDU. Holds no
//! state of its own beyond the counters it shares with the datastore;
//! nothing here is transport-aware.

use std::sync::Arc;

use bytes::Bytes;

use crate::codec;
use crate::datastore::{Datastore, ReadError, ResizeRequest, WriteError};
use crate::frame::{
    Exception, ExceptionResponse, FileRecordResponse, FunctionCode, Request, Response, SlaveId,
};
use crate::notify::Notifier;

fn map_read(err: ReadError) -> Exception {
    match err {
        ReadError::NotFound | ReadError::OutOfRange => Exception::IllegalDataAddress,
    }
}

fn map_write(err: WriteError) -> Exception {
    match err {
        WriteError::NotFound | WriteError::OutOfRange => Exception::IllegalDataAddress,
    }
}

/// Function codes whose successful effect mutates the datastore. Only these
/// are eligible for broadcast (unit id 0) dispatch; broadcasts never
/// produce a reply.
fn is_write(function: FunctionCode) -> bool {
    use FunctionCode::*;
    matches!(
        function,
        WriteSingleCoil
            | WriteSingleRegister
            | WriteMultipleCoils
            | WriteMultipleRegisters
            | WriteFileRecord
            | MaskWriteRegister
    )
}

/// The datastore-backed function-code dispatcher.
pub struct Engine {
    datastore: Arc<Datastore>,
    notifier: Notifier,
}

impl Engine {
    #[must_use]
    pub fn new(datastore: Arc<Datastore>, notifier: Notifier) -> Self {
        Self { datastore, notifier }
    }

    #[must_use]
    pub fn datastore(&self) -> &Arc<Datastore> {
        &self.datastore
    }

    /// Services one request. Returns `None` only for a broadcast write,
    /// which the transport must not reply to; every unicast request always
    /// yields a response PDU, normal or exception.
    #[must_use]
    pub fn handle(&self, slave_id: SlaveId, raw_function: u8, body: &[u8], source: &str) -> Option<Bytes> {
        let outcome = self.dispatch(slave_id, raw_function, body, source);
        let success = !matches!(outcome, Err(_));
        self.datastore.record_request(raw_function, success);
        match outcome {
            Ok(None) => None,
            Ok(Some(response)) => Some(codec::encode_response(&response)),
            Err(exception) => Some(codec::encode_exception(&ExceptionResponse {
                function: raw_function,
                exception,
            })),
        }
    }

    fn dispatch(
        &self,
        slave_id: SlaveId,
        raw_function: u8,
        body: &[u8],
        source: &str,
    ) -> Result<Option<Response>, Exception> {
        let function = FunctionCode::from_u8(raw_function).ok_or(Exception::IllegalFunction)?;
        let request = codec::decode_request(function, body)?;

        if slave_id == 0 && is_write(function) {
            self.dispatch_broadcast(&request, source);
            return Ok(None);
        }

        self.dispatch_unicast(slave_id, request, source).map(Some)
    }

    /// Applies a write to every known slave independently; a slave for
    /// which the write would be out of range is silently skipped so one
    /// undersized slave cannot block the others.
    fn dispatch_broadcast(&self, request: &Request, source: &str) {
        for slave_id in self.datastore.slave_ids() {
            let _ = self.apply_write(slave_id, request, source);
        }
        self.notifier.notify();
    }

    fn apply_write(&self, slave_id: SlaveId, request: &Request, source: &str) -> Result<(), Exception> {
        match request {
            Request::WriteSingleCoil(address, value) => self
                .datastore
                .write_coil(slave_id, *address, *value, source)
                .map_err(map_write),
            Request::WriteSingleRegister(address, value) => self
                .datastore
                .write_register(slave_id, *address, *value, source)
                .map_err(map_write),
            Request::WriteMultipleCoils(address, values) => self
                .datastore
                .write_coils(slave_id, *address, values, source)
                .map_err(map_write),
            Request::WriteMultipleRegisters(address, values) => self
                .datastore
                .write_registers(slave_id, *address, values, source)
                .map_err(map_write),
            Request::MaskWriteRegister(address, and_mask, or_mask) => {
                self.mask_write(slave_id, *address, *and_mask, *or_mask, source).map(|_| ())
            }
            Request::WriteFileRecord(writes) => {
                for write in writes {
                    let start = file_record_address(write.file_number, write.record_number);
                    self.datastore
                        .write_registers(slave_id, start, &write.registers, source)
                        .map_err(map_write)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn mask_write(
        &self,
        slave_id: SlaveId,
        address: u16,
        and_mask: u16,
        or_mask: u16,
        source: &str,
    ) -> Result<u16, Exception> {
        let current = self
            .datastore
            .read_holding_registers(slave_id, address, 1)
            .map_err(map_read)?[0];
        let new_value = (current & and_mask) | (or_mask & !and_mask);
        self.datastore
            .write_register(slave_id, address, new_value, source)
            .map_err(map_write)?;
        Ok(new_value)
    }

    fn dispatch_unicast(&self, slave_id: SlaveId, request: Request, source: &str) -> Result<Response, Exception> {
        if !self.datastore.has_slave(slave_id) {
            return Err(Exception::IllegalDataAddress);
        }
        let response = match request {
            Request::ReadCoils(address, quantity) => Response::ReadCoils(
                self.datastore.read_coils(slave_id, address, quantity).map_err(map_read)?,
            ),
            Request::ReadDiscreteInputs(address, quantity) => Response::ReadDiscreteInputs(
                self.datastore
                    .read_discrete_inputs(slave_id, address, quantity)
                    .map_err(map_read)?,
            ),
            Request::ReadHoldingRegisters(address, quantity) => Response::ReadHoldingRegisters(
                self.datastore
                    .read_holding_registers(slave_id, address, quantity)
                    .map_err(map_read)?,
            ),
            Request::ReadInputRegisters(address, quantity) => Response::ReadInputRegisters(
                self.datastore
                    .read_input_registers(slave_id, address, quantity)
                    .map_err(map_read)?,
            ),
            Request::WriteSingleCoil(address, value) => {
                self.datastore.write_coil(slave_id, address, value, source).map_err(map_write)?;
                Response::WriteSingleCoil(address, value)
            }
            Request::WriteSingleRegister(address, value) => {
                self.datastore
                    .write_register(slave_id, address, value, source)
                    .map_err(map_write)?;
                Response::WriteSingleRegister(address, value)
            }
            Request::ReadExceptionStatus => Response::ReadExceptionStatus(0x00),
            Request::Diagnostics(sub_function, data) => Response::Diagnostics(sub_function, data),
            Request::GetCommEventCounter => {
                let stats = self.datastore.stats();
                Response::GetCommEventCounter {
                    status: 0xFFFF,
                    event_count: (stats.total_requests & 0xFFFF) as u16,
                }
            }
            Request::GetCommEventLog => {
                let stats = self.datastore.stats();
                Response::GetCommEventLog {
                    status: 0xFFFF,
                    event_count: (stats.total_requests & 0xFFFF) as u16,
                    message_count: (stats.successful_requests & 0xFFFF) as u16,
                }
            }
            Request::WriteMultipleCoils(address, values) => {
                let quantity = values.len() as u16;
                self.datastore
                    .write_coils(slave_id, address, &values, source)
                    .map_err(map_write)?;
                Response::WriteMultipleCoils(address, quantity)
            }
            Request::WriteMultipleRegisters(address, values) => {
                let quantity = values.len() as u16;
                self.datastore
                    .write_registers(slave_id, address, &values, source)
                    .map_err(map_write)?;
                Response::WriteMultipleRegisters(address, quantity)
            }
            Request::ReportSlaveId => Response::ReportSlaveId {
                id: format!("Modbus Slave {slave_id}").into_bytes(),
                run_indicator: true,
            },
            Request::ReadFileRecord(subs) => {
                let mut responses = Vec::with_capacity(subs.len());
                for sub in &subs {
                    let start = file_record_address(sub.file_number, sub.record_number);
                    let registers = self
                        .datastore
                        .read_holding_registers(slave_id, start, sub.record_length)
                        .map_err(map_read)?;
                    responses.push(FileRecordResponse { reference_type: sub.reference_type, registers });
                }
                Response::ReadFileRecord(responses)
            }
            Request::WriteFileRecord(writes) => {
                for write in &writes {
                    let start = file_record_address(write.file_number, write.record_number);
                    self.datastore
                        .write_registers(slave_id, start, &write.registers, source)
                        .map_err(map_write)?;
                }
                Response::WriteFileRecord(writes)
            }
            Request::MaskWriteRegister(address, and_mask, or_mask) => {
                self.mask_write(slave_id, address, and_mask, or_mask, source)?;
                Response::MaskWriteRegister(address, and_mask, or_mask)
            }
            Request::ReadWriteMultipleRegisters(read_address, read_quantity, write_address, values) => {
                // The write half commits before the read half, so a client
                // may observe its own write when the ranges overlap.
                self.datastore
                    .write_registers(slave_id, write_address, &values, source)
                    .map_err(map_write)?;
                let read_values = self
                    .datastore
                    .read_holding_registers(slave_id, read_address, read_quantity)
                    .map_err(map_read)?;
                Response::ReadWriteMultipleRegisters(read_values)
            }
            Request::ReadFifoQueue(address) => {
                let count = self
                    .datastore
                    .read_holding_registers(slave_id, address, 1)
                    .map_err(map_read)?[0]
                    .min(31);
                let values = if count == 0 {
                    Vec::new()
                } else {
                    self.datastore
                        .read_holding_registers(slave_id, address + 1, count)
                        .map_err(map_read)?
                };
                Response::ReadFifoQueue(values)
            }
        };
        self.notifier.notify();
        Ok(response)
    }

    /// Resizes a slave's arrays, notifying subscribers of the change.
    pub fn resize_slave(&self, slave_id: SlaveId, resize: ResizeRequest) -> bool {
        let ok = self.datastore.resize_slave(slave_id, resize);
        if ok {
            self.notifier.notify();
        }
        ok
    }
}

/// File records are mapped onto the holding-register array at
/// `file_number * 10000 + record_number`.
fn file_record_address(file_number: u16, record_number: u16) -> u16 {
    (file_number as u32 * 10_000 + record_number as u32) as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::SlaveSizes;

    fn engine_with_slave() -> Engine {
        let store = Arc::new(Datastore::new(crate::datastore::DEFAULT_HISTORY_SIZE));
        store.initialize_slave(1, SlaveSizes::default());
        Engine::new(store, Notifier::new(16))
    }

    #[test]
    fn unknown_function_code_is_illegal_function() {
        let engine = engine_with_slave();
        let response = engine.handle(1, 0x99, &[], "test").unwrap();
        assert_eq!(&response[..], &[0x99 | 0x80, 0x01]);
    }

    #[test]
    fn read_holding_registers_scenario() {
        let engine = engine_with_slave();
        engine.handle(1, 0x10, &[0x00, 0x0A, 0x00, 0x02, 0x04, 0x04, 0xD2, 0x16, 0x2E], "test");
        let response = engine.handle(1, 0x03, &[0x00, 0x0A, 0x00, 0x02], "test").unwrap();
        assert_eq!(&response[..], &[0x03, 0x04, 0x04, 0xD2, 0x16, 0x2E]);
    }

    #[test]
    fn mask_write_scenario() {
        let engine = engine_with_slave();
        engine.handle(1, 0x06, &[0x00, 0x28, 0x00, 0x12], "test");
        let response = engine.handle(1, 0x16, &[0x00, 0x28, 0x00, 0xF2, 0x00, 0x25], "test").unwrap();
        assert_eq!(&response[..], &[0x16, 0x00, 0x28, 0x00, 0xF2, 0x00, 0x25]);
        let check = engine.handle(1, 0x03, &[0x00, 0x28, 0x00, 0x01], "test").unwrap();
        assert_eq!(&check[..], &[0x03, 0x02, 0x00, 0x17]);
    }

    #[test]
    fn broadcast_write_produces_no_reply_and_updates_all_slaves() {
        let store = Arc::new(Datastore::new(crate::datastore::DEFAULT_HISTORY_SIZE));
        store.initialize_slave(1, SlaveSizes::default());
        store.initialize_slave(2, SlaveSizes::default());
        let engine = Engine::new(store.clone(), Notifier::new(16));
        let response = engine.handle(0, 0x06, &[0x00, 0x00, 0x00, 0x2A], "test");
        assert!(response.is_none());
        assert_eq!(store.read_holding_registers(1, 0, 1).unwrap(), vec![42]);
        assert_eq!(store.read_holding_registers(2, 0, 1).unwrap(), vec![42]);
    }

    #[test]
    fn broadcast_read_is_illegal_data_address() {
        let engine = engine_with_slave();
        let response = engine.handle(0, 0x03, &[0x00, 0x00, 0x00, 0x01], "test").unwrap();
        assert_eq!(&response[..], &[0x83, 0x02]);
    }

    #[test]
    fn read_count_zero_is_illegal_data_value() {
        let engine = engine_with_slave();
        let response = engine.handle(1, 0x01, &[0x00, 0x00, 0x00, 0x00], "test").unwrap();
        assert_eq!(&response[..], &[0x81, 0x03]);
    }

    #[test]
    fn fifo_read_scenario() {
        let engine = engine_with_slave();
        engine.handle(
            1,
            0x10,
            &[0x00, 0x50, 0x00, 0x06, 0x0C, 0x00, 0x05, 0x00, 0x0B, 0x00, 0x16, 0x00, 0x21, 0x00, 0x2C, 0x00, 0x37],
            "test",
        );
        let response = engine.handle(1, 0x18, &[0x00, 0x50], "test").unwrap();
        assert_eq!(
            &response[..],
            &[0x18, 0x00, 0x0C, 0x00, 0x05, 0x00, 0x0B, 0x00, 0x16, 0x00, 0x21, 0x00, 0x2C, 0x00, 0x37]
        );
    }
}
