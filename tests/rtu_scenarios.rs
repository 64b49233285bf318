// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTU framing and dispatch, exercised end-to-end without a real serial
//! port: build a frame, hand it to the engine the way `server::rtu` does,
//! and check the wire bytes that come back.

use std::sync::Arc;

use modbusd::codec::rtu::{calc_crc, encode_frame, parse_frame};
use modbusd::datastore::{Datastore, SlaveSizes};
use modbusd::engine::Engine;
use modbusd::notify::Notifier;

fn engine_with_slaves(ids: &[u8]) -> Arc<Engine> {
    let store = Arc::new(Datastore::new(64));
    for &id in ids {
        store.initialize_slave(id, SlaveSizes::default());
    }
    Arc::new(Engine::new(store, Notifier::new(8)))
}

#[test]
fn crc_matches_known_vectors() {
    assert_eq!(calc_crc(&[0x01, 0x03, 0x08, 0x2B, 0x00, 0x02]), 0xB663);
    assert_eq!(calc_crc(&[0x01, 0x03, 0x04, 0x00, 0x20, 0x00, 0x00]), 0xFBF9);
}

#[test]
fn crc_of_frame_plus_its_own_crc_is_zero() {
    let frame = encode_frame(0x01, &[0x03, 0x00, 0x0A, 0x00, 0x02]);
    assert_eq!(calc_crc(&frame), 0);
}

#[test]
fn unicast_read_round_trips_over_the_wire_envelope() {
    let engine = engine_with_slaves(&[0x11]);
    engine.handle(0x11, 0x10, &[0x00, 0x00, 0x00, 0x02, 0x04, 0x00, 0x07, 0x00, 0x08], "rtu");

    let request = encode_frame(0x11, &[0x03, 0x00, 0x00, 0x00, 0x02]);
    let (slave_id, pdu) = parse_frame(&request).unwrap();
    let response_pdu = engine.handle(slave_id, pdu[0], &pdu[1..], "rtu").unwrap();
    let response_frame = encode_frame(slave_id, &response_pdu);

    let (echoed_slave, echoed_pdu) = parse_frame(&response_frame).unwrap();
    assert_eq!(echoed_slave, 0x11);
    assert_eq!(&echoed_pdu[..], &[0x03, 0x04, 0x00, 0x07, 0x00, 0x08]);
}

#[test]
fn broadcast_write_has_no_frame_to_send() {
    let engine = engine_with_slaves(&[0x01, 0x02]);
    let request = encode_frame(0x00, &[0x06, 0x00, 0x00, 0x00, 0x2A]);
    let (slave_id, pdu) = parse_frame(&request).unwrap();
    assert!(engine.handle(slave_id, pdu[0], &pdu[1..], "rtu").is_none());
}

#[test]
fn corrupted_crc_is_rejected_before_reaching_the_engine() {
    let mut frame = encode_frame(0x01, &[0x03, 0x00, 0x00, 0x00, 0x01]).to_vec();
    *frame.last_mut().unwrap() ^= 0xFF;
    assert!(parse_frame(&frame).is_none());
}
