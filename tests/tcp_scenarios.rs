// SPDX-FileCopyrightText: Copyright (c) 2017-2024 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end TCP server tests: a real socket, the MBAP framing, and the
//! datastore-backed engine all exercised together.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use modbusd::datastore::{Datastore, SlaveSizes};
use modbusd::engine::Engine;
use modbusd::notify::Notifier;
use modbusd::server::tcp::Server;

async fn start_server(engine: Arc<Engine>) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);
    let server = Server::bind(addr)?;
    tokio::spawn(async move {
        let _ = server.serve(engine).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    Ok(addr)
}

fn engine_with_one_slave() -> Arc<Engine> {
    let store = Arc::new(Datastore::new(64));
    store.initialize_slave(1, SlaveSizes::default());
    Arc::new(Engine::new(store, Notifier::new(8)))
}

#[tokio::test]
async fn write_then_read_holding_registers() -> anyhow::Result<()> {
    let addr = start_server(engine_with_one_slave()).await?;
    let mut stream = TcpStream::connect(addr).await?;

    // FC16 write 2 registers at address 10.
    stream
        .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x0B, 0x01, 0x10, 0x00, 0x0A, 0x00, 0x02, 0x04, 0x04, 0xD2, 0x16, 0x2E])
        .await?;
    let mut write_response = [0u8; 12];
    stream.read_exact(&mut write_response).await?;
    assert_eq!(&write_response[6..], &[0x01, 0x10, 0x00, 0x0A, 0x00, 0x02]);

    // FC03 read the same two registers back.
    stream.write_all(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x0A, 0x00, 0x02]).await?;
    let mut read_response = [0u8; 13];
    stream.read_exact(&mut read_response).await?;
    assert_eq!(&read_response[6..], &[0x01, 0x03, 0x04, 0x04, 0xD2, 0x16, 0x2E]);
    Ok(())
}

#[tokio::test]
async fn unknown_slave_id_is_an_exception() -> anyhow::Result<()> {
    let addr = start_server(engine_with_one_slave()).await?;
    let mut stream = TcpStream::connect(addr).await?;

    stream.write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x09, 0x03, 0x00, 0x00, 0x00, 0x01]).await?;
    let mut response = [0u8; 9];
    stream.read_exact(&mut response).await?;
    assert_eq!(&response[6..], &[0x09, 0x83, 0x02]);
    Ok(())
}

#[tokio::test]
async fn unsupported_function_code_is_illegal_function() -> anyhow::Result<()> {
    let addr = start_server(engine_with_one_slave()).await?;
    let mut stream = TcpStream::connect(addr).await?;

    stream.write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x01, 0x2B]).await?;
    let mut response = [0u8; 9];
    stream.read_exact(&mut response).await?;
    assert_eq!(&response[6..], &[0x01, 0xAB, 0x01]);
    Ok(())
}

#[tokio::test]
async fn two_connections_observe_the_same_datastore() -> anyhow::Result<()> {
    let addr = start_server(engine_with_one_slave()).await?;

    let mut writer = TcpStream::connect(addr).await?;
    writer
        .write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x01, 0x06, 0x00, 0x00, 0x00, 0x2A])
        .await?;
    let mut ack = [0u8; 12];
    writer.read_exact(&mut ack).await?;

    let mut reader = TcpStream::connect(addr).await?;
    reader.write_all(&[0x00, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x00, 0x00, 0x01]).await?;
    let mut response = [0u8; 11];
    reader.read_exact(&mut response).await?;
    assert_eq!(&response[6..], &[0x01, 0x03, 0x02, 0x00, 0x2A]);
    Ok(())
}
