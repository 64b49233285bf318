// SPDX-FileCopyrightText: Copyright (c) 2017-2022 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Modbus TCP server: one MBAP-framed connection per client, all of them
//! driving the same shared [`Engine`].

use std::{
    io::{self, Error, ErrorKind},
    net::SocketAddr,
    sync::Arc,
};

use futures_util::{future::Future, sink::SinkExt as _, stream::StreamExt as _};
use log::{debug, error, trace};
use socket2::{Domain, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use crate::codec::tcp::{RequestAdu, ResponseAdu, ServerCodec};
use crate::engine::Engine;

#[derive(Debug)]
pub struct Server {
    socket_addr: SocketAddr,
    listener: TcpListener,
}

impl Server {
    /// Binds the listening socket synchronously so a caller can treat a bind
    /// failure (e.g. the port is already in use) as a fatal startup error
    /// rather than discovering it only once the accept loop is spawned.
    pub fn bind(socket_addr: SocketAddr) -> io::Result<Self> {
        let listener = bind(socket_addr)?;
        Ok(Self { socket_addr, listener })
    }

    /// Runs the accept loop until it errors or the caller drops the future.
    pub async fn serve(&self, engine: Arc<Engine>) -> io::Result<()> {
        trace!("Modbus TCP server listening on {}", self.socket_addr);

        loop {
            let (stream, peer) = self.listener.accept().await?;
            let engine = engine.clone();
            tokio::spawn(async move {
                if let Err(err) = process(stream, peer, engine).await {
                    debug!("connection from {peer} closed: {err}");
                }
            });
        }
    }

    /// Runs the accept loop until `shutdown_signal` resolves.
    pub async fn serve_until<Sd>(&self, engine: Arc<Engine>, shutdown_signal: Sd)
    where
        Sd: Future<Output = ()>,
    {
        tokio::select! {
            res = self.serve(engine) => if let Err(err) = res { error!("TCP server error: {err}"); },
            () = shutdown_signal => trace!("TCP server shutdown signal received"),
        }
    }
}

async fn process(stream: TcpStream, peer: SocketAddr, engine: Arc<Engine>) -> io::Result<()> {
    let mut framed = Framed::new(stream, ServerCodec);
    let source = format!("tcp:{peer}");

    while let Some(request) = framed.next().await {
        let RequestAdu { header, pdu } = request?;
        if pdu.is_empty() {
            return Err(Error::new(ErrorKind::InvalidData, "empty PDU"));
        }
        let raw_function = pdu[0];
        let body = &pdu[1..];

        let Some(response_pdu) = engine.handle(header.unit_id, raw_function, body, &source) else {
            continue;
        };
        framed.send(ResponseAdu { header, pdu: response_pdu }).await?;
    }
    Ok(())
}

/// Binds the listening socket with `SO_REUSEADDR` set, and `SO_REUSEPORT`
/// on unix, so a restarted server does not have to wait out `TIME_WAIT`.
fn bind(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => Socket::new(Domain::IPV4, Type::STREAM, None)?,
        SocketAddr::V6(_) => Socket::new(Domain::IPV6, Type::STREAM, None)?,
    };
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;
    TcpListener::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{Datastore, SlaveSizes};
    use crate::notify::Notifier;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn bind_returns_a_server_usable_without_spawning() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = Server::bind(addr).unwrap();
        assert_eq!(server.listener.local_addr().unwrap().ip(), addr.ip());
    }

    #[tokio::test]
    async fn round_trip_over_a_real_socket() {
        let store = Arc::new(Datastore::new(16));
        store.initialize_slave(1, SlaveSizes::default());
        store.write_registers(1, 10, &[1234, 5678], "test").unwrap();
        let engine = Arc::new(Engine::new(store, Notifier::new(4)));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            let _ = process(stream, peer, engine).await;
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        // transaction_id=7, protocol_id=0, length=6, unit_id=1, FC03 read 2 @ 10.
        stream
            .write_all(&[0x00, 0x07, 0x00, 0x00, 0x00, 0x06, 0x01, 0x03, 0x00, 0x0A, 0x00, 0x02])
            .await
            .unwrap();

        let mut response = [0u8; 13];
        stream.read_exact(&mut response).await.unwrap();
        assert_eq!(
            response,
            [0x00, 0x07, 0x00, 0x00, 0x00, 0x07, 0x01, 0x03, 0x04, 0x04, 0xD2, 0x16, 0x2E]
        );
    }
}
