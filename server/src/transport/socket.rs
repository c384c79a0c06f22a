//! I/O workers: a receive thread that parses inbound datagrams into
//! `RawDatagram`s and a send thread that writes queued outbound frames to
//! the wire, both bridged to the simulation worker by `crossbeam-channel`
//! mailboxes (§5's "I/O workers... push them into per-peer mailboxes").

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use protocol::MAX_FRAME_BYTES;

/// A datagram as received off the wire, not yet decoded — decoding happens
/// on the simulation worker so a malformed frame's cost is attributed to
/// the tick that drains it, not the I/O thread.
pub struct RawDatagram {
    pub from: SocketAddr,
    pub bytes: Vec<u8>,
}

pub struct OutboundDatagram {
    pub to: SocketAddr,
    pub bytes: Vec<u8>,
}

/// Spawns the receive and send OS threads, returning the channel endpoints
/// the simulation worker uses to drain inbound datagrams and enqueue
/// outbound ones. Both threads run until the socket errors or the process
/// exits; neither ever touches simulation state directly (§5).
pub struct IoWorkers {
    pub inbound_rx: Receiver<RawDatagram>,
    pub outbound_tx: Sender<OutboundDatagram>,
    pub local_addr: SocketAddr,
    recv_handle: Option<JoinHandle<()>>,
    send_handle: Option<JoinHandle<()>>,
}

impl IoWorkers {
    pub fn spawn(socket: UdpSocket) -> std::io::Result<Self> {
        let local_addr = socket.local_addr()?;
        let recv_socket = Arc::new(socket);
        let send_socket = Arc::clone(&recv_socket);

        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded::<RawDatagram>();
        let (outbound_tx, outbound_rx) = crossbeam_channel::unbounded::<OutboundDatagram>();

        let recv_handle = std::thread::Builder::new()
            .name("space-mmo-udp-recv".into())
            .spawn(move || recv_loop(recv_socket, inbound_tx))?;

        let send_handle = std::thread::Builder::new()
            .name("space-mmo-udp-send".into())
            .spawn(move || send_loop(send_socket, outbound_rx))?;

        Ok(Self {
            inbound_rx,
            outbound_tx,
            local_addr,
            recv_handle: Some(recv_handle),
            send_handle: Some(send_handle),
        })
    }
}

impl Drop for IoWorkers {
    fn drop(&mut self) {
        // The threads exit once their socket op errors (e.g. the socket is
        // closed from under them) or the channel's sender/receiver side is
        // dropped; we don't have a cooperative stop signal beyond that, so
        // this just reaps handles that have already finished.
        if let Some(handle) = self.recv_handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
        if let Some(handle) = self.send_handle.take() {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }
    }
}

fn recv_loop(socket: Arc<UdpSocket>, inbound_tx: Sender<RawDatagram>) {
    let mut buf = [0u8; MAX_FRAME_BYTES];
    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, from)) => {
                let datagram = RawDatagram {
                    from,
                    bytes: buf[..len].to_vec(),
                };
                if inbound_tx.send(datagram).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "udp recv failed, stopping receive worker");
                return;
            }
        }
    }
}

fn send_loop(socket: Arc<UdpSocket>, outbound_rx: Receiver<OutboundDatagram>) {
    for datagram in outbound_rx.iter() {
        if let Err(e) = socket.send_to(&datagram.bytes, datagram.to) {
            tracing::warn!(error = %e, to = %datagram.to, "udp send failed");
        }
    }
}
