// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Socket abstraction for the scheduler: non-blocking, `mio`-registerable
//! UDP endpoints (PD and MD) plus a pooled TCP-per-peer transport for MD
//! (§4.6). Generalized from a synchronous request/response `Transport`
//! trait (one connection per client) into many non-blocking sockets
//! multiplexed by a single `mio::Poll`.

use crate::error::{Error, Result};
use crate::wire::HEADER_SIZE;
use byteorder::{BigEndian, ByteOrder};
use mio::net::{TcpListener, TcpStream, UdpSocket};
use mio::{Interest, Poll, Token};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

/// One non-blocking UDP socket (PD or MD), registered with the
/// scheduler's `Poll` under a fixed token.
pub struct UdpEndpoint {
    socket: UdpSocket,
    token: Token,
}

impl UdpEndpoint {
    pub fn bind(addr: Ipv4Addr, port: u16, token: Token, poll: &Poll) -> Result<UdpEndpoint> {
        let mut socket = UdpSocket::bind(SocketAddr::V4(SocketAddrV4::new(addr, port)))
            .map_err(|e| Error::SockErr(e.to_string()))?;
        poll.registry()
            .register(&mut socket, token, Interest::READABLE)
            .map_err(|e| Error::SockErr(e.to_string()))?;
        Ok(UdpEndpoint { socket, token })
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn send_to(&self, buf: &[u8], dest: SocketAddr) -> Result<usize> {
        self.socket.send_to(buf, dest).map_err(Error::from)
    }

    /// Drains one datagram. Returns `Ok(None)` on `WouldBlock` (the
    /// caller keeps looping until this happens, per `mio`'s edge-
    /// triggered readiness contract).
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::from(e)),
        }
    }
}

struct PooledConn {
    stream: TcpStream,
    token: Token,
    last_used: Instant,
    /// Bytes read off `stream` not yet assembled into a complete frame
    /// (TCP carries a byte stream, not datagrams — §4.6's MD-over-TCP
    /// path has to do its own framing where UDP gets it for free).
    rbuf: Vec<u8>,
}

/// One non-blocking TCP listener accepting inbound MD-over-TCP
/// connections (§4.5 "`flags.TCP` chooses TCP for this exchange").
/// Accepted streams are handed to a [`TcpPool`] via [`TcpPool::adopt`]
/// so reads/writes to a given peer go through the same pooled entry
/// regardless of which side dialed.
pub struct MdTcpListener {
    listener: TcpListener,
}

impl MdTcpListener {
    pub fn bind(addr: Ipv4Addr, port: u16, token: Token, poll: &Poll) -> Result<MdTcpListener> {
        let mut listener = TcpListener::bind(SocketAddr::V4(SocketAddrV4::new(addr, port)))
            .map_err(|e| Error::SockErr(e.to_string()))?;
        poll.registry()
            .register(&mut listener, token, Interest::READABLE)
            .map_err(|e| Error::SockErr(e.to_string()))?;
        Ok(MdTcpListener { listener })
    }

    /// Accepts one pending connection. Returns `Ok(None)` once nothing
    /// is pending (the caller loops until this happens, same contract
    /// as [`UdpEndpoint::recv_from`]).
    pub fn accept(&self) -> Result<Option<(TcpStream, SocketAddr)>> {
        match self.listener.accept() {
            Ok(pair) => Ok(Some(pair)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(Error::from(e)),
        }
    }
}

/// Pulls one complete `[header][header_fcs][payload][payload_fcs]`
/// frame off the front of `buf` if enough bytes have arrived, using the
/// same length accounting `wire::decode_frame` applies to a whole
/// datagram.
fn try_extract_frame(buf: &mut Vec<u8>) -> Option<Vec<u8>> {
    if buf.len() < HEADER_SIZE + 4 {
        return None;
    }
    let dataset_length = BigEndian::read_u32(&buf[16..20]) as usize;
    let total = HEADER_SIZE + 4 + dataset_length + 4;
    if buf.len() < total {
        return None;
    }
    let frame = buf[..total].to_vec();
    buf.drain(..total);
    Some(frame)
}

/// Pooled TCP-per-peer transport for MD (§4.6): one connection per
/// destination, closed after sitting idle past `idle_timeout`.
pub struct TcpPool {
    conns: HashMap<SocketAddr, PooledConn>,
    next_token: usize,
    token_base: usize,
    idle_timeout: Duration,
}

impl TcpPool {
    pub fn new(token_base: usize, idle_timeout: Duration) -> TcpPool {
        TcpPool {
            conns: HashMap::new(),
            next_token: token_base,
            token_base,
            idle_timeout,
        }
    }

    /// Returns the token of the (possibly newly connected) peer
    /// connection, registering it with `poll` if this is a fresh
    /// connection.
    pub fn connect(&mut self, addr: SocketAddr, poll: &Poll) -> Result<Token> {
        if let Some(conn) = self.conns.get_mut(&addr) {
            conn.last_used = Instant::now();
            return Ok(conn.token);
        }
        let mut stream = TcpStream::connect(addr).map_err(|e| Error::SockErr(e.to_string()))?;
        let token = Token(self.next_token);
        self.next_token += 1;
        poll.registry()
            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
            .map_err(|e| Error::SockErr(e.to_string()))?;
        self.conns.insert(
            addr,
            PooledConn {
                stream,
                token,
                last_used: Instant::now(),
                rbuf: Vec::new(),
            },
        );
        Ok(token)
    }

    /// Adopts a stream this side accepted (rather than dialed) into the
    /// pool under `addr`, so replies to an inbound connection reuse it
    /// instead of dialing back out to an ephemeral client port.
    pub fn adopt(&mut self, addr: SocketAddr, mut stream: TcpStream, poll: &Poll) -> Result<Token> {
        let token = Token(self.next_token);
        self.next_token += 1;
        poll.registry()
            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
            .map_err(|e| Error::SockErr(e.to_string()))?;
        self.conns.insert(
            addr,
            PooledConn {
                stream,
                token,
                last_used: Instant::now(),
                rbuf: Vec::new(),
            },
        );
        Ok(token)
    }

    /// Ensures a connection to `addr` exists (dialing if needed) and
    /// writes one already-encoded frame to it.
    pub fn send_frame(&mut self, addr: SocketAddr, poll: &Poll, frame: &[u8]) -> Result<()> {
        self.connect(addr, poll)?;
        let conn = self.conns.get_mut(&addr).expect("just connected");
        conn.stream.write_all(frame).map_err(Error::from)?;
        conn.last_used = Instant::now();
        Ok(())
    }

    /// Reads whatever is available on every pooled connection and
    /// assembles complete frames out of each one's buffer. Connections
    /// that report EOF or an I/O error are dropped. Mirrors the
    /// drain-until-`WouldBlock` contract the UDP sockets use, since this
    /// pool isn't dispatched by `mio::Token` either (§4.6: every socket
    /// is drained once per iteration, not woken up selectively).
    pub fn drain_frames(&mut self, poll: &Poll) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut out = Vec::new();
        let mut dead = Vec::new();
        let mut tmp = [0u8; 4096];
        for (addr, conn) in self.conns.iter_mut() {
            loop {
                match conn.stream.read(&mut tmp) {
                    Ok(0) => {
                        dead.push(*addr);
                        break;
                    }
                    Ok(n) => {
                        conn.rbuf.extend_from_slice(&tmp[..n]);
                        conn.last_used = Instant::now();
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                    Err(_) => {
                        dead.push(*addr);
                        break;
                    }
                }
            }
            while let Some(frame) = try_extract_frame(&mut conn.rbuf) {
                out.push((*addr, frame));
            }
        }
        for addr in dead {
            if let Some(mut conn) = self.conns.remove(&addr) {
                let _ = poll.registry().deregister(&mut conn.stream);
            }
        }
        out
    }

    pub fn stream_mut(&mut self, addr: SocketAddr) -> Option<&mut TcpStream> {
        self.conns.get_mut(&addr).map(|c| {
            c.last_used = Instant::now();
            &mut c.stream
        })
    }

    pub fn find_by_token(&mut self, token: Token) -> Option<(&SocketAddr, &mut TcpStream)> {
        self.conns
            .iter_mut()
            .find(|(_, c)| c.token == token)
            .map(|(addr, c)| (addr, &mut c.stream))
    }

    /// Drop connections idle past `idle_timeout`, returning how many
    /// were closed.
    pub fn sweep_idle(&mut self, poll: &Poll) -> usize {
        let idle_timeout = self.idle_timeout;
        let stale: Vec<SocketAddr> = self
            .conns
            .iter()
            .filter(|(_, c)| c.last_used.elapsed() > idle_timeout)
            .map(|(addr, _)| *addr)
            .collect();
        for addr in &stale {
            if let Some(mut conn) = self.conns.remove(addr) {
                let _ = poll.registry().deregister(&mut conn.stream);
            }
        }
        stale.len()
    }

    pub fn token_base(&self) -> usize {
        self.token_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn udp_endpoint_loopback_round_trip() {
        let poll = Poll::new().unwrap();
        let a = UdpEndpoint::bind(Ipv4Addr::LOCALHOST, 0, Token(0), &poll).unwrap();
        let b = UdpEndpoint::bind(Ipv4Addr::LOCALHOST, 0, Token(1), &poll).unwrap();
        let b_addr = b.socket.local_addr().unwrap();
        a.send_to(b"hello", b_addr).unwrap();

        let mut events = mio::Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();

        let mut buf = [0u8; 16];
        let (n, _) = b.recv_from(&mut buf).unwrap().expect("datagram available");
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn tcp_pool_reuses_existing_connection() {
        use std::net::TcpListener as StdTcpListener;
        let listener = StdTcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let poll = Poll::new().unwrap();
        let mut pool = TcpPool::new(100, Duration::from_secs(30));
        let first = pool.connect(addr, &poll).unwrap();
        let second = pool.connect(addr, &poll).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn md_tcp_listener_accept_and_pool_round_trip() {
        let poll = Poll::new().unwrap();
        let listener = MdTcpListener::bind(Ipv4Addr::LOCALHOST, 0, Token(0), &poll).unwrap();
        let local_addr = listener.listener.local_addr().unwrap();

        let mut client_pool = TcpPool::new(100, Duration::from_secs(30));
        client_pool.connect(local_addr, &poll).unwrap();

        let mut events = mio::Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();

        let (stream, peer_addr) = listener.accept().unwrap().expect("pending connection");
        let mut server_pool = TcpPool::new(200, Duration::from_secs(30));
        server_pool.adopt(peer_addr, stream, &poll).unwrap();

        let header = crate::wire::FrameHeader {
            sequence: 1,
            protocol_version: 1,
            msg_type: crate::constant::MsgType::Mn,
            com_id: 9001,
            topo_count: 0,
            dataset_length: 4,
            reply_com_id: 0,
            reply_ip_address: 0,
            session: [0u8; 16],
            dst_uri: [0u8; crate::wire::URI_FIELD_SIZE],
        };
        let frame = crate::wire::encode_frame(&header, &[1, 2, 3, 4]).unwrap();
        client_pool.send_frame(local_addr, &poll, &frame).unwrap();

        let mut events = mio::Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(1))).unwrap();

        let received = server_pool.drain_frames(&poll);
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].1, frame);
    }
}
