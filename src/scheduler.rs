// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The scheduler (component F, §4.6): one thread multiplexing both
//! subnets over a single `mio::Poll`, subnet-1-then-2 processing order,
//! nearest-deadline wait capped at 100 ms, and write-subnet failover.

use crate::constant::{MD_PORT, MsgType, PD_PORT, SCHEDULER_MAX_WAIT_MICROS, SubnetId, WriteSubnet};
use crate::dataset::DatasetMap;
use crate::error::Result;
use crate::md::{self, MdReceiver, MdResult, MdSessionTable};
use crate::net::{self, UdpEndpoint};
use crate::pd::{self, PdReceiver};
use crate::registry::{Handle, Registry};
use crate::store::TrafficStore;
use crate::wire::{self, FrameHeader, decode_frame, encode_frame};
use mio::{Events, Poll, Token, Waker};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};
use uuid::Uuid;

const PD_TOKEN_SUBNET1: Token = Token(0);
const PD_TOKEN_SUBNET2: Token = Token(1);
const MD_TOKEN_SUBNET1: Token = Token(2);
const MD_TOKEN_SUBNET2: Token = Token(3);
const WAKER_TOKEN: Token = Token(4);
const MD_TCP_LISTENER_SUBNET1: Token = Token(5);
const MD_TCP_LISTENER_SUBNET2: Token = Token(6);
/// First token handed out to subnet 1's MD `TcpPool`. Subnet 2's pool
/// starts 1000 tokens later, which is more headroom than any single
/// subnet is expected to need simultaneous connections for; there's no
/// central token allocator, so the two bases are just kept far enough
/// apart not to collide.
const TCP_TOKEN_BASE: usize = 16;
const TCP_TOKEN_BASE_SUBNET2: usize = TCP_TOKEN_BASE + 1000;
/// Drop a pooled MD-over-TCP connection after sitting idle this long.
const MD_TCP_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Which transport an inbound MD frame arrived over, so an auto-emitted
/// `Mc` confirm can go back out the same way (§4.5). A TCP peer's
/// `SocketAddr` carries an ephemeral client port, not `MD_PORT`, so it
/// has to be threaded through rather than re-derived from `src_ip`.
#[derive(Debug, Clone, Copy)]
enum MdOrigin {
    Udp,
    Tcp(std::net::SocketAddr),
}

/// Reports whether a subnet's link is currently considered up. A toy
/// abstraction over whatever the host network stack exposes; §4.6 only
/// requires that the scheduler observe it once per iteration.
pub trait LinkStatus: Send + Sync {
    fn is_up(&self, subnet: SubnetId) -> bool;
}

/// Always-up link status, used where no failure injection is needed.
pub struct AlwaysUp;

impl LinkStatus for AlwaysUp {
    fn is_up(&self, _subnet: SubnetId) -> bool {
        true
    }
}

/// Emits the `Subnet1 Link Down. Change Receive Subnet`-style events of
/// §4.6's ordering guarantees, independent of the `DebugCb`/`tracing`
/// diagnostic path so tests can assert on it directly.
pub trait SchedulerLog: Send + Sync {
    fn event(&self, message: &str);
}

pub struct TracingLog;

impl SchedulerLog for TracingLog {
    fn event(&self, message: &str) {
        tracing::info!(target: "trdp_core::scheduler", "{}", message);
    }
}

/// Per-subnet UDP sockets for PD and MD, plus the pooled TCP transport
/// MD exchanges configured with `flags.TCP` use instead (§4.5).
struct SubnetSockets {
    /// This subnet's own bound address, used as the "destination
    /// address" a subscriber's/replier's `dstIP` filter is checked
    /// against (§4.3) — `recv_from` only exposes the sender's address,
    /// not which local address the datagram was sent to.
    host_ip: u32,
    pd: UdpEndpoint,
    md: UdpEndpoint,
    md_tcp_listener: net::MdTcpListener,
    md_tcp: net::TcpPool,
}

/// Shared runtime state the scheduler thread and the façade both hold
/// (SPEC_FULL.md §2's "Runtime context").
pub struct Context {
    pub store: TrafficStore,
    pub registry: Mutex<Registry>,
    pub dataset_map: DatasetMap,
    pub topo_count: AtomicU32,
    pub sequence: AtomicU32,
    pub pd_receiver: Mutex<Option<Box<dyn PdReceiver>>>,
    pub md_sessions: Mutex<MdSessionTable>,
    pub md_receiver: Mutex<Option<Box<dyn MdReceiver>>>,
    /// Outbound MD frames enqueued by `taul.rs` API calls. Per §5's
    /// resource table ("Sockets: core, Scheduler only"), application
    /// threads never touch a socket directly; they push here and wake
    /// the scheduler, which performs the actual `send_to` on its own
    /// thread on the next iteration.
    pub md_outbox: Mutex<VecDeque<(SubnetId, u32, Vec<u8>, bool)>>,
}

impl Context {
    pub fn new(dataset_map: DatasetMap, max_md_sessions: usize) -> Context {
        Context {
            store: TrafficStore::new(),
            registry: Mutex::new(Registry::new()),
            dataset_map,
            topo_count: AtomicU32::new(0),
            sequence: AtomicU32::new(0),
            pd_receiver: Mutex::new(None),
            md_sessions: Mutex::new(MdSessionTable::new(max_md_sessions)),
            md_receiver: Mutex::new(None),
            md_outbox: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueue an already-encoded MD frame for the scheduler to send on
    /// `subnet` over UDP or, if `use_tcp` is set, the subnet's pooled
    /// TCP transport (§4.5's `flags.TCP`). Exposed so `taul.rs` never
    /// needs to reach past `Context` into scheduler internals.
    pub fn enqueue_md(&self, subnet: SubnetId, dest_ip: u32, frame: Vec<u8>, use_tcp: bool) {
        self.md_outbox.lock().push_back((subnet, dest_ip, frame, use_tcp));
    }

    pub fn next_sequence(&self) -> u32 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn topo_count(&self) -> u32 {
        self.topo_count.load(Ordering::Relaxed)
    }
}

/// The scheduler thread's handle: a stop flag and the `Waker` used to
/// unblock the poll immediately on `terminate()` or an application-
/// triggered MD send (§4.7, §5 "Cancellation").
pub struct SchedulerHandle {
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl SchedulerHandle {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.waker.wake();
    }

    pub fn wake(&self) {
        let _ = self.waker.wake();
    }
}

/// Builds the poll, registers both subnets' sockets, and runs the
/// iteration loop described by §4.6 until `stop()` is called. Intended
/// to run on its own thread, spawned once by `taul::init`.
pub fn run(
    context: Arc<Context>,
    host_ip_subnet1: Ipv4Addr,
    host_ip_subnet2: Ipv4Addr,
    link: Arc<dyn LinkStatus>,
    log: Arc<dyn SchedulerLog>,
) -> Result<SchedulerHandle> {
    let poll = Poll::new().map_err(|e| crate::error::Error::SockErr(e.to_string()))?;
    let waker = Arc::new(
        Waker::new(poll.registry(), WAKER_TOKEN).map_err(|e| crate::error::Error::SockErr(e.to_string()))?,
    );
    let stop = Arc::new(AtomicBool::new(false));

    let subnet1 = SubnetSockets {
        host_ip: u32::from(host_ip_subnet1),
        pd: UdpEndpoint::bind(host_ip_subnet1, PD_PORT, PD_TOKEN_SUBNET1, &poll)?,
        md: UdpEndpoint::bind(host_ip_subnet1, MD_PORT, MD_TOKEN_SUBNET1, &poll)?,
        md_tcp_listener: net::MdTcpListener::bind(
            host_ip_subnet1,
            MD_PORT,
            MD_TCP_LISTENER_SUBNET1,
            &poll,
        )?,
        md_tcp: net::TcpPool::new(TCP_TOKEN_BASE, MD_TCP_IDLE_TIMEOUT),
    };
    let subnet2 = SubnetSockets {
        host_ip: u32::from(host_ip_subnet2),
        pd: UdpEndpoint::bind(host_ip_subnet2, PD_PORT, PD_TOKEN_SUBNET2, &poll)?,
        md: UdpEndpoint::bind(host_ip_subnet2, MD_PORT, MD_TOKEN_SUBNET2, &poll)?,
        md_tcp_listener: net::MdTcpListener::bind(
            host_ip_subnet2,
            MD_PORT,
            MD_TCP_LISTENER_SUBNET2,
            &poll,
        )?,
        md_tcp: net::TcpPool::new(TCP_TOKEN_BASE_SUBNET2, MD_TCP_IDLE_TIMEOUT),
    };

    let handle = SchedulerHandle {
        stop: stop.clone(),
        waker: waker.clone(),
    };

    let thread_stop = stop;
    std::thread::Builder::new()
        .name("trdp-scheduler".into())
        .spawn(move || {
            scheduler_loop(context, poll, subnet1, subnet2, thread_stop, link, log);
        })
        .map_err(|_| crate::error::Error::ThreadErr)?;

    Ok(handle)
}

fn scheduler_loop(
    context: Arc<Context>,
    mut poll: Poll,
    mut subnet1: SubnetSockets,
    mut subnet2: SubnetSockets,
    stop: Arc<AtomicBool>,
    link: Arc<dyn LinkStatus>,
    log: Arc<dyn SchedulerLog>,
) {
    let mut events = Events::with_capacity(64);
    let mut recv_buf = [0u8; 8192];

    loop {
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let now = Instant::now();
        let wait = nearest_wait(&context, now);
        if poll.poll(&mut events, Some(wait)).is_err() {
            continue;
        }
        if stop.load(Ordering::SeqCst) {
            break;
        }

        process_subnet(&context, &mut subnet1, SubnetId::Subnet1, now, &mut recv_buf, &poll);
        process_subnet(&context, &mut subnet2, SubnetId::Subnet2, now, &mut recv_buf, &poll);

        check_pd_timeouts(&context, now);

        retire_md_timeouts(&context);
        context.md_sessions.lock().sweep_done();

        subnet1.md_tcp.sweep_idle(&poll);
        subnet2.md_tcp.sweep_idle(&poll);

        reconcile_write_subnet(&context, link.as_ref(), log.as_ref());
    }
}

/// §4.6 step 1/2: nearest deadline across publishers and pull-requesters,
/// bounded above by `SCHEDULER_MAX_WAIT_MICROS`.
fn nearest_wait(context: &Context, now: Instant) -> Duration {
    let cap = Duration::from_micros(SCHEDULER_MAX_WAIT_MICROS);
    let registry = context.registry.lock();
    let nearest = registry
        .publishers()
        .map(|(_, t)| t.next_cycle_deadline)
        .chain(registry.pull_requesters().map(|(_, t)| t.next_request_deadline))
        .min();
    match nearest {
        Some(deadline) if deadline > now => std::cmp::min(deadline - now, cap),
        Some(_) => Duration::from_micros(0),
        None => cap,
    }
}

/// §4.6 step 3: for one subnet, send overdue PD then drain its sockets.
/// Subnet 1 is always called before subnet 2 by `scheduler_loop`, which
/// is the tie-break rule for deterministic ordering.
fn process_subnet(
    context: &Context,
    sockets: &mut SubnetSockets,
    subnet: SubnetId,
    now: Instant,
    recv_buf: &mut [u8],
    poll: &Poll,
) {
    send_due_pd(context, sockets, subnet, now);
    drain_pd_socket(context, sockets, now, recv_buf);
    drain_md_outbox(context, sockets, subnet, poll);
    drain_md_socket(context, sockets, now, recv_buf, poll);
    accept_md_tcp(sockets, poll);
    drain_md_tcp_frames(context, sockets, poll, now);
}

/// Sends every frame `taul.rs` enqueued for this subnet since the last
/// iteration (§5: only the scheduler thread ever touches a socket),
/// over UDP or the pooled TCP transport per the frame's `use_tcp` flag
/// (§4.5's `flags.TCP`).
fn drain_md_outbox(context: &Context, sockets: &mut SubnetSockets, subnet: SubnetId, poll: &Poll) {
    let mut pending = Vec::new();
    {
        let mut outbox = context.md_outbox.lock();
        let mut remaining = VecDeque::new();
        for entry in outbox.drain(..) {
            if entry.0 == subnet {
                pending.push(entry);
            } else {
                remaining.push_back(entry);
            }
        }
        *outbox = remaining;
    }
    for (_, dest_ip, frame, use_tcp) in pending {
        let dest = ipv4_socket_addr(dest_ip, MD_PORT);
        if use_tcp {
            let _ = sockets.md_tcp.send_frame(dest, poll, &frame);
        } else {
            let _ = sockets.md.send_to(&frame, dest);
        }
    }
}

/// Accepts every pending inbound MD-over-TCP connection into the pool
/// so later `send_frame`/`drain_frames` calls can reuse it.
fn accept_md_tcp(sockets: &mut SubnetSockets, poll: &Poll) {
    loop {
        match sockets.md_tcp_listener.accept() {
            Ok(Some((stream, addr))) => {
                let _ = sockets.md_tcp.adopt(addr, stream, poll);
            }
            Ok(None) | Err(_) => break,
        }
    }
}

/// Drains every pooled TCP connection's buffered frames and dispatches
/// each one exactly as a UDP-received MD frame would be.
fn drain_md_tcp_frames(context: &Context, sockets: &mut SubnetSockets, poll: &Poll, now: Instant) {
    let frames = sockets.md_tcp.drain_frames(poll);
    for (addr, raw) in frames {
        let src_ip = match addr.ip() {
            std::net::IpAddr::V4(v4) => u32::from(v4),
            std::net::IpAddr::V6(_) => continue,
        };
        let decoded = match decode_frame(&raw) {
            Ok(d) => d,
            Err(_) => continue,
        };
        let session_id = Uuid::from_bytes(decoded.header.session);
        dispatch_md_frame(
            context,
            sockets,
            &decoded.header,
            session_id,
            src_ip,
            now,
            poll,
            MdOrigin::Tcp(addr),
        );
    }
}

fn send_due_pd(context: &Context, sockets: &SubnetSockets, subnet: SubnetId, now: Instant) {
    let due = {
        let registry = context.registry.lock();
        pd::due_publishers(&registry, now)
            .into_iter()
            .filter(|h| registry.publisher(*h).map(|t| t.subnet == subnet).unwrap_or(false))
            .collect::<Vec<_>>()
    };

    for handle in due {
        let sequence = context.sequence.fetch_add(1, Ordering::Relaxed);
        let topo_count = context.topo_count.load(Ordering::Relaxed);
        let frame = {
            let mut registry = context.registry.lock();
            pd::emit_publisher(handle, &mut registry, &context.store, &context.dataset_map, sequence, topo_count, now)
        };
        let frame = match frame {
            Ok(f) => f,
            Err(_) => continue,
        };
        let dest_ip = {
            let registry = context.registry.lock();
            registry.publisher(handle).map(|t| t.dest_ip).unwrap_or(0)
        };
        let addr = ipv4_socket_addr(dest_ip, PD_PORT);
        let _ = sockets.pd.send_to(&frame, addr);
    }
}

fn drain_pd_socket(context: &Context, sockets: &SubnetSockets, now: Instant, recv_buf: &mut [u8]) {
    loop {
        let received = match sockets.pd.recv_from(recv_buf) {
            Ok(Some((n, addr))) => (n, addr),
            Ok(None) => break,
            Err(_) => break,
        };
        let (n, addr) = received;
        let src_ip = match addr.ip() {
            std::net::IpAddr::V4(v4) => u32::from(v4),
            std::net::IpAddr::V6(_) => continue,
        };
        let handle = {
            let mut registry = context.registry.lock();
            pd::receive_pd(&recv_buf[..n], src_ip, sockets.host_ip, &mut registry, &context.store, &context.dataset_map, now)
        };
        if let Ok(handle) = handle {
            let com_id = {
                let registry = context.registry.lock();
                registry.subscriber(handle).map(|t| t.com_id).unwrap_or(0)
            };
            if let Some(receiver) = context.pd_receiver.lock().as_mut() {
                receiver.on_pd(handle, com_id, pd::PdResult::Ok);
            }
        }
    }
}

/// Drains one subnet's MD socket and dispatches each frame through the
/// Notify/Request/Reply/ReplyQuery/Confirm state machine (§4.5),
/// auto-emitting `Mc` immediately on receipt of a matching `Mq` (S3).
fn drain_md_socket(context: &Context, sockets: &mut SubnetSockets, now: Instant, recv_buf: &mut [u8], poll: &Poll) {
    loop {
        let (n, addr) = match sockets.md.recv_from(recv_buf) {
            Ok(Some(pair)) => pair,
            Ok(None) => break,
            Err(_) => break,
        };
        let src_ip = match addr.ip() {
            std::net::IpAddr::V4(v4) => u32::from(v4),
            std::net::IpAddr::V6(_) => continue,
        };
        let decoded = match decode_frame(&recv_buf[..n]) {
            Ok(d) => d,
            Err(_) => continue,
        };
        let session_id = Uuid::from_bytes(decoded.header.session);
        dispatch_md_frame(context, sockets, &decoded.header, session_id, src_ip, now, poll, MdOrigin::Udp);
    }
}

#[allow(clippy::too_many_arguments)]
fn dispatch_md_frame(
    context: &Context,
    sockets: &mut SubnetSockets,
    header: &FrameHeader,
    session_id: Uuid,
    src_ip: u32,
    now: Instant,
    poll: &Poll,
    origin: MdOrigin,
) {
    match header.msg_type {
        MsgType::Mn => {
            if let Some(receiver) = context.md_receiver.lock().as_mut() {
                receiver.on_request(session_id, header.com_id, 0);
            }
        }
        MsgType::Mr => {
            let dst_uri = wire::decode_uri(&header.dst_uri);
            let reply_timeout = {
                let registry = context.registry.lock();
                match registry.find_replier(header.com_id, src_ip, sockets.host_ip, dst_uri.as_deref()) {
                    Some((_, t)) => t.reply_timeout,
                    None => return,
                }
            };
            let session_ref = md::session_ref_from_uuid(session_id);
            let mut sessions = context.md_sessions.lock();
            if sessions
                .observe_request(session_id, header.com_id, src_ip, reply_timeout, session_ref, now)
                .is_ok()
            {
                drop(sessions);
                if let Some(receiver) = context.md_receiver.lock().as_mut() {
                    receiver.on_request(session_id, header.com_id, session_ref);
                }
            }
        }
        MsgType::Mp => {
            let mut sessions = context.md_sessions.lock();
            if let Ok(done) = sessions.receive_reply(session_id) {
                let user_ref = sessions.get(session_id).map(|s| s.user_ref).unwrap_or(0);
                drop(sessions);
                if let Some(receiver) = context.md_receiver.lock().as_mut() {
                    receiver.on_reply(session_id, header.com_id, user_ref, MdResult::Ok);
                }
                let _ = done;
            }
        }
        MsgType::Mq => {
            // Confirm timeout is bounded by the reply timeout already on
            // record for this session; a dedicated confirm-timeout
            // parameter belongs to the application's `request()` call
            // (taul.rs), not to this socket-level dispatch.
            let confirm_timeout = Duration::from_secs(1);
            let mut sessions = context.md_sessions.lock();
            if sessions.receive_reply_query(session_id, confirm_timeout, now).is_err() {
                return;
            }
            let _ = sessions.confirm_sent(session_id);
            drop(sessions);

            let mc_header = FrameHeader {
                sequence: context.sequence.fetch_add(1, Ordering::Relaxed),
                protocol_version: 1,
                msg_type: MsgType::Mc,
                com_id: header.com_id,
                topo_count: context.topo_count.load(Ordering::Relaxed),
                dataset_length: 0,
                reply_com_id: 0,
                reply_ip_address: 0,
                session: header.session,
                dst_uri: [0u8; wire::URI_FIELD_SIZE],
            };
            if let Ok(frame) = encode_frame(&mc_header, &[]) {
                match origin {
                    MdOrigin::Udp => {
                        let dest = ipv4_socket_addr(src_ip, MD_PORT);
                        let _ = sockets.md.send_to(&frame, dest);
                    }
                    MdOrigin::Tcp(peer_addr) => {
                        let _ = sockets.md_tcp.send_frame(peer_addr, poll, &frame);
                    }
                }
            }
        }
        MsgType::Mc => {
            let mut sessions = context.md_sessions.lock();
            let _ = sessions.receive_confirm(session_id);
        }
        MsgType::Me | MsgType::Pd | MsgType::Pp | MsgType::Pr => {}
    }
}

/// Surfaces P5's timeout transitions to `PdReceiver::on_pd` (§4.4's
/// receive-side timeout behavior was previously applied to the store
/// but never reached the application callback).
fn check_pd_timeouts(context: &Context, now: Instant) {
    let fired: Vec<(Handle, u32)> = {
        let mut registry = context.registry.lock();
        pd::check_timeouts(&mut registry, &context.store, now)
            .into_iter()
            .filter_map(|h| registry.subscriber(h).ok().map(|t| (h, t.com_id)))
            .collect()
    };
    if fired.is_empty() {
        return;
    }
    if let Some(receiver) = context.pd_receiver.lock().as_mut() {
        for (handle, com_id) in fired {
            receiver.on_pd(handle, com_id, pd::PdResult::Timeout);
        }
    }
}

fn retire_md_timeouts(context: &Context) {
    let now = Instant::now();
    let fired = context.md_sessions.lock().retire_timed_out(now);
    if fired.is_empty() {
        return;
    }
    if let Some(receiver) = context.md_receiver.lock().as_mut() {
        for (session_id, user_ref, com_id) in fired {
            receiver.on_reply(session_id, com_id, user_ref, MdResult::ReplyTimeout);
        }
    }
}

fn ipv4_socket_addr(ip: u32, port: u16) -> std::net::SocketAddr {
    std::net::SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::from(ip)), port)
}

/// §4.6 step 4: if the designated write subnet's link has dropped,
/// switch to the other and log exactly one failover event per
/// transition (S2).
fn reconcile_write_subnet(context: &Context, link: &dyn LinkStatus, log: &dyn SchedulerLog) {
    let current = context.store.get_write_subnet();
    let active = match current {
        WriteSubnet::Subnet1 => SubnetId::Subnet1,
        WriteSubnet::Subnet2 => SubnetId::Subnet2,
        WriteSubnet::Auto => {
            let resolved = if link.is_up(SubnetId::Subnet1) {
                SubnetId::Subnet1
            } else {
                SubnetId::Subnet2
            };
            context.store.set_write_subnet(match resolved {
                SubnetId::Subnet1 => WriteSubnet::Subnet1,
                SubnetId::Subnet2 => WriteSubnet::Subnet2,
            });
            return;
        }
    };

    if !link.is_up(active) {
        let other = active.other();
        context.store.set_write_subnet(match other {
            SubnetId::Subnet1 => WriteSubnet::Subnet1,
            SubnetId::Subnet2 => WriteSubnet::Subnet2,
        });
        log.event(&format!(
            "Subnet{} Link Down. Change Receive Subnet",
            match active {
                SubnetId::Subnet1 => 1,
                SubnetId::Subnet2 => 2,
            }
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PublishTelegram;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn nearest_wait_caps_at_scheduler_max() {
        let context = Context::new(DatasetMap::new(), 0);
        let now = Instant::now();
        let wait = nearest_wait(&context, now);
        assert_eq!(wait, Duration::from_micros(SCHEDULER_MAX_WAIT_MICROS));
    }

    #[test]
    fn nearest_wait_tracks_soonest_publisher_deadline() {
        let context = Context::new(DatasetMap::new(), 0);
        let now = Instant::now();
        {
            let mut registry = context.registry.lock();
            registry.publish(PublishTelegram {
                com_id: 1,
                dataset_id: 1,
                dest_ip: 0,
                subnet: SubnetId::Subnet1,
                cycle: Duration::from_millis(10),
                redundant: false,
                store_offset: 0,
                payload_size: 4,
                marshall: false,
                next_cycle_deadline: now + Duration::from_millis(5),
                sdt: None,
            });
        }
        let wait = nearest_wait(&context, now);
        assert!(wait <= Duration::from_millis(5));
    }

    // S2 (link-status part): forcing subnet 1 down while write subnet is
    // Auto-resolved-to-1 switches to subnet 2 and logs exactly once.
    struct FlippableLink(StdMutex<bool>);
    impl LinkStatus for FlippableLink {
        fn is_up(&self, subnet: SubnetId) -> bool {
            match subnet {
                SubnetId::Subnet1 => *self.0.lock().unwrap(),
                SubnetId::Subnet2 => true,
            }
        }
    }

    struct CapturingLog(StdMutex<Vec<String>>);
    impl SchedulerLog for CapturingLog {
        fn event(&self, message: &str) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn s2_write_subnet_fails_over_on_link_down() {
        let context = Context::new(DatasetMap::new(), 0);
        context.store.set_write_subnet(WriteSubnet::Subnet1);
        let link = FlippableLink(StdMutex::new(true));
        let log = CapturingLog(StdMutex::new(Vec::new()));

        reconcile_write_subnet(&context, &link, &log);
        assert_eq!(context.store.get_write_subnet(), WriteSubnet::Subnet1);
        assert!(log.0.lock().unwrap().is_empty());

        *link.0.lock().unwrap() = false;
        reconcile_write_subnet(&context, &link, &log);
        assert_eq!(context.store.get_write_subnet(), WriteSubnet::Subnet2);
        assert_eq!(log.0.lock().unwrap().len(), 1);
        assert!(log.0.lock().unwrap()[0].contains("Subnet1 Link Down"));

        reconcile_write_subnet(&context, &link, &log);
        assert_eq!(log.0.lock().unwrap().len(), 1);
    }

    // P5: a subscriber's receive timeout transition reaches `PdReceiver`,
    // not just the Traffic Store.
    struct CapturingPdReceiver(Arc<StdMutex<Vec<(Handle, u32, pd::PdResult)>>>);
    impl PdReceiver for CapturingPdReceiver {
        fn on_pd(&mut self, handle: Handle, com_id: u32, result: pd::PdResult) {
            self.0.lock().unwrap().push((handle, com_id, result));
        }
    }

    #[test]
    fn check_pd_timeouts_reaches_pd_receiver_exactly_once() {
        use crate::registry::SubscribeTelegram;

        let context = Context::new(DatasetMap::new(), 0);
        let start = Instant::now();
        let handle = {
            let mut registry = context.registry.lock();
            registry.subscribe(SubscribeTelegram {
                com_id: 42,
                src_ip: 0,
                src_ip_filter_2: 0,
                dst_ip: 0,
                dataset_id: 1001,
                subnet: SubnetId::Subnet1,
                timeout: Duration::from_millis(10),
                to_behavior: crate::constant::ToBehavior::Zero,
                store_offset: 0,
                payload_size: 4,
                marshall: false,
                last_rx: Some(start),
                timed_out: false,
                user_ref: 0,
                sdt: None,
            })
        };

        let seen = Arc::new(StdMutex::new(Vec::new()));
        *context.pd_receiver.lock() = Some(Box::new(CapturingPdReceiver(seen.clone())));

        let after = start + Duration::from_millis(20);
        check_pd_timeouts(&context, after);
        assert_eq!(*seen.lock().unwrap(), vec![(handle, 42, pd::PdResult::Timeout)]);

        check_pd_timeouts(&context, after + Duration::from_millis(5));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
