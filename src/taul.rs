// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! TAUL façade (component G, §4.7): the single public entry point.
//! `init` resolves configuration into a running [`Context`] and scheduler
//! thread; the PD/MD methods here are thin, validating wrappers around
//! the registry and MD session table, generalized from a high-level
//! client wrapping a transport and translating calls into wire
//! operations.

use crate::config::{Config, ExchgPar, MdPar, PdPar, SdtPar};
use crate::constant::{MsgType, SubnetId, TRAFFIC_STORE_SIZE, UserRef, WriteSubnet};
use crate::dataset::{DatasetElement, DatasetMap, DatasetSchema, ElementType, Primitive};
use crate::error::{Error, Result};
use crate::md::MdReceiver;
use crate::pd::PdReceiver;
use crate::registry::{
    CallerTelegram, Handle, PublishTelegram, PullRequestTelegram, ReplierTelegram,
    SubscribeTelegram,
};
use crate::scheduler::{self, AlwaysUp, Context, SchedulerHandle, SchedulerLog, TracingLog};
use crate::store::StoreGuard;
use crate::wire::encode_frame;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// Application-facing diagnostic sink (§6.3). Fires at the same sites
/// `tracing` does, so a caller with no `tracing-subscriber` wired up
/// still gets every event this crate logs.
pub trait DebugCb: Send {
    fn log(&mut self, category: DebugCategory, file: &str, line: u32, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugCategory {
    Error,
    Warn,
    Info,
    Dbg,
}

/// Adapts an application's [`DebugCb`] to the scheduler's internal
/// [`SchedulerLog`] sink, so `init_with_debug` can hand the same
/// callback to the scheduler thread without that module knowing `DebugCb`
/// exists.
struct DebugCbLog(Mutex<Box<dyn DebugCb>>);

impl DebugCbLog {
    fn new(cb: Box<dyn DebugCb>) -> DebugCbLog {
        DebugCbLog(Mutex::new(cb))
    }
}

impl SchedulerLog for DebugCbLog {
    fn event(&self, message: &str) {
        self.0.lock().log(DebugCategory::Info, file!(), line!(), message);
    }
}

/// The runtime handle returned by [`Taul::init`]. Wraps the shared
/// [`Context`] and the scheduler thread's handle; every PD/MD call here
/// validates against the resolved configuration and either mutates the
/// registry directly (PD) or enqueues a pre-encoded frame for the
/// scheduler to send (MD) — the façade itself never touches a socket
/// (§5's "Sockets: core, Scheduler only").
pub struct Taul {
    context: Arc<Context>,
    scheduler: SchedulerHandle,
    exchanges: HashMap<u32, ExchgPar>,
    /// Per-subnet SDT passthrough parameters (§6.1), threaded into every
    /// `PublishTelegram`/`SubscribeTelegram` registered on that subnet.
    subnet_sdt: HashMap<SubnetId, Option<SdtPar>>,
}

impl Taul {
    /// Resolves `config` into a running [`Context`] and spawns the
    /// scheduler thread. No `DebugCb`; diagnostics only go to `tracing`.
    ///
    /// # Examples
    /// ```no_run
    /// use trdp_core::taul::Taul;
    /// use trdp_core::config::Config;
    ///
    /// # fn load_config() -> Config { unimplemented!() }
    /// let config = load_config();
    /// let taul = match Taul::init(config) {
    ///     Ok(t) => t,
    ///     Err(e) => {
    ///         println!("{:?}", e.to_string());
    ///         return;
    ///     }
    /// };
    /// taul.terminate();
    /// ```
    pub fn init(config: Config) -> Result<Taul> {
        Taul::init_with_debug(config, None)
    }

    /// As [`Taul::init`], additionally routing every `DebugCb`-worthy
    /// scheduler event to `debug_cb`.
    pub fn init_with_debug(config: Config, debug_cb: Option<Box<dyn DebugCb>>) -> Result<Taul> {
        if config.memory.size == 0 {
            return Err(Error::MemErr);
        }
        if config.interfaces.is_empty() {
            return Err(Error::ParamErr("no interfaces configured".into()));
        }

        let mut subnet_ip: HashMap<SubnetId, Ipv4Addr> = HashMap::new();
        let mut subnet_sdt: HashMap<SubnetId, Option<SdtPar>> = HashMap::new();
        for iface in &config.interfaces {
            if subnet_ip
                .insert(iface.subnet, Ipv4Addr::from(iface.host_ip))
                .is_some()
            {
                return Err(Error::ParamErr(format!(
                    "duplicate interface for {:?}",
                    iface.subnet
                )));
            }
            subnet_sdt.insert(iface.subnet, iface.sdt);
        }
        let host_ip_subnet1 = *subnet_ip
            .get(&SubnetId::Subnet1)
            .ok_or_else(|| Error::ParamErr("no interface configured for Subnet1".into()))?;
        let host_ip_subnet2 = *subnet_ip
            .get(&SubnetId::Subnet2)
            .ok_or_else(|| Error::ParamErr("no interface configured for Subnet2".into()))?;

        let mut dataset_map: DatasetMap = DatasetMap::new();
        for ds in &config.datasets {
            let mut elements = Vec::with_capacity(ds.elements.len());
            for el in &ds.elements {
                let primitive = Primitive::from_name(&el.type_name).ok_or_else(|| {
                    Error::ParamErr(format!("unknown dataset element type {}", el.type_name))
                })?;
                elements.push(DatasetElement {
                    ty: ElementType::Primitive(primitive),
                    count: el.count,
                });
            }
            dataset_map.insert(ds.dataset_id, DatasetSchema::new(ds.dataset_id, elements));
        }

        let mut exchanges = HashMap::with_capacity(config.exchanges.len());
        for exchg in &config.exchanges {
            exchanges.insert(exchg.com_id, exchg.clone());
        }

        let max_md_sessions = exchanges
            .values()
            .filter_map(|e| e.md.as_ref())
            .map(|md| md.num_sessions as usize)
            .max()
            .unwrap_or(0);

        let context = Arc::new(Context::new(dataset_map, max_md_sessions));

        let log: Arc<dyn SchedulerLog> = match debug_cb {
            Some(cb) => Arc::new(DebugCbLog::new(cb)),
            None => Arc::new(TracingLog),
        };

        let scheduler = scheduler::run(
            context.clone(),
            host_ip_subnet1,
            host_ip_subnet2,
            Arc::new(AlwaysUp),
            log,
        )?;

        Ok(Taul {
            context,
            scheduler,
            exchanges,
            subnet_sdt,
        })
    }

    /// Signals the scheduler thread to stop. Does not join it; callers
    /// that need a guaranteed-quiesced shutdown should give the thread a
    /// moment before exiting the process.
    pub fn terminate(self) {
        self.scheduler.stop();
    }

    fn exchange_pd(&self, com_id: u32) -> Result<(&ExchgPar, &PdPar)> {
        let exchg = self
            .exchanges
            .get(&com_id)
            .ok_or(Error::UnknownComIdErr(com_id))?;
        let pd = exchg
            .pd
            .as_ref()
            .ok_or_else(|| Error::ParamErr(format!("comId {} has no PD parameters", com_id)))?;
        Ok((exchg, pd))
    }

    fn exchange_md(&self, com_id: u32) -> Result<(&ExchgPar, &MdPar)> {
        let exchg = self
            .exchanges
            .get(&com_id)
            .ok_or(Error::UnknownComIdErr(com_id))?;
        let md = exchg
            .md
            .as_ref()
            .ok_or_else(|| Error::ParamErr(format!("comId {} has no MD parameters", com_id)))?;
        Ok((exchg, md))
    }

    /// Resolves the SDT passthrough block configured for `subnet`, if any.
    fn sdt_for(&self, subnet: SubnetId) -> Option<SdtPar> {
        self.subnet_sdt.get(&subnet).copied().flatten()
    }

    fn check_store_range(store_offset: usize, payload_size: usize) -> Result<()> {
        match store_offset.checked_add(payload_size) {
            Some(end) if end <= TRAFFIC_STORE_SIZE => Ok(()),
            _ => Err(Error::ParamErr(
                "store range exceeds the traffic store".into(),
            )),
        }
    }

    // --- Traffic Store passthrough (§4.1) ---

    pub fn lock(&self) -> StoreGuard<'_> {
        self.context.store.lock()
    }

    pub fn set_write_subnet(&self, subnet: WriteSubnet) {
        self.context.store.set_write_subnet(subnet);
    }

    pub fn get_write_subnet(&self) -> WriteSubnet {
        self.context.store.get_write_subnet()
    }

    // --- Callback registration (§6.3) ---

    pub fn set_pd_receiver(&self, receiver: Box<dyn PdReceiver>) {
        *self.context.pd_receiver.lock() = Some(receiver);
    }

    pub fn set_md_receiver(&self, receiver: Box<dyn MdReceiver>) {
        *self.context.md_receiver.lock() = Some(receiver);
    }

    // --- PD API (§4.4) ---

    /// Registers a cyclic publisher for `com_id`, sourcing its cycle
    /// time and dataset from the matching configured exchange. Returns
    /// the [`Handle`] the caller must keep to `unpublish` later.
    pub fn publish(
        &self,
        com_id: u32,
        dest_ip: u32,
        subnet: SubnetId,
        store_offset: usize,
        payload_size: usize,
    ) -> Result<Handle> {
        let (exchg, pd) = self.exchange_pd(com_id)?;
        Self::check_store_range(store_offset, payload_size)?;

        let now = Instant::now();
        let telegram = PublishTelegram {
            com_id,
            dataset_id: exchg.dataset_id,
            dest_ip,
            subnet,
            cycle: pd.cycle,
            redundant: pd.redundant,
            store_offset,
            payload_size,
            marshall: true,
            next_cycle_deadline: now + pd.cycle,
            sdt: self.sdt_for(subnet),
        };
        Ok(self.context.registry.lock().publish(telegram))
    }

    pub fn unpublish(&self, handle: Handle) -> Result<()> {
        self.context.registry.lock().unpublish(handle)
    }

    /// `src_ip`/`src_ip_filter_2` together define the source address
    /// filter (a single wildcardable address, or an inclusive range
    /// when both are non-zero); `dst_ip` filters on the
    /// destination/multicast address the exchange was addressed to
    /// (§4.3).
    #[allow(clippy::too_many_arguments)]
    pub fn subscribe(
        &self,
        com_id: u32,
        src_ip: u32,
        src_ip_filter_2: u32,
        dst_ip: u32,
        subnet: SubnetId,
        store_offset: usize,
        payload_size: usize,
        user_ref: UserRef,
    ) -> Result<Handle> {
        let (exchg, pd) = self.exchange_pd(com_id)?;
        Self::check_store_range(store_offset, payload_size)?;

        let telegram = SubscribeTelegram {
            com_id,
            src_ip,
            src_ip_filter_2,
            dst_ip,
            dataset_id: exchg.dataset_id,
            subnet,
            timeout: pd.timeout,
            to_behavior: pd.to_behavior,
            store_offset,
            payload_size,
            marshall: true,
            last_rx: Some(Instant::now()),
            timed_out: false,
            user_ref,
            sdt: self.sdt_for(subnet),
        };
        Ok(self.context.registry.lock().subscribe(telegram))
    }

    pub fn unsubscribe(&self, handle: Handle) -> Result<()> {
        self.context.registry.lock().unsubscribe(handle)
    }

    /// Registers a pull requester: cyclically emits a `Pr` for `com_id`
    /// and expects a matching `Pp` carrying `reply_com_id`.
    pub fn pd_request(
        &self,
        com_id: u32,
        dest_ip: u32,
        subnet: SubnetId,
        reply_com_id: u32,
    ) -> Result<Handle> {
        let (exchg, pd) = self.exchange_pd(com_id)?;
        let now = Instant::now();
        let telegram = PullRequestTelegram {
            com_id,
            dataset_id: exchg.dataset_id,
            dest_ip,
            subnet,
            reply_com_id,
            cycle: pd.cycle,
            next_request_deadline: now + pd.cycle,
        };
        Ok(self.context.registry.lock().pd_request(telegram))
    }

    pub fn remove_pull_request(&self, handle: Handle) -> Result<()> {
        self.context.registry.lock().remove_pull_request(handle)
    }

    // --- MD API (§4.5) ---

    fn enqueue_md_frame(
        &self,
        subnet: SubnetId,
        dest_ip: u32,
        dst_uri: Option<&str>,
        msg_type: MsgType,
        com_id: u32,
        session: [u8; 16],
        payload: &[u8],
    ) -> Result<()> {
        let header = crate::wire::FrameHeader {
            sequence: self.context.next_sequence(),
            protocol_version: 1,
            msg_type,
            com_id,
            topo_count: self.context.topo_count(),
            dataset_length: payload.len() as u32,
            reply_com_id: 0,
            reply_ip_address: 0,
            session,
            dst_uri: dst_uri.map(crate::wire::encode_uri).unwrap_or([0u8; crate::wire::URI_FIELD_SIZE]),
        };
        let frame = encode_frame(&header, payload)?;
        let use_tcp = self
            .exchanges
            .get(&com_id)
            .and_then(|e| e.md.as_ref())
            .map(|m| m.tcp)
            .unwrap_or(false);
        self.context.enqueue_md(subnet, dest_ip, frame, use_tcp);
        self.scheduler.wake();
        Ok(())
    }

    /// Registers an application's intent to call `request()` against
    /// `com_id`. Not consulted by the session state machine (the
    /// destination and timeout are passed explicitly to each `request()`
    /// call) — it only makes the comId discoverable alongside publishers
    /// and repliers, mirroring `register_replier`'s bookkeeping role.
    pub fn register_caller(&self, com_id: u32, dest_ip: u32, subnet: SubnetId) -> Result<Handle> {
        let (exchg, md) = self.exchange_md(com_id)?;
        let telegram = CallerTelegram {
            com_id,
            dataset_id: exchg.dataset_id,
            dest_ip,
            subnet,
            reply_timeout: md.reply_timeout,
        };
        Ok(self.context.registry.lock().register_caller(telegram))
    }

    pub fn unregister_caller(&self, handle: Handle) -> Result<()> {
        self.context.registry.lock().remove_caller(handle)
    }

    /// Registers a replier listening for `Mr`/`Mn` on `com_id`. `src_ip`/
    /// `src_ip_filter_2`/`dst_ip` filter the same way as
    /// [`Taul::subscribe`]'s; `dst_uri`, if given, lets the replier be
    /// addressed by a destination URI instead of (or alongside) `dst_ip`
    /// (§3.1 "Listener routing"). Its `reply_timeout` seeds the
    /// `MdSession` the scheduler opens the moment a matching `Mr`
    /// arrives (§4.5).
    pub fn add_listener(
        &self,
        com_id: u32,
        src_ip: u32,
        src_ip_filter_2: u32,
        dst_ip: u32,
        dst_uri: Option<String>,
        subnet: SubnetId,
    ) -> Result<Handle> {
        let (exchg, md) = self.exchange_md(com_id)?;
        let telegram = ReplierTelegram {
            com_id,
            dataset_id: exchg.dataset_id,
            src_ip,
            src_ip_filter_2,
            dst_ip,
            dst_uri,
            subnet,
            reply_timeout: md.reply_timeout,
        };
        Ok(self.context.registry.lock().register_replier(telegram))
    }

    pub fn remove_listener(&self, handle: Handle) -> Result<()> {
        self.context.registry.lock().remove_listener(handle)
    }

    /// Fire-and-forget `Mn`: no session is opened, no reply is expected.
    pub fn notify(
        &self,
        com_id: u32,
        dest_ip: u32,
        dst_uri: Option<&str>,
        subnet: SubnetId,
        payload: &[u8],
    ) -> Result<()> {
        self.exchange_md(com_id)?;
        self.enqueue_md_frame(subnet, dest_ip, dst_uri, MsgType::Mn, com_id, [0u8; 16], payload)
    }

    /// Opens an originator `MdSession` and emits the `Mr`. `reply_timeout`
    /// is per-call (§6.3's `request()` signature), not pulled from
    /// configuration. Returns the session id, which the caller threads
    /// back through [`Taul::set_md_receiver`]'s `on_reply` callback.
    #[allow(clippy::too_many_arguments)]
    pub fn request(
        &self,
        com_id: u32,
        dest_ip: u32,
        dst_uri: Option<&str>,
        subnet: SubnetId,
        expected_replies: u32,
        reply_timeout: std::time::Duration,
        caller_ref: UserRef,
        payload: &[u8],
    ) -> Result<Uuid> {
        self.exchange_md(com_id)?;
        let session_id = self.context.md_sessions.lock().send_request(
            com_id,
            dest_ip,
            expected_replies,
            reply_timeout,
            caller_ref,
            Instant::now(),
        )?;
        self.enqueue_md_frame(
            subnet,
            dest_ip,
            dst_uri,
            MsgType::Mr,
            com_id,
            *session_id.as_bytes(),
            payload,
        )?;
        Ok(session_id)
    }

    /// Terminal reply (`Mp`): the replier expects no confirm.
    pub fn reply(&self, session_id: Uuid, subnet: SubnetId, payload: &[u8]) -> Result<()> {
        let (com_id, peer_ip) = {
            let mut sessions = self.context.md_sessions.lock();
            sessions.application_reply(session_id, false, std::time::Duration::from_secs(0), Instant::now())?;
            let session = sessions.get(session_id).ok_or(Error::NoSessionErr)?;
            (session.com_id, session.peer_ip)
        };
        self.enqueue_md_frame(
            subnet,
            peer_ip,
            None,
            MsgType::Mp,
            com_id,
            *session_id.as_bytes(),
            payload,
        )
    }

    /// Reply with a requested confirm (`Mq`): moves the replier session
    /// to `AwaitConfirm`; the caller auto-emits `Mc` on receipt (§4.5,
    /// handled entirely by the scheduler's dispatch loop).
    pub fn reply_query(&self, session_id: Uuid, subnet: SubnetId, payload: &[u8]) -> Result<()> {
        let (com_id, peer_ip, confirm_timeout) = {
            let sessions = self.context.md_sessions.lock();
            let session = sessions.get(session_id).ok_or(Error::NoSessionErr)?;
            let confirm_timeout = self
                .exchanges
                .get(&session.com_id)
                .and_then(|e| e.md.as_ref())
                .map(|m| m.confirm_timeout)
                .unwrap_or_else(|| std::time::Duration::from_secs(1));
            (session.com_id, session.peer_ip, confirm_timeout)
        };
        {
            let mut sessions = self.context.md_sessions.lock();
            sessions.application_reply(session_id, true, confirm_timeout, Instant::now())?;
        }
        self.enqueue_md_frame(
            subnet,
            peer_ip,
            None,
            MsgType::Mq,
            com_id,
            *session_id.as_bytes(),
            payload,
        )
    }
}

impl Drop for Taul {
    /// Best-effort: stops the scheduler thread if `terminate()` was never
    /// called. Does not join it or flush in-flight sends.
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ComIdDatasetMap, DatasetConfig, DatasetElementConfig, InterfaceConfig, MdPar, MemoryConfig,
        PdPar,
    };
    use std::time::Duration;

    fn dataset_config() -> DatasetConfig {
        DatasetConfig {
            dataset_id: 1001,
            elements: vec![DatasetElementConfig {
                type_name: "UINT32".into(),
                count: 1,
            }],
        }
    }

    /// Each caller passes a distinct `host` octet (127.0.0.`host` /
    /// 127.0.0.`host+1`) so tests that run concurrently never try to bind
    /// the same fixed PD/MD ports on the same loopback address.
    fn base_config(host: u8) -> Config {
        let subnet1_ip = u32::from(std::net::Ipv4Addr::new(127, 0, 0, host));
        let subnet2_ip = u32::from(std::net::Ipv4Addr::new(127, 0, 0, host.wrapping_add(1)));
        Config {
            memory: MemoryConfig {
                size: 4096,
                prealloc: [0; crate::constant::PREALLOC_BLOCK_SIZES.len()],
            },
            debug: None,
            interfaces: vec![
                InterfaceConfig {
                    name: "eth0".into(),
                    subnet: SubnetId::Subnet1,
                    host_ip: subnet1_ip,
                    leader_ip: 0,
                    sdt: None,
                },
                InterfaceConfig {
                    name: "eth1".into(),
                    subnet: SubnetId::Subnet2,
                    host_ip: subnet2_ip,
                    leader_ip: 0,
                    sdt: None,
                },
            ],
            com_pars: vec![],
            datasets: vec![dataset_config()],
            com_id_map: vec![ComIdDatasetMap {
                com_id: 10001,
                dataset_id: 1001,
            }],
            exchanges: vec![ExchgPar {
                com_id: 10001,
                com_par_id: 1,
                dataset_id: 1001,
                pd: Some(PdPar {
                    cycle: Duration::from_millis(30),
                    timeout: Duration::from_millis(120),
                    to_behavior: crate::constant::ToBehavior::Zero,
                    redundant: false,
                }),
                md: Some(MdPar {
                    reply_timeout: Duration::from_secs(1),
                    confirm_timeout: Duration::from_secs(1),
                    num_sessions: 4,
                    tcp: false,
                }),
            }],
        }
    }

    #[test]
    fn init_rejects_empty_interfaces() {
        let mut config = base_config(10);
        config.interfaces.clear();
        let err = Taul::init(config).unwrap_err();
        assert_eq!(
            err,
            Error::ParamErr("no interfaces configured".into())
        );
    }

    #[test]
    fn init_rejects_missing_subnet2() {
        let mut config = base_config(12);
        config.interfaces.retain(|i| i.subnet == SubnetId::Subnet1);
        let err = Taul::init(config).unwrap_err();
        assert_eq!(
            err,
            Error::ParamErr("no interface configured for Subnet2".into())
        );
    }

    #[test]
    fn init_rejects_zero_memory() {
        let mut config = base_config(14);
        config.memory.size = 0;
        assert_eq!(Taul::init(config).unwrap_err(), Error::MemErr);
    }

    #[test]
    fn publish_and_subscribe_round_trip_through_the_store() {
        let taul = Taul::init(base_config(20)).expect("init");
        let pub_handle = taul
            .publish(10001, 0x0A00_0002, SubnetId::Subnet1, 0x100, 4)
            .expect("publish");
        let sub_handle = taul
            .subscribe(10001, 0, 0, 0, SubnetId::Subnet1, 0x200, 4, 0)
            .expect("subscribe");
        assert_ne!(pub_handle, sub_handle);
        taul.unpublish(pub_handle).unwrap();
        taul.unsubscribe(sub_handle).unwrap();
        taul.terminate();
    }

    #[test]
    fn publish_and_subscribe_thread_sdt_from_the_interface() {
        let mut config = base_config(90);
        config.interfaces[0].sdt = Some(SdtPar {
            safety_enabled: true,
            n_guard: 3,
            n_rx_safe: 2,
            cmthr: 1,
        });
        let taul = Taul::init(config).expect("init");

        let pub_handle = taul
            .publish(10001, 0x0A00_0002, SubnetId::Subnet1, 0x100, 4)
            .expect("publish");
        let sub_handle = taul
            .subscribe(10001, 0, 0, 0, SubnetId::Subnet1, 0x200, 4, 0)
            .expect("subscribe");

        let registry = taul.context.registry.lock();
        let sdt = registry.publisher(pub_handle).unwrap().sdt.unwrap();
        assert!(sdt.safety_enabled);
        assert_eq!(sdt.n_guard, 3);
        assert_eq!(registry.subscriber(sub_handle).unwrap().sdt.unwrap().cmthr, 1);
        drop(registry);

        taul.unpublish(pub_handle).unwrap();
        taul.unsubscribe(sub_handle).unwrap();
        taul.terminate();
    }

    #[test]
    fn publish_rejects_unknown_com_id() {
        let taul = Taul::init(base_config(30)).expect("init");
        let err = taul
            .publish(9999, 0, SubnetId::Subnet1, 0, 4)
            .unwrap_err();
        assert_eq!(err, Error::UnknownComIdErr(9999));
        taul.terminate();
    }

    #[test]
    fn publish_rejects_out_of_range_store_offset() {
        let taul = Taul::init(base_config(40)).expect("init");
        let err = taul
            .publish(10001, 0, SubnetId::Subnet1, TRAFFIC_STORE_SIZE - 2, 4)
            .unwrap_err();
        assert!(matches!(err, Error::ParamErr(_)));
        taul.terminate();
    }

    #[test]
    fn add_and_remove_listener() {
        let taul = Taul::init(base_config(50)).expect("init");
        let handle = taul
            .add_listener(10001, 0, 0, 0, None, SubnetId::Subnet1)
            .expect("add_listener");
        taul.remove_listener(handle).expect("remove_listener");
        assert_eq!(
            taul.remove_listener(handle).unwrap_err(),
            Error::NoSubErr
        );
        taul.terminate();
    }

    #[test]
    fn request_without_a_replier_opens_an_originator_session() {
        let taul = Taul::init(base_config(60)).expect("init");
        let session_id = taul
            .request(
                10001,
                0x0A00_0009,
                None,
                SubnetId::Subnet1,
                1,
                Duration::from_secs(1),
                42,
                &[1, 2, 3, 4],
            )
            .expect("request");
        assert_ne!(session_id, Uuid::nil());
        taul.terminate();
    }

    #[test]
    fn notify_rejects_com_id_with_no_md_parameters() {
        let mut config = base_config(70);
        config.exchanges[0].md = None;
        let taul = Taul::init(config).expect("init");
        let err = taul.notify(10001, 0, None, SubnetId::Subnet1, &[]).unwrap_err();
        assert!(matches!(err, Error::ParamErr(_)));
        taul.terminate();
    }
}
