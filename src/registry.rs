// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! The telegram registry (component C, §4.3): publishers, subscribers,
//! pull-requesters, callers and repliers, addressed by generation-tagged
//! [`Handle`]s rather than pointers (Design Note "Cyclic registry of
//! telegrams").

use crate::config::SdtPar;
use crate::constant::{BROADCAST_ADDRESS, SubnetId, ToBehavior, UserRef};
use crate::error::{Error, Result};
use std::time::{Duration, Instant};

/// A stable reference into one of the registry's slabs. `index` addresses
/// a slot; `generation` must match the slot's current generation for the
/// handle to still be valid — a stale handle (slot reused after
/// `unpublish`/`unsubscribe`) is rejected rather than silently aliasing a
/// newer entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    index: u32,
    generation: u32,
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// A generation-tagged slab. Freed slots are reused, but a [`Handle`]
/// minted before the reuse no longer resolves.
struct Slab<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Slab<T> {
    fn new() -> Slab<T> {
        Slab {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    fn insert(&mut self, value: T) -> Handle {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.generation += 1;
            slot.value = Some(value);
            Handle {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                value: Some(value),
            });
            Handle {
                index,
                generation: 0,
            }
        }
    }

    fn get(&self, handle: Handle) -> Option<&T> {
        self.slots
            .get(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.value.as_ref())
    }

    fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|s| s.generation == handle.generation)
            .and_then(|s| s.value.as_mut())
    }

    fn remove(&mut self, handle: Handle) -> Option<T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let value = slot.value.take();
        if value.is_some() {
            self.free.push(handle.index);
        }
        value
    }

    /// Iterate live entries in insertion order, oldest first — the
    /// "earliest wins" search rule of §4.3.
    fn iter(&self) -> impl Iterator<Item = (Handle, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.value.as_ref().map(|v| {
                (
                    Handle {
                        index: i as u32,
                        generation: s.generation,
                    },
                    v,
                )
            })
        })
    }
}

/// Does `addr` match a telegram's configured peer address, honoring the
/// broadcast sentinel and `0` as "no filter" (Open Question #1).
fn addr_matches(configured: u32, incoming: u32) -> bool {
    configured == 0 || configured == BROADCAST_ADDRESS || configured == incoming
}

/// §4.3's source address filtering: `srcIPFilter1`/`srcIPFilter2` define
/// an inclusive source address range when both are configured, or a
/// single wildcardable address when only `filter1` is set (`filter2 ==
/// 0`). A telegram with neither set accepts any source.
fn addr_range_matches(filter1: u32, filter2: u32, incoming: u32) -> bool {
    if filter2 == 0 {
        addr_matches(filter1, incoming)
    } else {
        let (low, high) = if filter1 <= filter2 {
            (filter1, filter2)
        } else {
            (filter2, filter1)
        };
        incoming >= low && incoming <= high
    }
}

/// Does a listener's configured `dstUri` match the URI an inbound
/// exchange carried, if the listener filters on URI at all (§3.1
/// "Listener routing").
fn uri_matches(configured: &Option<String>, incoming: Option<&str>) -> bool {
    match configured {
        None => true,
        Some(want) => incoming == Some(want.as_str()),
    }
}

pub struct PublishTelegram {
    pub com_id: u32,
    pub dataset_id: u32,
    pub dest_ip: u32,
    pub subnet: SubnetId,
    pub cycle: Duration,
    pub redundant: bool,
    pub store_offset: usize,
    pub payload_size: usize,
    /// Whether the Traffic Store payload is host-layout and must be run
    /// through `dataset.rs`, or sent/received as a raw byte copy (§4.4).
    pub marshall: bool,
    /// When this publisher's next cyclic send is due. Reset by
    /// `pd.rs` after each send (§3.2's `nextCycleDeadline`).
    pub next_cycle_deadline: Instant,
    /// Passthrough SDT parameters from the publishing interface, carried
    /// but never interpreted by this crate (see [`SdtPar`]).
    pub sdt: Option<SdtPar>,
}

pub struct SubscribeTelegram {
    pub com_id: u32,
    /// `srcIPFilter1` (§4.3): the sole source filter when
    /// `src_ip_filter_2` is `0`, or the low end of an inclusive range
    /// otherwise.
    pub src_ip: u32,
    /// `srcIPFilter2`: the high end of the source address range. `0`
    /// means "no range, `src_ip` alone filters".
    pub src_ip_filter_2: u32,
    /// `dstIP`: the destination/multicast address this subscription was
    /// addressed to, wildcardable like `src_ip` (§4.3).
    pub dst_ip: u32,
    pub dataset_id: u32,
    pub subnet: SubnetId,
    pub timeout: Duration,
    pub to_behavior: ToBehavior,
    pub store_offset: usize,
    pub payload_size: usize,
    pub marshall: bool,
    /// Last time a matching frame arrived; `None` until the first
    /// reception (§3.2's `lastRxTime`).
    pub last_rx: Option<Instant>,
    /// Whether the timeout transition has already surfaced once since
    /// the last reception (P5: exactly one `TIMEOUT` per transition).
    pub timed_out: bool,
    pub user_ref: UserRef,
    /// Passthrough SDT parameters from the subscribing interface, carried
    /// but never interpreted by this crate (see [`SdtPar`]).
    pub sdt: Option<SdtPar>,
}

pub struct PullRequestTelegram {
    pub com_id: u32,
    pub dataset_id: u32,
    pub dest_ip: u32,
    pub subnet: SubnetId,
    pub reply_com_id: u32,
    pub cycle: Duration,
    pub next_request_deadline: Instant,
}

pub struct CallerTelegram {
    pub com_id: u32,
    pub dataset_id: u32,
    pub dest_ip: u32,
    pub subnet: SubnetId,
    pub reply_timeout: Duration,
}

pub struct ReplierTelegram {
    pub com_id: u32,
    pub dataset_id: u32,
    /// `srcIPFilter1`, see [`SubscribeTelegram::src_ip`].
    pub src_ip: u32,
    /// `srcIPFilter2`, see [`SubscribeTelegram::src_ip_filter_2`].
    pub src_ip_filter_2: u32,
    /// `dstIP`, see [`SubscribeTelegram::dst_ip`].
    pub dst_ip: u32,
    /// `dstUri`: an alternative, name-based addressing dimension a
    /// listener can register under instead of (or alongside) `dst_ip`
    /// (§3.1 "Listener routing"). `None` means this listener is only
    /// reached by IP.
    pub dst_uri: Option<String>,
    pub subnet: SubnetId,
    /// Deadline the replier's `MdSession` gets when an `Mr` is
    /// observed, before the application calls `reply()` (§4.5).
    pub reply_timeout: Duration,
}

/// Telegram registry (component C): one slab per telegram kind, searched
/// in insertion order so the first matching entry wins.
#[derive(Default)]
pub struct Registry {
    publishers: SlabWrap<PublishTelegram>,
    subscribers: SlabWrap<SubscribeTelegram>,
    pull_requesters: SlabWrap<PullRequestTelegram>,
    callers: SlabWrap<CallerTelegram>,
    repliers: SlabWrap<ReplierTelegram>,
}

/// Thin wrapper so `#[derive(Default)]` works without requiring `T:
/// Default` on the slab itself.
struct SlabWrap<T>(Slab<T>);

impl<T> Default for SlabWrap<T> {
    fn default() -> Self {
        SlabWrap(Slab::new())
    }
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    pub fn publish(&mut self, telegram: PublishTelegram) -> Handle {
        self.publishers.0.insert(telegram)
    }

    pub fn unpublish(&mut self, handle: Handle) -> Result<()> {
        self.publishers
            .0
            .remove(handle)
            .map(|_| ())
            .ok_or(Error::NoPubErr)
    }

    pub fn publisher(&self, handle: Handle) -> Result<&PublishTelegram> {
        self.publishers.0.get(handle).ok_or(Error::NoPubErr)
    }

    pub fn publisher_mut(&mut self, handle: Handle) -> Result<&mut PublishTelegram> {
        self.publishers.0.get_mut(handle).ok_or(Error::NoPubErr)
    }

    pub fn subscribe(&mut self, telegram: SubscribeTelegram) -> Handle {
        self.subscribers.0.insert(telegram)
    }

    pub fn unsubscribe(&mut self, handle: Handle) -> Result<()> {
        self.subscribers
            .0
            .remove(handle)
            .map(|_| ())
            .ok_or(Error::NoSubErr)
    }

    pub fn subscriber(&self, handle: Handle) -> Result<&SubscribeTelegram> {
        self.subscribers.0.get(handle).ok_or(Error::NoSubErr)
    }

    pub fn subscriber_mut(&mut self, handle: Handle) -> Result<&mut SubscribeTelegram> {
        self.subscribers.0.get_mut(handle).ok_or(Error::NoSubErr)
    }

    pub fn pd_request(&mut self, telegram: PullRequestTelegram) -> Handle {
        self.pull_requesters.0.insert(telegram)
    }

    pub fn remove_pull_request(&mut self, handle: Handle) -> Result<()> {
        self.pull_requesters
            .0
            .remove(handle)
            .map(|_| ())
            .ok_or(Error::NoPubErr)
    }

    pub fn register_caller(&mut self, telegram: CallerTelegram) -> Handle {
        self.callers.0.insert(telegram)
    }

    pub fn register_replier(&mut self, telegram: ReplierTelegram) -> Handle {
        self.repliers.0.insert(telegram)
    }

    pub fn remove_caller(&mut self, handle: Handle) -> Result<()> {
        self.callers
            .0
            .remove(handle)
            .map(|_| ())
            .ok_or(Error::NoPubErr)
    }

    pub fn remove_listener(&mut self, handle: Handle) -> Result<()> {
        self.repliers
            .0
            .remove(handle)
            .map(|_| ())
            .ok_or(Error::NoSubErr)
    }

    /// First publisher whose `com_id` matches, insertion order.
    pub fn find_publisher_by_com_id(&self, com_id: u32) -> Option<(Handle, &PublishTelegram)> {
        self.publishers.0.iter().find(|(_, t)| t.com_id == com_id)
    }

    /// First subscriber matching `com_id`, source address range and
    /// destination address, insertion order, honoring the broadcast/`0`
    /// wildcard (§4.3, Open Question #1). A subscriber matches only if
    /// every filter it configured passes.
    pub fn find_subscriber(
        &self,
        com_id: u32,
        src_ip: u32,
        dst_ip: u32,
    ) -> Option<(Handle, &SubscribeTelegram)> {
        self.subscribers.0.iter().find(|(_, t)| {
            t.com_id == com_id
                && addr_range_matches(t.src_ip, t.src_ip_filter_2, src_ip)
                && addr_matches(t.dst_ip, dst_ip)
        })
    }

    /// First replier matching `com_id`, source address range, and either
    /// the destination address or destination URI the inbound exchange
    /// carried, insertion order.
    pub fn find_replier(
        &self,
        com_id: u32,
        src_ip: u32,
        dst_ip: u32,
        dst_uri: Option<&str>,
    ) -> Option<(Handle, &ReplierTelegram)> {
        self.repliers.0.iter().find(|(_, t)| {
            t.com_id == com_id
                && addr_range_matches(t.src_ip, t.src_ip_filter_2, src_ip)
                && addr_matches(t.dst_ip, dst_ip)
                && uri_matches(&t.dst_uri, dst_uri)
        })
    }

    pub fn publishers(&self) -> impl Iterator<Item = (Handle, &PublishTelegram)> {
        self.publishers.0.iter()
    }

    pub fn subscribers(&self) -> impl Iterator<Item = (Handle, &SubscribeTelegram)> {
        self.subscribers.0.iter()
    }

    pub fn pull_requesters(&self) -> impl Iterator<Item = (Handle, &PullRequestTelegram)> {
        self.pull_requesters.0.iter()
    }
}
