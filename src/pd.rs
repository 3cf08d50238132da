// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! PD session (component D, §4.4): cyclic publisher/pull-requester send
//! and subscriber receive-with-timeout, funneled through the Traffic
//! Store and the marshalling engine.

use crate::constant::MsgType;
use crate::dataset::DatasetMap;
use crate::error::{Error, Result};
use crate::registry::{Handle, Registry};
use crate::store::TrafficStore;
use crate::wire::{FrameHeader, decode_frame, encode_frame};
use std::time::{Duration, Instant};

/// Result of a receive-side callback invocation, surfaced to
/// `PdReceiver` (§6.3's `pdInfo.resultCode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PdResult {
    Ok,
    Timeout,
}

/// Application hook for inbound PD events, invoked from the scheduler
/// thread only (§4.6's "receive callbacks are invoked from the
/// scheduler thread only").
pub trait PdReceiver: Send {
    fn on_pd(&mut self, handle: Handle, com_id: u32, result: PdResult);
}

/// `(handle, publisher)` pairs whose `next_cycle_deadline` has passed,
/// in registry insertion order (P7).
pub fn due_publishers(registry: &Registry, now: Instant) -> Vec<Handle> {
    registry
        .publishers()
        .filter(|(_, t)| t.next_cycle_deadline <= now)
        .map(|(h, _)| h)
        .collect()
}

/// `(handle, pull-requester)` pairs whose `next_request_deadline` has
/// passed, in registry insertion order.
pub fn due_pull_requesters(registry: &Registry, now: Instant) -> Vec<Handle> {
    registry
        .pull_requesters()
        .filter(|(_, t)| t.next_request_deadline <= now)
        .map(|(h, _)| h)
        .collect()
}

/// Build the outbound wire frame for a due publisher, copying its
/// current payload out of the Traffic Store. Advances
/// `next_cycle_deadline` by exactly one `cycle` from the deadline that
/// just fired (so a missed tick doesn't accumulate drift), matching the
/// lossy-by-design back-pressure rule of §5.
pub fn emit_publisher(
    handle: Handle,
    registry: &mut Registry,
    store: &TrafficStore,
    dataset_map: &DatasetMap,
    sequence: u32,
    topo_count: u32,
    now: Instant,
) -> Result<Vec<u8>> {
    let telegram = registry.publisher(handle)?;
    let com_id = telegram.com_id;
    let dataset_id = telegram.dataset_id;
    let offset = telegram.store_offset;
    let payload_size = telegram.payload_size;
    let marshall = telegram.marshall;
    let cycle = telegram.cycle;

    let mut host_bytes = vec![0u8; payload_size];
    {
        let guard = store.lock();
        guard.read(offset, &mut host_bytes);
    }

    // The Traffic Store holds bytes in the same packed big-endian layout
    // `dataset.rs` produces; "host layout" and "wire layout" coincide in
    // this crate (there is no separate native-struct ABI to match). The
    // `MARSHALL` flag therefore governs whether the stored bytes are
    // schema-validated (and re-derived from a `Value`, which matters for
    // schemas with variable-length tails) or copied through verbatim.
    let payload = if marshall {
        let schema = dataset_map
            .get(&dataset_id)
            .ok_or(Error::UnknownDatasetErr(dataset_id))?;
        let value = crate::dataset::unmarshall(schema, dataset_map, &host_bytes)?;
        crate::dataset::marshall(schema, dataset_map, &value)?
    } else {
        host_bytes
    };

    let header = FrameHeader {
        sequence,
        protocol_version: 1,
        msg_type: MsgType::Pd,
        com_id,
        topo_count,
        dataset_length: payload.len() as u32,
        reply_com_id: 0,
        reply_ip_address: 0,
        session: [0u8; 16],
        dst_uri: [0u8; crate::wire::URI_FIELD_SIZE],
    };
    let frame = encode_frame(&header, &payload)?;

    let telegram = registry.publisher_mut(handle)?;
    telegram.next_cycle_deadline += cycle;
    if telegram.next_cycle_deadline <= now {
        telegram.next_cycle_deadline = now + cycle;
    }

    Ok(frame)
}

/// Process one inbound PD datagram: find the matching subscriber, copy
/// (or unmarshall) its payload into the Traffic Store, and clear any
/// pending timeout state (§4.4's receive path).
pub fn receive_pd(
    raw: &[u8],
    src_ip: u32,
    dst_ip: u32,
    registry: &mut Registry,
    store: &TrafficStore,
    dataset_map: &DatasetMap,
    now: Instant,
) -> Result<Handle> {
    let decoded = decode_frame(raw)?;
    let (handle, _) = registry
        .find_subscriber(decoded.header.com_id, src_ip, dst_ip)
        .ok_or(Error::NoReceiver)?;
    let telegram = registry.subscriber(handle)?;
    let offset = telegram.store_offset;
    let payload_size = telegram.payload_size;
    let marshall = telegram.marshall;
    let dataset_id = telegram.dataset_id;

    // A variable-length dataset's wire size can legitimately differ from
    // `payload_size` (the nominal host-layout size); only the raw,
    // unmarshalled path enforces an exact match.
    let host_bytes = if marshall {
        let schema = dataset_map
            .get(&dataset_id)
            .ok_or(Error::UnknownDatasetErr(dataset_id))?;
        let value = crate::dataset::unmarshall(schema, dataset_map, decoded.payload)?;
        crate::dataset::marshall(schema, dataset_map, &value)?
    } else {
        if decoded.payload.len() != payload_size {
            return Err(Error::SizeErr);
        }
        decoded.payload.to_vec()
    };

    {
        let mut guard = store.lock();
        guard.write(offset, &host_bytes);
    }

    let telegram = registry.subscriber_mut(handle)?;
    telegram.last_rx = Some(now);
    telegram.timed_out = false;
    Ok(handle)
}

/// Subscribers whose timeout has just fired (transition, not level):
/// `now - last_rx > timeout` and the telegram hasn't already surfaced
/// this timeout (P5). Applies the `to_behavior` and marks `timed_out`.
pub fn check_timeouts(registry: &mut Registry, store: &TrafficStore, now: Instant) -> Vec<Handle> {
    let fired: Vec<Handle> = registry
        .subscribers()
        .filter(|(_, t)| !t.timed_out && has_timed_out(t.last_rx, t.timeout, now))
        .map(|(h, _)| h)
        .collect();

    for &handle in &fired {
        if let Ok(telegram) = registry.subscriber_mut(handle) {
            telegram.timed_out = true;
            if matches!(telegram.to_behavior, crate::constant::ToBehavior::Zero) {
                let offset = telegram.store_offset;
                let size = telegram.payload_size;
                let mut guard = store.lock();
                guard.zero(offset, size);
            }
        }
    }
    fired
}

fn has_timed_out(last_rx: Option<Instant>, timeout: Duration, now: Instant) -> bool {
    match last_rx {
        Some(t) => now.duration_since(t) > timeout,
        // No frame has ever arrived: the clock starts ticking from
        // telegram creation, which is approximated here by treating an
        // unset `last_rx` as "never fires" — callers seed `last_rx` at
        // subscribe time to the subscribe instant so the first timeout
        // is still well-defined.
        None => false,
    }
}
