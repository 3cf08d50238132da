// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Protocol-wide constants (§6.1, §6.2).

use serde::Deserialize;

/// Size of the Traffic Store (§3.1): a fixed 64 KiB region.
pub const TRAFFIC_STORE_SIZE: usize = 65536;

/// Default UDP port for PD traffic.
pub const PD_PORT: u16 = 20548;
/// Default port for MD traffic, used over both UDP and TCP.
pub const MD_PORT: u16 = 20550;

/// Upper bound on the scheduler's socket-wait timeout (§4.6, §5).
pub const SCHEDULER_MAX_WAIT_MICROS: u64 = 100_000;

/// Sentinel meaning "no source/destination IP filter" alongside `0`
/// (Open Question #1 — resolved against `tau_ldLadder.c`'s treatment of
/// the IPv4 broadcast address as a wildcard).
pub const BROADCAST_ADDRESS: u32 = 0xFFFF_FFFF;

/// The 15 fixed preallocated block sizes of `MemoryConfig` (§6.1).
pub const PREALLOC_BLOCK_SIZES: [u32; 15] = [
    32, 72, 128, 256, 512, 1024, 1480, 2048, 4096, 11520, 16384, 32768, 65536, 131072, 0,
];

/// Wire-level message type tag (§6.2). Carried on the wire as two ASCII
/// bytes, matching the convention used by the original TRDP ladder
/// example rather than a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    /// Process Data.
    Pd,
    /// PD Pull reply.
    Pp,
    /// PD Pull request.
    Pr,
    /// MD Notify.
    Mn,
    /// MD Request.
    Mr,
    /// MD Reply.
    Mp,
    /// MD ReplyQuery.
    Mq,
    /// MD Confirm.
    Mc,
    /// MD Error reply.
    Me,
}

impl MsgType {
    pub fn wire_tag(self) -> [u8; 2] {
        match self {
            MsgType::Pd => *b"Pd",
            MsgType::Pp => *b"Pp",
            MsgType::Pr => *b"Pr",
            MsgType::Mn => *b"Mn",
            MsgType::Mr => *b"Mr",
            MsgType::Mp => *b"Mp",
            MsgType::Mq => *b"Mq",
            MsgType::Mc => *b"Mc",
            MsgType::Me => *b"Me",
        }
    }

    pub fn from_wire_tag(tag: [u8; 2]) -> Option<MsgType> {
        match &tag {
            b"Pd" => Some(MsgType::Pd),
            b"Pp" => Some(MsgType::Pp),
            b"Pr" => Some(MsgType::Pr),
            b"Mn" => Some(MsgType::Mn),
            b"Mr" => Some(MsgType::Mr),
            b"Mp" => Some(MsgType::Mp),
            b"Mq" => Some(MsgType::Mq),
            b"Mc" => Some(MsgType::Mc),
            b"Me" => Some(MsgType::Me),
            _ => None,
        }
    }

    /// True for the MD types, which carry/echo a session UUID and
    /// participate in the reply/confirm state machines.
    pub fn is_md(self) -> bool {
        matches!(
            self,
            MsgType::Mn | MsgType::Mr | MsgType::Mp | MsgType::Mq | MsgType::Mc | MsgType::Me
        )
    }
}

/// Which physical subnet a telegram or session belongs to (§1, §3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum SubnetId {
    Subnet1,
    Subnet2,
}

impl SubnetId {
    pub fn other(self) -> SubnetId {
        match self {
            SubnetId::Subnet1 => SubnetId::Subnet2,
            SubnetId::Subnet2 => SubnetId::Subnet1,
        }
    }
}

/// Which subnet's inbound PD is currently authorized to overwrite the
/// Traffic Store (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteSubnet {
    Subnet1,
    Subnet2,
    /// Resolves to the first subnet reporting link-up.
    Auto,
}

/// Opaque, application-owned reference carried through `callerRef`/
/// `sessionRef`/`userRef` everywhere in the public API (Open Question,
/// resolved in SPEC_FULL.md §3: an opaque 64-bit handle rather than a
/// pointer). The core never dereferences it.
pub type UserRef = u64;

/// Timeout-to-behavior policy for a PD subscriber (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ToBehavior {
    /// Overwrite the store slot with zero bytes on timeout.
    Zero,
    /// Leave the slot untouched; caller sees the last good value.
    Keep,
}
