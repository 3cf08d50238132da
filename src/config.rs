// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Configuration records (§6.1). These are plain, `serde`-deserializable
//! data — parsing them from an on-disk XML/TOML/whatever document is the
//! caller's concern (surfaced to the core only as a fatal `XmlErr` at
//! `init` time); the core itself only ever reads the parsed struct.

use crate::constant::{PREALLOC_BLOCK_SIZES, SubnetId, ToBehavior};
use serde::Deserialize;
use std::time::Duration;

/// Memory allocator sizing (§6.1): the Traffic Store's backing
/// allocator is carved into `PREALLOC_BLOCK_SIZES`-sized classes, the
/// count of each given here.
#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    /// Total bytes available to the allocator (independent of, and
    /// typically smaller than, `TRAFFIC_STORE_SIZE`).
    pub size: usize,
    /// Preallocated block counts, one entry per `PREALLOC_BLOCK_SIZES`
    /// class.
    #[serde(default = "MemoryConfig::default_prealloc")]
    pub prealloc: [u32; PREALLOC_BLOCK_SIZES.len()],
}

impl MemoryConfig {
    fn default_prealloc() -> [u32; PREALLOC_BLOCK_SIZES.len()] {
        [0; PREALLOC_BLOCK_SIZES.len()]
    }
}

/// Debug/log sink configuration (§6.1, §4.8).
#[derive(Debug, Clone, Deserialize)]
pub struct DebugConfig {
    pub file_name: Option<String>,
    #[serde(default)]
    pub level: DebugLevel,
    #[serde(default)]
    pub with_timestamps: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub enum DebugLevel {
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

/// SDT (Safety Data Transmission) passthrough parameters. The core never
/// interprets these — CRC/sequence validation is a Non-goal — it only
/// threads the struct from config through to `PublishTelegram`/
/// `SubscribeTelegram` so a future SDT layer has somewhere to read
/// parameters from, matching how `tau_ldLadder.c`/`tau_xml.c` carry
/// `TRDP_SDT_PAR_T` without the ladder example itself validating it.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SdtPar {
    #[serde(default)]
    pub safety_enabled: bool,
    #[serde(default)]
    pub n_guard: u32,
    #[serde(default)]
    pub n_rx_safe: u32,
    #[serde(default)]
    pub cmthr: u32,
}

/// Per-subnet interface parameters (§6.1).
#[derive(Debug, Clone, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub subnet: SubnetId,
    pub host_ip: u32,
    pub leader_ip: u32,
    #[serde(default)]
    pub sdt: Option<SdtPar>,
}

/// Communication parameters shared by a set of exchanges (§6.1).
#[derive(Debug, Clone, Deserialize)]
pub struct ComParConfig {
    pub id: u32,
    #[serde(default = "ComParConfig::default_qos")]
    pub qos: u8,
    #[serde(default = "ComParConfig::default_ttl")]
    pub ttl: u8,
    #[serde(default)]
    pub retries: u8,
}

impl ComParConfig {
    fn default_qos() -> u8 {
        5
    }
    fn default_ttl() -> u8 {
        64
    }
}

/// One dataset description as loaded from configuration; resolved into a
/// [`crate::dataset::DatasetSchema`] before use.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    pub dataset_id: u32,
    pub elements: Vec<DatasetElementConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetElementConfig {
    pub type_name: String,
    /// `0` means variable length, matching [`crate::dataset::DatasetElement::count`].
    pub count: u32,
}

/// Maps a `comId` to the dataset it carries (§3.1's `ComIdDatasetMap`).
#[derive(Debug, Clone, Deserialize)]
pub struct ComIdDatasetMap {
    pub com_id: u32,
    pub dataset_id: u32,
}

/// PD-specific parameters of one exchange (§6.1).
#[derive(Debug, Clone, Deserialize)]
pub struct PdPar {
    pub cycle: Duration,
    pub timeout: Duration,
    #[serde(default)]
    pub to_behavior: ToBehavior,
    #[serde(default)]
    pub redundant: bool,
}

impl Default for ToBehavior {
    fn default() -> Self {
        ToBehavior::Zero
    }
}

/// MD-specific parameters of one exchange (§6.1).
#[derive(Debug, Clone, Deserialize)]
pub struct MdPar {
    pub reply_timeout: Duration,
    pub confirm_timeout: Duration,
    #[serde(default)]
    pub num_sessions: u32,
    /// `flags.TCP` (§4.5): use a pooled TCP connection for this
    /// exchange's MD traffic instead of UDP. Absent/`false` means UDP.
    #[serde(default)]
    pub tcp: bool,
}

/// One configured exchange: a `comId`, its com-par reference, and
/// whichever of `pd`/`md` applies (§6.1).
#[derive(Debug, Clone, Deserialize)]
pub struct ExchgPar {
    pub com_id: u32,
    pub com_par_id: u32,
    pub dataset_id: u32,
    #[serde(default)]
    pub pd: Option<PdPar>,
    #[serde(default)]
    pub md: Option<MdPar>,
}

/// Top-level configuration document (§6.1): the union of everything
/// `init()` needs before the scheduler can start.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub memory: MemoryConfig,
    #[serde(default)]
    pub debug: Option<DebugConfig>,
    pub interfaces: Vec<InterfaceConfig>,
    #[serde(default)]
    pub com_pars: Vec<ComParConfig>,
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
    #[serde(default)]
    pub com_id_map: Vec<ComIdDatasetMap>,
    #[serde(default)]
    pub exchanges: Vec<ExchgPar>,
}
