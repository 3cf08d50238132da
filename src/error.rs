// Copyright 2019 Petar Dambovaliev. All rights reserved.
// This software may be modified and distributed under the terms
// of the BSD license. See the LICENSE file for details.

//! Stable error taxonomy for the runtime (§7).

use std::error;
use std::fmt;
use std::io::{Error as IOError, ErrorKind as IOErrorKind};

/// Stable taxonomy of error kinds, carried across the whole core.
///
/// Names are abstract, not tied to any single component, so that a
/// `Result<T, Error>` returned from the registry means the same thing as
/// one returned from the scheduler or the façade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Caller passed an invalid parameter (null-equivalent, zero comId,
    /// malformed URI, out-of-range size, ...).
    ParamErr(String),
    /// Allocation or capacity failure.
    MemErr,
    /// A mutex was poisoned or could not be acquired.
    MutexErr,
    /// An API call was made before `init()` completed successfully.
    NoInitErr,
    /// Operation referred to a publisher that does not exist.
    NoPubErr,
    /// Operation referred to a subscriber that does not exist.
    NoSubErr,
    /// The MD pending-session table is full (`maxNumSessions`).
    NoSessionErr,
    /// A PD subscriber timed out waiting for a frame.
    TimeoutErr,
    /// An MD `Request` timed out waiting for its `Reply`.
    ReplyTimeoutErr,
    /// An MD `ReplyQuery` timed out waiting for its `Confirm`.
    ConfirmTimeoutErr,
    /// Socket creation/bind/connect failure.
    SockErr(String),
    /// Generic I/O failure, wrapped with its `io::ErrorKind`.
    IoErr(IOErrorKind),
    /// The marshalling engine rejected a frame.
    MarshallingErr(MarshallingError),
    /// A comId has no entry in the `ComIdDatasetMap`.
    UnknownComIdErr(u32),
    /// A nested dataset reference resolves to no schema.
    UnknownDatasetErr(u32),
    /// A declared size did not match the data actually present.
    SizeErr,
    /// The scheduler thread could not be spawned.
    ThreadErr,
    /// Configuration parsing failed (owned by the external loader; the
    /// core only propagates it as a fatal `init` condition).
    XmlErr(String),
    /// No listener matched an inbound MD frame's routing tuple.
    NoReceiver,
}

/// Sub-taxonomy for marshalling-specific failures (§4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarshallingError {
    UnknownDataset(u32),
    BufferTooSmall { needed: usize, got: usize },
    MalformedFrame(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParamErr(reason) => write!(f, "PARAM_ERR: {}", reason),
            Error::MemErr => write!(f, "MEM_ERR: allocation failed"),
            Error::MutexErr => write!(f, "MUTEX_ERR: lock could not be acquired"),
            Error::NoInitErr => write!(f, "NOINIT_ERR: core not initialized"),
            Error::NoPubErr => write!(f, "NOPUB_ERR: publisher not found"),
            Error::NoSubErr => write!(f, "NOSUB_ERR: subscriber not found"),
            Error::NoSessionErr => write!(f, "NOSESSION_ERR: session table full"),
            Error::TimeoutErr => write!(f, "TIMEOUT_ERR: PD receive timed out"),
            Error::ReplyTimeoutErr => write!(f, "REPLYTIMEOUT_ERR: MD reply timed out"),
            Error::ConfirmTimeoutErr => write!(f, "CONFIRMTIMEOUT_ERR: MD confirm timed out"),
            Error::SockErr(reason) => write!(f, "SOCK_ERR: {}", reason),
            Error::IoErr(kind) => write!(f, "IO_ERR: {:?}", kind),
            Error::MarshallingErr(e) => write!(f, "MARSHALLING_ERR: {}", e),
            Error::UnknownComIdErr(com_id) => write!(f, "UNKNOWNCOMID_ERR: {}", com_id),
            Error::UnknownDatasetErr(dataset_id) => {
                write!(f, "UNKNOWNDATASET_ERR: {}", dataset_id)
            }
            Error::SizeErr => write!(f, "SIZE_ERR: declared size mismatch"),
            Error::ThreadErr => write!(f, "THREAD_ERR: scheduler thread could not start"),
            Error::XmlErr(reason) => write!(f, "XML_ERR: {}", reason),
            Error::NoReceiver => write!(f, "NOTEXIST: no listener matched"),
        }
    }
}

impl fmt::Display for MarshallingError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MarshallingError::UnknownDataset(id) => write!(f, "unknown dataset {}", id),
            MarshallingError::BufferTooSmall { needed, got } => {
                write!(f, "buffer too small: need {} got {}", needed, got)
            }
            MarshallingError::MalformedFrame(reason) => write!(f, "malformed frame: {}", reason),
        }
    }
}

impl From<IOError> for Error {
    fn from(e: IOError) -> Self {
        Error::IoErr(e.kind())
    }
}

impl From<MarshallingError> for Error {
    fn from(e: MarshallingError) -> Self {
        Error::MarshallingErr(e)
    }
}

// This is important for other errors to wrap this one.
impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        None
    }
}

pub type Result<T> = std::result::Result<T, Error>;
