// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Crate-wide error type.
//!
//! Only two kinds of failure are fatal to a node: an inbound message type
//! nobody can handle, and a broken internal invariant. Everything the
//! protocol treats as a benign no-op (duplicate joins, queries for groups
//! not joined, leaves for unknown groups) never produces an `Error`.

use std::net::Ipv4Addr;

use thiserror::Error;

use crate::config::ConfigError;
use crate::protocols::message::DecodeError;
use crate::InterfaceId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("unhandled IGMP message type {msg_type:#04x} and no external router attached")]
    UnhandledMessageType { msg_type: u8 },

    #[error("internal invariant violated: {0}")]
    Invariant(String),

    #[error("interface {0} is not known to the registry")]
    UnknownInterface(InterfaceId),

    #[error("{0} is not a multicast address")]
    NotMulticast(Ipv4Addr),

    #[error("invalid IPv4 address '{0}'")]
    InvalidAddress(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl Error {
    /// Errors after which the node's state can no longer be trusted
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnhandledMessageType { .. } | Error::Invariant(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
