// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Endpoint descriptors
//!
//! Bus and store endpoints are validated when they are built, so a bad
//! address is rejected before any network attempt is made.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;
use url::Url;

/// Scheme accepted for bus endpoints.
pub const BUS_SCHEME: &str = "nats";

/// Maximum accepted length of a bus URL.
pub const MAX_URL_LENGTH: usize = 2083;

const IPV4_PATTERN: &str = r"^(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.(25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)$";

/// Endpoint validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    #[error("URL length {0} exceeds max. limit of {} characters", MAX_URL_LENGTH)]
    TooLong(usize),

    #[error("URL scheme '{0}' is incorrect, must be {}://", BUS_SCHEME)]
    Scheme(String),

    #[error("Malformed endpoint '{0}'")]
    Malformed(String),

    #[error("Invalid host '{0}', expected an IPv4 address or localhost")]
    Host(String),

    #[error("Invalid port in '{0}', must be between 0 and 65535")]
    Port(String),
}

fn ipv4_regex() -> Option<&'static Regex> {
    static IPV4: OnceLock<Option<Regex>> = OnceLock::new();
    IPV4.get_or_init(|| Regex::new(IPV4_PATTERN).ok()).as_ref()
}

fn validate_host(host: &str) -> Result<(), EndpointError> {
    let host = host.trim();
    if host == "localhost" || ipv4_regex().is_some_and(|re| re.is_match(host)) {
        Ok(())
    } else {
        Err(EndpointError::Host(host.to_string()))
    }
}

/// Validated bus URL (`nats://<ipv4|localhost>:<port>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BusUrl {
    url: String,
    host: String,
    port: u16,
}

impl BusUrl {
    /// Parse and validate a bus URL.
    pub fn parse(url: &str) -> Result<Self, EndpointError> {
        if url.len() > MAX_URL_LENGTH {
            return Err(EndpointError::TooLong(url.len()));
        }

        let parsed = Url::parse(url).map_err(|e| match e {
            url::ParseError::InvalidPort => EndpointError::Port(url.to_string()),
            _ => EndpointError::Malformed(url.to_string()),
        })?;

        if parsed.scheme() != BUS_SCHEME {
            return Err(EndpointError::Scheme(parsed.scheme().to_string()));
        }

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| EndpointError::Malformed(url.to_string()))?;
        validate_host(host)?;

        let port = parsed
            .port()
            .ok_or_else(|| EndpointError::Port(url.to_string()))?;

        Ok(Self {
            url: url.to_string(),
            host: host.to_string(),
            port,
        })
    }

    /// Full URL as given.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for BusUrl {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            host: "localhost".to_string(),
            port: 4222,
        }
    }
}

impl FromStr for BusUrl {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BusUrl {
    type Error = EndpointError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BusUrl> for String {
    fn from(value: BusUrl) -> Self {
        value.url
    }
}

impl fmt::Display for BusUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}

/// Validated store address (`<ipv4|localhost>:<port>`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreAddress {
    host: String,
    port: u16,
}

impl StoreAddress {
    /// Parse and validate a `host:port` pair.
    pub fn parse(address: &str) -> Result<Self, EndpointError> {
        let mut parts = address.split(':');
        let (host, port) = match (parts.next(), parts.next(), parts.next()) {
            (Some(host), Some(port), None) => (host.trim(), port.trim()),
            _ => return Err(EndpointError::Malformed(address.to_string())),
        };

        validate_host(host)?;
        let port = port
            .parse::<u16>()
            .map_err(|_| EndpointError::Port(address.to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl Default for StoreAddress {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
        }
    }
}

impl FromStr for StoreAddress {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for StoreAddress {
    type Error = EndpointError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StoreAddress> for String {
    fn from(value: StoreAddress) -> Self {
        value.to_string()
    }
}

impl fmt::Display for StoreAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
