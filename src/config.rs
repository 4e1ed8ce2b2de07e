use anyhow::{Context, Error, Result};
use serde::{Deserialize, Serialize};
use std::{env, str::FromStr};

const DEFAULT_CAPACITY: usize = 64000; // bytes
const DEFAULT_RT_TIMEOUT: u64 = 1000; // ms
const DEFAULT_MAX_RETX_ATTEMPTS: u32 = 8;
const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1000; // bytes

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// The capacity of the outbound byte stream
    send_capacity: usize,

    /// The capacity of the inbound byte stream, which bounds the advertised window
    recv_capacity: usize,

    /// The initial retransmission timeout in milliseconds
    rt_timeout: u64,

    /// The number of consecutive retransmissions tolerated before the connection is reset
    max_retx_attempts: u32,

    /// The maximum number of payload bytes carried by a single segment
    max_payload_size: usize,

    /// The initial sequence number to use, chosen at random if unset
    fixed_isn: Option<u32>,

    /// Whether to keep the connection around after both streams have finished,
    /// to absorb retransmissions from the peer.
    linger_after_streams_finish: bool,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            send_capacity: DEFAULT_CAPACITY,
            recv_capacity: DEFAULT_CAPACITY,
            rt_timeout: DEFAULT_RT_TIMEOUT,
            max_retx_attempts: DEFAULT_MAX_RETX_ATTEMPTS,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
            fixed_isn: None,
            linger_after_streams_finish: true,
        }
    }
}

impl TcpConfig {
    /// Reads the configuration from `TCP_*` environment variables,
    /// falling back to the defaults for any variable which is not set.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            send_capacity: env_or("TCP_SEND_CAPACITY", defaults.send_capacity)?,
            recv_capacity: env_or("TCP_RECV_CAPACITY", defaults.recv_capacity)?,
            rt_timeout: env_or("TCP_RT_TIMEOUT", defaults.rt_timeout)?,
            max_retx_attempts: env_or("TCP_MAX_RETX_ATTEMPTS", defaults.max_retx_attempts)?,
            max_payload_size: env_or("TCP_MAX_PAYLOAD_SIZE", defaults.max_payload_size)?,
            fixed_isn: match env::var("TCP_FIXED_ISN") {
                Ok(value) => Some(parse_var("TCP_FIXED_ISN", &value)?),
                Err(_) => None,
            },
            linger_after_streams_finish: env_or("TCP_LINGER", defaults.linger_after_streams_finish)?,
        }
        .validated()?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).context("failed to parse tcp config from json")?;

        config.validated()
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize tcp config to json")
    }

    fn validated(self) -> Result<Self> {
        if self.max_payload_size == 0 {
            return Err(Error::msg("max payload size must be greater than zero"));
        }

        if self.rt_timeout == 0 {
            return Err(Error::msg("retransmission timeout must be greater than zero"));
        }

        Ok(self)
    }

    pub fn send_capacity(&self) -> usize {
        self.send_capacity
    }

    pub fn with_send_capacity(mut self, value: usize) -> Self {
        self.send_capacity = value;

        self
    }

    pub fn recv_capacity(&self) -> usize {
        self.recv_capacity
    }

    pub fn with_recv_capacity(mut self, value: usize) -> Self {
        self.recv_capacity = value;

        self
    }

    pub fn rt_timeout(&self) -> u64 {
        self.rt_timeout
    }

    pub fn with_rt_timeout(mut self, value: u64) -> Self {
        assert!(value > 0);
        self.rt_timeout = value;

        self
    }

    pub fn max_retx_attempts(&self) -> u32 {
        self.max_retx_attempts
    }

    pub fn with_max_retx_attempts(mut self, value: u32) -> Self {
        self.max_retx_attempts = value;

        self
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    pub fn with_max_payload_size(mut self, value: usize) -> Self {
        assert!(value > 0);
        self.max_payload_size = value;

        self
    }

    pub fn fixed_isn(&self) -> Option<u32> {
        self.fixed_isn
    }

    pub fn with_fixed_isn(mut self, value: Option<u32>) -> Self {
        self.fixed_isn = value;

        self
    }

    pub fn linger_after_streams_finish(&self) -> bool {
        self.linger_after_streams_finish
    }

    pub fn with_linger_after_streams_finish(mut self, value: bool) -> Self {
        self.linger_after_streams_finish = value;

        self
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => parse_var(name, &value),
        Err(_) => Ok(default),
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse::<T>()
        .with_context(|| format!("could not parse {} value \"{}\"", name, value))
}
