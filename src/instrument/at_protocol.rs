//! AT command client for the companion spectral device
//!
//! ## Protocol
//!
//! The NIR companion (AS7263 in UART mode) speaks a line-oriented AT dialect:
//! - Link: 115200 baud, 8N1
//! - Requests: ASCII command followed by exactly one `\r\n`
//! - Replies: zero or more numeric fields separated by `,`, `\r` or `\n`, then `OK`
//!
//! The device is chatty and its separators are inconsistent, so replies are not read
//! line by line. Each command is followed by a fixed settle delay, after which the bytes
//! that are already buffered are drained. Only `ATCDATA` carries data; everything else
//! is discarded.
//!
//! ## Field parsing
//!
//! [`ResponseParser`] commits the accumulated token at every separator. The letter `O`
//! is a separator too, and additionally arms a one-byte lookahead: an immediately
//! following `K` completes the acknowledgement and ends the response. An `O` followed by
//! anything else has only acted as a separator, so `1,2O,3\r\nOK` yields `[1, 2, 3]`.
//! A token left without a trailing separator is never committed.
//!
//! At most [`CHANNEL_COUNT`] fields are stored; extra fields are dropped silently and
//! slots that receive no field keep whatever the caller put there.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace, warn};

use crate::adapters::Adapter;
use crate::error::ProtocolError;
use crate::hardware::Gain;

/// Number of spectral channels in one reply.
pub const CHANNEL_COUNT: usize = 6;

/// Per-channel values in a fixed, caller-defined order.
pub type ChannelBuffer = [f64; CHANNEL_COUNT];

/// Wait between writing a command and draining its reply.
pub const RESPONSE_SETTLE: Duration = Duration::from_millis(300);

const LINE_TERMINATOR: &[u8] = b"\r\n";
const ACK_POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 64;

/// The fixed AT vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// `AT`
    Handshake,
    /// `ATINTTIME=<1-255>`
    SetIntegrationTime(u8),
    /// `ATGAIN=<0-3>`
    SetGain(Gain),
    /// `ATLED1=100` when on, `ATLED1=0` when off
    SetLed(bool),
    /// `ATLEDC=<hex byte>`
    SetLedCurrent(u8),
    /// `ATCDATA`, the only command whose reply carries channel data
    ReadChannels,
}

impl Command {
    /// `ATINTTIME`, rejecting zero ticks.
    pub fn integration_time(ticks: u8) -> Result<Self, ProtocolError> {
        if ticks == 0 {
            return Err(ProtocolError::InvalidArgument {
                command: "ATINTTIME",
                value: 0,
                expected: "1..=255",
            });
        }
        Ok(Command::SetIntegrationTime(ticks))
    }

    /// `ATGAIN` from a raw code.
    pub fn gain(code: u8) -> Result<Self, ProtocolError> {
        Gain::from_code(code)
            .map(Command::SetGain)
            .ok_or(ProtocolError::InvalidArgument {
                command: "ATGAIN",
                value: u32::from(code),
                expected: "0..=3",
            })
    }

    /// Whether the reply should be parsed into a [`ChannelBuffer`].
    pub fn carries_data(&self) -> bool {
        matches!(self, Command::ReadChannels)
    }

    /// Wire bytes: command text plus CR LF.
    pub fn frame(&self) -> Vec<u8> {
        let mut frame = self.to_string().into_bytes();
        frame.extend_from_slice(LINE_TERMINATOR);
        frame
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Handshake => write!(f, "AT"),
            Command::SetIntegrationTime(ticks) => write!(f, "ATINTTIME={ticks}"),
            Command::SetGain(gain) => write!(f, "ATGAIN={}", gain.code()),
            Command::SetLed(true) => write!(f, "ATLED1=100"),
            Command::SetLed(false) => write!(f, "ATLED1=0"),
            Command::SetLedCurrent(level) => write!(f, "ATLEDC=0x{level:02X}"),
            Command::ReadChannels => write!(f, "ATCDATA"),
        }
    }
}

/// Handling of channel fields that are not numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericPolicy {
    /// Use [`parse_float_or_zero`]
    #[default]
    Permissive,
    /// Fail the read with [`ProtocolError::MalformedField`]
    Strict,
}

/// How long the client keeps reading a data reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseMode {
    /// Drain what is buffered after the settle delay, then stop
    #[default]
    BestEffort,
    /// Keep polling until `OK` arrives or the timeout elapses
    UntilAck(Duration),
}

/// Permissive number parse.
///
/// Surrounding whitespace is ignored and the longest numeric prefix wins, so `"12.5abc"`
/// reads as `12.5`. Anything without a numeric prefix, and any non-finite result, is `0.0`.
pub fn parse_float_or_zero(token: &str) -> f64 {
    let token = token.trim();
    let end = numeric_prefix_len(token.as_bytes());
    token[..end]
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
        .unwrap_or(0.0)
}

/// Length of the longest `[+-]digits[.digits][(e|E)[+-]digits]` prefix.
///
/// An exponent marker only counts when digits follow it, so `"7e"` stops at `7`.
fn numeric_prefix_len(bytes: &[u8]) -> usize {
    let digits_from = |mut i: usize| {
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        i
    };

    let mut i = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let int_end = digits_from(i);
    let mut mantissa_digits = int_end - i;
    i = int_end;

    if bytes.get(i) == Some(&b'.') {
        let frac_end = digits_from(i + 1);
        mantissa_digits += frac_end - (i + 1);
        i = frac_end;
    }

    if mantissa_digits == 0 {
        return 0;
    }

    if matches!(bytes.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(bytes.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let exp_end = digits_from(j);
        if exp_end > j {
            i = exp_end;
        }
    }

    i
}

fn parse_strict(token: &str) -> Option<f64> {
    token
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

/// Streaming parser for one data reply.
///
/// Bytes may be fed in arbitrary chunks; an `O` at the end of one chunk still pairs
/// with a `K` at the start of the next.
pub struct ResponseParser<'a> {
    channels: &'a mut ChannelBuffer,
    policy: NumericPolicy,
    token: String,
    cursor: usize,
    armed: bool,
    terminated: bool,
}

impl<'a> ResponseParser<'a> {
    /// Parser writing into `channels` from slot 0.
    pub fn new(channels: &'a mut ChannelBuffer, policy: NumericPolicy) -> Self {
        Self {
            channels,
            policy,
            token: String::new(),
            cursor: 0,
            armed: false,
            terminated: false,
        }
    }

    /// Consume bytes, returning how many were used.
    ///
    /// Stops right after the acknowledgement; the remaining bytes are not part of
    /// this reply.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<usize, ProtocolError> {
        if self.terminated {
            return Ok(0);
        }

        for (i, &byte) in bytes.iter().enumerate() {
            if std::mem::take(&mut self.armed) && byte == b'K' {
                self.terminated = true;
                return Ok(i + 1);
            }

            match byte {
                b',' | b'\r' | b'\n' => self.commit()?,
                b'O' => {
                    self.commit()?;
                    self.armed = true;
                }
                _ => self.token.push(char::from(byte)),
            }
        }
        Ok(bytes.len())
    }

    /// Slots written so far.
    pub fn filled(&self) -> usize {
        self.cursor
    }

    /// Whether `OK` has been seen.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    fn commit(&mut self) -> Result<(), ProtocolError> {
        if self.token.is_empty() {
            return Ok(());
        }

        if self.cursor < CHANNEL_COUNT {
            let value = match self.policy {
                NumericPolicy::Permissive => parse_float_or_zero(&self.token),
                NumericPolicy::Strict => {
                    parse_strict(&self.token).ok_or_else(|| ProtocolError::MalformedField {
                        index: self.cursor,
                        token: self.token.clone(),
                    })?
                }
            };
            self.channels[self.cursor] = value;
            self.cursor += 1;
        } else {
            trace!(token = %self.token, "Dropping field beyond channel capacity");
        }

        self.token.clear();
        Ok(())
    }
}

/// Request/response client over an [`Adapter`].
pub struct AtClient<A: Adapter> {
    adapter: A,
    response_settle: Duration,
    policy: NumericPolicy,
    mode: ResponseMode,
}

impl<A: Adapter> AtClient<A> {
    /// Client with the stock 300 ms settle, permissive parsing and best-effort reads.
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            response_settle: RESPONSE_SETTLE,
            policy: NumericPolicy::default(),
            mode: ResponseMode::default(),
        }
    }

    /// Override the post-command settle delay.
    pub fn with_response_settle(mut self, settle: Duration) -> Self {
        self.response_settle = settle;
        self
    }

    /// Select the numeric policy for channel fields.
    pub fn with_numeric_policy(mut self, policy: NumericPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Select how data replies are read.
    pub fn with_response_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }

    /// The underlying channel.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Send `command`, wait for the settle delay, then consume the reply.
    ///
    /// With `channels` supplied and a data-bearing command, reply fields are written
    /// into it in order; otherwise the buffered reply is discarded. Slots that receive
    /// no field are left untouched.
    pub async fn send_command(
        &mut self,
        command: &Command,
        channels: Option<&mut ChannelBuffer>,
    ) -> Result<(), ProtocolError> {
        self.adapter.write(&command.frame()).await?;
        debug!(%command, "Sent AT command");

        sleep(self.response_settle).await;

        match channels {
            Some(channels) if command.carries_data() => self.read_channels(channels).await,
            Some(_) => {
                debug!(%command, "Command carries no data, discarding reply");
                self.discard_available().await.map(drop)
            }
            None => {
                let discarded = self.discard_available().await?;
                trace!(%command, discarded, "Discarded reply");
                Ok(())
            }
        }
    }

    /// `ATCDATA` into a zeroed buffer.
    pub async fn query_channels(&mut self) -> Result<ChannelBuffer, ProtocolError> {
        let mut channels = [0.0; CHANNEL_COUNT];
        self.send_command(&Command::ReadChannels, Some(&mut channels))
            .await?;
        Ok(channels)
    }

    async fn read_channels(&mut self, channels: &mut ChannelBuffer) -> Result<(), ProtocolError> {
        let policy = self.policy;
        let deadline = match self.mode {
            ResponseMode::BestEffort => None,
            ResponseMode::UntilAck(timeout) => Some(Instant::now() + timeout),
        };

        let mut parser = ResponseParser::new(channels, policy);
        let mut buffer = [0u8; READ_CHUNK];

        loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }

            let n = self.adapter.read(&mut buffer).await?;
            if n == 0 {
                if deadline.is_none() {
                    break;
                }
                sleep(ACK_POLL_INTERVAL).await;
                continue;
            }

            let fed = parser.feed(&buffer[..n]);
            if fed.is_err() {
                self.discard_available().await?;
            }
            let consumed = fed?;

            if parser.is_terminated() {
                let stale = (n - consumed) + self.discard_available().await?;
                if stale > 0 {
                    trace!(stale, "Discarded bytes after acknowledgement");
                }
                break;
            }
        }

        let filled = parser.filled();
        if parser.is_terminated() {
            debug!(filled, "Channel reply complete");
        } else if deadline.is_some() {
            warn!(filled, "Timed out waiting for acknowledgement");
        } else {
            debug!(filled, "No acknowledgement in buffered reply");
        }
        Ok(())
    }

    async fn discard_available(&mut self) -> Result<usize, ProtocolError> {
        let mut buffer = [0u8; READ_CHUNK];
        let mut total = 0;
        loop {
            let n = self.adapter.read(&mut buffer).await?;
            if n == 0 {
                return Ok(total);
            }
            total += n;
        }
    }
}
