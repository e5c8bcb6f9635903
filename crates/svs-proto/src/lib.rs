//! # svs-proto
//!
//! Protocol primitives for the svsd services daemon.
//!
//! This crate covers the wire-level pieces of a TS6 server-to-server link
//! that are independent of daemon state:
//!
//! - Line parsing (`:source VERB arg arg :trailing`) with the classic
//!   parameter limit, and an owned line builder for outbound traffic
//! - RFC 1459 casemapping, used for every name comparison and hash key
//! - Hostmask wildcard matching, mask collapsing and CIDR matching
//! - Channel mode bitsets with parse/format/diff helpers
//! - Duration strings (`2w3d1h`) as used by timed bans and suspensions
//! - TS6 UID suffix arithmetic
//! - A tokio codec for CRLF-framed lines (feature `tokio`)

#![deny(clippy::all)]

pub mod casemap;
pub mod duration;
pub mod error;
#[cfg(feature = "tokio")]
pub mod line;
pub mod mask;
pub mod message;
pub mod mode;
pub mod uid;

pub use self::casemap::{irc_eq, irc_lower_char, irc_to_lower};
pub use self::duration::{format_duration, parse_duration};
pub use self::error::ProtoError;
#[cfg(feature = "tokio")]
pub use self::line::LineCodec;
pub use self::mask::{cidr_match, collapse, make_usermask, match_mask};
pub use self::message::{Line, ParsedLine, MAXPARA};
pub use self::mode::{ChannelModes, ModeDelta, MODE_INVITEONLY, MODE_KEY, MODE_LIMIT, MODE_MODERATED, MODE_NOEXTERNAL, MODE_PRIVATE, MODE_REGONLY, MODE_SECRET, MODE_SSLONLY, MODE_TOPICLOCK};
pub use self::uid::UidSuffix;

/// Largest wire line we accept or emit, including CRLF.
pub const BUFSIZE: usize = 512;

/// Maximum channel name length accepted from the uplink.
pub const CHANNELLEN: usize = 200;

/// Maximum channel key length carried in a mode record.
pub const KEYLEN: usize = 24;
