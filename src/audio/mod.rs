//! # Audio Module
//!
//! Per-guild queues and the playback state machine that drains them.
//!
//! ### [`queue`] - Queue Storage
//! - One contiguous, renumbered queue per guild
//! - Loop modes and the "last started" cursor
//!
//! ### [`player`] - Playback Controller
//! - Idle → Connecting → Playing → Draining → Disconnecting
//! - At most one active stream per guild, bounded retry on errors
//!
//! ### [`transport`] / [`voice`] - Voice Collaborators
//! - Traits the controller talks to, and their songbird/yt-dlp implementations

pub mod player;
pub mod queue;
pub mod transport;
pub mod voice;
