//! A two-party treasure-hunt game and file-backup utility running
//! directly on raw Ethernet frames, with no IP or UDP layer.
//!
//! The stack, bottom to top: [`frame`] (wire codec) → [`link`]
//! (layer-2 socket abstraction) → [`channel`] (stop-and-wait ARQ) →
//! [`transfer`] (file-transfer and backup sub-protocols) and [`game`]
//! (grid/treasure state), driven by the session loops in each binary
//! under `src/bin/`.

pub mod channel;
pub mod error;
pub mod frame;
pub mod game;
pub mod link;
pub mod session;
pub mod transfer;

pub use error::{Error, Result};
