// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

//! Transport and segment synchronization for a sequencer.
//!
//! The crate sits between an editable composition and a real-time
//! sequencing engine:
//! - `control`: track routing state the real-time side reads lock-free
//! - `sync`: deferred, coalesced mirroring of segments into engine buffers
//! - `transport`: the play/record/stop state machine
//! - `failure`: classification and rate limiting of engine failures
//!
//! The document, studio and engine are traits; `document::memory` and
//! `engine::offline` provide headless implementations.

pub mod config;
pub mod control;
pub mod document;
pub mod engine;
pub mod failure;
pub mod midi;
pub mod sync;
pub mod timing;
pub mod transport;

pub use config::SequencerSettings;
pub use control::ControlBlock;
pub use engine::SequencerEngine;
pub use transport::{SequenceManager, TransportError, TransportEvent, TransportStatus};
