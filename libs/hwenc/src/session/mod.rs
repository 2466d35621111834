// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Hardware session lifecycle.
//!
//! [`SessionManager`] negotiates parameters with the device and builds an
//! [`EncoderSession`]: the hardware session plus its surface pool, task ring
//! and completion drain.

mod encoder_session;
mod manager;

pub use encoder_session::{EncoderSession, SessionId, SubmitReport};
pub use manager::SessionManager;
