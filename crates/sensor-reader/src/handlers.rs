// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound message handlers
//!
//! One handler per inbound topic. Each maps its payload to a single
//! mutation of [`SharedState`]; neither performs I/O.

use crate::bus::BusMessage;
use crate::command::{AppCommand, CommandDecodeError, RunState};
use crate::parser::parse_payload_bytes;
use crate::state::{SharedState, Transition};
use std::sync::Arc;

/// Handlers bound to the raw data and command subscriptions.
#[derive(Debug, Clone)]
pub struct MessageHandlers {
    state: Arc<SharedState>,
}

impl MessageHandlers {
    pub fn new(state: Arc<SharedState>) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    /// Parse a raw data payload and make it the latest reading.
    ///
    /// A payload that fails to parse clears the latest reading; the length
    /// check is left to the acquisition loop.
    pub fn handle_raw_data(&self, message: &BusMessage) {
        match parse_payload_bytes(&message.payload) {
            Ok(values) => {
                tracing::trace!("Received reading with {} values", values.len());
                self.state.set_latest(Some(values));
            }
            Err(e) => {
                tracing::warn!("Discarding unparsable sensor data: {}", e);
                self.state.set_latest(None);
            }
        }
    }

    /// Decode a command and apply it to the run state.
    ///
    /// Returns `Ok(None)` when termination already started and the command
    /// was ignored. Unknown codes leave the run state untouched.
    pub fn handle_command(
        &self,
        message: &BusMessage,
    ) -> Result<Option<Transition>, CommandDecodeError> {
        let command = AppCommand::decode(&message.payload)?;

        let Some(transition) = self.state.apply_command(command) else {
            tracing::debug!("Ignoring '{}' command, already terminating", command);
            return Ok(None);
        };

        match transition.to {
            RunState::Active => {
                tracing::info!("Restarting sensor data capturing and processing.")
            }
            RunState::Standby => {
                tracing::info!("Stopping sensor data capturing and processing.")
            }
            RunState::Terminating => tracing::info!("Closing app ..."),
        }

        Ok(Some(transition))
    }
}
