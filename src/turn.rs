//! Per-turn progress tracking for the chat pipeline.
//!
//! A turn moves `Received → Embedding → Retrieving → Composing` and ends in
//! `Completed` or `Failed`. Transitions only move forward; each one is
//! logged with the time spent in the previous state.

use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    Received,
    Embedding,
    Retrieving,
    Composing,
    Completed,
    Failed,
}

impl TurnState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TurnState::Completed | TurnState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TurnState::Received => "received",
            TurnState::Embedding => "embedding",
            TurnState::Retrieving => "retrieving",
            TurnState::Composing => "composing",
            TurnState::Completed => "completed",
            TurnState::Failed => "failed",
        }
    }
}

pub struct TurnTrace {
    turn_id: String,
    state: TurnState,
    started: Instant,
    entered: Instant,
    history: Vec<TurnState>,
}

impl TurnTrace {
    pub fn new(turn_id: impl Into<String>) -> Self {
        let now = Instant::now();
        let trace = Self {
            turn_id: turn_id.into(),
            state: TurnState::Received,
            started: now,
            entered: now,
            history: vec![TurnState::Received],
        };
        tracing::debug!(turn = %trace.turn_id, "turn received");
        trace
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// States visited so far, in order.
    pub fn history(&self) -> &[TurnState] {
        &self.history
    }

    /// Move to `next`. Returns `false` (and stays put) for a backward or
    /// repeated transition, or when the turn has already ended.
    pub fn advance(&mut self, next: TurnState) -> bool {
        if self.state.is_terminal() || next <= self.state {
            tracing::warn!(
                turn = %self.turn_id,
                from = self.state.as_str(),
                to = next.as_str(),
                "ignored out-of-order turn transition"
            );
            return false;
        }
        let spent_ms = self.entered.elapsed().as_millis() as u64;
        tracing::debug!(
            turn = %self.turn_id,
            from = self.state.as_str(),
            to = next.as_str(),
            spent_ms,
            "turn transition"
        );
        self.state = next;
        self.entered = Instant::now();
        self.history.push(next);
        true
    }

    pub fn complete(&mut self) {
        if self.advance(TurnState::Completed) {
            tracing::info!(
                turn = %self.turn_id,
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "turn completed"
            );
        }
    }

    pub fn fail(&mut self, reason: &str) {
        let at = self.state;
        if self.advance(TurnState::Failed) {
            tracing::warn!(
                turn = %self.turn_id,
                at = at.as_str(),
                reason,
                "turn failed"
            );
        }
    }
}
