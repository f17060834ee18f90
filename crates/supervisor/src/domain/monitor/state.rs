//! Poll-cycle state machine.
//!
//! [`MonitorState::step`] is pure: it folds one observation into the state and
//! names the resulting transition. Every side effect (sleeping, syncing,
//! submitting jobs, tearing down) is left to the caller.

use crate::config::MonitorConfig;

/// Outcome of one status poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingSignal {
    pub responded: bool,
    pub is_training: bool,
}

impl TrainingSignal {
    pub fn reported(is_training: bool) -> Self {
        Self {
            responded: true,
            is_training,
        }
    }

    pub fn failed() -> Self {
        Self {
            responded: false,
            is_training: false,
        }
    }
}

/// Input of one cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Stop is forced without polling (`--immediate`)
    Forced,
    Polled(TrainingSignal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// A poll failed while `terminate_on_error` is set
    StatusUnavailable,
    /// More consecutive failed polls than the configured threshold
    ErrorThresholdExceeded { consecutive_errors: u32 },
}

/// What a cycle concluded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Training,
    /// First "not training" sample, waiting for a second one
    StoppedPendingConfirm,
    /// Stop would be confirmed but training never started
    WaitingForStart,
    /// Two consecutive "not training" samples, or forced
    StoppedConfirmed,
    PollFailed { consecutive_errors: u32 },
    Abort(AbortReason),
}

impl Transition {
    /// Whether continuous sync runs after this transition
    pub fn is_ongoing(&self) -> bool {
        matches!(
            self,
            Transition::Training | Transition::StoppedPendingConfirm | Transition::WaitingForStart
        )
    }
}

/// Working state carried across poll cycles
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorState {
    pub previous_is_training: Option<bool>,
    /// Monotone: never reset once set
    pub training_started: bool,
    pub consecutive_error_count: u32,
}

impl MonitorState {
    pub fn step(&mut self, observation: Observation, config: &MonitorConfig) -> Transition {
        let signal = match observation {
            Observation::Forced => return Transition::StoppedConfirmed,
            Observation::Polled(signal) => signal,
        };

        if !signal.responded {
            self.consecutive_error_count = self.consecutive_error_count.saturating_add(1);
            self.previous_is_training = None;

            if config.terminate_on_error {
                return Transition::Abort(AbortReason::StatusUnavailable);
            }
            if self.consecutive_error_count > config.max_consecutive_errors {
                return Transition::Abort(AbortReason::ErrorThresholdExceeded {
                    consecutive_errors: self.consecutive_error_count,
                });
            }
            return Transition::PollFailed {
                consecutive_errors: self.consecutive_error_count,
            };
        }

        self.consecutive_error_count = 0;

        if signal.is_training {
            self.training_started = true;
            self.previous_is_training = Some(true);
            return Transition::Training;
        }

        match self.previous_is_training {
            Some(false) if config.wait_for_training_start && !self.training_started => {
                Transition::WaitingForStart
            }
            Some(false) => Transition::StoppedConfirmed,
            None | Some(true) => {
                self.previous_is_training = Some(false);
                Transition::StoppedPendingConfirm
            }
        }
    }

    /// A job was submitted after a confirmed stop; the next stop needs two
    /// fresh samples again.
    pub fn job_submitted(&mut self) {
        self.previous_is_training = None;
    }
}
