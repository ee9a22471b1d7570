//! Audio focus arbitration.
//!
//! The host owns the audio output and hands it out through a
//! [`FocusBroker`]. [`AudioFocusArbiter`] keeps the session's view of focus
//! and turns host focus changes into volume and transport actions. It lives
//! inside the session actor, so it needs no locking.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{DUCK_VOLUME_FACTOR, FULL_VOLUME_FACTOR};

/// Answer to a focus request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusGrant {
    Granted,
    Denied,
}

/// Asynchronous focus changes reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FocusChange {
    Gained,
    LostPermanently,
    LostTransient,
    LostTransientCanDuck,
}

/// Host resource broker for the shared audio output.
///
/// Both calls are synchronous; implementations must not block on I/O.
pub trait FocusBroker: Send + Sync {
    fn request(&self) -> FocusGrant;

    fn abandon(&self);
}

/// Broker for a host with no competing audio: always grants.
pub struct LocalFocusBroker;

impl FocusBroker for LocalFocusBroker {
    fn request(&self) -> FocusGrant {
        FocusGrant::Granted
    }

    fn abandon(&self) {}
}

/// Session view of audio focus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusState {
    pub held: bool,
    /// Volume factor currently applied; 1.0 unless ducked.
    pub ducked_volume_factor: f32,
    /// Resume playback when focus returns.
    pub resume_on_regain: bool,
}

impl Default for FocusState {
    fn default() -> Self {
        Self {
            held: false,
            ducked_volume_factor: FULL_VOLUME_FACTOR,
            resume_on_regain: false,
        }
    }
}

/// Transport action the session must take after a focus change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusAction {
    None,
    Pause,
    Resume,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocusOutcome {
    pub volume: f32,
    pub action: FocusAction,
}

pub struct AudioFocusArbiter {
    broker: Arc<dyn FocusBroker>,
    state: FocusState,
    duck_factor: f32,
}

impl AudioFocusArbiter {
    pub fn new(broker: Arc<dyn FocusBroker>) -> Self {
        Self {
            broker,
            state: FocusState::default(),
            duck_factor: DUCK_VOLUME_FACTOR,
        }
    }

    /// Overrides the ducking volume factor.
    pub fn with_duck_factor(mut self, factor: f32) -> Self {
        self.duck_factor = factor.clamp(0.0, FULL_VOLUME_FACTOR);
        self
    }

    pub fn state(&self) -> FocusState {
        self.state
    }

    pub fn is_held(&self) -> bool {
        self.state.held
    }

    /// Requests focus from the broker. A no-op returning `Granted` when
    /// focus is already held.
    pub fn request(&mut self) -> FocusGrant {
        if self.state.held {
            return FocusGrant::Granted;
        }
        let grant = self.broker.request();
        if grant == FocusGrant::Granted {
            self.state.held = true;
            self.state.ducked_volume_factor = FULL_VOLUME_FACTOR;
        }
        log::debug!("[Focus] Request -> {:?}", grant);
        grant
    }

    /// Gives focus back to the broker and forgets any pending resume.
    pub fn release(&mut self) {
        if self.state.held {
            self.broker.abandon();
        }
        self.state = FocusState::default();
    }

    /// A user pause cancels any automatic resume.
    pub fn clear_resume(&mut self) {
        self.state.resume_on_regain = false;
    }

    /// Applies a host focus change. `playing` is whether the session is
    /// currently producing (or about to produce) audio.
    pub fn on_change(&mut self, change: FocusChange, playing: bool) -> FocusOutcome {
        let action = match change {
            FocusChange::LostPermanently => {
                if self.state.held {
                    self.broker.abandon();
                }
                self.state.held = false;
                self.state.resume_on_regain = false;
                self.state.ducked_volume_factor = FULL_VOLUME_FACTOR;
                pause_if(playing)
            }
            FocusChange::LostTransient => {
                self.state.held = false;
                // Keep a pending resume from an earlier transient loss.
                self.state.resume_on_regain |= playing;
                self.state.ducked_volume_factor = FULL_VOLUME_FACTOR;
                pause_if(playing)
            }
            FocusChange::LostTransientCanDuck => {
                self.state.ducked_volume_factor = self.duck_factor;
                FocusAction::None
            }
            FocusChange::Gained => {
                self.state.held = true;
                self.state.ducked_volume_factor = FULL_VOLUME_FACTOR;
                if std::mem::take(&mut self.state.resume_on_regain) {
                    FocusAction::Resume
                } else {
                    FocusAction::None
                }
            }
        };
        log::info!(
            "[Focus] {:?} -> held={} volume={} action={:?}",
            change,
            self.state.held,
            self.state.ducked_volume_factor,
            action
        );
        FocusOutcome {
            volume: self.state.ducked_volume_factor,
            action,
        }
    }
}

fn pause_if(playing: bool) -> FocusAction {
    if playing {
        FocusAction::Pause
    } else {
        FocusAction::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedBroker;

    fn arbiter(broker: &Arc<ScriptedBroker>) -> AudioFocusArbiter {
        AudioFocusArbiter::new(broker.clone())
    }

    #[test]
    fn request_while_held_does_not_ask_broker_again() {
        let broker = Arc::new(ScriptedBroker::granting());
        let mut a = arbiter(&broker);
        assert_eq!(a.request(), FocusGrant::Granted);
        broker.set_grant(false);
        assert_eq!(a.request(), FocusGrant::Granted);
        assert_eq!(broker.requests(), 1);
    }

    #[test]
    fn denied_request_leaves_focus_unheld() {
        let broker = Arc::new(ScriptedBroker::denying());
        let mut a = arbiter(&broker);
        assert_eq!(a.request(), FocusGrant::Denied);
        assert!(!a.is_held());
    }

    #[test]
    fn permanent_loss_never_resumes() {
        let broker = Arc::new(ScriptedBroker::granting());
        let mut a = arbiter(&broker);
        a.request();

        let lost = a.on_change(FocusChange::LostPermanently, true);
        assert_eq!(lost.action, FocusAction::Pause);
        assert!(!a.state().resume_on_regain);
        assert_eq!(broker.abandons(), 1);

        let regained = a.on_change(FocusChange::Gained, false);
        assert_eq!(regained.action, FocusAction::None);
    }

    #[test]
    fn transient_loss_resumes_on_regain_once() {
        let broker = Arc::new(ScriptedBroker::granting());
        let mut a = arbiter(&broker);
        a.request();

        let lost = a.on_change(FocusChange::LostTransient, true);
        assert_eq!(lost.action, FocusAction::Pause);
        assert!(a.state().resume_on_regain);

        assert_eq!(
            a.on_change(FocusChange::Gained, false).action,
            FocusAction::Resume
        );
        assert!(!a.state().resume_on_regain);
        assert_eq!(
            a.on_change(FocusChange::Gained, false).action,
            FocusAction::None
        );
    }

    #[test]
    fn transient_loss_while_paused_does_not_resume() {
        let broker = Arc::new(ScriptedBroker::granting());
        let mut a = arbiter(&broker);
        a.request();
        assert_eq!(
            a.on_change(FocusChange::LostTransient, false).action,
            FocusAction::None
        );
        assert_eq!(
            a.on_change(FocusChange::Gained, false).action,
            FocusAction::None
        );
    }

    #[test]
    fn duck_lowers_volume_and_gain_restores_it() {
        let broker = Arc::new(ScriptedBroker::granting());
        let mut a = arbiter(&broker);
        a.request();

        let ducked = a.on_change(FocusChange::LostTransientCanDuck, true);
        assert_eq!(ducked.action, FocusAction::None);
        assert!((ducked.volume - DUCK_VOLUME_FACTOR).abs() < f32::EPSILON);
        assert!(a.is_held());

        let restored = a.on_change(FocusChange::Gained, true);
        assert_eq!(restored.volume, FULL_VOLUME_FACTOR);
        assert_eq!(restored.action, FocusAction::None);
    }

    #[test]
    fn user_pause_cancels_pending_resume() {
        let broker = Arc::new(ScriptedBroker::granting());
        let mut a = arbiter(&broker);
        a.request();
        a.on_change(FocusChange::LostTransient, true);
        a.clear_resume();
        assert_eq!(
            a.on_change(FocusChange::Gained, false).action,
            FocusAction::None
        );
    }

    #[test]
    fn release_abandons_only_when_held() {
        let broker = Arc::new(ScriptedBroker::granting());
        let mut a = arbiter(&broker);
        a.release();
        assert_eq!(broker.abandons(), 0);
        a.request();
        a.release();
        assert_eq!(broker.abandons(), 1);
        assert_eq!(a.state(), FocusState::default());
    }
}
