//! Microphone/recognition permission gate.
//!
//! The platform consent prompt may be shown at most once per process
//! lifetime: the first `Undetermined` request delegates to the injected
//! `PermissionProvider`, every later request answers from the cache.
//! A `Denied` outcome is final until process restart (platform policy).
//!
//! The gate runs entirely inside the coordinator thread; the provider
//! resolves from whatever context it likes via `PermissionResponder`.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::controller::coordinator::Command;
use crate::engines::{PermissionProvider, PermissionResponder};

/// Authorization state for microphone capture + speech recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    /// Never asked. The next request triggers the platform prompt.
    Undetermined,
    /// User declined. Final for the process lifetime.
    Denied,
    /// User granted access.
    Granted,
}

impl PermissionState {
    pub fn is_granted(self) -> bool {
        self == PermissionState::Granted
    }
}

/// One-shot completion for a permission request.
pub type PermissionCallback = Box<dyn FnOnce(PermissionState) + Send + 'static>;

/// Caches the platform permission outcome and deduplicates prompts.
pub(crate) struct PermissionGate {
    provider: Box<dyn PermissionProvider>,
    state: PermissionState,
    /// A platform request is outstanding; further requests just park.
    in_flight: bool,
    waiters: Vec<PermissionCallback>,
}

impl PermissionGate {
    pub(crate) fn new(provider: Box<dyn PermissionProvider>) -> Self {
        Self {
            provider,
            state: PermissionState::Undetermined,
            in_flight: false,
            waiters: Vec::new(),
        }
    }

    pub(crate) fn state(&self) -> PermissionState {
        self.state
    }

    /// Answer from the cache, or park the waiter and delegate to the
    /// platform provider (at most one outstanding prompt).
    pub(crate) fn request(&mut self, waiter: Option<PermissionCallback>, tx: &Sender<Command>) {
        match self.state {
            PermissionState::Granted | PermissionState::Denied => {
                debug!(state = ?self.state, "permission answered from cache");
                if let Some(waiter) = waiter {
                    waiter(self.state);
                }
            }
            PermissionState::Undetermined => {
                if let Some(waiter) = waiter {
                    self.waiters.push(waiter);
                }
                if !self.in_flight {
                    self.in_flight = true;
                    info!("requesting microphone and recognition access");
                    self.provider
                        .request_access(PermissionResponder::new(tx.clone()));
                }
            }
        }
    }

    /// Cache the platform outcome and release all parked waiters.
    pub(crate) fn resolve(&mut self, granted: bool) {
        self.in_flight = false;
        if self.state == PermissionState::Undetermined {
            self.state = if granted {
                PermissionState::Granted
            } else {
                PermissionState::Denied
            };
        }
        for waiter in self.waiters.drain(..) {
            waiter(self.state);
        }
    }
}
