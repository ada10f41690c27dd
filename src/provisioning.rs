//! Button-triggered WiFi provisioning as an explicit state machine.
//!
//! Holding the setup button opens a captive setup portal; a submitted network is joined and
//! saved, and a portal that times out or fails hands the radio back to the previous network.
//! Every wait is an `.await`, so the display and colon keep running while the portal is open.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use crate::Result;
use crate::wifi_credentials::WifiCredentials;

/// Where the provisioning flow is.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, defmt::Format)]
pub enum ProvisioningState {
    /// Waiting for the setup button.
    #[default]
    Idle,
    /// The setup portal is (or is about to be) open.
    Provisioning,
}

/// What happened during one [`ProvisioningState::execute`] step.
#[derive(Clone, Copy, Debug, Eq, PartialEq, defmt::Format)]
pub enum ProvisioningEvent {
    ButtonHeld,
    /// Joined the submitted network and saved it.
    CredentialsAccepted,
    /// The submitted network could not be joined; the portal reopens.
    CredentialsRejected,
    PortalTimedOut,
    PortalFailed,
}

/// The setup button.
pub trait HoldButton {
    /// Resolve once the button has been pressed and survived debouncing.
    async fn wait_for_hold(&mut self);
}

/// Decides whether a press that is already down when a hold is awaited counts.
///
/// A button held through boot counts once. After that the button has to be let go between
/// holds, so a press left over from the previous round does not reopen the portal.
#[derive(Debug)]
pub struct PressLatch {
    at_boot: bool,
}

impl PressLatch {
    #[must_use]
    pub const fn new() -> Self {
        Self { at_boot: true }
    }

    /// `pressed` is the button level as a wait begins. `true` means that press counts without
    /// a fresh edge.
    pub const fn take_held(&mut self, pressed: bool) -> bool {
        let held = self.at_boot && pressed;
        self.at_boot = false;
        held
    }
}

impl Default for PressLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// The radio, portal and credential store as seen by the state machine.
pub trait ProvisioningPort {
    /// Start the setup access point and its services.
    ///
    /// # Errors
    ///
    /// Returns an error if the access point cannot be started.
    async fn open_portal(&mut self) -> Result<()>;

    /// Wait for one form submission. `Ok(None)` means the portal timed out.
    ///
    /// # Errors
    ///
    /// Returns an error if the portal stops serving.
    async fn next_submission(&mut self) -> Result<Option<WifiCredentials>>;

    async fn close_portal(&mut self);

    /// Join the network described by `credentials`.
    ///
    /// # Errors
    ///
    /// Returns an error if the network cannot be joined.
    async fn join(&mut self, credentials: &WifiCredentials) -> Result<()>;

    /// Make `credentials` the network joined on every boot.
    ///
    /// # Errors
    ///
    /// Returns an error if the credentials cannot be stored.
    fn save(&mut self, credentials: &WifiCredentials) -> Result<()>;

    /// Join the network that was in use before provisioning began.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no such network or it cannot be joined.
    async fn rejoin(&mut self) -> Result<()>;
}

impl ProvisioningState {
    /// Pure transition function.
    #[must_use]
    pub const fn on(self, event: ProvisioningEvent) -> Self {
        match (self, event) {
            (Self::Idle, ProvisioningEvent::ButtonHeld)
            | (Self::Provisioning, ProvisioningEvent::CredentialsRejected) => Self::Provisioning,
            (
                Self::Provisioning,
                ProvisioningEvent::CredentialsAccepted
                | ProvisioningEvent::PortalTimedOut
                | ProvisioningEvent::PortalFailed,
            ) => Self::Idle,
            (state, _) => state,
        }
    }

    /// Run one step of the flow and return what happened along with the next state.
    ///
    /// Errors from saving credentials and from rejoining are the port's to report; they do not
    /// change the outcome of the step.
    pub async fn execute<B, P>(self, button: &mut B, port: &mut P) -> (ProvisioningEvent, Self)
    where
        B: HoldButton,
        P: ProvisioningPort,
    {
        let event = match self {
            Self::Idle => {
                button.wait_for_hold().await;
                ProvisioningEvent::ButtonHeld
            }
            Self::Provisioning => Self::run_portal(port).await,
        };
        (event, self.on(event))
    }

    async fn run_portal<P: ProvisioningPort>(port: &mut P) -> ProvisioningEvent {
        if port.open_portal().await.is_err() {
            port.close_portal().await;
            let _ = port.rejoin().await;
            return ProvisioningEvent::PortalFailed;
        }

        let submission = port.next_submission().await;
        port.close_portal().await;

        match submission {
            Ok(Some(credentials)) => {
                if port.join(&credentials).await.is_err() {
                    return ProvisioningEvent::CredentialsRejected;
                }
                let _ = port.save(&credentials);
                ProvisioningEvent::CredentialsAccepted
            }
            Ok(None) => {
                let _ = port.rejoin().await;
                ProvisioningEvent::PortalTimedOut
            }
            Err(_) => {
                let _ = port.rejoin().await;
                ProvisioningEvent::PortalFailed
            }
        }
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
mod device {
    use defmt::{info, warn};
    use embassy_futures::select::{Either, select};

    use super::{ProvisioningEvent, ProvisioningState};
    use crate::button::Button;
    use crate::portal::WifiProvisioning;
    use crate::shutdown::ShutdownListener;

    /// Drive the provisioning state machine until shutdown.
    #[embassy_executor::task]
    pub async fn provisioning_task(
        mut button: Button<'static>,
        mut port: WifiProvisioning,
        mut shutdown: ShutdownListener<'static>,
    ) {
        let mut state = ProvisioningState::default();
        loop {
            let step = state.execute(&mut button, &mut port);
            let (event, next) = match select(step, shutdown.wait()).await {
                Either::First(outcome) => outcome,
                Either::Second(()) => return,
            };
            match event {
                ProvisioningEvent::ButtonHeld => info!("Setup button held; opening portal"),
                ProvisioningEvent::CredentialsAccepted => info!("Provisioning complete"),
                ProvisioningEvent::CredentialsRejected => {
                    warn!("Could not join submitted network; reopening portal");
                }
                ProvisioningEvent::PortalTimedOut => {
                    warn!("Portal timed out; back to previous network");
                }
                ProvisioningEvent::PortalFailed => warn!("Portal failed; back to previous network"),
            }
            info!("Provisioning: {} -> {}", state, next);
            state = next;
        }
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
pub use device::provisioning_task;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_hold_starts_provisioning() {
        assert_eq!(
            ProvisioningState::Idle.on(ProvisioningEvent::ButtonHeld),
            ProvisioningState::Provisioning
        );
    }

    #[test]
    fn portal_outcomes_return_to_idle_except_rejection() {
        let provisioning = ProvisioningState::Provisioning;
        for event in [
            ProvisioningEvent::CredentialsAccepted,
            ProvisioningEvent::PortalTimedOut,
            ProvisioningEvent::PortalFailed,
        ] {
            assert_eq!(provisioning.on(event), ProvisioningState::Idle);
        }
        assert_eq!(
            provisioning.on(ProvisioningEvent::CredentialsRejected),
            ProvisioningState::Provisioning
        );
    }

    #[test]
    fn unrelated_events_leave_state_alone() {
        assert_eq!(
            ProvisioningState::Idle.on(ProvisioningEvent::PortalTimedOut),
            ProvisioningState::Idle
        );
        assert_eq!(
            ProvisioningState::Provisioning.on(ProvisioningEvent::ButtonHeld),
            ProvisioningState::Provisioning
        );
    }

    #[test]
    fn press_held_through_boot_counts_once() {
        let mut latch = PressLatch::new();
        assert!(latch.take_held(true));
        assert!(!latch.take_held(true));
    }

    #[test]
    fn released_button_at_boot_waits_for_an_edge() {
        let mut latch = PressLatch::new();
        assert!(!latch.take_held(false));
        assert!(!latch.take_held(true));
    }
}
