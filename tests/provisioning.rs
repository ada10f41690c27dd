//! Host-level tests for the provisioning state machine with a scripted radio.
#![cfg(feature = "host")]

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;

use desk_clock::provisioning::{
    HoldButton, ProvisioningEvent, ProvisioningPort, ProvisioningState,
};
use desk_clock::wifi_credentials::WifiCredentials;
use desk_clock::{Error, Result};
use embassy_futures::{block_on, join::join, yield_now};

/// A button that is held as soon as anyone waits for it.
#[derive(Default)]
struct InstantButton {
    holds: u32,
}

impl HoldButton for InstantButton {
    async fn wait_for_hold(&mut self) {
        self.holds += 1;
    }
}

/// What a scripted portal does when asked for the next submission.
enum Submission {
    Credentials(WifiCredentials),
    Timeout,
    Broken,
}

#[derive(Default)]
struct ScriptedPort {
    open_fails: bool,
    submissions: VecDeque<Submission>,
    /// Networks that join successfully.
    reachable: Vec<String>,
    /// Polls spent waiting inside `next_submission`.
    wait_polls: u32,
    calls: Vec<String>,
    saved: Option<WifiCredentials>,
    portal_open: bool,
}

impl ScriptedPort {
    fn with(submissions: impl IntoIterator<Item = Submission>) -> Self {
        Self {
            submissions: submissions.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl ProvisioningPort for ScriptedPort {
    async fn open_portal(&mut self) -> Result<()> {
        self.calls.push("open".to_owned());
        if self.open_fails {
            return Err(Error::WifiBusy);
        }
        self.portal_open = true;
        Ok(())
    }

    async fn next_submission(&mut self) -> Result<Option<WifiCredentials>> {
        assert!(self.portal_open, "waited on a closed portal");
        self.calls.push("wait".to_owned());
        for _ in 0..self.wait_polls {
            yield_now().await;
        }
        match self.submissions.pop_front() {
            Some(Submission::Credentials(credentials)) => Ok(Some(credentials)),
            Some(Submission::Timeout) | None => Ok(None),
            Some(Submission::Broken) => Err(Error::FormatError),
        }
    }

    async fn close_portal(&mut self) {
        self.calls.push("close".to_owned());
        self.portal_open = false;
    }

    async fn join(&mut self, credentials: &WifiCredentials) -> Result<()> {
        assert!(!self.portal_open, "joined while the portal was open");
        self.calls.push(format!("join {}", credentials.ssid));
        if self.reachable.iter().any(|ssid| ssid.as_str() == credentials.ssid.as_str()) {
            Ok(())
        } else {
            Err(Error::WifiJoin(15))
        }
    }

    fn save(&mut self, credentials: &WifiCredentials) -> Result<()> {
        self.calls.push(format!("save {}", credentials.ssid));
        self.saved = Some(credentials.clone());
        Ok(())
    }

    async fn rejoin(&mut self) -> Result<()> {
        self.calls.push("rejoin".to_owned());
        Ok(())
    }
}

fn network(ssid: &str) -> WifiCredentials {
    WifiCredentials::new(ssid, "hunter22").unwrap()
}

fn run(
    state: ProvisioningState,
    button: &mut InstantButton,
    port: &mut ScriptedPort,
) -> (ProvisioningEvent, ProvisioningState) {
    block_on(state.execute(button, port))
}

#[test]
fn button_hold_then_accepted_credentials_returns_to_idle() {
    let mut button = InstantButton::default();
    let mut port = ScriptedPort::with([Submission::Credentials(network("home"))]);
    port.reachable.push("home".to_owned());

    let (event, state) = run(ProvisioningState::Idle, &mut button, &mut port);
    assert_eq!(event, ProvisioningEvent::ButtonHeld);
    assert_eq!(state, ProvisioningState::Provisioning);
    assert_eq!(button.holds, 1);

    let (event, state) = run(state, &mut button, &mut port);
    assert_eq!(event, ProvisioningEvent::CredentialsAccepted);
    assert_eq!(state, ProvisioningState::Idle);
    assert_eq!(port.calls, ["open", "wait", "close", "join home", "save home"]);
    assert_eq!(port.saved, Some(network("home")));
}

#[test]
fn rejected_credentials_reopen_the_portal() {
    let mut button = InstantButton::default();
    let mut port = ScriptedPort::with([
        Submission::Credentials(network("typo")),
        Submission::Credentials(network("home")),
    ]);
    port.reachable.push("home".to_owned());

    let (event, state) = run(ProvisioningState::Provisioning, &mut button, &mut port);
    assert_eq!(event, ProvisioningEvent::CredentialsRejected);
    assert_eq!(state, ProvisioningState::Provisioning);
    assert!(port.saved.is_none());

    let (event, state) = run(state, &mut button, &mut port);
    assert_eq!(event, ProvisioningEvent::CredentialsAccepted);
    assert_eq!(state, ProvisioningState::Idle);
    assert_eq!(
        port.calls,
        [
            "open", "wait", "close", "join typo", //
            "open", "wait", "close", "join home", "save home",
        ]
    );
    assert_eq!(button.holds, 0);
}

#[test]
fn timeout_rejoins_previous_network() {
    let mut button = InstantButton::default();
    let mut port = ScriptedPort::with([Submission::Timeout]);

    let (event, state) = run(ProvisioningState::Provisioning, &mut button, &mut port);
    assert_eq!(event, ProvisioningEvent::PortalTimedOut);
    assert_eq!(state, ProvisioningState::Idle);
    assert_eq!(port.calls, ["open", "wait", "close", "rejoin"]);
    assert!(port.saved.is_none());
}

#[test]
fn portal_errors_rejoin_and_go_idle() {
    let mut button = InstantButton::default();

    let mut broken = ScriptedPort::with([Submission::Broken]);
    let (event, state) = run(ProvisioningState::Provisioning, &mut button, &mut broken);
    assert_eq!(event, ProvisioningEvent::PortalFailed);
    assert_eq!(state, ProvisioningState::Idle);
    assert_eq!(broken.calls, ["open", "wait", "close", "rejoin"]);

    let mut unopenable = ScriptedPort::default();
    unopenable.open_fails = true;
    let (event, state) = run(ProvisioningState::Provisioning, &mut button, &mut unopenable);
    assert_eq!(event, ProvisioningEvent::PortalFailed);
    assert_eq!(state, ProvisioningState::Idle);
    assert_eq!(unopenable.calls, ["open", "close", "rejoin"]);
}

#[test]
fn other_duties_keep_running_while_the_portal_waits() {
    let ticks = Rc::new(Cell::new(0_u32));
    let mut button = InstantButton::default();
    let mut port = ScriptedPort::with([Submission::Timeout]);
    port.wait_polls = 25;

    let counter = {
        let ticks = Rc::clone(&ticks);
        async move {
            for _ in 0..100 {
                ticks.set(ticks.get() + 1);
                yield_now().await;
            }
        }
    };
    let provisioning = async {
        let state = ProvisioningState::Provisioning;
        let outcome = state.execute(&mut button, &mut port).await;
        (outcome, ticks.get())
    };

    let (((event, state), ticks_when_done), ()) = block_on(join(provisioning, counter));

    assert_eq!(event, ProvisioningEvent::PortalTimedOut);
    assert_eq!(state, ProvisioningState::Idle);
    // The counter advanced on every poll the portal spent waiting.
    assert!(ticks_when_done >= 25, "counter only reached {ticks_when_done}");
    assert_eq!(ticks.get(), 100);
}
