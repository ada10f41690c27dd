//! Host-level tests for the time sync policy against scripted time sources.
#![cfg(feature = "host")]

use desk_clock::time_sync::{TimeSource, sync_clock};
use desk_clock::unix_seconds::UnixSeconds;
use desk_clock::wall_clock::WallClock;
use desk_clock::{Error, Result};
use embassy_futures::block_on;
use embassy_time::Duration;

// 2024-06-01T03:00:00Z, noon in Tokyo.
const JUNE_FIRST: UnixSeconds = UnixSeconds(1_717_210_800);
const SERVERS: [&str; 3] = ["primary.example", "secondary.example", "tertiary.example"];

/// Answers from a fixed table and records who was asked.
#[derive(Default)]
struct ScriptedSource {
    answers: Vec<(&'static str, Option<UnixSeconds>)>,
    asked: Vec<String>,
}

impl ScriptedSource {
    fn answering(answers: &[(&'static str, Option<UnixSeconds>)]) -> Self {
        Self {
            answers: answers.to_vec(),
            asked: Vec::new(),
        }
    }
}

impl TimeSource for ScriptedSource {
    async fn fetch(&mut self, server: &str) -> Result<UnixSeconds> {
        self.asked.push(server.to_owned());
        self.answers
            .iter()
            .find(|(name, _)| *name == server)
            .and_then(|(_, answer)| *answer)
            .ok_or(Error::NtpTimeout)
    }
}

fn at(seconds: u64) -> impl Fn() -> Duration {
    move || Duration::from_secs(seconds)
}

#[test]
fn first_answer_sets_the_clock() {
    let clock = WallClock::new(540);
    let mut source = ScriptedSource::answering(&[("primary.example", Some(JUNE_FIRST))]);

    let synced = block_on(sync_clock(&mut source, &SERVERS, &clock, at(10))).unwrap();

    assert_eq!(synced, JUNE_FIRST);
    assert_eq!(source.asked, ["primary.example"]);
    assert_eq!(clock.text_at(Duration::from_secs(10)), ['1', '2', '0', '0']);
    assert_eq!(clock.text_at(Duration::from_secs(70)), ['1', '2', '0', '1']);
}

#[test]
fn fails_over_to_the_next_server() {
    let clock = WallClock::new(0);
    let mut source = ScriptedSource::answering(&[
        ("primary.example", None),
        ("secondary.example", Some(JUNE_FIRST)),
        ("tertiary.example", Some(UnixSeconds(0))),
    ]);

    let synced = block_on(sync_clock(&mut source, &SERVERS, &clock, at(0))).unwrap();

    assert_eq!(synced, JUNE_FIRST);
    assert_eq!(source.asked, ["primary.example", "secondary.example"]);
    assert_eq!(clock.text_at(Duration::from_secs(0)), [' ', '3', '0', '0']);
}

#[test]
fn failure_leaves_the_clock_untouched() {
    let clock = WallClock::new(540);
    let mut good = ScriptedSource::answering(&[("primary.example", Some(JUNE_FIRST))]);
    block_on(sync_clock(&mut good, &SERVERS, &clock, at(0))).unwrap();
    let before = clock.text_at(Duration::from_secs(600));

    let mut down = ScriptedSource::default();
    let result = block_on(sync_clock(&mut down, &SERVERS, &clock, at(300)));

    assert!(matches!(result, Err(Error::NtpTimeout)));
    assert_eq!(down.asked.len(), SERVERS.len());
    assert_eq!(clock.text_at(Duration::from_secs(600)), before);
}

#[test]
fn unsynced_clock_stays_dashed_after_failure() {
    let clock = WallClock::new(540);
    let mut down = ScriptedSource::default();
    assert!(block_on(sync_clock(&mut down, &SERVERS, &clock, at(0))).is_err());
    assert!(!clock.is_synced());
    assert_eq!(clock.text_at(Duration::from_secs(0)), ['-'; 4]);
}

#[test]
fn later_sync_corrects_drift() {
    let clock = WallClock::new(0);
    let mut first = ScriptedSource::answering(&[("primary.example", Some(JUNE_FIRST))]);
    block_on(sync_clock(&mut first, &SERVERS, &clock, at(0))).unwrap();

    // An hour of uptime later the server says two minutes more have passed.
    let corrected = UnixSeconds(JUNE_FIRST.0 + 3600 + 120);
    let mut second = ScriptedSource::answering(&[("primary.example", Some(corrected))]);
    block_on(sync_clock(&mut second, &SERVERS, &clock, at(3600))).unwrap();

    assert_eq!(clock.unix_at(Duration::from_secs(3600)), Some(corrected));
    assert_eq!(clock.text_at(Duration::from_secs(3600)), [' ', '4', '0', '2']);
}

#[test]
fn empty_server_list_is_an_error() {
    let clock = WallClock::new(0);
    let mut source = ScriptedSource::default();
    let result = block_on(sync_clock(&mut source, &[], &clock, at(0)));
    assert!(matches!(result, Err(Error::NoTimeServers)));
    assert!(source.asked.is_empty());
}
