//! Firmware library for a WiFi desk clock on the Raspberry Pi Pico W.
//!
//! The clock runs five cooperative duties on one Embassy executor: display multiplexing,
//! colon blinking, time sync, over-the-air updates and button-triggered WiFi provisioning.
//! Timekeeping, framing and state-machine logic are plain modules that also build for the
//! host (`--no-default-features --features host`); the tasks that drive pins and the radio
//! are compiled for the board only.
#![cfg_attr(not(test), no_std)]
#![allow(async_fn_in_trait, reason = "single-threaded executor; futures need not be Send")]

pub mod clock_text;
pub mod colon;
pub mod constants;
pub mod dhcp;
mod error;
pub mod led4;
pub mod multiplexer;
pub mod ntp;
pub mod ota;
pub mod output_array;
pub mod portal;
pub mod provisioning;
pub mod segments;
pub mod shutdown;
pub mod time_sync;
pub mod unix_seconds;
pub mod wall_clock;
pub mod wifi_credentials;

#[cfg(not(feature = "host"))]
pub mod button;
#[cfg(not(feature = "host"))]
pub mod flash_store;
#[cfg(not(feature = "host"))]
pub mod hardware;
#[cfg(all(feature = "wifi", not(feature = "host")))]
pub mod wifi;

pub use error::{Error, Result};
