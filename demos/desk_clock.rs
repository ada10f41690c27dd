//! WiFi desk clock firmware.
//!
//! Shows local time on the 4-digit display with a breathing colon, syncs from NTP on every
//! network join and hourly, accepts OTA images on port 3232, and opens the
//! `AKI-TOKEI-SETUP` portal while the GP0 button is held.

#![no_std]
#![no_main]
#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::convert::Infallible;

use defmt::{Display2Format, info, warn};
use defmt_rtt as _;
use desk_clock::colon::colon_task;
use desk_clock::constants::{ClockConfig, UTC_OFFSET_MINUTES};
use desk_clock::flash_store::{FlashStore, FlashStoreStatic};
use desk_clock::hardware::Hardware;
use desk_clock::led4::display_task;
use desk_clock::ota::ota_task;
use desk_clock::portal::WifiProvisioning;
use desk_clock::provisioning::provisioning_task;
use desk_clock::shutdown::Shutdown;
use desk_clock::time_sync::time_sync_task;
use desk_clock::wall_clock::WallClock;
use desk_clock::wifi::{Wifi, WifiStatic};
use desk_clock::Result;
use embassy_executor::Spawner;
use panic_probe as _;

static CONFIG: ClockConfig = ClockConfig::from_build_env();
static CLOCK: WallClock = WallClock::new(UTC_OFFSET_MINUTES);
static SHUTDOWN: Shutdown = Shutdown::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) -> ! {
    let err = inner_main(spawner).await.unwrap_err();
    core::panic!("{err}");
}

async fn inner_main(spawner: Spawner) -> Result<Infallible> {
    info!("Starting desk clock");
    let hardware = Hardware::default();

    static FLASH_STATIC: FlashStoreStatic = FlashStore::new_static();
    let flash = FlashStore::new(&FLASH_STATIC, hardware.flash)?;
    let [credentials_block] = flash.reserve::<1>()?;

    // The display and colon run before the radio comes up so the dashes show immediately.
    spawner.spawn(display_task(hardware.display, &CLOCK, SHUTDOWN.listener()?)?);
    spawner.spawn(colon_task(hardware.colon, SHUTDOWN.listener()?)?);

    static WIFI_STATIC: WifiStatic = Wifi::new_static();
    let wifi = Wifi::new(
        &WIFI_STATIC,
        hardware.wifi,
        credentials_block,
        CONFIG.hostname,
        spawner,
    )
    .await?;

    spawner.spawn(time_sync_task(wifi, &CLOCK, &CONFIG, SHUTDOWN.listener()?)?);
    spawner.spawn(ota_task(wifi, flash, &CONFIG, &SHUTDOWN, SHUTDOWN.listener()?)?);
    spawner.spawn(provisioning_task(
        hardware.button,
        WifiProvisioning::new(wifi)?,
        SHUTDOWN.listener()?,
    )?);

    if let Err(err) = wifi.connect().await {
        warn!("Initial WiFi join failed: {}", Display2Format(&err));
    }

    info!("Desk clock running");
    core::future::pending().await
}
