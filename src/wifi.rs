//! WiFi on the Pico W's CYW43 radio: station mode for the clock, access point mode for setup.
//!
//! One network stack serves both modes. Joining a network runs DHCP with the clock's hostname;
//! opening the setup access point swaps the stack to a static address without a reset.
//! Credentials live in a flash block and are seeded from the build environment on first boot.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use core::cell::RefCell;

use cyw43::{Control, JoinOptions};
use cyw43_pio::{DEFAULT_CLOCK_DIVIDER, PioSpi};
use defmt::{info, warn};
use embassy_executor::Spawner;
use embassy_net::{
    Config, ConfigV4, DhcpConfig, Ipv4Address, Ipv4Cidr, Stack, StackResources, StaticConfigV4,
};
use embassy_rp::gpio::{Level, Output};
use embassy_rp::peripherals::{DMA_CH0, PIN_23, PIN_24, PIN_25, PIN_29, PIO0};
use embassy_rp::pio::{InterruptHandler, Pio};
use embassy_rp::{Peri, bind_interrupts};
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::with_timeout;
use portable_atomic::{AtomicBool, Ordering};
use static_cell::StaticCell;

use crate::constants::{
    AP_ADDRESS, AP_CHANNEL, AP_PREFIX_LEN, AP_SSID, DHCP_TIMEOUT, WIFI_JOIN_TIMEOUT, WIFI_PASS,
    WIFI_SSID,
};
use crate::flash_store::FlashBlock;
use crate::wifi_credentials::{Reconnect, WifiCredentials};
use crate::{Error, Result};

const SOCKET_COUNT: usize = 8;
const STACK_SEED: u64 = 0x7c8f_3a2e_9d14_6b5a;

bind_interrupts!(struct Irqs {
    PIO0_IRQ_0 => InterruptHandler<PIO0>;
});

/// The radio's fixed wiring on the Pico W.
pub struct WifiPins {
    pub power: Peri<'static, PIN_23>,
    pub chip_select: Peri<'static, PIN_25>,
    pub data: Peri<'static, PIN_24>,
    pub clock: Peri<'static, PIN_29>,
    pub pio: Peri<'static, PIO0>,
    pub dma: Peri<'static, DMA_CH0>,
}

/// Static storage for [`Wifi::new`].
pub struct WifiStatic {
    wifi: StaticCell<Wifi>,
    radio: StaticCell<cyw43::State>,
    resources: StaticCell<StackResources<SOCKET_COUNT>>,
}

/// Shared handle to the radio and network stack.
pub struct Wifi {
    control: Mutex<CriticalSectionRawMutex, Control<'static>>,
    stack: Stack<'static>,
    hostname: &'static str,
    access_point: AtomicBool,
    credentials: BlockingMutex<CriticalSectionRawMutex, RefCell<Option<WifiCredentials>>>,
    store: BlockingMutex<CriticalSectionRawMutex, RefCell<FlashBlock>>,
    connected: Signal<CriticalSectionRawMutex, ()>,
}

impl Wifi {
    #[must_use]
    pub const fn new_static() -> WifiStatic {
        WifiStatic {
            wifi: StaticCell::new(),
            radio: StaticCell::new(),
            resources: StaticCell::new(),
        }
    }

    /// Power up the radio, start the network stack and load stored credentials.
    ///
    /// Does not join a network; call [`connect`](Self::connect) for that.
    ///
    /// # Errors
    ///
    /// Returns an error if `wifi_static` was already used or a runner task cannot be spawned.
    pub async fn new(
        wifi_static: &'static WifiStatic,
        pins: WifiPins,
        mut store: FlashBlock,
        hostname: &'static str,
        spawner: Spawner,
    ) -> Result<&'static Self> {
        let credentials = match store.load::<WifiCredentials>() {
            Ok(Some(stored)) => Some(stored),
            Ok(None) => build_time_credentials(),
            Err(err) => {
                warn!("Stored WiFi credentials unreadable: {}", defmt::Display2Format(&err));
                build_time_credentials()
            }
        };
        match &credentials {
            Some(credentials) => info!("WiFi network: {}", credentials.ssid.as_str()),
            None => warn!("No WiFi network configured; hold the setup button"),
        }

        let power = Output::new(pins.power, Level::Low);
        let chip_select = Output::new(pins.chip_select, Level::High);
        let mut pio = Pio::new(pins.pio, Irqs);
        let spi = PioSpi::new(
            &mut pio.common,
            pio.sm0,
            DEFAULT_CLOCK_DIVIDER,
            pio.irq0,
            chip_select,
            pins.data,
            pins.clock,
            pins.dma,
        );

        let radio = wifi_static
            .radio
            .try_init(cyw43::State::new())
            .ok_or(Error::AlreadyInitialized)?;
        let (net_device, mut control, runner) =
            cyw43::new(radio, power, spi, cyw43_firmware::CYW43_43439A0).await;
        spawner.spawn(cyw43_task(runner)?);

        control.init(cyw43_firmware::CYW43_43439A0_CLM).await;
        control
            .set_power_management(cyw43::PowerManagementMode::PowerSave)
            .await;

        let resources = wifi_static
            .resources
            .try_init(StackResources::new())
            .ok_or(Error::AlreadyInitialized)?;
        let (stack, net_runner) = embassy_net::new(
            net_device,
            Config::dhcpv4(station_config(hostname)),
            resources,
            STACK_SEED,
        );
        spawner.spawn(net_task(net_runner)?);
        info!("WiFi radio up; hostname {}", hostname);

        wifi_static
            .wifi
            .try_init(Self {
                control: Mutex::new(control),
                stack,
                hostname,
                access_point: AtomicBool::new(false),
                credentials: BlockingMutex::new(RefCell::new(credentials)),
                store: BlockingMutex::new(RefCell::new(store)),
                connected: Signal::new(),
            })
            .map(|wifi| &*wifi)
            .ok_or(Error::AlreadyInitialized)
    }

    #[must_use]
    pub const fn stack(&self) -> Stack<'static> {
        self.stack
    }

    /// Joined to a network with an address, and not serving the setup portal.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.access_point.load(Ordering::Acquire)
            && self.stack.is_link_up()
            && self.stack.is_config_up()
    }

    /// Resolves after each successful join.
    pub async fn wait_connected(&self) {
        self.connected.wait().await;
    }

    /// The network [`connect`](Self::connect) joins, if one is known.
    #[must_use]
    pub fn current_credentials(&self) -> Option<WifiCredentials> {
        self.credentials
            .lock(|credentials| credentials.borrow().clone())
    }

    /// Join the current network, unless the station link is already up by the time the radio
    /// is free.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WifiBusy`] while the access point is up, [`Error::NoCredentials`] if
    /// no network is known, and the join or DHCP error otherwise.
    pub async fn connect(&self) -> Result<()> {
        let mut control = self.control.lock().await;
        let plan = Reconnect::plan(
            self.access_point.load(Ordering::Acquire),
            self.is_connected(),
            self.current_credentials(),
        )?;
        match plan {
            Reconnect::Keep => Ok(()),
            Reconnect::Join(credentials) => self.join_network(&mut control, &credentials).await,
        }
    }

    /// Join a new network. On success it becomes the current network for this boot.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect), apart from [`Error::NoCredentials`].
    pub async fn join(&self, credentials: &WifiCredentials) -> Result<()> {
        let mut control = self.control.lock().await;
        if self.access_point.load(Ordering::Acquire) {
            return Err(Error::WifiBusy);
        }
        self.join_network(&mut control, credentials).await?;
        self.credentials
            .lock(|current| *current.borrow_mut() = Some(credentials.clone()));
        Ok(())
    }

    /// Store `credentials` for future boots.
    ///
    /// # Errors
    ///
    /// Returns the flash error if the write fails.
    pub fn persist(&self, credentials: &WifiCredentials) -> Result<()> {
        self.store.lock(|store| store.borrow_mut().save(credentials))
    }

    /// Leave any network and open the setup access point at its static address.
    pub async fn start_access_point(&self) {
        self.access_point.store(true, Ordering::Release);
        let mut control = self.control.lock().await;
        control.leave().await;

        let [a, b, c, d] = AP_ADDRESS;
        let address = Ipv4Address::new(a, b, c, d);
        self.stack.set_config_v4(ConfigV4::Static(StaticConfigV4 {
            address: Ipv4Cidr::new(address, AP_PREFIX_LEN),
            gateway: Some(address),
            dns_servers: Default::default(),
        }));
        control.start_ap_open(AP_SSID, AP_CHANNEL).await;
        info!("Access point {} up at {}", AP_SSID, address);
    }

    /// Close the access point and return the stack to DHCP.
    pub async fn stop_access_point(&self) {
        let mut control = self.control.lock().await;
        control.close_ap().await;
        self.stack
            .set_config_v4(ConfigV4::Dhcp(station_config(self.hostname)));
        self.access_point.store(false, Ordering::Release);
        info!("Access point closed");
    }

    /// Callers hold the radio lock until DHCP is done, so no other join can interleave.
    async fn join_network(
        &self,
        control: &mut Control<'static>,
        credentials: &WifiCredentials,
    ) -> Result<()> {
        let ssid = credentials.ssid.as_str();
        control.leave().await;
        info!("Joining WiFi network {}", ssid);
        let options = if credentials.is_open() {
            JoinOptions::new_open()
        } else {
            JoinOptions::new(credentials.password.as_bytes())
        };
        with_timeout(WIFI_JOIN_TIMEOUT, control.join(ssid, options))
            .await
            .map_err(|_| Error::WifiJoinTimeout)?
            .map_err(|err| Error::WifiJoin(err.status))?;

        with_timeout(DHCP_TIMEOUT, self.stack.wait_config_up())
            .await
            .map_err(|_| Error::DhcpTimeout)?;
        if let Some(config) = self.stack.config_v4() {
            info!("Joined {} with address {}", ssid, config.address);
        }
        self.connected.signal(());
        Ok(())
    }
}

fn station_config(hostname: &str) -> DhcpConfig {
    let mut config = DhcpConfig::default();
    config.hostname = hostname.try_into().ok();
    config
}

fn build_time_credentials() -> Option<WifiCredentials> {
    if WIFI_SSID.is_empty() {
        return None;
    }
    WifiCredentials::new(WIFI_SSID, WIFI_PASS).ok()
}

#[embassy_executor::task]
async fn cyw43_task(
    runner: cyw43::Runner<'static, Output<'static>, PioSpi<'static, PIO0, 0, DMA_CH0>>,
) -> ! {
    runner.run().await
}

#[embassy_executor::task]
async fn net_task(mut runner: embassy_net::Runner<'static, cyw43::NetDriver<'static>>) -> ! {
    runner.run().await
}
