//! Keep the [`WallClock`] in step with network time servers.
//!
//! [`sync_clock`] holds the policy and is independent of the network stack. On the clock,
//! [`time_sync_task`] feeds it an [`NtpClient`] whenever WiFi comes up and once an hour after
//! that, rejoining the network first if the link has dropped.

#![allow(clippy::future_not_send, reason = "single-threaded")]

use embassy_time::Duration;

use crate::unix_seconds::UnixSeconds;
use crate::wall_clock::WallClock;
use crate::{Error, Result};

/// Something that can tell the current UTC time when asked by server name.
pub trait TimeSource {
    async fn fetch(&mut self, server: &str) -> Result<UnixSeconds>;
}

/// Ask each server in priority order until one answers, then set `clock`.
///
/// `uptime` is sampled after the answer arrives so slow servers do not skew the clock.
/// On failure the clock is left exactly as it was.
///
/// # Errors
///
/// Returns the last server's error, or [`Error::NoTimeServers`] if `servers` is empty.
pub async fn sync_clock<S: TimeSource>(
    source: &mut S,
    servers: &[&str],
    clock: &WallClock,
    uptime: impl Fn() -> Duration,
) -> Result<UnixSeconds> {
    let mut last_error = Error::NoTimeServers;
    for server in servers {
        match source.fetch(server).await {
            Ok(now) => {
                clock.set(now, uptime());
                return Ok(now);
            }
            Err(err) => last_error = err,
        }
    }
    Err(last_error)
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
mod device {
    use defmt::{Display2Format, info, warn};
    use embassy_futures::select::{Either, Either3, select, select3};
    use embassy_net::dns::DnsQueryType;
    use embassy_net::udp::{PacketMetadata, UdpSocket};
    use embassy_net::Stack;
    use embassy_time::{Ticker, with_timeout};

    use super::{TimeSource, sync_clock};
    use crate::constants::{ClockConfig, NTP_PORT, NTP_TIMEOUT, RESYNC_INTERVAL};
    use crate::ntp::{self, PACKET_LEN};
    use crate::shutdown::ShutdownListener;
    use crate::unix_seconds::UnixSeconds;
    use crate::wall_clock::{WallClock, uptime};
    use crate::wifi::Wifi;
    use crate::{Error, Result};

    /// SNTP client over the station interface.
    pub struct NtpClient {
        stack: Stack<'static>,
    }

    impl NtpClient {
        #[must_use]
        pub const fn new(stack: Stack<'static>) -> Self {
            Self { stack }
        }

        async fn query(&self, server: &str) -> Result<UnixSeconds> {
            let addresses = self
                .stack
                .dns_query(server, DnsQueryType::A)
                .await
                .map_err(Error::Dns)?;
            let address = *addresses.first().ok_or(Error::DnsNoAddress)?;
            info!("NTP server {} is {}", server, address);

            let mut rx_meta = [PacketMetadata::EMPTY; 1];
            let mut rx_buffer = [0; 128];
            let mut tx_meta = [PacketMetadata::EMPTY; 1];
            let mut tx_buffer = [0; 128];
            let mut socket = UdpSocket::new(
                self.stack,
                &mut rx_meta,
                &mut rx_buffer,
                &mut tx_meta,
                &mut tx_buffer,
            );
            socket.bind(0).map_err(Error::UdpBind)?;
            socket
                .send_to(&ntp::request(), (address, NTP_PORT))
                .await
                .map_err(Error::UdpSend)?;

            let mut response = [0; PACKET_LEN];
            let (len, _from) = with_timeout(NTP_TIMEOUT, socket.recv_from(&mut response))
                .await
                .map_err(|_| Error::NtpTimeout)?
                .map_err(Error::UdpRecv)?;
            ntp::parse_response(response.get(..len).unwrap_or_default())
        }
    }

    impl TimeSource for NtpClient {
        async fn fetch(&mut self, server: &str) -> Result<UnixSeconds> {
            let result = self.query(server).await;
            if let Err(err) = &result {
                warn!("NTP query to {} failed: {}", server, Display2Format(err));
            }
            result
        }
    }

    /// Sync on every network connect and every [`RESYNC_INTERVAL`], until shutdown.
    #[embassy_executor::task]
    pub async fn time_sync_task(
        wifi: &'static Wifi,
        clock: &'static WallClock,
        config: &'static ClockConfig,
        mut shutdown: ShutdownListener<'static>,
    ) {
        let mut client = NtpClient::new(wifi.stack());
        let mut ticker = Ticker::every(RESYNC_INTERVAL);
        info!("Time sync every {} s", RESYNC_INTERVAL.as_secs());

        loop {
            match select3(wifi.wait_connected(), ticker.next(), shutdown.wait()).await {
                Either3::First(()) => info!("Network up; syncing time"),
                Either3::Second(()) if wifi.is_connected() => info!("Hourly time sync"),
                Either3::Second(()) => {
                    // A successful rejoin fires the connected signal; the sync runs next pass.
                    warn!("Hourly time sync: WiFi is down, rejoining");
                    if let Err(err) = wifi.connect().await {
                        warn!("Failed to obtain time: rejoin failed: {}", Display2Format(&err));
                    }
                    continue;
                }
                Either3::Third(()) => return,
            }

            let sync = sync_clock(&mut client, config.ntp_servers, clock, uptime);
            match select(sync, shutdown.wait()).await {
                Either::First(Ok(_)) => log_local_time(clock),
                Either::First(Err(err)) => {
                    warn!("Failed to obtain time: {}", Display2Format(&err));
                }
                Either::Second(()) => return,
            }
        }
    }

    fn log_local_time(clock: &WallClock) {
        if let Some(local) = clock.now_local() {
            info!(
                "Time synced: {:04}-{:02}-{:02} {:02}:{:02}:{:02} (UTC offset {} min)",
                local.year(),
                u8::from(local.month()),
                local.day(),
                local.hour(),
                local.minute(),
                local.second(),
                local.offset().whole_minutes(),
            );
        }
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
pub use device::{NtpClient, time_sync_task};
