//! The setup portal: a one-page web form served on the provisioning access point.
//!
//! Request framing and page rendering are plain functions; [`WifiProvisioning`] runs them on
//! the radio together with the access point's DHCP server.

use core::fmt::Write as _;

use heapless::String;

use crate::wifi_credentials::{SSID_CAPACITY, WifiCredentials, escape_html};

/// Largest page the portal renders.
pub const PAGE_CAPACITY: usize = 2048;
pub type Page = String<PAGE_CAPACITY>;

const HEADER_END: &str = "\r\n\r\n";

/// What a browser asked for.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Request<'a> {
    /// Any GET. Serving the form for every path makes captive-portal probes land on it.
    Form,
    /// A POST with its body.
    Submit(&'a str),
    Unsupported,
}

/// Classify a complete HTTP request.
#[must_use]
pub fn parse_request(raw: &str) -> Request<'_> {
    let method = raw.split_whitespace().next().unwrap_or_default();
    match method {
        "GET" => Request::Form,
        "POST" => raw
            .split_once(HEADER_END)
            .map_or(Request::Unsupported, |(_, body)| Request::Submit(body)),
        _ => Request::Unsupported,
    }
}

/// Whether `raw` holds the headers and the whole body announced by `Content-Length`.
#[must_use]
pub fn request_complete(raw: &[u8]) -> bool {
    let Some(header_len) = raw
        .windows(HEADER_END.len())
        .position(|window| window == HEADER_END.as_bytes())
    else {
        return false;
    };
    let headers = raw.get(..header_len).unwrap_or_default();
    let body_len = raw.len().saturating_sub(header_len.saturating_add(HEADER_END.len()));
    content_length(headers).is_none_or(|expected| body_len >= expected)
}

fn content_length(headers: &[u8]) -> Option<usize> {
    core::str::from_utf8(headers)
        .ok()?
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse().ok())
}

/// The setup form, with the SSID field filled in from `current`.
#[must_use]
pub fn form_page(current: Option<&WifiCredentials>) -> Page {
    let ssid: String<{ SSID_CAPACITY * 6 }> =
        current.map_or_else(String::new, |credentials| escape_html(&credentials.ssid));
    let mut page = Page::new();
    let _ = write!(
        page,
        "HTTP/1.1 200 OK\r\n\
         Content-Type: text/html; charset=utf-8\r\n\
         Connection: close\r\n\
         \r\n\
         <!DOCTYPE html><html><head>\
         <meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\
         <title>Clock WiFi setup</title>\
         <style>body{{font-family:sans-serif;max-width:420px;margin:40px auto;padding:0 16px}}\
         input,button{{width:100%;padding:10px;margin:6px 0;box-sizing:border-box}}</style>\
         </head><body><h1>Clock WiFi setup</h1>\
         <form method=\"POST\" action=\"/\">\
         <label for=\"ssid\">Network name (SSID)</label>\
         <input id=\"ssid\" name=\"ssid\" maxlength=\"32\" value=\"{ssid}\" required>\
         <label for=\"password\">Password (empty for an open network)</label>\
         <input id=\"password\" name=\"password\" type=\"password\" maxlength=\"64\">\
         <button type=\"submit\">Connect</button>\
         </form></body></html>"
    );
    page
}

pub const SUCCESS_PAGE: &str = "HTTP/1.1 200 OK\r\n\
    Content-Type: text/html; charset=utf-8\r\n\
    Connection: close\r\n\
    \r\n\
    <!DOCTYPE html><html><body style=\"font-family:sans-serif;text-align:center\">\
    <h1>Saved</h1><p>The clock is joining your network. You can close this page.</p>\
    </body></html>";

pub const ERROR_PAGE: &str = "HTTP/1.1 400 Bad Request\r\n\
    Content-Type: text/html; charset=utf-8\r\n\
    Connection: close\r\n\
    \r\n\
    <!DOCTYPE html><html><body style=\"font-family:sans-serif;text-align:center\">\
    <h1>Not saved</h1><p>The network name is missing or too long.</p>\
    <p><a href=\"/\">Try again</a></p></body></html>";

#[cfg(all(feature = "wifi", not(feature = "host")))]
mod device {
    #![allow(clippy::future_not_send, reason = "single-threaded")]

    use defmt::{Display2Format, info, warn};
    use embassy_futures::select::{Either, select};
    use embassy_net::Stack;
    use embassy_net::tcp::TcpSocket;
    use embassy_time::{Duration, with_timeout};
    use embedded_io_async::Write;
    use static_cell::StaticCell;

    use super::{ERROR_PAGE, Request, SUCCESS_PAGE, form_page, parse_request, request_complete};
    use crate::constants::{PORTAL_PORT, PROVISIONING_TIMEOUT};
    use crate::dhcp::{self, DhcpBuffers};
    use crate::provisioning::ProvisioningPort;
    use crate::wifi::Wifi;
    use crate::wifi_credentials::WifiCredentials;
    use crate::{Error, Result};

    const SOCKET_TIMEOUT: Duration = Duration::from_secs(30);

    struct HttpBuffers {
        rx: [u8; 1024],
        tx: [u8; 2048],
        request: [u8; 1024],
    }

    /// Socket memory for the portal's HTTP and DHCP servers.
    pub struct PortalBuffers {
        http: HttpBuffers,
        dhcp: DhcpBuffers,
    }

    static PORTAL_BUFFERS: StaticCell<PortalBuffers> = StaticCell::new();

    /// The radio side of provisioning.
    pub struct WifiProvisioning {
        wifi: &'static Wifi,
        buffers: &'static mut PortalBuffers,
    }

    impl WifiProvisioning {
        /// # Errors
        ///
        /// Returns [`Error::AlreadyInitialized`] if called more than once.
        pub fn new(wifi: &'static Wifi) -> Result<Self> {
            let buffers = PORTAL_BUFFERS
                .try_init(PortalBuffers {
                    http: HttpBuffers {
                        rx: [0; 1024],
                        tx: [0; 2048],
                        request: [0; 1024],
                    },
                    dhcp: DhcpBuffers::new(),
                })
                .ok_or(Error::AlreadyInitialized)?;
            Ok(Self { wifi, buffers })
        }
    }

    impl ProvisioningPort for WifiProvisioning {
        async fn open_portal(&mut self) -> Result<()> {
            self.wifi.start_access_point().await;
            Ok(())
        }

        async fn next_submission(&mut self) -> Result<Option<WifiCredentials>> {
            let PortalBuffers { http, dhcp } = &mut *self.buffers;
            let stack = self.wifi.stack();
            let current = self.wifi.current_credentials();
            let servers = select(
                dhcp::serve(stack, dhcp),
                serve_form(stack, http, current.as_ref()),
            );
            match with_timeout(PROVISIONING_TIMEOUT, servers).await {
                Err(_) => Ok(None),
                Ok(Either::First(Ok(never))) => match never {},
                Ok(Either::First(Err(err))) | Ok(Either::Second(Err(err))) => Err(err),
                Ok(Either::Second(Ok(credentials))) => Ok(Some(credentials)),
            }
        }

        async fn close_portal(&mut self) {
            self.wifi.stop_access_point().await;
        }

        async fn join(&mut self, credentials: &WifiCredentials) -> Result<()> {
            let result = self.wifi.join(credentials).await;
            if let Err(err) = &result {
                warn!("Joining {} failed: {}", credentials.ssid.as_str(), Display2Format(err));
            }
            result
        }

        fn save(&mut self, credentials: &WifiCredentials) -> Result<()> {
            let result = self.wifi.persist(credentials);
            if let Err(err) = &result {
                warn!("Saving WiFi credentials failed: {}", Display2Format(err));
            }
            result
        }

        async fn rejoin(&mut self) -> Result<()> {
            let result = self.wifi.connect().await;
            if let Err(err) = &result {
                warn!("Rejoining previous network failed: {}", Display2Format(err));
            }
            result
        }
    }

    /// Serve the form until a valid submission arrives.
    async fn serve_form(
        stack: Stack<'static>,
        buffers: &mut HttpBuffers,
        current: Option<&WifiCredentials>,
    ) -> Result<WifiCredentials> {
        let HttpBuffers { rx, tx, request } = buffers;
        info!("Portal listening on port {}", PORTAL_PORT);
        loop {
            let mut socket = TcpSocket::new(stack, rx.as_mut_slice(), tx.as_mut_slice());
            socket.set_timeout(Some(SOCKET_TIMEOUT));
            if let Err(err) = socket.accept(PORTAL_PORT).await {
                warn!("Portal accept failed: {:?}", err);
                continue;
            }

            let len = match read_request(&mut socket, request.as_mut_slice()).await {
                Ok(len) => len,
                Err(err) => {
                    warn!("Portal read failed: {}", Display2Format(&err));
                    socket.abort();
                    continue;
                }
            };
            let raw = request
                .get(..len)
                .and_then(|bytes| core::str::from_utf8(bytes).ok())
                .unwrap_or_default();

            let submitted = match parse_request(raw) {
                Request::Form => {
                    respond(&mut socket, form_page(current).as_bytes()).await;
                    None
                }
                Request::Submit(body) => match WifiCredentials::from_form(body) {
                    Ok(credentials) => {
                        info!("Portal received network {}", credentials.ssid.as_str());
                        respond(&mut socket, SUCCESS_PAGE.as_bytes()).await;
                        Some(credentials)
                    }
                    Err(err) => {
                        warn!("Portal rejected form: {}", Display2Format(&err));
                        respond(&mut socket, ERROR_PAGE.as_bytes()).await;
                        None
                    }
                },
                Request::Unsupported => {
                    respond(&mut socket, ERROR_PAGE.as_bytes()).await;
                    None
                }
            };
            if let Some(credentials) = submitted {
                return Ok(credentials);
            }
        }
    }

    /// Read until the request is complete or the buffer is full.
    async fn read_request(socket: &mut TcpSocket<'_>, request: &mut [u8]) -> Result<usize> {
        let mut len = 0;
        loop {
            let free = request.get_mut(len..).ok_or(Error::IndexOutOfBounds)?;
            if free.is_empty() {
                return Ok(len);
            }
            let read = socket.read(free).await?;
            if read == 0 {
                return Ok(len);
            }
            len = len.saturating_add(read);
            if request_complete(request.get(..len).unwrap_or_default()) {
                return Ok(len);
            }
        }
    }

    async fn respond(socket: &mut TcpSocket<'_>, page: &[u8]) {
        if let Err(err) = socket.write_all(page).await {
            warn!("Portal write failed: {:?}", err);
        } else if let Err(err) = socket.flush().await {
            warn!("Portal flush failed: {:?}", err);
        }
        socket.close();
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
pub use device::{PortalBuffers, WifiProvisioning};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_serves_form_for_any_path() {
        assert_eq!(parse_request("GET /generate_204 HTTP/1.1\r\n\r\n"), Request::Form);
    }

    #[test]
    fn post_yields_body() {
        let raw = "POST / HTTP/1.1\r\nContent-Length: 19\r\n\r\nssid=Home&password=";
        assert_eq!(parse_request(raw), Request::Submit("ssid=Home&password="));
    }

    #[test]
    fn request_waits_for_announced_body() {
        let headers = b"POST / HTTP/1.1\r\ncontent-length: 9\r\n\r\n";
        assert!(!request_complete(b"POST / HTTP/1.1\r\nHost: x"));
        assert!(!request_complete(headers));
        let mut full = headers.to_vec();
        full.extend_from_slice(b"ssid=Home");
        assert!(request_complete(&full));
        assert!(request_complete(b"GET / HTTP/1.1\r\n\r\n"));
    }

    #[test]
    fn form_prefills_escaped_ssid() {
        let current = WifiCredentials::new("Tom & \"Jerry\"", "secret").unwrap();
        let page = form_page(Some(&current));
        assert!(page.contains("value=\"Tom &amp; &quot;Jerry&quot;\""));
        assert!(!page.contains("secret"));
        assert!(page.ends_with("</html>"));
    }
}
