//! Minimal DHCP server for the provisioning access point.
//!
//! Hands out short leases from a small pool so a phone joining the setup network gets an
//! address and finds the portal at the access point's own address. Packet handling is pure
//! and takes the current time as a parameter; [`serve`] wires it to a UDP socket.

/// IPv4 address as network-order octets.
pub type Ipv4 = [u8; 4];
/// Ethernet hardware address.
pub type Mac = [u8; 6];

pub const SERVER_PORT: u16 = 67;
pub const CLIENT_PORT: u16 = 68;
/// Leases are short so clients come back quickly after the portal closes.
pub const LEASE_SECONDS: u32 = 60;
const RENEWAL_SECONDS: u32 = LEASE_SECONDS / 2;
const REBINDING_SECONDS: u32 = LEASE_SECONDS / 8 * 7;
/// Space needed for any reply [`DhcpServer::handle`] builds.
pub const REPLY_CAPACITY: usize = 300;

const MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];
const OPTIONS_OFFSET: usize = 240;
const BOOTREQUEST: u8 = 1;
const BOOTREPLY: u8 = 2;
const HTYPE_ETHERNET: u8 = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq, defmt::Format)]
pub enum MessageType {
    Discover,
    Request,
    Decline,
    Release,
    Inform,
    Other(u8),
}

impl From<u8> for MessageType {
    fn from(code: u8) -> Self {
        match code {
            1 => Self::Discover,
            3 => Self::Request,
            4 => Self::Decline,
            7 => Self::Release,
            8 => Self::Inform,
            other => Self::Other(other),
        }
    }
}

/// What the server answers with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, defmt::Format)]
pub enum ReplyKind {
    Offer,
    Ack,
    Nak,
}

impl ReplyKind {
    const fn code(self) -> u8 {
        match self {
            Self::Offer => 2,
            Self::Ack => 5,
            Self::Nak => 6,
        }
    }
}

/// The parts of a client BOOTREQUEST the server acts on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub kind: MessageType,
    pub transaction_id: u32,
    pub flags: u16,
    pub client_mac: Mac,
    pub client_ip: Option<Ipv4>,
    pub requested_ip: Option<Ipv4>,
    pub server_id: Option<Ipv4>,
}

impl Message {
    /// Parse a BOOTREQUEST from an Ethernet client. Anything else yields `None`.
    #[must_use]
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let [op, htype, hlen] = array_at::<3>(frame, 0)?;
        if op != BOOTREQUEST || htype != HTYPE_ETHERNET || hlen != 6 {
            return None;
        }
        if array_at::<4>(frame, 236)? != MAGIC_COOKIE {
            return None;
        }

        let mut kind = None;
        let mut requested_ip = None;
        let mut server_id = None;
        let mut options = frame.get(OPTIONS_OFFSET..)?;
        while let [code, rest @ ..] = options {
            match code {
                0 => {
                    options = rest;
                    continue;
                }
                255 => break,
                _ => {}
            }
            let [len, rest @ ..] = rest else { break };
            let Some((data, after)) = rest.split_at_checked(usize::from(*len)) else {
                break;
            };
            match (code, data) {
                (50, &[a, b, c, d]) => requested_ip = Some([a, b, c, d]),
                (53, &[message_type]) => kind = Some(MessageType::from(message_type)),
                (54, &[a, b, c, d]) => server_id = Some([a, b, c, d]),
                _ => {}
            }
            options = after;
        }

        let client_ip = array_at::<4>(frame, 12)?;
        Some(Self {
            kind: kind?,
            transaction_id: u32::from_be_bytes(array_at(frame, 4)?),
            flags: u16::from_be_bytes(array_at(frame, 10)?),
            client_mac: array_at(frame, 28)?,
            client_ip: (client_ip != [0; 4]).then_some(client_ip),
            requested_ip,
            server_id,
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct Lease {
    mac: Mac,
    ip: Ipv4,
    expires_at: u64,
}

/// Address pool with at most `N` concurrent leases.
#[derive(Debug)]
pub struct LeaseTable<const N: usize> {
    pool_start: u32,
    pool_size: u8,
    leases: heapless::Vec<Lease, N>,
}

impl<const N: usize> LeaseTable<N> {
    #[must_use]
    pub const fn new(pool_start: Ipv4, pool_size: u8) -> Self {
        Self {
            pool_start: u32::from_be_bytes(pool_start),
            pool_size,
            leases: heapless::Vec::new(),
        }
    }

    /// Give `mac` an address, preferring `requested` when it is free and in the pool.
    ///
    /// A client that already holds a lease keeps it (or moves to `requested`). Returns `None`
    /// when the pool or the table is full.
    pub fn assign(&mut self, mac: Mac, requested: Option<Ipv4>, now_secs: u64) -> Option<Ipv4> {
        self.leases.retain(|lease| lease.expires_at > now_secs);
        let expires_at = now_secs.saturating_add(u64::from(LEASE_SECONDS));

        let wanted = requested.filter(|ip| {
            self.in_pool(*ip)
                && self
                    .leases
                    .iter()
                    .all(|lease| lease.mac == mac || lease.ip != *ip)
        });

        if let Some(existing) = self.leases.iter_mut().find(|lease| lease.mac == mac) {
            if let Some(ip) = wanted {
                existing.ip = ip;
            }
            existing.expires_at = expires_at;
            return Some(existing.ip);
        }

        let ip = wanted.or_else(|| {
            (0..u32::from(self.pool_size))
                .filter_map(|offset| self.pool_start.checked_add(offset))
                .map(u32::to_be_bytes)
                .find(|candidate| self.leases.iter().all(|lease| lease.ip != *candidate))
        })?;
        self.leases.push(Lease { mac, ip, expires_at }).ok()?;
        Some(ip)
    }

    pub fn release(&mut self, mac: Mac) {
        self.leases.retain(|lease| lease.mac != mac);
    }

    /// Address currently leased to `mac`, if any.
    #[must_use]
    pub fn lookup(&self, mac: Mac) -> Option<Ipv4> {
        self.leases.iter().find(|lease| lease.mac == mac).map(|lease| lease.ip)
    }

    fn in_pool(&self, ip: Ipv4) -> bool {
        u32::from_be_bytes(ip)
            .checked_sub(self.pool_start)
            .is_some_and(|offset| offset < u32::from(self.pool_size))
    }
}

/// DHCP server state for one access point.
#[derive(Debug)]
pub struct DhcpServer<const N: usize> {
    server_ip: Ipv4,
    netmask: Ipv4,
    leases: LeaseTable<N>,
}

impl<const N: usize> DhcpServer<N> {
    #[must_use]
    pub const fn new(server_ip: Ipv4, prefix_len: u8, pool_start: Ipv4, pool_size: u8) -> Self {
        Self {
            server_ip,
            netmask: netmask(prefix_len),
            leases: LeaseTable::new(pool_start, pool_size),
        }
    }

    /// Address replies are broadcast to.
    #[must_use]
    pub fn broadcast(&self) -> Ipv4 {
        core::array::from_fn(|index| {
            let ip = self.server_ip.get(index).copied().unwrap_or(0);
            let mask = self.netmask.get(index).copied().unwrap_or(0);
            ip | !mask
        })
    }

    /// Process one client frame and write the reply into `reply`.
    ///
    /// Returns the reply kind and length, or `None` when the frame needs no answer.
    pub fn handle(
        &mut self,
        frame: &[u8],
        now_secs: u64,
        reply: &mut [u8],
    ) -> Option<(ReplyKind, usize)> {
        let message = Message::parse(frame)?;
        let (kind, offered) = match message.kind {
            MessageType::Discover => (
                ReplyKind::Offer,
                self.leases
                    .assign(message.client_mac, message.requested_ip, now_secs)?,
            ),
            MessageType::Request => {
                if message.server_id.is_some_and(|id| id != self.server_ip) {
                    // The client picked another server's offer.
                    self.leases.release(message.client_mac);
                    return None;
                }
                let wanted = message.requested_ip.or(message.client_ip);
                match self.leases.assign(message.client_mac, wanted, now_secs) {
                    Some(ip) if wanted.is_none_or(|wanted| wanted == ip) => (ReplyKind::Ack, ip),
                    _ => (ReplyKind::Nak, [0; 4]),
                }
            }
            MessageType::Decline | MessageType::Release => {
                self.leases.release(message.client_mac);
                return None;
            }
            MessageType::Inform | MessageType::Other(_) => return None,
        };
        let len = self.build_reply(reply, &message, kind, offered)?;
        Some((kind, len))
    }

    fn build_reply(
        &self,
        reply: &mut [u8],
        request: &Message,
        kind: ReplyKind,
        offered: Ipv4,
    ) -> Option<usize> {
        let header = reply.get_mut(..OPTIONS_OFFSET)?;
        header.fill(0);
        put_at(header, 0, &[BOOTREPLY, HTYPE_ETHERNET, 6, 0])?;
        put_at(header, 4, &request.transaction_id.to_be_bytes())?;
        put_at(header, 10, &request.flags.to_be_bytes())?;
        put_at(header, 16, &offered)?;
        put_at(header, 20, &self.server_ip)?;
        put_at(header, 28, &request.client_mac)?;
        put_at(header, 236, &MAGIC_COOKIE)?;

        let mut options = OptionWriter { buffer: reply, len: OPTIONS_OFFSET };
        options.put(53, &[kind.code()])?;
        options.put(54, &self.server_ip)?;
        if kind != ReplyKind::Nak {
            options.put(51, &LEASE_SECONDS.to_be_bytes())?;
            options.put(58, &RENEWAL_SECONDS.to_be_bytes())?;
            options.put(59, &REBINDING_SECONDS.to_be_bytes())?;
            options.put(1, &self.netmask)?;
            options.put(3, &self.server_ip)?;
            options.put(6, &self.server_ip)?;
            options.put(28, &self.broadcast())?;
        }
        options.end()
    }
}

/// Netmask for a prefix length, e.g. 24 -> 255.255.255.0.
#[must_use]
pub const fn netmask(prefix_len: u8) -> Ipv4 {
    let mut mask = 0_u32;
    let mut remaining = prefix_len;
    while remaining > 0 && mask != u32::MAX {
        mask = mask.wrapping_shr(1) | 0x8000_0000;
        remaining = remaining.wrapping_sub(1);
    }
    mask.to_be_bytes()
}

fn array_at<const N: usize>(frame: &[u8], offset: usize) -> Option<[u8; N]> {
    frame.get(offset..offset.checked_add(N)?)?.try_into().ok()
}

fn put_at(buffer: &mut [u8], offset: usize, bytes: &[u8]) -> Option<()> {
    buffer
        .get_mut(offset..offset.checked_add(bytes.len())?)?
        .copy_from_slice(bytes);
    Some(())
}

struct OptionWriter<'a> {
    buffer: &'a mut [u8],
    len: usize,
}

impl OptionWriter<'_> {
    fn put(&mut self, code: u8, payload: &[u8]) -> Option<()> {
        let payload_len = u8::try_from(payload.len()).ok()?;
        put_at(self.buffer, self.len, &[code, payload_len])?;
        put_at(self.buffer, self.len.checked_add(2)?, payload)?;
        self.len = self.len.checked_add(2)?.checked_add(payload.len())?;
        Some(())
    }

    fn end(self) -> Option<usize> {
        put_at(self.buffer, self.len, &[255])?;
        self.len.checked_add(1)
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
mod device {
    use core::convert::Infallible;

    use defmt::{debug, info, warn};
    use embassy_net::udp::{PacketMetadata, UdpSocket};
    use embassy_net::{Ipv4Address, Stack};
    use embassy_time::Instant;

    use super::{CLIENT_PORT, DhcpServer, REPLY_CAPACITY, SERVER_PORT};
    use crate::constants::{AP_ADDRESS, AP_POOL_SIZE, AP_POOL_START, AP_PREFIX_LEN};
    use crate::{Error, Result};

    const FRAME_CAPACITY: usize = 768;

    /// Socket and frame memory for [`serve`], kept out of the task's future.
    pub struct DhcpBuffers {
        rx_meta: [PacketMetadata; 4],
        rx: [u8; FRAME_CAPACITY],
        tx_meta: [PacketMetadata; 4],
        tx: [u8; FRAME_CAPACITY],
        frame: [u8; FRAME_CAPACITY],
        reply: [u8; REPLY_CAPACITY],
    }

    impl DhcpBuffers {
        #[must_use]
        pub const fn new() -> Self {
            Self {
                rx_meta: [PacketMetadata::EMPTY; 4],
                rx: [0; FRAME_CAPACITY],
                tx_meta: [PacketMetadata::EMPTY; 4],
                tx: [0; FRAME_CAPACITY],
                frame: [0; FRAME_CAPACITY],
                reply: [0; REPLY_CAPACITY],
            }
        }
    }

    /// Answer DHCP clients on the access point until the future is dropped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the server port cannot be bound.
    pub async fn serve(stack: Stack<'static>, buffers: &mut DhcpBuffers) -> Result<Infallible> {
        let DhcpBuffers { rx_meta, rx, tx_meta, tx, frame, reply } = buffers;
        let mut socket = UdpSocket::new(stack, rx_meta, rx, tx_meta, tx);
        socket.bind(SERVER_PORT).map_err(Error::UdpBind)?;

        let mut server = DhcpServer::<8>::new(AP_ADDRESS, AP_PREFIX_LEN, AP_POOL_START, AP_POOL_SIZE);
        let [a, b, c, d] = server.broadcast();
        let broadcast = Ipv4Address::new(a, b, c, d);
        info!("DHCP server listening on port {}", SERVER_PORT);

        loop {
            let len = match socket.recv_from(frame).await {
                Ok((len, _from)) => len,
                Err(err) => {
                    warn!("DHCP receive failed: {:?}", err);
                    continue;
                }
            };
            let Some(request) = frame.get(..len) else { continue };
            let Some((kind, reply_len)) = server.handle(request, Instant::now().as_secs(), reply)
            else {
                continue;
            };
            let Some(response) = reply.get(..reply_len) else { continue };
            match socket.send_to(response, (broadcast, CLIENT_PORT)).await {
                Ok(()) => debug!("DHCP sent {}", kind),
                Err(err) => warn!("DHCP send failed: {:?}", err),
            }
        }
    }
}

#[cfg(all(feature = "wifi", not(feature = "host")))]
pub use device::{DhcpBuffers, serve};
