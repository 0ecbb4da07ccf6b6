//! Just enough Ethernet, IPv4 and TCP parsing to get at the TCP payload

use byteorder::{ByteOrder, BE};
use std::net::{Ipv4Addr, SocketAddrV4};

const ETH_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_VLAN: u16 = 0x8100;
const IP_PROTO_TCP: u8 = 6;
const IPV4_MIN_HEADER_LEN: usize = 20;
const TCP_MIN_HEADER_LEN: usize = 20;

/// Request methods recognized when looking for HTTP traffic.
/// `SERVERPUSH` is the camera's own, it switches a connection to FOSC frames.
const HTTP_METHODS: &[&str] = &[
    "GET",
    "POST",
    "HEAD",
    "PUT",
    "DELETE",
    "OPTIONS",
    "TRACE",
    "CONNECT",
    "PATCH",
    "SERVERPUSH",
];

/// The part of a captured TCP/IPv4 packet the correlator cares about
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TcpSegment<'a> {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub payload: &'a [u8],
}

impl<'a> TcpSegment<'a> {
    /// Parses an Ethernet frame, `None` for anything that isn't TCP over IPv4.
    /// A single 802.1Q tag is skipped. The payload is clipped to the IP total length,
    /// so Ethernet padding never ends up in it.
    pub fn parse(raw: &'a [u8]) -> Option<Self> {
        if raw.len() < ETH_HEADER_LEN {
            return None;
        }
        let (ethertype, ip_off) = match BE::read_u16(&raw[12..14]) {
            ETHERTYPE_VLAN if raw.len() >= ETH_HEADER_LEN + 4 => {
                (BE::read_u16(&raw[16..18]), ETH_HEADER_LEN + 4)
            }
            ethertype => (ethertype, ETH_HEADER_LEN),
        };
        if ethertype != ETHERTYPE_IPV4 {
            return None;
        }
        Self::parse_ipv4(&raw[ip_off..])
    }

    fn parse_ipv4(ip: &'a [u8]) -> Option<Self> {
        if ip.len() < IPV4_MIN_HEADER_LEN || ip[0] >> 4 != 4 {
            return None;
        }
        let ihl = ((ip[0] & 0x0f) as usize) * 4;
        let total_len = BE::read_u16(&ip[2..4]) as usize;
        if ip[9] != IP_PROTO_TCP || ihl < IPV4_MIN_HEADER_LEN || total_len < ihl {
            return None;
        }
        // Captures with TSO can report 0 here, trust the capture length then
        let ip = if total_len == 0 {
            ip
        } else {
            &ip[..total_len.min(ip.len())]
        };
        let src_ip = Ipv4Addr::new(ip[12], ip[13], ip[14], ip[15]);
        let dst_ip = Ipv4Addr::new(ip[16], ip[17], ip[18], ip[19]);

        let tcp = ip.get(ihl..)?;
        if tcp.len() < TCP_MIN_HEADER_LEN {
            return None;
        }
        let src_port = BE::read_u16(&tcp[0..2]);
        let dst_port = BE::read_u16(&tcp[2..4]);
        let doff = ((tcp[12] >> 4) as usize) * 4;
        if doff < TCP_MIN_HEADER_LEN {
            return None;
        }
        let payload = tcp.get(doff..)?;
        Some(Self {
            src: SocketAddrV4::new(src_ip, src_port),
            dst: SocketAddrV4::new(dst_ip, dst_port),
            payload,
        })
    }

    pub fn involves(&self, ip: Ipv4Addr) -> bool {
        *self.src.ip() == ip || *self.dst.ip() == ip
    }
}

/// If `payload` starts with an HTTP request line, returns its percent-decoded URI
pub fn http_request_uri(payload: &[u8]) -> Option<String> {
    let line_end = payload.iter().position(|&c| c == b'\n')?;
    let line = std::str::from_utf8(&payload[..line_end]).ok()?;
    let mut parts = line.trim_end_matches('\r').split(' ');
    let method = parts.next()?;
    let uri = parts.next()?;
    let version = parts.next()?;
    if parts.next().is_some()
        || !HTTP_METHODS.contains(&method)
        || uri.is_empty()
        || !version.starts_with("HTTP/")
    {
        return None;
    }
    Some(percent_decode(uri))
}

/// `%XX` escapes become the byte they stand for, malformed escapes are kept as is
pub fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 3 <= bytes.len() {
            let mut byte = [0u8];
            if hex::decode_to_slice(&bytes[i + 1..i + 3], &mut byte).is_ok() {
                out.push(byte[0]);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
