//! SOCKS5 报文编解码，纯函数，不做任何 I/O。

use bytes::{BufMut, Bytes, BytesMut};
use std::net::SocketAddr;
use thiserror::Error;

use crate::consts::*;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("报文格式错误: {0}")]
    MalformedMessage(String),
}

fn malformed(reason: impl Into<String>) -> DecodeError {
    DecodeError::MalformedMessage(reason.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthMethodRequest {
    pub version: u8,
    pub method_count: u8,
    pub methods: Vec<u8>,
}

impl AuthMethodRequest {
    /// 报文在缓冲区中占用的字节数
    pub fn encoded_len(&self) -> usize {
        2 + self.methods.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthMethodResponse {
    pub version: u8,
    pub method: u8,
}

impl AuthMethodResponse {
    /// 唯一会被选中的方法: 无需认证
    pub fn no_auth() -> Self {
        Self {
            version: SOCKS_VERSION,
            method: NO_AUTHENTICATION,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub version: u8,
    pub command: u8,
    pub reserved: u8,
    pub address_type: u8,
    /// 原始地址字节。域名类型包含开头的长度字节。
    pub destination_address: Bytes,
    pub destination_port: [u8; 2],
}

impl ProxyRequest {
    pub fn encoded_len(&self) -> usize {
        4 + self.destination_address.len() + 2
    }

    pub fn port(&self) -> u16 {
        u16::from_be_bytes(self.destination_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub version: u8,
    pub reply: u8,
    pub reserved: u8,
    pub address_type: u8,
    pub bound_address: Bytes,
    pub bound_port: [u8; 2],
}

impl ProxyResponse {
    /// 原样回显请求中的地址类型、地址和端口
    pub fn echo(request: &ProxyRequest, reply: u8) -> Self {
        Self {
            version: SOCKS_VERSION,
            reply,
            reserved: RESERVED,
            address_type: request.address_type,
            bound_address: request.destination_address.clone(),
            bound_port: request.destination_port,
        }
    }

    /// 用真实绑定地址构造响应 (UDP ASSOCIATE)
    pub fn bound(reply: u8, addr: SocketAddr) -> Self {
        let (address_type, bound_address, bound_port) = split_socket_addr(addr);
        Self {
            version: SOCKS_VERSION,
            reply,
            reserved: RESERVED,
            address_type,
            bound_address,
            bound_port,
        }
    }
}

/// 按地址类型计算地址字段长度。未知类型返回 0。
fn address_len(address_type: u8, first: u8) -> usize {
    match address_type {
        IPV4_ADDRESS => 4,
        DOMAIN_NAME => first as usize + 1,
        IPV6_ADDRESS => 16,
        _ => 0,
    }
}

pub fn decode_auth_method_request(buf: &[u8]) -> Result<AuthMethodRequest, DecodeError> {
    if buf.len() < MIN_AUTH_REQUEST_LEN {
        return Err(malformed(format!(
            "认证请求过短 ({} < {})",
            buf.len(),
            MIN_AUTH_REQUEST_LEN
        )));
    }
    if buf[0] != SOCKS_VERSION {
        return Err(malformed(format!("不支持的版本 0x{:02x}", buf[0])));
    }

    // 方法列表不完整时只取实际收到的部分，反正只会选无需认证
    let method_count = buf[1];
    let end = buf.len().min(2 + method_count as usize);

    Ok(AuthMethodRequest {
        version: buf[0],
        method_count,
        methods: buf[2..end].to_vec(),
    })
}

pub fn decode_proxy_request(buf: &[u8]) -> Result<ProxyRequest, DecodeError> {
    if buf.len() < MIN_PROXY_REQUEST_LEN {
        return Err(malformed(format!(
            "代理请求过短 ({} < {})",
            buf.len(),
            MIN_PROXY_REQUEST_LEN
        )));
    }
    if buf[0] != SOCKS_VERSION {
        return Err(malformed(format!("不支持的版本 0x{:02x}", buf[0])));
    }

    let address_type = buf[3];
    let addr_end = 4 + address_len(address_type, buf[4]);
    let port_end = addr_end + 2;
    if buf.len() < port_end {
        return Err(malformed(format!(
            "地址类型 0x{:02x} 需要 {} 字节, 实际 {}",
            address_type,
            port_end,
            buf.len()
        )));
    }

    Ok(ProxyRequest {
        version: buf[0],
        command: buf[1],
        reserved: buf[2],
        address_type,
        destination_address: Bytes::copy_from_slice(&buf[4..addr_end]),
        destination_port: [buf[addr_end], buf[addr_end + 1]],
    })
}

pub fn encode_auth_method_response(response: &AuthMethodResponse) -> Bytes {
    Bytes::copy_from_slice(&[response.version, response.method])
}

pub fn encode_proxy_response(response: &ProxyResponse) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + response.bound_address.len() + 2);
    buf.put_u8(response.version);
    buf.put_u8(response.reply);
    buf.put_u8(response.reserved);
    buf.put_u8(response.address_type);
    buf.put_slice(&response.bound_address);
    buf.put_slice(&response.bound_port);
    buf.freeze()
}

fn split_socket_addr(addr: SocketAddr) -> (u8, Bytes, [u8; 2]) {
    let port = addr.port().to_be_bytes();
    match addr {
        SocketAddr::V4(v4) => (IPV4_ADDRESS, Bytes::copy_from_slice(&v4.ip().octets()), port),
        SocketAddr::V6(v6) => (IPV6_ADDRESS, Bytes::copy_from_slice(&v6.ip().octets()), port),
    }
}

/// SOCKS5 UDP 数据报文头
/// +----+------+------+----------+----------+----------+
/// |RSV | FRAG | ATYP | DST.ADDR | DST.PORT |   DATA   |
/// +----+------+------+----------+----------+----------+
/// | 2  |  1   |  1   | Variable |    2     | Variable |
/// +----+------+------+----------+----------+----------+
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UdpHeader {
    pub frag: u8,
    pub address_type: u8,
    pub address: Bytes,
    pub port: [u8; 2],
}

impl UdpHeader {
    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        let (address_type, address, port) = split_socket_addr(addr);
        Self {
            frag: 0,
            address_type,
            address,
            port,
        }
    }

    /// 按代理请求的形式看待目标地址，便于复用地址解析
    pub fn to_request(&self) -> ProxyRequest {
        ProxyRequest {
            version: SOCKS_VERSION,
            command: UDP_ASSOCIATE_COMMAND,
            reserved: RESERVED,
            address_type: self.address_type,
            destination_address: self.address.clone(),
            destination_port: self.port,
        }
    }
}

/// 解析 UDP 报文头，返回报文头和其占用的字节数
pub fn decode_udp_header(buf: &[u8]) -> Result<(UdpHeader, usize), DecodeError> {
    if buf.len() < 5 {
        return Err(malformed("UDP 报文过短"));
    }
    if buf[0] != 0x00 || buf[1] != 0x00 {
        return Err(malformed("UDP 头部保留字段无效"));
    }

    let address_type = buf[3];
    let addr_len = match address_type {
        IPV4_ADDRESS | DOMAIN_NAME | IPV6_ADDRESS => address_len(address_type, buf[4]),
        other => return Err(malformed(format!("未知的地址类型 0x{:02x}", other))),
    };
    let addr_end = 4 + addr_len;
    if buf.len() < addr_end + 2 {
        return Err(malformed("UDP 头部超出报文长度"));
    }

    let header = UdpHeader {
        frag: buf[2],
        address_type,
        address: Bytes::copy_from_slice(&buf[4..addr_end]),
        port: [buf[addr_end], buf[addr_end + 1]],
    };
    Ok((header, addr_end + 2))
}

pub fn encode_udp_header(header: &UdpHeader, buf: &mut BytesMut) {
    buf.put_slice(&[0x00, 0x00, header.frag, header.address_type]);
    buf.put_slice(&header.address);
    buf.put_slice(&header.port);
}
