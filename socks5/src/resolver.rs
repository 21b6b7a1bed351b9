use std::net::{Ipv4Addr, Ipv6Addr};

use crate::consts::*;
use crate::protocol::ProxyRequest;

/// 把代理请求中的目标地址转换为可连接的 `host:port` 字符串。
///
/// 未知地址类型或地址长度不符时返回空字符串，后续连接会失败。
pub fn resolve(request: &ProxyRequest) -> String {
    let addr = &request.destination_address;
    let port = request.port();

    match request.address_type {
        IPV4_ADDRESS => match <[u8; 4]>::try_from(&addr[..]) {
            Ok(octets) => format!("{}:{}", Ipv4Addr::from(octets), port),
            Err(_) => String::new(),
        },
        // 第一个字节是长度，域名从偏移 1 开始
        DOMAIN_NAME if !addr.is_empty() => {
            format!("{}:{}", String::from_utf8_lossy(&addr[1..]), port)
        }
        IPV6_ADDRESS => match <[u8; 16]>::try_from(&addr[..]) {
            Ok(octets) => format!("[{}]:{}", Ipv6Addr::from(octets), port),
            Err(_) => String::new(),
        },
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn request(address_type: u8, address: &[u8], port: u16) -> ProxyRequest {
        ProxyRequest {
            version: SOCKS_VERSION,
            command: CONNECT_COMMAND,
            reserved: RESERVED,
            address_type,
            destination_address: Bytes::copy_from_slice(address),
            destination_port: port.to_be_bytes(),
        }
    }

    #[test]
    fn test_resolve_ipv4() {
        let req = request(IPV4_ADDRESS, &[127, 0, 0, 1], 80);
        assert_eq!(resolve(&req), "127.0.0.1:80");
    }

    #[test]
    fn test_resolve_domain() {
        let mut addr = vec![11u8];
        addr.extend_from_slice(b"example.com");
        let req = request(DOMAIN_NAME, &addr, 443);
        assert_eq!(resolve(&req), "example.com:443");
    }

    #[test]
    fn test_resolve_ipv6() {
        let mut octets = [0u8; 16];
        octets[0] = 0x20;
        octets[1] = 0x01;
        octets[2] = 0x0d;
        octets[3] = 0xb8;
        octets[15] = 0x01;
        let req = request(IPV6_ADDRESS, &octets, 8080);
        assert_eq!(resolve(&req), "[2001:db8::1]:8080");

        let loopback = request(IPV6_ADDRESS, &Ipv6Addr::LOCALHOST.octets(), 22);
        assert_eq!(resolve(&loopback), "[::1]:22");
    }

    #[test]
    fn test_resolve_unknown_type() {
        let req = request(0x09, &[], 80);
        assert_eq!(resolve(&req), "");

        // 长度不符
        let req = request(IPV4_ADDRESS, &[1, 2, 3], 80);
        assert_eq!(resolve(&req), "");
    }
}
