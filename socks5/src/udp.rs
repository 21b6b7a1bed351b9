//! UDP ASSOCIATE 中继。
//!
//! 为每个关联绑定一个面向客户端的 UDP socket，每个目标地址使用一个
//! 已 connect 的 UDP socket。关联的生命周期与控制用的 TCP 连接一致。

use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::connector::connect_udp;
use crate::consts::*;
use crate::error::{ProxyError, Result};
use crate::protocol::{
    ProxyRequest, ProxyResponse, UdpHeader, decode_udp_header, encode_proxy_response,
    encode_udp_header,
};
use crate::resolver::resolve;

/// 单个关联最多同时使用的目标数量
const MAX_TARGETS: usize = 256;

/// 处理 UDP ASSOCIATE 命令，直到控制连接关闭
pub async fn associate(mut control: TcpStream, request: &ProxyRequest, id: &str) -> Result<()> {
    let local_ip = control.local_addr()?.ip();
    let client_ip = control.peer_addr()?.ip();

    let socket = match UdpSocket::bind(SocketAddr::new(local_ip, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("[{}] 绑定 UDP 中继失败: {}", id, e);
            let _ = control
                .write_all(&encode_proxy_response(&ProxyResponse::echo(
                    request,
                    HOST_UNREACHABLE,
                )))
                .await;
            return Err(ProxyError::Io(e));
        }
    };
    let bound = socket.local_addr()?;
    control
        .write_all(&encode_proxy_response(&ProxyResponse::bound(SUCCESS, bound)))
        .await?;
    info!("[{}] UDP 中继启动在 {}", id, bound);

    let relay = UdpRelay::new(socket, client_ip, id);
    let mut discard = [0u8; 64];
    tokio::select! {
        res = relay.run() => res,
        res = async {
            // 控制连接上的数据没有意义，读到 EOF 或出错即结束关联
            loop {
                if control.read(&mut discard).await? == 0 {
                    return Ok::<(), std::io::Error>(());
                }
            }
        } => {
            debug!("[{}] 控制连接关闭，停止 UDP 中继", id);
            res.map_err(ProxyError::Io)
        }
    }
}

struct UdpRelay<'a> {
    id: &'a str,
    socket: UdpSocket,
    /// 握手时记录的客户端 IP，只接受来自该 IP 的报文
    expected_client_ip: IpAddr,
    client_addr: Option<SocketAddr>,
    targets: HashMap<String, Arc<UdpSocket>>,
    readers: JoinSet<()>,
    inbound_tx: mpsc::Sender<(SocketAddr, Bytes)>,
    inbound_rx: mpsc::Receiver<(SocketAddr, Bytes)>,
}

impl<'a> UdpRelay<'a> {
    fn new(socket: UdpSocket, expected_client_ip: IpAddr, id: &'a str) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        Self {
            id,
            socket,
            expected_client_ip,
            client_addr: None,
            targets: HashMap::new(),
            readers: JoinSet::new(),
            inbound_tx,
            inbound_rx,
        }
    }

    async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; MAX_UDP_SIZE];
        loop {
            tokio::select! {
                res = self.socket.recv_from(&mut buf) => match res {
                    Ok((n, src)) => {
                        if let Err(e) = self.handle_outbound(&buf[..n], src).await {
                            debug!("[{}] 丢弃来自 {} 的 UDP 报文: {}", self.id, src, e);
                        }
                    }
                    Err(e) => warn!("[{}] UDP 读取失败: {}", self.id, e),
                },
                Some((from, payload)) = self.inbound_rx.recv() => {
                    if let Err(e) = self.handle_inbound(from, &payload).await {
                        debug!("[{}] 回送 UDP 报文失败: {}", self.id, e);
                    }
                }
            }
        }
    }

    fn accept_source(&mut self, src: SocketAddr) -> bool {
        if src.ip() != self.expected_client_ip {
            return false;
        }
        match self.client_addr {
            Some(client) => client == src,
            None => {
                debug!("[{}] 锁定 UDP 客户端 {}", self.id, src);
                self.client_addr = Some(src);
                true
            }
        }
    }

    /// 客户端 -> 目标
    async fn handle_outbound(&mut self, packet: &[u8], src: SocketAddr) -> Result<()> {
        if !self.accept_source(src) {
            return Err(ProxyError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "非预期的 UDP 来源",
            )));
        }

        let (header, header_len) = decode_udp_header(packet)?;
        if header.frag != 0 {
            warn!("[{}] 不支持 UDP 分片", self.id);
            return Ok(());
        }

        let endpoint = resolve(&header.to_request());
        let target = self.target(&endpoint).await?;
        target.send(&packet[header_len..]).await?;
        Ok(())
    }

    /// 目标 -> 客户端
    async fn handle_inbound(&self, from: SocketAddr, payload: &[u8]) -> Result<()> {
        let Some(client) = self.client_addr else {
            return Ok(());
        };

        let header = UdpHeader::from_socket_addr(from);
        let mut buf = BytesMut::with_capacity(22 + payload.len());
        encode_udp_header(&header, &mut buf);
        buf.extend_from_slice(payload);
        self.socket.send_to(&buf, client).await?;
        Ok(())
    }

    async fn target(&mut self, endpoint: &str) -> Result<Arc<UdpSocket>> {
        if let Some(socket) = self.targets.get(endpoint) {
            return Ok(socket.clone());
        }
        if self.targets.len() >= MAX_TARGETS {
            return Err(ProxyError::Io(std::io::Error::other("UDP 目标过多")));
        }

        let socket = connect_udp(endpoint)
            .await
            .map_err(|source| ProxyError::DestinationUnreachable {
                endpoint: endpoint.to_string(),
                source,
            })?;
        let socket = Arc::new(socket);
        let peer = socket.peer_addr()?;

        let reader = socket.clone();
        let tx = self.inbound_tx.clone();
        self.readers.spawn(async move {
            let mut buf = vec![0u8; MAX_UDP_SIZE];
            while let Ok(n) = reader.recv(&mut buf).await {
                if tx.send((peer, Bytes::copy_from_slice(&buf[..n]))).await.is_err() {
                    break;
                }
            }
        });

        debug!("[{}] 新 UDP 目标 {}", self.id, endpoint);
        self.targets.insert(endpoint.to_string(), socket.clone());
        Ok(socket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::protocol::decode_proxy_request;
    use crate::testing::{handshake, spawn_single_connection, spawn_udp_echo_server};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_udp_associate_round_trip() {
        let echo = spawn_udp_echo_server().await;
        let config = ServerConfig {
            read_buf_len: 1024,
            udp_associate: true,
            ..Default::default()
        };
        let (addr, handle) = spawn_single_connection(config).await;

        let mut control = TcpStream::connect(addr).await.unwrap();
        handshake(&mut control).await;
        control
            .write_all(&[0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
            .await
            .unwrap();

        let mut reply = [0u8; 10];
        control.read_exact(&mut reply).await.unwrap();
        let reply = decode_proxy_request(&reply).unwrap();
        assert_eq!(reply.command, SUCCESS);
        assert_eq!(reply.address_type, IPV4_ADDRESS);
        assert_eq!(&reply.destination_address[..], &[127, 0, 0, 1]);
        let relay_addr = SocketAddr::from(([127, 0, 0, 1], reply.port()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut packet = BytesMut::new();
        encode_udp_header(&UdpHeader::from_socket_addr(echo), &mut packet);
        packet.extend_from_slice(b"hello");
        client.send_to(&packet, relay_addr).await.unwrap();

        let mut buf = [0u8; 128];
        let (n, from) = timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(from, relay_addr);
        let (header, header_len) = decode_udp_header(&buf[..n]).unwrap();
        assert_eq!(header, UdpHeader::from_socket_addr(echo));
        assert_eq!(&buf[header_len..n], b"hello");

        // 控制连接关闭后关联结束
        drop(control);
        handle.await.unwrap().unwrap();
    }
}
