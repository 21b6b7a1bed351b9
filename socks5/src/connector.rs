use std::io;
use tokio::net::{TcpStream, UdpSocket, lookup_host};

/// 连接目标服务器 (TCP)。没有额外超时，依赖系统默认的连接行为。
pub async fn connect_tcp(endpoint: &str) -> io::Result<TcpStream> {
    if endpoint.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "目标地址为空"));
    }
    TcpStream::connect(endpoint).await
}

/// 创建一个已 connect 到目标的 UDP socket
pub async fn connect_udp(endpoint: &str) -> io::Result<UdpSocket> {
    if endpoint.is_empty() {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "目标地址为空"));
    }

    let target = lookup_host(endpoint).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("无法解析地址: {}", endpoint),
        )
    })?;

    let local = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(target).await?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let stream = connect_tcp(&addr.to_string()).await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
    }

    #[tokio::test]
    async fn test_connect_tcp_failures() {
        assert!(connect_tcp("").await.is_err());

        // 绑定后立即释放，端口上没有监听者
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(connect_tcp(&addr.to_string()).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_udp() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = peer.local_addr().unwrap();

        let socket = connect_udp(&addr.to_string()).await.unwrap();
        socket.send(b"ping").await.unwrap();

        let mut buf = [0u8; 16];
        let (n, from) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"ping");
        assert_eq!(from.port(), socket.local_addr().unwrap().port());

        assert!(connect_udp("").await.is_err());
    }
}
