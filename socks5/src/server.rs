use log::{debug, error, info, warn};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::error::ProxyError;
use crate::handler::handle_connection;

/// SOCKS5 监听器，每个连接交给独立任务处理
pub struct Server {
    listener: TcpListener,
    config: Arc<ServerConfig>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        Ok(Self {
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// 持续接受连接。单个连接的错误只记录日志，不影响其他连接。
    pub async fn run(self) -> io::Result<()> {
        info!("SOCKS5 代理服务器启动在 {}", self.local_addr()?);

        loop {
            match self.listener.accept().await {
                Ok((socket, addr)) => {
                    debug!("新连接来自: {}", addr);
                    let config = self.config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(socket, config).await {
                            log_connection_error(addr, &e);
                        }
                    });
                }
                Err(e) => {
                    error!("接受连接时出错: {}", e);
                }
            }
        }
    }
}

fn log_connection_error(addr: SocketAddr, e: &ProxyError) {
    match e {
        ProxyError::ClientClosed => debug!("{} 客户端断开", addr),
        ProxyError::Malformed(_)
        | ProxyError::UnsupportedCommand(_)
        | ProxyError::DestinationUnreachable { .. } => {
            warn!("处理 {} 的请求失败: {}", addr, e)
        }
        _ => error!("处理 {} 的连接时出错: {}", addr, e),
    }
}
