//! 单个客户端连接的协议状态机:
//!
//! 协商 -> 请求 -> {CONNECT 转发 | UDP 转发 | 拒绝} -> 关闭
//!
//! 任一步骤出错都会结束连接，客户端和目标连接在返回时随 drop 关闭。

use bytes::{Buf, BytesMut};
use log::{debug, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::connector::connect_tcp;
use crate::consts::*;
use crate::error::{ProxyError, Result};
use crate::protocol::{
    AuthMethodRequest, AuthMethodResponse, ProxyRequest, ProxyResponse,
    decode_auth_method_request, decode_proxy_request, encode_auth_method_response,
    encode_proxy_response,
};
use crate::relay::relay;
use crate::resolver::resolve;
use crate::udp;

/// 处理一个已接受的客户端连接
pub async fn handle_connection(client: TcpStream, config: Arc<ServerConfig>) -> Result<()> {
    let mut session = Session::new(client, config);
    info!("[{}] 开始处理连接 {:?}", session.id, session.peer);

    // 出错时由监听器按错误类型记录
    let result = session.serve().await;
    if result.is_ok() {
        info!("[{}] 连接结束", session.id);
    }
    result
}

struct Session {
    id: String,
    peer: Option<SocketAddr>,
    client: Option<TcpStream>,
    /// 已读取但尚未解析的数据，客户端可能把多个报文放在一次发送中
    buffer: BytesMut,
    config: Arc<ServerConfig>,
}

impl Session {
    fn new(client: TcpStream, config: Arc<ServerConfig>) -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(8);
        Self {
            id,
            peer: client.peer_addr().ok(),
            client: Some(client),
            buffer: BytesMut::with_capacity(config.read_buf_len),
            config,
        }
    }

    fn client(&mut self) -> Result<&mut TcpStream> {
        self.client.as_mut().ok_or(ProxyError::ClientClosed)
    }

    async fn serve(&mut self) -> Result<()> {
        self.negotiate().await?;
        let request = self.read_request().await?;
        self.dispatch(request).await
    }

    /// 缓冲区为空时从客户端读取一次
    async fn fill(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            return Ok(());
        }
        let read_buf_len = self.config.read_buf_len;
        self.buffer.reserve(read_buf_len);

        let client = self.client.as_mut().ok_or(ProxyError::ClientClosed)?;
        let n = client
            .take(read_buf_len as u64)
            .read_buf(&mut self.buffer)
            .await?;
        if n == 0 {
            return Err(ProxyError::ClientClosed);
        }
        Ok(())
    }

    async fn negotiate(&mut self) -> Result<()> {
        self.fill().await?;
        let request = decode_auth_method_request(&self.buffer)?;
        self.buffer.advance(request.encoded_len());

        let response = select_auth_method(&request);
        self.client()?
            .write_all(&encode_auth_method_response(&response))
            .await?;
        debug!("[{}] 握手成功, 客户端方法: {:?}", self.id, request.methods);
        Ok(())
    }

    async fn read_request(&mut self) -> Result<ProxyRequest> {
        self.fill().await?;
        let request = decode_proxy_request(&self.buffer)?;
        self.buffer.advance(request.encoded_len());
        Ok(request)
    }

    async fn reply(&mut self, response: &ProxyResponse) -> Result<()> {
        self.client()?
            .write_all(&encode_proxy_response(response))
            .await?;
        Ok(())
    }

    async fn dispatch(&mut self, request: ProxyRequest) -> Result<()> {
        match request.command {
            CONNECT_COMMAND => self.connect(request).await,
            UDP_ASSOCIATE_COMMAND if self.config.udp_associate => {
                let client = self.client.take().ok_or(ProxyError::ClientClosed)?;
                udp::associate(client, &request, &self.id).await
            }
            command => {
                self.reply(&ProxyResponse::echo(&request, COMMAND_NOT_SUPPORTED))
                    .await?;
                Err(ProxyError::UnsupportedCommand(command))
            }
        }
    }

    async fn connect(&mut self, request: ProxyRequest) -> Result<()> {
        let endpoint = resolve(&request);
        info!("[{}] 连接目标: {}", self.id, endpoint);

        let mut remote = match connect_tcp(&endpoint).await {
            Ok(remote) => remote,
            Err(source) => {
                let _ = self
                    .reply(&ProxyResponse::echo(&request, HOST_UNREACHABLE))
                    .await;
                return Err(ProxyError::DestinationUnreachable { endpoint, source });
            }
        };

        self.reply(&ProxyResponse::echo(&request, SUCCESS)).await?;

        // 请求之后紧跟的数据先发给目标
        if !self.buffer.is_empty() {
            remote
                .write_all(&self.buffer)
                .await
                .map_err(ProxyError::RelayIo)?;
            self.buffer.clear();
        }

        let client = self.client.take().ok_or(ProxyError::ClientClosed)?;
        let stats = relay(client, remote, self.config.read_buf_len).await?;
        info!(
            "[{}] {} 转发完成: 上行 {}b, 下行 {}b",
            self.id, endpoint, stats.client_to_remote, stats.remote_to_client
        );
        Ok(())
    }
}

/// 方法选择固定返回“无需认证”
fn select_auth_method(_request: &AuthMethodRequest) -> AuthMethodResponse {
    AuthMethodResponse::no_auth()
}
