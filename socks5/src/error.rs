//! 错误类型。每个连接的错误都在连接处理器边界终止，不会影响监听器。

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::protocol::DecodeError;

#[derive(Error, Debug)]
pub enum ProxyError {
    /// 报文格式错误，直接断开，不回复
    #[error(transparent)]
    Malformed(#[from] DecodeError),

    /// 已回复 0x07
    #[error("不支持的命令: 0x{0:02x}")]
    UnsupportedCommand(u8),

    /// 已回复 0x04
    #[error("无法连接目标 {endpoint:?}: {source}")]
    DestinationUnreachable {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    /// 转发阶段的读写错误
    #[error("转发读写出错: {0}")]
    RelayIo(#[source] io::Error),

    /// 协商阶段读写客户端出错
    #[error("客户端读写出错: {0}")]
    Io(#[from] io::Error),

    #[error("客户端在发送完整报文前断开")]
    ClientClosed,
}

pub type Result<T> = std::result::Result<T, ProxyError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("读取配置文件 '{path}' 失败: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("解析配置文件失败: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("配置项无效: {0}")]
    Invalid(String),
}
