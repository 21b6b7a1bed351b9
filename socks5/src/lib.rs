//! SOCKS5 代理服务器: 只支持“无需认证”，实现 CONNECT，可选 UDP ASSOCIATE。

pub mod config;
pub mod connector;
pub mod consts;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod relay;
pub mod resolver;
pub mod server;
pub mod udp;

#[cfg(test)]
mod testing;

pub use config::{PartialConfig, ServerConfig};
pub use error::{ConfigError, ProxyError, Result};
pub use server::Server;
