use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use crate::consts::{DEFAULT_PORT, DEFAULT_READ_BUF_LEN, MAX_PROXY_REQUEST_LEN};
use crate::error::ConfigError;

/// 服务运行配置，启动后只读
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub listen_ip: IpAddr,
    pub port: u16,
    /// 每次读取的缓冲区大小
    pub read_buf_len: usize,
    /// 是否启用 UDP ASSOCIATE，关闭时回复 0x07
    pub udp_associate: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            read_buf_len: DEFAULT_READ_BUF_LEN,
            udp_associate: false,
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_ip, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_buf_len < MAX_PROXY_REQUEST_LEN {
            return Err(ConfigError::Invalid(format!(
                "read_buf_len 至少为 {}, 实际为 {}",
                MAX_PROXY_REQUEST_LEN, self.read_buf_len
            )));
        }
        Ok(())
    }
}

/// 部分配置。配置文件和命令行各产生一层，后者覆盖前者。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialConfig {
    pub listen_ip: Option<IpAddr>,
    pub port: Option<u16>,
    pub read_buf_len: Option<usize>,
    pub udp_associate: Option<bool>,
}

impl PartialConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// `other` 中已设置的字段覆盖当前值
    pub fn merge(self, other: PartialConfig) -> Self {
        Self {
            listen_ip: other.listen_ip.or(self.listen_ip),
            port: other.port.or(self.port),
            read_buf_len: other.read_buf_len.or(self.read_buf_len),
            udp_associate: other.udp_associate.or(self.udp_associate),
        }
    }

    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        let defaults = ServerConfig::default();
        let config = ServerConfig {
            listen_ip: self.listen_ip.unwrap_or(defaults.listen_ip),
            port: self.port.unwrap_or(defaults.port),
            read_buf_len: self.read_buf_len.unwrap_or(defaults.read_buf_len),
            udp_associate: self.udp_associate.unwrap_or(defaults.udp_associate),
        };
        config.validate()?;
        Ok(config)
    }
}
