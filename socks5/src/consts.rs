// SOCKS5 协议常量 (RFC 1928)
//
// +----+----------+----------+
// |VER | NMETHODS | METHODS  |
// +----+----------+----------+
// | 1  |    1     | 1 to 255 |
// +----+----------+----------+
//
// +----+-----+-------+------+----------+----------+
// |VER | CMD |  RSV  | ATYP | DST.ADDR | DST.PORT |
// +----+-----+-------+------+----------+----------+
// | 1  |  1  | X'00' |  1   | Variable |    2     |
// +----+-----+-------+------+----------+----------+

pub const SOCKS_VERSION: u8 = 0x05;
pub const RESERVED: u8 = 0x00;

// 认证方法
pub const NO_AUTHENTICATION: u8 = 0x00;

// 命令
pub const CONNECT_COMMAND: u8 = 0x01;
pub const BIND_COMMAND: u8 = 0x02;
pub const UDP_ASSOCIATE_COMMAND: u8 = 0x03;

// 地址类型
pub const IPV4_ADDRESS: u8 = 0x01;
pub const DOMAIN_NAME: u8 = 0x03;
pub const IPV6_ADDRESS: u8 = 0x04;

// 响应码
pub const SUCCESS: u8 = 0x00;
pub const HOST_UNREACHABLE: u8 = 0x04;
pub const COMMAND_NOT_SUPPORTED: u8 = 0x07;

/// 认证请求最短长度: VER + NMETHODS + 至少一个方法
pub const MIN_AUTH_REQUEST_LEN: usize = 3;
/// 代理请求最短长度: 4 字节头 + IPv4 + 端口
pub const MIN_PROXY_REQUEST_LEN: usize = 10;
/// 最长的代理请求: 4 字节头 + 长度字节 + 255 字节域名 + 端口
pub const MAX_PROXY_REQUEST_LEN: usize = 4 + 1 + 255 + 2;

pub const DEFAULT_PORT: u16 = 1080;
pub const DEFAULT_READ_BUF_LEN: usize = 65536;

pub const MAX_UDP_SIZE: usize = 65535;
