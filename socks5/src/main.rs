use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::net::IpAddr;
use std::path::PathBuf;

use socks5::{PartialConfig, Server};

#[derive(Parser)]
#[command(name = "socks5")]
#[command(about = "SOCKS5 proxy server (no authentication)")]
struct Args {
    /// JSON config file, command line flags take precedence
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(short, long)]
    ip: Option<IpAddr>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Read buffer size in bytes
    #[arg(short, long)]
    read_buf_len: Option<usize>,

    /// Enable the UDP ASSOCIATE command
    #[arg(long)]
    udp: bool,
}

impl Args {
    fn overrides(&self) -> PartialConfig {
        PartialConfig {
            listen_ip: self.ip,
            port: self.port,
            read_buf_len: self.read_buf_len,
            udp_associate: self.udp.then_some(true),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let file = match &args.config {
        Some(path) => PartialConfig::load(path)?,
        None => PartialConfig::default(),
    };
    let config = file.merge(args.overrides()).build()?;

    let server = Server::bind(config.clone())
        .await
        .with_context(|| format!("无法监听 {}", config.listen_addr()))?;
    info!(
        "读取缓冲区 {} 字节, UDP ASSOCIATE {}",
        config.read_buf_len,
        if config.udp_associate { "开启" } else { "关闭" }
    );

    tokio::select! {
        res = server.run() => res?,
        _ = tokio::signal::ctrl_c() => info!("收到退出信号，停止服务"),
    }
    Ok(())
}
