//! 双向数据转发。
//!
//! 每个方向一个转发任务: 读取一个数据块，写到对端，再读下一块，同一方向
//! 同时只有一个读操作。两个任务把进度和结束事件发给同一个汇合点，任一
//! 方向结束或读写出错，整个转发结束，另一方向的任务被取消，两端都被关闭。
//! 一个方向的写阻塞不会影响另一方向继续读写。

use bytes::{Bytes, BytesMut};
use log::debug;
use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::Poll;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::{ProxyError, Result};

/// 单个数据块最多连续读取的次数
const MAX_READS_PER_CHUNK: usize = 16;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub client_to_remote: u64,
    pub remote_to_client: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    ClientToRemote,
    RemoteToClient,
}

impl Direction {
    fn label(self) -> &'static str {
        match self {
            Direction::ClientToRemote => "客户端 -> 目标",
            Direction::RemoteToClient => "目标 -> 客户端",
        }
    }
}

#[derive(Debug)]
enum Event {
    Forwarded(Direction, usize),
    Finished(Direction, io::Result<()>),
}

#[derive(Debug)]
enum ReadOutcome {
    Chunk(Bytes),
    /// 对端关闭 (None) 或读出错
    Closed(Option<io::Error>),
}

/// 只 poll 一次读操作，数据未就绪时返回 None
async fn try_read_now<R>(reader: &mut R, buf: &mut [u8]) -> Option<io::Result<usize>>
where
    R: AsyncRead + Unpin,
{
    poll_fn(|cx| {
        let mut read_buf = ReadBuf::new(&mut *buf);
        match Pin::new(&mut *reader).poll_read(cx, &mut read_buf) {
            Poll::Ready(Ok(())) => Poll::Ready(Some(Ok(read_buf.filled().len()))),
            Poll::Ready(Err(e)) => Poll::Ready(Some(Err(e))),
            Poll::Pending => Poll::Ready(None),
        }
    })
    .await
}

/// 读取一个数据块: 第一次读会等待，之后只要读满缓冲区且还有立即可读的数据就继续累积
async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> ReadOutcome
where
    R: AsyncRead + Unpin,
{
    let buf_len = buf.len();
    let mut chunk = BytesMut::new();

    let mut n = match reader.read(buf).await {
        Ok(n) => n,
        Err(e) => return ReadOutcome::Closed(Some(e)),
    };

    for _ in 0..MAX_READS_PER_CHUNK {
        chunk.extend_from_slice(&buf[..n]);
        if n < buf_len {
            break;
        }
        n = match try_read_now(reader, buf).await {
            Some(Ok(n)) => n,
            Some(Err(e)) => return ReadOutcome::Closed(Some(e)),
            None => break,
        };
    }

    if chunk.is_empty() {
        ReadOutcome::Closed(None)
    } else {
        ReadOutcome::Chunk(chunk.freeze())
    }
}

/// 单方向转发，结束时关闭写端并通知汇合点
async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    direction: Direction,
    buf_len: usize,
    events: mpsc::UnboundedSender<Event>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buf_len];
    let result = loop {
        match read_chunk(&mut reader, &mut buf).await {
            ReadOutcome::Chunk(chunk) => {
                if let Err(e) = writer.write_all(&chunk).await {
                    break Err(e);
                }
                // 写完立即计数，中途被取消也不会漏记
                if events.send(Event::Forwarded(direction, chunk.len())).is_err() {
                    return;
                }
            }
            ReadOutcome::Closed(None) => break Ok(()),
            ReadOutcome::Closed(Some(e)) => break Err(e),
        }
    };

    let _ = writer.shutdown().await;
    let _ = events.send(Event::Finished(direction, result));
}

impl RelayStats {
    fn record(&mut self, direction: Direction, n: usize) {
        match direction {
            Direction::ClientToRemote => self.client_to_remote += n as u64,
            Direction::RemoteToClient => self.remote_to_client += n as u64,
        }
    }
}

/// 在 `client` 与 `remote` 之间转发数据，直到任一端关闭或出错
pub async fn relay<C, R>(client: C, remote: R, buf_len: usize) -> Result<RelayStats>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    R: AsyncRead + AsyncWrite + Send + 'static,
{
    let buf_len = buf_len.max(1);
    let (client_reader, client_writer) = tokio::io::split(client);
    let (remote_reader, remote_writer) = tokio::io::split(remote);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut tasks = JoinSet::new();
    tasks.spawn(pump(
        client_reader,
        remote_writer,
        Direction::ClientToRemote,
        buf_len,
        tx.clone(),
    ));
    tasks.spawn(pump(
        remote_reader,
        client_writer,
        Direction::RemoteToClient,
        buf_len,
        tx,
    ));

    let mut stats = RelayStats::default();
    let outcome = loop {
        match rx.recv().await {
            Some(Event::Forwarded(direction, n)) => stats.record(direction, n),
            Some(Event::Finished(direction, result)) => {
                debug!("{} 方向结束: {:?}", direction.label(), result);
                break result;
            }
            // 两个任务都已退出却没有结束事件
            None => break Err(io::Error::other("转发任务意外退出")),
        }
    };

    // 另一方向的任务持有剩余的半连接，取消并等待其退出
    tasks.abort_all();
    while tasks.join_next().await.is_some() {}

    while let Ok(event) = rx.try_recv() {
        if let Event::Forwarded(direction, n) = event {
            stats.record(direction, n);
        }
    }

    debug!(
        "转发结束: 上行 {}b, 下行 {}b",
        stats.client_to_remote, stats.remote_to_client
    );
    outcome.map(|()| stats).map_err(ProxyError::RelayIo)
}
