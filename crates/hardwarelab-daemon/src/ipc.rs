//! IPC Server - Unix Domain Socket 命令通道
//!
//! 每个连接代表一个可见的界面：连接期间持有可见性守卫，
//! 并把适配器推送的事件转发给该客户端。

use anyhow::Result;
use hardwarelab_core::{Adapter, CommandResult, MethodCall, ServerFrame};
use std::fmt::Display;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;

/// 单行请求的最大长度 (字节，不含换行)
const MAX_REQUEST_LEN: usize = 64 * 1024;

pub async fn run_ipc_server(path: PathBuf, adapter: Arc<Adapter>) -> Result<()> {
    // 删除旧的 socket 文件
    let _ = std::fs::remove_file(&path);

    let listener = UnixListener::bind(&path)?;
    tracing::info!("IPC 服务器已启动: {:?}", path);

    serve(listener, adapter).await
}

async fn serve(listener: UnixListener, adapter: Arc<Adapter>) -> Result<()> {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let adapter = Arc::clone(&adapter);
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, adapter).await {
                        tracing::warn!("客户端连接出错: {}", e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("接受连接失败: {}", e);
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Incoming {
    Line(String),
    /// 无法作为请求解析的行 (非 UTF-8 或过长)
    Malformed(String),
}

/// 按行读取请求，限制单行长度
///
/// 已读取的部分保存在缓冲区中，因此可以在 `select!` 中被取消后继续读取。
struct RequestReader<R> {
    reader: R,
    buf: Vec<u8>,
    max_len: usize,
    /// 正在丢弃一条过长请求的剩余部分
    discarding: bool,
}

impl<R: AsyncBufRead + Unpin> RequestReader<R> {
    fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            max_len,
            discarding: false,
        }
    }

    /// 读取下一行；连接关闭时返回 `None`
    async fn next(&mut self) -> io::Result<Option<Incoming>> {
        loop {
            let limit = (self.max_len + 1).saturating_sub(self.buf.len()).max(1);
            let read = (&mut self.reader)
                .take(limit as u64)
                .read_until(b'\n', &mut self.buf)
                .await?;
            let complete = self.buf.last() == Some(&b'\n');

            if read == 0 && !complete {
                if self.buf.is_empty() || self.discarding {
                    return Ok(None);
                }
                // 最后一行没有换行符
                let line = std::mem::take(&mut self.buf);
                return Ok(Some(decode(line)));
            }

            if self.discarding {
                self.buf.clear();
                self.discarding = !complete;
                continue;
            }

            if complete {
                let mut line = std::mem::take(&mut self.buf);
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(decode(line)));
            }

            if self.buf.len() > self.max_len {
                self.buf.clear();
                self.discarding = true;
                return Ok(Some(Incoming::Malformed(format!(
                    "request exceeds {} bytes",
                    self.max_len
                ))));
            }
        }
    }
}

fn decode(line: Vec<u8>) -> Incoming {
    match String::from_utf8(line) {
        Ok(line) => Incoming::Line(line),
        Err(e) => Incoming::Malformed(format!("request is not valid UTF-8: {e}")),
    }
}

fn bad_request(reason: impl Display) -> ServerFrame {
    ServerFrame::Reply {
        id: 0,
        result: CommandResult::error("BAD_REQUEST", format!("Invalid request: {reason}")),
    }
}

async fn handle_client(stream: UnixStream, adapter: Arc<Adapter>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut requests = RequestReader::new(BufReader::new(reader), MAX_REQUEST_LEN);

    let _visible = adapter.resume();
    let mut events = adapter.subscribe();
    tracing::debug!("客户端已连接");

    loop {
        tokio::select! {
            incoming = requests.next() => {
                let frame = match incoming? {
                    None => break,
                    Some(Incoming::Line(line)) if line.trim().is_empty() => continue,
                    Some(Incoming::Line(line)) => match serde_json::from_str::<MethodCall>(&line) {
                        Ok(call) => {
                            tracing::debug!("收到请求: {:?}", call);
                            let result = adapter.dispatch(&call).await;
                            ServerFrame::Reply { id: call.id, result }
                        }
                        Err(e) => bad_request(e),
                    },
                    Some(Incoming::Malformed(reason)) => {
                        tracing::warn!("丢弃无效请求: {}", reason);
                        bad_request(reason)
                    }
                };
                write_frame(&mut writer, &frame).await?;
            }
            event = events.recv() => {
                match event {
                    Ok(event) => write_frame(&mut writer, &ServerFrame::Event { event }).await?,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("客户端处理过慢，丢弃 {} 条事件", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!("客户端已断开");
    Ok(())
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &ServerFrame) -> Result<()> {
    writer
        .write_all(serde_json::to_string(frame)?.as_bytes())
        .await?;
    writer.write_all(b"\n").await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hardwarelab_core::channel::{METHOD_PAIR_DEVICE, METHOD_START_SCAN};
    use hardwarelab_core::{
        AdapterOptions, DeviceRecord, MemoryRegistry, MemorySink, PushEvent,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::io::Lines;
    use tokio::net::unix::OwnedReadHalf;

    async fn start_server(registry: Arc<MemoryRegistry>) -> PathBuf {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "hardwarelab-ipc-{}-{}.sock",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::SeqCst)
        ));
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path).unwrap();
        let adapter = Arc::new(Adapter::new(
            registry,
            Arc::new(MemorySink::new()),
            AdapterOptions::default(),
        ));
        tokio::spawn(serve(listener, adapter));
        path
    }

    async fn next_frame(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> ServerFrame {
        let line = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .expect("connection closed");
        serde_json::from_str(&line).unwrap()
    }

    #[tokio::test]
    async fn test_missing_address_round_trip() {
        let path = start_server(Arc::new(MemoryRegistry::default())).await;
        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let mut json = serde_json::to_string(&MethodCall::new(5, METHOD_PAIR_DEVICE)).unwrap();
        json.push('\n');
        writer.write_all(json.as_bytes()).await.unwrap();

        match next_frame(&mut lines).await {
            ServerFrame::Reply { id, result } => {
                assert_eq!(id, 5);
                assert!(matches!(result, CommandResult::Error { ref code, .. } if code == "ERROR"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_invalid_json_keeps_connection() {
        let path = start_server(Arc::new(MemoryRegistry::default())).await;
        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"not json\n").await.unwrap();
        match next_frame(&mut lines).await {
            ServerFrame::Reply { id: 0, result } => {
                assert!(matches!(result, CommandResult::Error { ref code, .. } if code == "BAD_REQUEST"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        writer
            .write_all(b"{\"id\":2,\"method\":\"vibrate\"}\n")
            .await
            .unwrap();
        assert_eq!(
            next_frame(&mut lines).await,
            ServerFrame::Reply {
                id: 2,
                result: CommandResult::NotImplemented
            }
        );
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_reader_splits_lines() {
        let input: &[u8] = b"{\"id\":1}\r\n\nlast";
        let mut requests = RequestReader::new(input, 64);

        assert_eq!(
            requests.next().await.unwrap(),
            Some(Incoming::Line("{\"id\":1}".to_string()))
        );
        assert_eq!(requests.next().await.unwrap(), Some(Incoming::Line(String::new())));
        assert_eq!(
            requests.next().await.unwrap(),
            Some(Incoming::Line("last".to_string()))
        );
        assert_eq!(requests.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_reader_rejects_invalid_utf8() {
        let input: &[u8] = b"\xff\xfe garbage\nok\n";
        let mut requests = RequestReader::new(input, 64);

        assert!(matches!(
            requests.next().await.unwrap(),
            Some(Incoming::Malformed(_))
        ));
        assert_eq!(
            requests.next().await.unwrap(),
            Some(Incoming::Line("ok".to_string()))
        );
    }

    #[tokio::test]
    async fn test_reader_discards_oversized_line() {
        let mut input = vec![b'a'; 100];
        input.extend_from_slice(b"\nok\n");
        let mut requests = RequestReader::new(input.as_slice(), 16);

        match requests.next().await.unwrap() {
            Some(Incoming::Malformed(reason)) => assert!(reason.contains("16")),
            other => panic!("unexpected: {other:?}"),
        }
        // 过长请求的剩余部分被丢弃，只报告一次
        assert_eq!(
            requests.next().await.unwrap(),
            Some(Incoming::Line("ok".to_string()))
        );
        assert_eq!(requests.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_utf8_keeps_connection() {
        let path = start_server(Arc::new(MemoryRegistry::default())).await;
        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"\xff\xfe garbage\n").await.unwrap();
        match next_frame(&mut lines).await {
            ServerFrame::Reply { id: 0, result } => {
                assert!(matches!(result, CommandResult::Error { ref code, .. } if code == "BAD_REQUEST"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }

        writer
            .write_all(b"{\"id\":2,\"method\":\"vibrate\"}\n")
            .await
            .unwrap();
        assert_eq!(
            next_frame(&mut lines).await,
            ServerFrame::Reply {
                id: 2,
                result: CommandResult::NotImplemented
            }
        );
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_oversized_request_keeps_connection() {
        let path = start_server(Arc::new(MemoryRegistry::default())).await;
        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let mut request = vec![b' '; MAX_REQUEST_LEN + 10];
        request.push(b'\n');
        writer.write_all(&request).await.unwrap();
        writer
            .write_all(b"{\"id\":3,\"method\":\"vibrate\"}\n")
            .await
            .unwrap();

        match next_frame(&mut lines).await {
            ServerFrame::Reply { id: 0, result } => {
                assert!(matches!(result, CommandResult::Error { ref code, .. } if code == "BAD_REQUEST"));
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert_eq!(
            next_frame(&mut lines).await,
            ServerFrame::Reply {
                id: 3,
                result: CommandResult::NotImplemented
            }
        );
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_scan_pushes_device_found() {
        let registry = Arc::new(MemoryRegistry::default());
        registry.add_visible(DeviceRecord::new(None, "AA:BB:CC:DD:EE:FF"));
        let path = start_server(registry).await;
        let stream = UnixStream::connect(&path).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let call = MethodCall::new(9, METHOD_START_SCAN);
        let mut json = serde_json::to_string(&call).unwrap();
        json.push('\n');
        writer.write_all(json.as_bytes()).await.unwrap();

        let mut replied = false;
        let mut found = None;
        while !(replied && found.is_some()) {
            match next_frame(&mut lines).await {
                ServerFrame::Reply { id, .. } => {
                    assert_eq!(id, 9);
                    replied = true;
                }
                ServerFrame::Event { event } => {
                    if let PushEvent::DeviceFound { name, address } = event {
                        found = Some((name, address));
                    }
                }
            }
        }

        assert_eq!(
            found,
            Some(("Unnamed Device".to_string(), "AA:BB:CC:DD:EE:FF".to_string()))
        );
        let _ = std::fs::remove_file(&path);
    }
}
