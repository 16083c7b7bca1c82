//! IPC Client - 与守护进程通信

use anyhow::{Result, bail};
use hardwarelab_core::{CommandResult, MethodCall, PushEvent, ServerFrame};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};

pub struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    next_id: u64,
}

impl Client {
    pub async fn connect(path: &Path) -> Result<Self> {
        let stream = match UnixStream::connect(path).await {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ 无法连接到守护进程: {}", e);
                eprintln!("   请确保 hardwarelab-daemon 正在运行");
                eprintln!("   运行: cargo xtask dev 或 systemctl --user start hardwarelab");
                return Err(e.into());
            }
        };

        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(reader).lines(),
            writer,
            next_id: 1,
        })
    }

    /// 发送一条命令并等待对应的应答；等待期间收到的事件直接打印
    pub async fn call(&mut self, mut call: MethodCall) -> Result<CommandResult> {
        call.id = self.next_id;
        self.next_id += 1;

        let json = serde_json::to_string(&call)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;

        loop {
            match self.next_frame().await? {
                Some(ServerFrame::Reply { id, result }) if id == call.id || id == 0 => {
                    return Ok(result);
                }
                Some(ServerFrame::Reply { id, .. }) => {
                    eprintln!("⚠️ 忽略未知应答 #{}", id);
                }
                Some(ServerFrame::Event { event }) => print_event(&event),
                None => bail!("守护进程关闭了连接"),
            }
        }
    }

    /// 打印推送事件；`duration` 为空时一直等待到连接关闭
    pub async fn watch(&mut self, duration: Option<Duration>) -> Result<()> {
        let deadline = duration.map(|d| tokio::time::Instant::now() + d);

        loop {
            let frame = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.next_frame()).await {
                        Ok(frame) => frame?,
                        Err(_) => return Ok(()),
                    }
                }
                None => self.next_frame().await?,
            };

            match frame {
                Some(ServerFrame::Event { event }) => print_event(&event),
                Some(ServerFrame::Reply { .. }) => {}
                None => return Ok(()),
            }
        }
    }

    async fn next_frame(&mut self) -> Result<Option<ServerFrame>> {
        match self.lines.next_line().await? {
            Some(line) => Ok(Some(serde_json::from_str(&line)?)),
            None => Ok(None),
        }
    }
}

pub fn print_event(event: &PushEvent) {
    match event {
        PushEvent::DeviceFound { name, address } => {
            println!("📡 发现设备: {} ({})", name, address);
        }
        PushEvent::Notice { level, message } => {
            println!("{} {}", level.icon(), message);
        }
    }
}
