//! hardwarelab Daemon
//!
//! 后台守护进程，负责：
//! - 经典蓝牙设备发现与配对 (BlueZ)
//! - 配对日志写入 (Firestore)
//! - 通过 Unix Socket 提供命令通道并推送发现事件
//!
//! 所有命令处理、广播处理和写入回调都运行在同一个调度线程上。

mod ipc;
mod service;

use anyhow::Result;
use clap::Parser;
use hardwarelab_core::AppSettings;
use hardwarelab_core::config::{RegistryBackend, SinkBackend};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hardwarelab-daemon", version, about = "蓝牙配对桥接守护进程")]
struct Cli {
    /// 配置文件路径 (默认: ~/.config/hardwarelab/settings.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 命令通道 socket 路径
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// 详细日志
    #[arg(short, long)]
    verbose: bool,

    /// 使用内存注册表和内存写入端 (无蓝牙硬件调试)
    #[arg(long)]
    memory: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => AppSettings::load_from(path),
        None => AppSettings::load(),
    };
    if let Some(socket) = cli.socket {
        settings.socket_path = Some(socket);
    }
    settings.verbose |= cli.verbose;
    if cli.memory {
        settings.registry.backend = RegistryBackend::Memory;
        settings.sink.backend = SinkBackend::Memory;
    }

    // 桥接 log crate（hardwarelab-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let default_filter = if settings.verbose {
        "debug"
    } else {
        "info,hardwarelab_core=debug"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .try_init();

    tracing::info!("hardwarelab daemon starting...");

    let adapter = service::build_adapter(&settings).await?;

    let ipc_handle = tokio::spawn(ipc::run_ipc_server(settings.socket_path(), adapter));

    tokio::select! {
        res = ipc_handle => {
            tracing::error!("IPC server exited: {:?}", res);
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("收到中断信号，退出");
        }
    }

    let _ = std::fs::remove_file(settings.socket_path());
    Ok(())
}
