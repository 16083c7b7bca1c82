//! hardwarelab CLI
//!
//! 命令行客户端，通过 Unix Socket 与守护进程通信

mod client;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client::Client;
use hardwarelab_core::channel::{
    METHOD_GET_PAIRED_DEVICES, METHOD_PAIR_DEVICE, METHOD_START_SCAN,
};
use hardwarelab_core::{AppSettings, CommandResult, MethodCall};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "hardwarelab", version, about = "经典蓝牙设备发现与配对")]
struct Cli {
    /// 守护进程 socket 路径
    #[arg(short, long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 与指定地址的设备配对
    Pair {
        /// 设备地址，如 AA:BB:CC:DD:EE:FF
        address: String,
    },
    /// 列出已配对设备
    Paired,
    /// 扫描附近设备
    Scan {
        /// 等待发现结果的时间 (秒)
        #[arg(short, long, default_value = "12")]
        watch: u64,
    },
    /// 持续打印守护进程推送的事件
    Watch,
    /// 发送任意命令
    Call {
        /// 命令名称
        method: String,
        /// 参数，格式 key=value
        #[arg(short, long = "arg", value_parser = parse_argument)]
        args: Vec<(String, String)>,
    },
}

fn parse_argument(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("参数格式应为 key=value: {raw}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let socket = cli
        .socket
        .unwrap_or_else(|| AppSettings::load().socket_path());
    let mut client = Client::connect(&socket)
        .await
        .with_context(|| format!("connecting to {}", socket.display()))?;

    match cli.command {
        Commands::Pair { address } => {
            println!("🔗 配对设备: {}", address);
            let call = MethodCall::new(0, METHOD_PAIR_DEVICE).with_argument("address", address);
            let result = client.call(call).await?;
            print_result(&result);
            // 留出时间接收写入结果的通知
            client.watch(Some(Duration::from_secs(2))).await?;
        }
        Commands::Paired => {
            let result = client
                .call(MethodCall::new(0, METHOD_GET_PAIRED_DEVICES))
                .await?;
            match result {
                CommandResult::Success {
                    value: Value::Array(devices),
                } => {
                    if devices.is_empty() {
                        println!("   没有已配对设备");
                    }
                    for (i, dev) in devices.iter().enumerate() {
                        println!("   [{}] {}", i, dev.as_str().unwrap_or_default());
                    }
                }
                other => print_result(&other),
            }
        }
        Commands::Scan { watch } => {
            println!("🔍 扫描设备 ({}s)...", watch);
            let result = client.call(MethodCall::new(0, METHOD_START_SCAN)).await?;
            print_result(&result);
            client.watch(Some(Duration::from_secs(watch))).await?;
        }
        Commands::Watch => {
            println!("👀 等待事件 (Ctrl+C 退出)...");
            client.watch(None).await?;
        }
        Commands::Call { method, args } => {
            let call = args
                .into_iter()
                .fold(MethodCall::new(0, method), |call, (key, value)| {
                    call.with_argument(&key, value)
                });
            let result = client.call(call).await?;
            print_result(&result);
        }
    }

    Ok(())
}

fn print_result(result: &CommandResult) {
    match result {
        CommandResult::Success { value } => match value {
            Value::String(message) => println!("✅ {}", message),
            other => println!("✅ {}", other),
        },
        CommandResult::Error { code, message, .. } => {
            eprintln!("❌ {}: {}", code, message.as_deref().unwrap_or("-"));
        }
        CommandResult::NotImplemented => eprintln!("❌ not implemented"),
    }
}
