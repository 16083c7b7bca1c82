use anyhow::Result;
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "hardwarelab 开发任务自动化")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 构建所有组件 (release)
    Build,
    /// 运行守护进程 (开发模式)
    Dev {
        /// 日志级别 (trace, debug, info, warn, error)
        #[arg(short, long, default_value = "debug")]
        log_level: String,
        /// 使用内存后端，不需要 BlueZ 和 Firestore
        #[arg(long)]
        memory: bool,
    },
    /// 安装 systemd 用户服务
    Install,
    /// 卸载 systemd 用户服务
    Uninstall,
    /// 运行测试
    Test,
    /// 清理构建产物
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    // 确保在项目根目录执行
    let project_root = std::env::var("CARGO_MANIFEST_DIR")
        .map(std::path::PathBuf::from)
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()));
    if let Some(root) = project_root {
        sh.change_dir(root);
    }

    match cli.command {
        Commands::Build => build(&sh)?,
        Commands::Dev { log_level, memory } => dev(&sh, &log_level, memory)?,
        Commands::Install => install(&sh)?,
        Commands::Uninstall => uninstall(&sh)?,
        Commands::Test => test(&sh)?,
        Commands::Clean => clean(&sh)?,
    }

    Ok(())
}

fn build(sh: &Shell) -> Result<()> {
    println!("🔨 构建所有组件...");
    cmd!(sh, "cargo build --release -p hardwarelab-daemon -p hardwarelab-cli").run()?;
    println!("✅ 构建完成");
    Ok(())
}

fn dev(sh: &Shell, log_level: &str, memory: bool) -> Result<()> {
    println!("🚀 启动开发模式守护进程...");
    let rust_log = format!("{level},hardwarelab_core={level},bluer=info", level = log_level);
    let _env = sh.push_env("RUST_LOG", rust_log);

    if memory {
        println!("   使用内存后端");
        cmd!(sh, "cargo run -p hardwarelab-daemon -- --memory").run()?;
    } else {
        cmd!(sh, "cargo run -p hardwarelab-daemon").run()?;
    }
    Ok(())
}

fn install(sh: &Shell) -> Result<()> {
    println!("📦 安装 hardwarelab 服务...");

    build(sh)?;

    println!("⏹️  停止现有服务...");
    let _ = cmd!(sh, "systemctl --user stop hardwarelab.service").run();

    let home = std::env::var("HOME")?;
    let bin_dir = format!("{home}/.local/bin");
    let unit_dir = format!("{home}/.config/systemd/user");
    sh.create_dir(&bin_dir)?;
    sh.create_dir(&unit_dir)?;

    println!("📋 复制二进制文件...");
    sh.copy_file("target/release/hardwarelab-daemon", &bin_dir)?;
    sh.copy_file("target/release/hardwarelab", &bin_dir)?;
    sh.copy_file("assets/hardwarelab.service", &unit_dir)?;

    cmd!(sh, "systemctl --user daemon-reload").run()?;
    cmd!(sh, "systemctl --user enable --now hardwarelab.service").run()?;

    println!("✅ 服务安装完成");
    println!("   使用 'hardwarelab --help' 查看命令");
    println!("   使用 'systemctl --user status hardwarelab' 查看服务状态");
    Ok(())
}

fn uninstall(sh: &Shell) -> Result<()> {
    println!("🗑️  卸载 hardwarelab 服务...");

    let _ = cmd!(sh, "systemctl --user stop hardwarelab.service").run();
    let _ = cmd!(sh, "systemctl --user disable hardwarelab.service").run();

    let home = std::env::var("HOME")?;
    for path in [
        format!("{home}/.config/systemd/user/hardwarelab.service"),
        format!("{home}/.local/bin/hardwarelab-daemon"),
        format!("{home}/.local/bin/hardwarelab"),
    ] {
        let _ = sh.remove_path(path);
    }

    cmd!(sh, "systemctl --user daemon-reload").run()?;

    println!("✅ 卸载完成");
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("🧪 运行测试...");
    cmd!(sh, "cargo test --workspace").run()?;
    println!("✅ 测试完成");
    Ok(())
}

fn clean(sh: &Shell) -> Result<()> {
    println!("🧹 清理构建产物...");
    cmd!(sh, "cargo clean").run()?;
    println!("✅ 清理完成");
    Ok(())
}
