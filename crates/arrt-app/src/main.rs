//! # arrt-app
//!
//! ARRT 헤드리스 바이너리 진입점.
//! DI 와이어링, 메인 스레드 큐 펌핑, 라이프사이클 관리.

mod lifecycle;
mod session_cli;
mod storage_cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use arrt_core::config_manager::ConfigManager;
use arrt_core::dispatch::MainQueue;

use crate::lifecycle::LifecycleManager;
use crate::session_cli::SessionCommand;
use crate::storage_cli::StorageCommand;

/// 원격 렌더링 세션/에셋 관리 도구
#[derive(Parser, Debug)]
#[command(name = "arrt")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, short = 'l', default_value = "info", global = true)]
    log_level: String,

    /// 설정 파일 경로 (기본: 플랫폼 설정 디렉토리)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 원격 렌더링 세션
    #[command(subcommand)]
    Session(SessionCommand),
    /// 로컬 블롭 저장소
    #[command(subcommand)]
    Storage(StorageCommand),
}

/// 명령 실행에 필요한 공용 자원
///
/// 생성한 스레드(메인 스레드)에서만 쓴다.
pub struct AppContext {
    pub config: ConfigManager,
    pub queue: MainQueue,
    pub runtime: tokio::runtime::Runtime,
    pub lifecycle: Arc<LifecycleManager>,
}

impl AppContext {
    pub fn handle(&self) -> tokio::runtime::Handle {
        self.runtime.handle().clone()
    }
}

fn init_tracing(level: &str) {
    let log_filter = ["arrt", "arrt_app", "arrt_core", "arrt_network", "arrt_storage", "arrt_session"]
        .iter()
        .map(|target| format!("{target}={level}"))
        .collect::<Vec<_>>()
        .join(",");
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)),
        )
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let config = match args.config {
        Some(path) => ConfigManager::with_path(path)?,
        None => ConfigManager::new()?,
    };
    debug!("설정 파일: {}", config.config_path().display());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("arrt-worker")
        .build()?;

    // 이 스레드가 메인 스레드. 모든 콜백은 여기서 실행된다.
    let ctx = AppContext {
        config,
        queue: MainQueue::new(),
        runtime,
        lifecycle: Arc::new(LifecycleManager::new()),
    };

    let lifecycle = Arc::clone(&ctx.lifecycle);
    ctx.runtime.spawn(async move {
        lifecycle.wait_for_signal().await;
    });

    let result = match args.command {
        Command::Session(cmd) => session_cli::run(cmd, &ctx),
        Command::Storage(cmd) => storage_cli::run(cmd, &ctx),
    };

    // 남은 콜백 정리 후 종료
    ctx.queue.pump();
    info!("ARRT 종료");
    result
}
