//! `arrt session` 명령.

use anyhow::{anyhow, bail, Result};
use clap::Subcommand;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

use arrt_core::models::session::{SessionOptions, SessionSnapshot, VmSize};
use arrt_network::auth::StsTokenManager;
use arrt_network::http_client::HttpRenderingService;
use arrt_session::events::SessionEvent;
use arrt_session::SessionManager;

use crate::lifecycle::WaitOutcome;
use crate::AppContext;

/// 중지 완료 대기 상한
const STOP_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Subcommand, Debug)]
pub enum SessionCommand {
    /// 새 세션 시작
    Start {
        /// VM 크기 (standard, premium)
        #[arg(long)]
        size: Option<VmSize>,
        /// 최대 리스 시간 (분)
        #[arg(long)]
        lease: Option<u32>,
        /// Ready가 될 때까지 대기
        #[arg(long)]
        wait: bool,
    },
    /// 실행 중인 세션 중지
    Stop,
    /// 실행 중인 세션 상태 조회
    Status,
    /// 최대 리스 시간 연장
    Extend {
        /// 연장 시간 (분, 지정하면 설정에도 저장)
        #[arg(long)]
        minutes: Option<u32>,
    },
    /// 상태 변화를 계속 출력 (Ctrl+C로 종료)
    Watch {
        /// 종료 시 세션도 중지
        #[arg(long)]
        stop_on_exit: bool,
    },
}

pub fn run(cmd: SessionCommand, ctx: &AppContext) -> Result<()> {
    let manager = build_manager(ctx)?;
    match cmd {
        SessionCommand::Start { size, lease, wait } => start(ctx, &manager, size, lease, wait),
        SessionCommand::Stop => stop(ctx, &manager),
        SessionCommand::Status => status(ctx, &manager),
        SessionCommand::Extend { minutes } => extend(ctx, &manager, minutes),
        SessionCommand::Watch { stop_on_exit } => watch(ctx, &manager, stop_on_exit),
    }
}

/// 설정의 계정 정보로 REST 어댑터와 세션 관리자 구성
fn build_manager(ctx: &AppContext) -> Result<SessionManager> {
    let config = ctx.config.get();
    if !config.account.is_configured() {
        bail!(
            "계정 ID/키가 설정되지 않음: {}",
            ctx.config.config_path().display()
        );
    }

    let tokens = Arc::new(StsTokenManager::new(
        &config.account.sts_endpoint(),
        &config.account.account_id,
        &config.account.account_key,
    ));
    let service = Arc::new(HttpRenderingService::new(
        &config.account.rendering_endpoint(),
        &config.account.account_id,
        tokens,
        config.request_timeout(),
    )?);
    info!("렌더링 서비스: {}", config.account.rendering_endpoint());

    Ok(
        SessionManager::builder(service, ctx.config.clone(), ctx.queue.clone(), ctx.handle())
            .stats(None)
            .build(),
    )
}

fn start(
    ctx: &AppContext,
    manager: &SessionManager,
    size: Option<VmSize>,
    lease: Option<u32>,
    wait: bool,
) -> Result<()> {
    let settings = ctx.config.get().session;
    manager.start_polling(settings.poll_interval())?;
    manager.start_session(SessionOptions {
        size: size.unwrap_or(settings.default_vm_size),
        max_lease_minutes: lease.unwrap_or(settings.default_lease_minutes),
    })?;

    let outcome = ctx.lifecycle.run_until(&ctx.queue, None, || {
        let snapshot = manager.snapshot();
        !snapshot.status.is_running()
            || if wait {
                snapshot.status.is_ready()
            } else {
                snapshot.session_id().is_some()
            }
    });
    manager.stop_polling();

    let snapshot = manager.snapshot();
    print_snapshot(&snapshot);
    if outcome == WaitOutcome::Shutdown {
        warn!("대기 중단. 세션은 계속 실행될 수 있음");
    }
    if !snapshot.status.is_running() {
        bail!(
            "세션 시작 실패: {}",
            snapshot.last_error.as_deref().unwrap_or("알 수 없는 오류")
        );
    }
    Ok(())
}

/// 저장된 세션에 다시 붙고 첫 조회 응답까지 대기
fn attach(ctx: &AppContext, manager: &SessionManager) -> Result<bool> {
    let mut events = manager.subscribe();
    if !manager.restore_running_session()? {
        return Ok(false);
    }
    let timeout = ctx.config.get().request_timeout() * 2;
    let outcome = ctx.lifecycle.run_until(&ctx.queue, Some(timeout), || {
        received_properties(&mut events) || !manager.is_running()
    });
    match outcome {
        WaitOutcome::Done => Ok(true),
        WaitOutcome::Shutdown => Err(anyhow!("종료 요청으로 중단")),
        WaitOutcome::TimedOut => Err(anyhow!("세션 조회 응답 없음")),
    }
}

fn received_properties(events: &mut broadcast::Receiver<SessionEvent>) -> bool {
    let mut received = false;
    while let Ok(event) = events.try_recv() {
        received |= event == SessionEvent::PropertiesUpdated;
    }
    received
}

fn stop(ctx: &AppContext, manager: &SessionManager) -> Result<()> {
    if !attach(ctx, manager)? || !manager.is_running() {
        println!("실행 중인 세션 없음");
        return Ok(());
    }
    manager.start_polling(ctx.config.get().session.poll_interval())?;
    manager.stop_session()?;

    let outcome = ctx
        .lifecycle
        .run_until(&ctx.queue, Some(STOP_TIMEOUT), || !manager.is_running());
    manager.stop_polling();
    print_snapshot(&manager.snapshot());
    match outcome {
        WaitOutcome::Done | WaitOutcome::Shutdown => Ok(()),
        WaitOutcome::TimedOut => Err(anyhow!("세션 중지 확인 시간 초과")),
    }
}

fn status(ctx: &AppContext, manager: &SessionManager) -> Result<()> {
    if !attach(ctx, manager)? {
        println!("실행 중인 세션 없음");
        return Ok(());
    }
    print_snapshot(&manager.snapshot());
    Ok(())
}

fn extend(ctx: &AppContext, manager: &SessionManager, minutes: Option<u32>) -> Result<()> {
    if let Some(minutes) = minutes {
        let auto_extend = ctx.config.get().session.auto_extend;
        manager.set_extension_time(minutes, auto_extend)?;
    }
    if !attach(ctx, manager)? || !manager.is_running() {
        bail!("실행 중인 세션 없음");
    }

    let before = manager.snapshot().max_lease_minutes;
    let mut events = manager.subscribe();
    manager.extend_max_session_time()?;
    let timeout = ctx.config.get().request_timeout() * 2;
    ctx.lifecycle.run_until(&ctx.queue, Some(timeout), || {
        received_properties(&mut events) || manager.last_error().is_some()
    });

    let snapshot = manager.snapshot();
    print_snapshot(&snapshot);
    if snapshot.max_lease_minutes <= before {
        bail!(
            "연장 실패: {}",
            snapshot.last_error.as_deref().unwrap_or("응답 없음")
        );
    }
    Ok(())
}

fn watch(ctx: &AppContext, manager: &SessionManager, stop_on_exit: bool) -> Result<()> {
    if !attach(ctx, manager)? {
        bail!("실행 중인 세션 없음. `arrt session start`로 시작");
    }
    print_snapshot(&manager.snapshot());

    let mut events = manager.subscribe();
    manager.start_polling(ctx.config.get().session.poll_interval())?;
    let outcome = ctx.lifecycle.run_until(&ctx.queue, None, || {
        while let Ok(event) = events.try_recv() {
            match event {
                SessionEvent::StatusChanged { old, new } => println!("상태: {old} → {new}"),
                SessionEvent::PropertiesUpdated => {
                    let s = manager.snapshot();
                    println!(
                        "  경과 {}분 / 최대 {}분 (남은 {}분)",
                        s.elapsed_minutes,
                        s.max_lease_minutes,
                        s.remaining_minutes()
                    );
                }
                SessionEvent::SessionReleased { session_id } => {
                    println!("세션 해제: {}", session_id.as_deref().unwrap_or("-"));
                }
                SessionEvent::RootEntityChanged(_) => {}
            }
        }
        !manager.is_running()
    });

    if outcome == WaitOutcome::Shutdown && stop_on_exit && manager.is_running() {
        info!("종료 전 세션 중지");
        manager.stop_session()?;
        // 종료 신호가 이미 켜져 있으므로 큐만 직접 돌린다
        ctx.queue.pump_until(STOP_TIMEOUT, || !manager.is_running());
    }
    manager.stop_polling();
    Ok(())
}

fn print_snapshot(snapshot: &SessionSnapshot) {
    println!("세션: {}", snapshot.session_id().unwrap_or("-"));
    println!("  상태: {}", snapshot.status);
    if let Some(host) = &snapshot.hostname {
        println!("  호스트: {host}");
    }
    if snapshot.max_lease_minutes > 0 {
        println!(
            "  리스: {}분 경과 / 최대 {}분",
            snapshot.elapsed_minutes, snapshot.max_lease_minutes
        );
    }
    if let Some(message) = &snapshot.last_message {
        println!("  메시지: {message}");
    }
    if let Some(error) = &snapshot.last_error {
        println!("  오류: {error}");
    }
}
