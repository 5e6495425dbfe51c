//! `arrt storage` 명령 (로컬 블롭 저장소).

use anyhow::{anyhow, bail, Result};
use clap::Subcommand;
use directories::ProjectDirs;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use arrt_core::cancellable::{Cancellable, Liveness};
use arrt_core::error::CoreError;
use arrt_core::models::storage::{BlobListing, BlobQuery};
use arrt_core::ports::blob_storage::BlobStorage;
use arrt_storage::fetcher::SegmentedFetcher;
use arrt_storage::local::LocalBlobStorage;
use arrt_storage::uploader::FileUploader;

use crate::lifecycle::WaitOutcome;
use crate::AppContext;

#[derive(Subcommand, Debug)]
pub enum StorageCommand {
    /// 컨테이너 목록
    Containers {
        /// 저장소 루트 (기본: 설정값 또는 플랫폼 데이터 디렉토리)
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// 컨테이너 생성
    CreateContainer {
        name: String,
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// 블롭 목록
    Blobs {
        container: String,
        /// 디렉토리 접두사 (예: "models/cars/")
        #[arg(long, default_value = "")]
        prefix: String,
        /// 하위 트리 전체를 나열
        #[arg(long)]
        flat: bool,
        #[arg(long)]
        root: Option<PathBuf>,
    },
    /// 파일 일괄 업로드
    Upload {
        container: String,
        /// 업로드할 파일들
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// 블롭 이름 계산 기준 디렉토리 (기본: 현재 디렉토리)
        #[arg(long)]
        root_dir: Option<PathBuf>,
        /// 컨테이너 안의 대상 디렉토리
        #[arg(long, default_value = "")]
        dest: String,
        #[arg(long)]
        root: Option<PathBuf>,
    },
}

pub fn run(cmd: StorageCommand, ctx: &AppContext) -> Result<()> {
    match cmd {
        StorageCommand::Containers { root } => list_containers(ctx, open_storage(ctx, root)?),
        StorageCommand::CreateContainer { name, root } => {
            open_storage(ctx, root)?.create_container(&name)?;
            println!("컨테이너 생성: {name}");
            Ok(())
        }
        StorageCommand::Blobs {
            container,
            prefix,
            flat,
            root,
        } => {
            let listing = if flat {
                BlobListing::Flat
            } else {
                BlobListing::Hierarchical
            };
            let query = BlobQuery::new(container)
                .with_prefix(prefix)
                .with_listing(listing);
            list_blobs(ctx, open_storage(ctx, root)?, query)
        }
        StorageCommand::Upload {
            container,
            files,
            root_dir,
            dest,
            root,
        } => {
            // 상대 경로는 모두 현재 디렉토리 기준
            let cwd = std::env::current_dir()?;
            let root_dir = root_dir.map_or_else(|| cwd.clone(), |dir| cwd.join(dir));
            let files = files.into_iter().map(|file| cwd.join(file)).collect();
            upload(ctx, open_storage(ctx, root)?, &container, files, root_dir, &dest)
        }
    }
}

/// 저장소 루트 결정 (CLI 인자 → 설정 → 플랫폼 데이터 디렉토리)
///
/// # 플랫폼별 기본 경로:
/// - macOS: `~/Library/Application Support/com.arrt.toolkit/blobs`
/// - Windows: `%APPDATA%\arrt\toolkit\data\blobs`
/// - Linux: `~/.local/share/toolkit/blobs`
fn resolve_root(ctx: &AppContext, root: Option<PathBuf>) -> PathBuf {
    root.or_else(|| ctx.config.get().storage.local_root)
        .or_else(|| ProjectDirs::from("com", "arrt", "toolkit").map(|p| p.data_dir().join("blobs")))
        .unwrap_or_else(|| PathBuf::from("./blobs"))
}

fn open_storage(ctx: &AppContext, root: Option<PathBuf>) -> Result<Arc<LocalBlobStorage>> {
    let root = resolve_root(ctx, root);
    let storage = LocalBlobStorage::new(&root)?;
    info!("블롭 저장소: {}", root.display());
    Ok(Arc::new(storage))
}

/// 조회 종료 대기. 종료 신호가 오면 조회를 취소한다.
fn wait_for_end(
    ctx: &AppContext,
    handle: &dyn Cancellable,
    end: &Mutex<Option<Result<(), CoreError>>>,
) -> Result<()> {
    let outcome = ctx
        .lifecycle
        .run_until(&ctx.queue, None, || end.lock().is_some());
    if outcome != WaitOutcome::Done {
        handle.cancel();
        bail!("조회 취소됨");
    }
    end.lock()
        .take()
        .unwrap_or_else(|| Err(CoreError::Internal("조회 결과 없음".to_string())))
        .map_err(|e| anyhow!("목록 조회 실패: {e}"))
}

fn list_containers(ctx: &AppContext, storage: Arc<LocalBlobStorage>) -> Result<()> {
    let fetcher = SegmentedFetcher::new(ctx.queue.clone(), ctx.handle());
    let owner = Liveness::new();
    let end = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&end);
    let page_size = ctx.config.get().storage.page_size;

    let handle = fetcher.fetch_containers(
        owner.handle(),
        storage,
        page_size,
        |page| {
            for container in page {
                println!("{}", container.name);
            }
        },
        move |result| *sink.lock() = Some(result),
    );
    wait_for_end(ctx, &handle, &end)
}

fn list_blobs(ctx: &AppContext, storage: Arc<LocalBlobStorage>, query: BlobQuery) -> Result<()> {
    let fetcher = SegmentedFetcher::new(ctx.queue.clone(), ctx.handle());
    let owner = Liveness::new();
    let end = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&end);
    let page_size = ctx.config.get().storage.page_size;

    let handle = fetcher.fetch_blobs(
        owner.handle(),
        storage,
        query,
        page_size,
        |page| {
            for blob in page {
                if blob.is_directory {
                    println!("{:>12}  {}", "<DIR>", blob.name);
                } else {
                    println!("{:>12}  {}", blob.size, blob.name);
                }
            }
        },
        move |result| *sink.lock() = Some(result),
    );
    wait_for_end(ctx, &handle, &end)
}

fn upload(
    ctx: &AppContext,
    storage: Arc<LocalBlobStorage>,
    container: &str,
    files: Vec<PathBuf>,
    root_dir: PathBuf,
    dest: &str,
) -> Result<()> {
    let threads = ctx.config.get().storage.upload_threads;
    let storage: Arc<dyn BlobStorage> = storage;
    let uploader = FileUploader::new(storage, ctx.queue.clone()).with_max_threads(threads);

    let progress = Arc::new(Mutex::new(None::<(usize, bool)>));
    let sink = Arc::clone(&progress);
    let total = uploader.upload_files_async(&root_dir, files, container, dest, move |left, failed| {
        *sink.lock() = Some((left, failed));
    })?;
    println!("업로드 {total}개 → {container}");

    let mut last_reported = None;
    let outcome = ctx.lifecycle.run_until(&ctx.queue, None, || {
        let current = *progress.lock();
        if current != last_reported {
            if let Some((left, _)) = current {
                println!("  남은 파일: {left}");
            }
            last_reported = current;
        }
        matches!(current, Some((0, _)))
    });

    if outcome != WaitOutcome::Done {
        warn!("업로드 완료 전 종료");
        bail!("업로드 중단");
    }
    let final_state = *progress.lock();
    match final_state {
        Some((_, true)) => bail!("일부 파일 업로드 실패"),
        _ => Ok(()),
    }
}
