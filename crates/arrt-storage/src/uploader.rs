//! 워커 스레드 기반 일괄 업로드.
//!
//! 파일 목록을 최대 [`MAX_UPLOAD_THREADS`]개의 조각으로 나눠 각 조각을
//! 전용 스레드에서 순차 업로드한다. 진행률은 메인 큐를 통해
//! `(남은 파일 수, 실패 여부)`로 전달되며, 남은 수는 단조 감소한다.

use parking_lot::Mutex;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, error, info, warn};

use arrt_core::dispatch::MainQueue;
use arrt_core::error::CoreError;
use arrt_core::ports::blob_storage::BlobStorage;

/// 동시 업로드 스레드 상한
pub const MAX_UPLOAD_THREADS: usize = 8;

type ProgressCallback = Arc<dyn Fn(usize, bool) + Send + Sync>;

#[derive(Debug, Clone)]
struct UploadJob {
    source: PathBuf,
    blob_name: String,
}

/// 한 번의 `upload_files_async` 호출이 공유하는 상태
struct UploadBatch {
    storage: Arc<dyn BlobStorage>,
    container: String,
    queue: MainQueue,
    on_progress: ProgressCallback,
    remaining: Mutex<usize>,
    had_errors: AtomicBool,
}

impl UploadBatch {
    fn run(&self, jobs: Vec<UploadJob>) {
        for job in jobs {
            let ok = match self
                .storage
                .upload_file(&self.container, &job.blob_name, &job.source)
            {
                Ok(bytes) => {
                    debug!("업로드: {} → {} ({bytes} bytes)", job.source.display(), job.blob_name);
                    true
                }
                Err(e) => {
                    error!("업로드 실패: {} ({e})", job.source.display());
                    false
                }
            };
            self.complete(ok);
        }
    }

    /// 시작하지 못한 조각의 파일들을 하나씩 실패 처리
    fn abandon(&self, count: usize) {
        for _ in 0..count {
            self.complete(false);
        }
    }

    /// 파일 하나 완료 처리 후 진행률 전달
    fn complete(&self, ok: bool) {
        if !ok {
            self.had_errors.store(true, Ordering::SeqCst);
        }
        // 감소와 등록을 같은 잠금 안에서 해야 전달 순서가 감소 순서와 같다
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        let (left, had_errors) = (*remaining, self.had_errors.load(Ordering::SeqCst));
        let on_progress = Arc::clone(&self.on_progress);
        self.queue.post(move || on_progress(left, had_errors));
        if left == 0 {
            info!("일괄 업로드 종료 (실패 포함: {had_errors})");
        }
    }
}

/// 일괄 파일 업로더
pub struct FileUploader {
    storage: Arc<dyn BlobStorage>,
    queue: MainQueue,
    max_threads: usize,
}

impl FileUploader {
    pub fn new(storage: Arc<dyn BlobStorage>, queue: MainQueue) -> Self {
        Self {
            storage,
            queue,
            max_threads: MAX_UPLOAD_THREADS,
        }
    }

    /// 스레드 상한 조정 (1 ~ [`MAX_UPLOAD_THREADS`])
    pub fn with_max_threads(mut self, max_threads: usize) -> Self {
        self.max_threads = max_threads.clamp(1, MAX_UPLOAD_THREADS);
        self
    }

    /// 업로드 시작 후 즉시 반환 (예약된 파일 수)
    ///
    /// `on_progress`는 메인 스레드에서 `(N, false)`로 한 번 먼저 호출되고,
    /// 파일이 끝날 때마다 한 번씩 호출된다. 실패 여부는 한 번 참이 되면 유지된다.
    /// 각 파일은 `root_dir` 기준 상대 경로를 `dest_dir` 아래에 붙인 이름으로 올라간다.
    /// 상대 경로로 준 파일은 `root_dir` 기준으로 찾는다.
    pub fn upload_files_async<F>(
        &self,
        root_dir: &Path,
        files: Vec<PathBuf>,
        container: &str,
        dest_dir: &str,
        on_progress: F,
    ) -> Result<usize, CoreError>
    where
        F: Fn(usize, bool) + Send + Sync + 'static,
    {
        if container.is_empty() {
            return Err(CoreError::Validation {
                field: "container".to_string(),
                message: "컨테이너 이름이 비어 있음".to_string(),
            });
        }

        let jobs: Vec<UploadJob> = files
            .into_iter()
            .map(|source| UploadJob {
                blob_name: destination_blob_name(root_dir, &source, dest_dir),
                source: root_dir.join(source),
            })
            .collect();
        let total = jobs.len();

        let on_progress: ProgressCallback = Arc::new(on_progress);
        {
            let on_progress = Arc::clone(&on_progress);
            self.queue.post(move || on_progress(total, false));
        }
        if total == 0 {
            return Ok(0);
        }

        let batch = Arc::new(UploadBatch {
            storage: Arc::clone(&self.storage),
            container: container.to_string(),
            queue: self.queue.clone(),
            on_progress,
            remaining: Mutex::new(total),
            had_errors: AtomicBool::new(false),
        });

        let slices = partition(jobs, self.max_threads);
        info!(
            "일괄 업로드 시작: {total}개 파일, {}개 스레드 → {container}",
            slices.len()
        );

        for (index, slice) in slices.into_iter().enumerate() {
            let count = slice.len();
            let worker = Arc::clone(&batch);
            let spawned = thread::Builder::new()
                .name(format!("arrt-upload-{index}"))
                .spawn(move || worker.run(slice));
            if let Err(e) = spawned {
                warn!("업로드 스레드 생성 실패, {count}개 파일 실패 처리: {e}");
                batch.abandon(count);
            }
        }

        Ok(total)
    }
}

/// 연속 구간으로 나눠 조각 크기 차이를 최대 1로 유지
fn partition(jobs: Vec<UploadJob>, max_slices: usize) -> Vec<Vec<UploadJob>> {
    let slices = max_slices.clamp(1, MAX_UPLOAD_THREADS).min(jobs.len());
    if slices == 0 {
        return Vec::new();
    }
    let base = jobs.len() / slices;
    let extra = jobs.len() % slices;

    let mut out = Vec::with_capacity(slices);
    let mut iter = jobs.into_iter();
    for i in 0..slices {
        let size = base + usize::from(i < extra);
        out.push(iter.by_ref().take(size).collect());
    }
    out
}

/// `root_dir` 기준 상대 경로를 `dest_dir` 아래 블롭 이름으로 변환
///
/// 상대 경로 `file`은 `root_dir` 아래에 있는 것으로 본다.
/// `root_dir` 밖의 파일은 파일 이름만 쓴다.
pub fn destination_blob_name(root_dir: &Path, file: &Path, dest_dir: &str) -> String {
    let file = root_dir.join(file);
    let relative = file
        .strip_prefix(root_dir)
        .unwrap_or_else(|_| file.file_name().map(Path::new).unwrap_or(&file));
    let relative = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/");

    let dest = dest_dir.replace('\\', "/");
    let dest = dest.trim_matches('/');
    if dest.is_empty() {
        relative
    } else {
        format!("{dest}/{relative}")
    }
}
