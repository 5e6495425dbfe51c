//! continuation 토큰 기반 세그먼트 조회 엔진.
//!
//! 한 번에 한 페이지만 요청하고, 페이지가 메인 큐에서 전달된 뒤에야
//! 다음 페이지를 요청한다. 진행 중인 요청은 작업 자체를 강하게 붙잡고 있으므로
//! 외부 핸들을 버려도 작업은 끝까지 살아 있다가 조용히 정리된다.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tracing::{debug, error, trace};

use arrt_core::cancellable::{Cancellable, ContextHandle};
use arrt_core::dispatch::MainQueue;
use arrt_core::error::CoreError;
use arrt_core::models::storage::Segment;

/// 페이지 단위 조회 소스
#[async_trait]
pub trait SegmentSource<T>: Send + Sync {
    /// `token` 다음 페이지 요청 (`None`이면 첫 페이지)
    async fn fetch_segment(&self, token: Option<String>) -> Result<Segment<T>, CoreError>;
}

type PageCallback<T> = Box<dyn FnMut(Vec<T>) + Send>;
type EndCallback = Box<dyn FnOnce(Result<(), CoreError>) + Send>;

struct Callbacks<T> {
    on_page: PageCallback<T>,
    on_end: EndCallback,
}

struct FetchOperation<T> {
    source: Arc<dyn SegmentSource<T>>,
    queue: MainQueue,
    runtime: Handle,
    context: ContextHandle,
    cancelled: Arc<AtomicBool>,
    finished: AtomicBool,
    callbacks: Mutex<Option<Callbacks<T>>>,
    pages: AtomicUsize,
}

/// 요청이 날아가 있는 동안 작업을 살려두는 강한 참조
struct InFlight<T>(Arc<FetchOperation<T>>);

impl<T: Send + 'static> FetchOperation<T> {
    fn request(self: &Arc<Self>, token: Option<String>) {
        trace!("세그먼트 요청: token={:?}", token);
        let in_flight = InFlight(Arc::clone(self));
        self.runtime.spawn(async move {
            let InFlight(op) = in_flight;
            let result = AssertUnwindSafe(op.source.fetch_segment(token))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(CoreError::Internal("세그먼트 조회 중 패닉 발생".to_string()))
                });
            let queue = op.queue.clone();
            queue.post(move || op.deliver(result));
        });
    }

    /// 메인 스레드에서 결과 전달
    fn deliver(self: Arc<Self>, result: Result<Segment<T>, CoreError>) {
        if self.cancelled.load(Ordering::SeqCst) || self.finished.load(Ordering::SeqCst) {
            trace!("취소된 조회의 결과 폐기");
            return;
        }
        if !self.context.is_alive() {
            debug!("요청 컨텍스트 소멸, 조회 중단");
            self.finished.store(true, Ordering::SeqCst);
            self.callbacks.lock().take();
            return;
        }

        match result {
            Ok(segment) => {
                let next = segment.next_token().map(str::to_string);
                let page = self.pages.fetch_add(1, Ordering::SeqCst) + 1;
                debug!("세그먼트 {page} 수신: {}개 항목", segment.items.len());

                // 콜백 실행 중에는 잠금을 놓아 둔다 (콜백 안에서 cancel 가능)
                let Some(mut callbacks) = self.callbacks.lock().take() else {
                    return;
                };
                (callbacks.on_page)(segment.items);

                if self.cancelled.load(Ordering::SeqCst) {
                    return;
                }
                match next {
                    Some(token) => {
                        *self.callbacks.lock() = Some(callbacks);
                        self.request(Some(token));
                    }
                    None => {
                        self.finished.store(true, Ordering::SeqCst);
                        (callbacks.on_end)(Ok(()));
                    }
                }
            }
            Err(e) => {
                error!("세그먼트 조회 실패: {e}");
                self.finished.store(true, Ordering::SeqCst);
                if let Some(callbacks) = self.callbacks.lock().take() {
                    (callbacks.on_end)(Err(e));
                }
            }
        }
    }
}

/// 진행 중인 조회 핸들
///
/// 작업을 약하게 참조한다. 핸들을 버려도 조회는 멈추지 않는다.
pub struct FetchHandle<T> {
    cancelled: Arc<AtomicBool>,
    op: Weak<FetchOperation<T>>,
}

impl<T> Clone for FetchHandle<T> {
    fn clone(&self) -> Self {
        Self {
            cancelled: Arc::clone(&self.cancelled),
            op: Weak::clone(&self.op),
        }
    }
}

impl<T> FetchHandle<T> {
    /// 아직 콜백이 남아 있는지 (취소/완료/실패 전)
    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
            && self
                .op
                .upgrade()
                .is_some_and(|op| !op.finished.load(Ordering::SeqCst))
    }
}

impl<T: Send + 'static> Cancellable for FetchHandle<T> {
    fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            debug!("이미 취소된 조회");
            return;
        }
        if let Some(op) = self.op.upgrade() {
            debug_assert!(op.queue.is_main_thread(), "cancel은 메인 스레드 전용");
            // 캡처된 상태는 여기(메인 스레드)에서 해제된다
            let dropped = op.callbacks.lock().take();
            drop(dropped);
        }
        debug!("세그먼트 조회 취소");
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// 세그먼트 조회 시작점
#[derive(Clone)]
pub struct SegmentedFetcher {
    queue: MainQueue,
    runtime: Handle,
}

impl SegmentedFetcher {
    pub fn new(queue: MainQueue, runtime: Handle) -> Self {
        Self { queue, runtime }
    }

    /// 첫 페이지 요청 후 즉시 핸들 반환
    ///
    /// - `on_page`: 페이지마다 메인 스레드에서 호출
    /// - `on_end`: 마지막 페이지 이후 `Ok`, 실패 시 `Err`로 한 번 호출.
    ///   취소되었거나 `context`가 소멸했으면 호출되지 않는다.
    pub fn start_fetching<T, P, E>(
        &self,
        context: ContextHandle,
        source: Arc<dyn SegmentSource<T>>,
        on_page: P,
        on_end: E,
    ) -> FetchHandle<T>
    where
        T: Send + 'static,
        P: FnMut(Vec<T>) + Send + 'static,
        E: FnOnce(Result<(), CoreError>) + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let op = Arc::new(FetchOperation {
            source,
            queue: self.queue.clone(),
            runtime: self.runtime.clone(),
            context,
            cancelled: Arc::clone(&cancelled),
            finished: AtomicBool::new(false),
            callbacks: Mutex::new(Some(Callbacks {
                on_page: Box::new(on_page),
                on_end: Box::new(on_end),
            })),
            pages: AtomicUsize::new(0),
        });

        op.request(None);

        FetchHandle {
            cancelled,
            op: Arc::downgrade(&op),
        }
    }
}
