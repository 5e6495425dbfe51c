//! 메인 스레드 작업 큐.
//!
//! 워커 스레드와 tokio 태스크는 결과를 클로저로 감싸 `post`하고,
//! 메인 루프가 매 반복마다 `pump`로 꺼내 실행한다.
//! 취소/생존 검사는 꺼내는 쪽(메인 스레드)의 클로저 안에서 수행한다.

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::trace;

/// 큐에 쌓이는 작업
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// `pump_until` 대기 간격
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// 메인 스레드 작업 큐 (MPSC, 소비자는 생성한 스레드 하나)
#[derive(Clone)]
pub struct MainQueue {
    tx: Sender<Task>,
    rx: Receiver<Task>,
    owner: ThreadId,
}

impl MainQueue {
    /// 현재 스레드를 메인 스레드로 하는 큐 생성
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self {
            tx,
            rx,
            owner: thread::current().id(),
        }
    }

    /// 작업 등록 (아무 스레드에서나 호출 가능)
    pub fn post<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // 수신자를 같은 구조체가 들고 있으므로 전송은 실패하지 않는다
        let _ = self.tx.send(Box::new(task));
    }

    /// 호출 스레드가 메인 스레드인지
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// 대기 중인 작업 수
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// 현재 쌓여 있는 작업만 실행하고 실행한 개수를 반환
    ///
    /// 실행 도중 새로 등록된 작업은 다음 `pump`에서 처리된다.
    pub fn pump(&self) -> usize {
        debug_assert!(self.is_main_thread(), "pump는 메인 스레드 전용");
        let budget = self.rx.len();
        let mut executed = 0;
        while executed < budget {
            match self.rx.try_recv() {
                Ok(task) => {
                    task();
                    executed += 1;
                }
                Err(_) => break,
            }
        }
        if executed > 0 {
            trace!("메인 큐 작업 {executed}개 실행");
        }
        executed
    }

    /// `done`이 참이 되거나 `timeout`이 지날 때까지 작업을 실행
    ///
    /// 조건 충족 여부를 반환한다.
    pub fn pump_until<F>(&self, timeout: Duration, mut done: F) -> bool
    where
        F: FnMut() -> bool,
    {
        debug_assert!(self.is_main_thread(), "pump_until은 메인 스레드 전용");
        let deadline = Instant::now() + timeout;
        loop {
            self.pump();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.rx.recv_timeout((deadline - now).min(IDLE_WAIT)) {
                Ok(task) => task(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return done(),
            }
        }
    }

    /// `duration` 동안 작업을 계속 실행
    pub fn pump_for(&self, duration: Duration) {
        self.pump_until(duration, || false);
    }
}

impl Default for MainQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn tasks_run_on_pumping_thread() {
        let queue = MainQueue::new();
        let main_id = thread::current().id();
        let ran_on = Arc::new(parking_lot::Mutex::new(None));

        let q = queue.clone();
        let slot = ran_on.clone();
        thread::spawn(move || {
            assert!(!q.is_main_thread());
            q.post(move || *slot.lock() = Some(thread::current().id()));
        })
        .join()
        .unwrap();

        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.pump(), 1);
        assert_eq!(*ran_on.lock(), Some(main_id));
    }

    #[test]
    fn pump_does_not_run_tasks_posted_during_pump() {
        let queue = MainQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let q = queue.clone();
        let c = counter.clone();
        queue.post(move || {
            c.fetch_add(1, Ordering::SeqCst);
            let c2 = c.clone();
            q.post(move || {
                c2.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(queue.pump(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pump(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn pump_until_waits_for_worker() {
        let queue = MainQueue::new();
        let done = Arc::new(AtomicUsize::new(0));

        let q = queue.clone();
        let d = done.clone();
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            q.post(move || {
                d.store(1, Ordering::SeqCst);
            });
        });

        assert!(queue.pump_until(Duration::from_secs(5), || done.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn pump_until_times_out() {
        let queue = MainQueue::new();
        assert!(!queue.pump_until(Duration::from_millis(20), || false));
    }
}
