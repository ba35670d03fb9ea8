//! Single-slot task dispatcher.
//!
//! At most one audio task runs at a time. Dispatching a new task cancels the
//! running one, force-stops the audio engine, waits a bounded time for the
//! old worker to exit and only then starts the new worker with a fresh
//! cancellation token.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::audio::AudioPlayer;
use crate::sync::{join_bounded, Signal};

/// Cancellation token handed to a task. Set once the task is superseded.
pub type CancelToken = Arc<Signal>;

struct Worker {
    token: CancelToken,
    handle: JoinHandle<()>,
}

pub struct Dispatcher {
    audio: Arc<dyn AudioPlayer>,
    join_timeout: Duration,
    current: Mutex<Option<Worker>>,
}

impl Dispatcher {
    pub fn new(audio: Arc<dyn AudioPlayer>, join_timeout: Duration) -> Self {
        Self {
            audio,
            join_timeout,
            current: Mutex::new(None),
        }
    }

    /// Replaces the running task with `task`.
    ///
    /// Must not be called from a worker thread.
    pub fn dispatch<F>(&self, name: &str, task: F)
    where
        F: FnOnce(&CancelToken) + Send + 'static,
    {
        let mut current = self.current.lock();
        self.retire(current.take(), self.join_timeout);

        let token: CancelToken = Arc::new(Signal::new());
        let worker_token = Arc::clone(&token);
        let spawned = thread::Builder::new()
            .name("radio-worker".into())
            .spawn(move || task(&worker_token));

        match spawned {
            Ok(handle) => {
                log::debug!("[Controller] Dispatched {}", name);
                *current = Some(Worker { token, handle });
            }
            Err(e) => log::error!("[Controller] Failed to start worker for {}: {}", name, e),
        }
    }

    /// Cancels the running task and stops audio without waiting for the
    /// worker.
    pub fn cancel(&self) {
        if let Some(worker) = self.current.lock().as_ref() {
            worker.token.set();
        }
        self.audio.stop();
    }

    /// Cancels the running task, stops audio and waits up to `timeout`.
    pub fn shutdown(&self, timeout: Duration) {
        let worker = self.current.lock().take();
        self.retire(worker, timeout);
    }

    /// Whether a worker thread is still running.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    fn retire(&self, worker: Option<Worker>, timeout: Duration) {
        if let Some(worker) = &worker {
            worker.token.set();
        }
        self.audio.stop();
        if let Some(worker) = worker {
            if !join_bounded(worker.handle, timeout) {
                log::warn!(
                    "[Controller] Previous worker still running after {:?}; detaching",
                    timeout
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{AudioCall, RecordingAudioPlayer};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    fn dispatcher(audio: &Arc<RecordingAudioPlayer>) -> Dispatcher {
        Dispatcher::new(
            Arc::clone(audio) as Arc<dyn AudioPlayer>,
            Duration::from_millis(500),
        )
    }

    #[test]
    fn dispatch_stops_audio_before_starting_task() {
        let audio = RecordingAudioPlayer::new();
        let dispatcher = dispatcher(&audio);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        dispatcher.dispatch("first", move |_| {
            let _ = done_tx.send(());
        });
        done_rx.recv_timeout(Duration::from_secs(1)).unwrap();

        assert_eq!(audio.calls(), vec![AudioCall::Stop]);
    }

    #[test]
    fn new_task_cancels_previous_one() {
        let audio = RecordingAudioPlayer::new();
        let dispatcher = dispatcher(&audio);
        let finished = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&finished);
        dispatcher.dispatch("long", move |token| {
            token.wait_timeout(Duration::from_secs(5));
            f.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        dispatcher.dispatch("next", |_| {});
        // The first task observed cancellation and was joined.
        assert_eq!(finished.load(Ordering::SeqCst), 1);
        assert!(start.elapsed() < Duration::from_millis(400));
    }

    #[test]
    fn stuck_worker_is_detached_after_timeout() {
        let audio = RecordingAudioPlayer::new();
        let dispatcher = Dispatcher::new(
            Arc::clone(&audio) as Arc<dyn AudioPlayer>,
            Duration::from_millis(50),
        );

        dispatcher.dispatch("stuck", |_| thread::sleep(Duration::from_millis(300)));
        let start = Instant::now();
        dispatcher.dispatch("next", |_| {});
        assert!(start.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn shutdown_cancels_and_joins() {
        let audio = RecordingAudioPlayer::new();
        let dispatcher = dispatcher(&audio);

        dispatcher.dispatch("long", |token| {
            token.wait_timeout(Duration::from_secs(5));
        });
        thread::sleep(Duration::from_millis(20));
        assert!(dispatcher.is_busy());

        dispatcher.shutdown(Duration::from_millis(500));
        assert!(!dispatcher.is_busy());
        assert_eq!(
            audio.calls().iter().filter(|c| **c == AudioCall::Stop).count(),
            2
        );
    }
}
