//! Scripted frame source for tests
//!
//! Every frame succeeds with a deterministic payload unless scripted
//! otherwise. Responses can be held back per frame and released later to
//! reproduce out-of-order network completion.

use crate::source::{FetchError, FrameSource};
use async_trait::async_trait;
use frame_annotator_cache::{FrameIndex, FramePayload};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

#[derive(Default)]
pub struct ScriptedSource {
    failures: Mutex<HashMap<FrameIndex, FetchError>>,
    responses: Mutex<HashMap<FrameIndex, FramePayload>>,
    gates: Mutex<HashMap<FrameIndex, Arc<Semaphore>>>,
    calls: Mutex<Vec<FrameIndex>>,
    call_notify: Notify,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payload served for `index` when nothing else is scripted
    pub fn payload_for(index: FrameIndex) -> FramePayload {
        FramePayload::from(format!("data:image/jpeg;base64,frame-{index}"))
    }

    /// Make every fetch of `index` fail with `error`
    pub fn fail(&self, index: FrameIndex, error: FetchError) {
        self.failures.lock().insert(index, error);
    }

    /// Serve `payload` for `index` instead of the default
    pub fn respond_with(&self, index: FrameIndex, payload: FramePayload) {
        self.responses.lock().insert(index, payload);
    }

    /// Hold responses for `index` until [`release`](Self::release) is called
    pub fn hold(&self, index: FrameIndex) {
        self.gates
            .lock()
            .insert(index, Arc::new(Semaphore::new(0)));
    }

    /// Let one held fetch of `index` complete
    pub fn release(&self, index: FrameIndex) {
        if let Some(gate) = self.gates.lock().get(&index) {
            gate.add_permits(1);
        }
    }

    /// Stop holding `index`; pending and future fetches complete
    pub fn release_all(&self, index: FrameIndex) {
        if let Some(gate) = self.gates.lock().remove(&index) {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    /// Delay every response by `delay`
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Frames requested so far, in call order
    pub fn calls(&self) -> Vec<FrameIndex> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, index: FrameIndex) -> usize {
        self.calls.lock().iter().filter(|&&i| i == index).count()
    }

    /// Highest number of fetches observed running at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` fetches have started
    pub async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.call_notify.notified();
            if self.calls.lock().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn fetch_frame(&self, index: FrameIndex) -> Result<FramePayload, FetchError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlightGuard(&self.in_flight);
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        self.calls.lock().push(index);
        self.call_notify.notify_waiters();

        let gate = self.gates.lock().get(&index).cloned();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(error) = self.failures.lock().get(&index).cloned() {
            return Err(error);
        }
        let scripted = self.responses.lock().get(&index).cloned();
        Ok(scripted.unwrap_or_else(|| Self::payload_for(index)))
    }
}
