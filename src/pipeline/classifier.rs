//! Classifier adapter: one-time background model loading and a latest-wins inference
//! worker.

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, unbounded};

use super::{camera::SessionId, landmarks::FeatureVector};
use crate::{
    error::{PipelineError, Result},
    types::{Prediction, Timestamp},
};

/// A loaded model mapping a feature vector to `(label, probability)`.
pub trait ClassifierModel: Send {
    fn predict(&mut self, features: &FeatureVector) -> anyhow::Result<(String, f32)>;
}

/// Produces a model. Runs on a background thread and may be invoked again after a failure.
pub type ModelLoader = Arc<dyn Fn() -> anyhow::Result<Box<dyn ClassifierModel>> + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModelStatus {
    Unloaded,
    Loading,
    Ready,
    Failed(String),
}

enum LoadState {
    Unloaded,
    Loading { started: Instant },
    Ready,
    Failed(String),
}

struct Shared {
    // Lifecycle and model live behind separate locks so status reads never wait on an
    // inference.
    state: Mutex<LoadState>,
    changed: Condvar,
    model: Mutex<Option<Box<dyn ClassifierModel>>>,
    loader: ModelLoader,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, LoadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn model(&self) -> MutexGuard<'_, Option<Box<dyn ClassifierModel>>> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheap to clone; all clones share one model.
#[derive(Clone)]
pub struct Classifier {
    shared: Arc<Shared>,
}

impl Classifier {
    pub fn new(loader: ModelLoader) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(LoadState::Unloaded),
                changed: Condvar::new(),
                model: Mutex::new(None),
                loader,
            }),
        }
    }

    /// A classifier that is ready immediately.
    pub fn preloaded(model: Box<dyn ClassifierModel>) -> Self {
        let classifier = Self::new(Arc::new(
            || -> anyhow::Result<Box<dyn ClassifierModel>> {
                Err(anyhow::anyhow!("preloaded classifier cannot be reloaded"))
            },
        ));
        *classifier.shared.model() = Some(model);
        *classifier.shared.state() = LoadState::Ready;
        classifier
    }

    /// Starts loading unless a load is running or already finished.
    ///
    /// Concurrent and repeated calls collapse into the same in-flight load. A failed load
    /// is retried.
    pub fn load(&self) {
        {
            let mut state = self.shared.state();
            match *state {
                LoadState::Loading { .. } | LoadState::Ready => return,
                LoadState::Unloaded | LoadState::Failed(_) => {}
            }
            *state = LoadState::Loading {
                started: Instant::now(),
            };
        }

        let shared = Arc::clone(&self.shared);
        thread::spawn(move || {
            log::info!("loading classifier model");
            let outcome = (shared.loader)();
            let next = match outcome {
                Ok(model) => {
                    *shared.model() = Some(model);
                    log::info!("classifier model ready");
                    LoadState::Ready
                }
                Err(err) => {
                    log::error!("failed to load classifier model: {err:?}");
                    LoadState::Failed(format!("{err:#}"))
                }
            };
            *shared.state() = next;
            shared.changed.notify_all();
        });
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.state(), LoadState::Ready)
    }

    pub fn status(&self) -> ModelStatus {
        match &*self.shared.state() {
            LoadState::Unloaded => ModelStatus::Unloaded,
            LoadState::Loading { .. } => ModelStatus::Loading,
            LoadState::Ready => ModelStatus::Ready,
            LoadState::Failed(reason) => ModelStatus::Failed(reason.clone()),
        }
    }

    /// How long the current load has been running, if one is.
    pub fn loading_for(&self) -> Option<Duration> {
        match *self.shared.state() {
            LoadState::Loading { started } => Some(started.elapsed()),
            _ => None,
        }
    }

    /// Blocks until the model is ready, loading fails, or `timeout` passes.
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state();
        loop {
            match &*state {
                LoadState::Ready => return Ok(()),
                LoadState::Failed(reason) => {
                    return Err(PipelineError::ModelLoadFailed(reason.clone()));
                }
                LoadState::Unloaded => return Err(PipelineError::NotReady),
                LoadState::Loading { .. } => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(PipelineError::ModelLoadTimeout(timeout));
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    pub fn classify(&self, features: &FeatureVector, timestamp: Timestamp) -> Result<Prediction> {
        if !self.is_ready() {
            return Err(PipelineError::NotReady);
        }
        let mut model = self.shared.model();
        let model = model.as_mut().ok_or(PipelineError::NotReady)?;
        let (label, probability) = model
            .predict(features)
            .map_err(|err| PipelineError::InferenceError(format!("{err:#}")))?;
        if !probability.is_finite() {
            return Err(PipelineError::InferenceError(format!(
                "model returned probability {probability}"
            )));
        }
        Ok(Prediction::new(label, probability, timestamp))
    }
}

#[derive(Debug)]
struct InferenceRequest {
    session: SessionId,
    features: FeatureVector,
    timestamp: Timestamp,
}

#[derive(Debug)]
pub struct InferenceResponse {
    pub session: SessionId,
    pub timestamp: Timestamp,
    pub result: Result<Prediction>,
}

/// Runs classifications off the loop thread, one at a time.
///
/// While a request is in flight, newer submissions overwrite a single pending slot, so
/// only the freshest features are classified next.
pub struct InferenceWorker {
    request_tx: Option<Sender<InferenceRequest>>,
    response_rx: Receiver<InferenceResponse>,
    handle: Option<thread::JoinHandle<()>>,
    in_flight: bool,
    pending: Option<InferenceRequest>,
    last_applied: Option<Timestamp>,
    superseded: u64,
}

impl InferenceWorker {
    pub fn spawn(classifier: Classifier) -> Self {
        let (request_tx, request_rx) = unbounded::<InferenceRequest>();
        let (response_tx, response_rx) = unbounded();

        let handle = thread::spawn(move || {
            while let Ok(request) = request_rx.recv() {
                let result = classifier.classify(&request.features, request.timestamp);
                let response = InferenceResponse {
                    session: request.session,
                    timestamp: request.timestamp,
                    result,
                };
                if response_tx.send(response).is_err() {
                    break;
                }
            }
        });

        Self {
            request_tx: Some(request_tx),
            response_rx,
            handle: Some(handle),
            in_flight: false,
            pending: None,
            last_applied: None,
            superseded: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Requests dropped because newer features replaced them before they started.
    pub fn superseded(&self) -> u64 {
        self.superseded
    }

    pub fn submit(&mut self, session: SessionId, features: FeatureVector, timestamp: Timestamp) {
        let request = InferenceRequest {
            session,
            features,
            timestamp,
        };
        if self.in_flight {
            if self.pending.replace(request).is_some() {
                self.superseded += 1;
            }
            return;
        }
        self.dispatch(request);
    }

    /// Collects finished inferences for `session`, discarding stale ones, and starts the
    /// pending request if the worker became idle.
    pub fn poll(&mut self, session: SessionId) -> Vec<InferenceResponse> {
        let mut fresh = Vec::new();
        loop {
            match self.response_rx.try_recv() {
                Ok(response) => fresh.extend(self.accept(response, session)),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.in_flight = false;
                    break;
                }
            }
        }

        if !self.in_flight {
            if let Some(request) = self.pending.take() {
                if request.session == session {
                    self.dispatch(request);
                }
            }
        }
        fresh
    }

    /// Like [`poll`](Self::poll), but blocks until queued work for `session` is done or
    /// `timeout` passes.
    pub fn drain(&mut self, session: SessionId, timeout: Duration) -> Vec<InferenceResponse> {
        let deadline = Instant::now() + timeout;
        let mut fresh = self.poll(session);
        while self.in_flight {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.response_rx.recv_timeout(deadline - now) {
                Ok(response) => {
                    fresh.extend(self.accept(response, session));
                    fresh.extend(self.poll(session));
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => {
                    self.in_flight = false;
                    break;
                }
            }
        }
        fresh
    }

    fn accept(
        &mut self,
        response: InferenceResponse,
        session: SessionId,
    ) -> Option<InferenceResponse> {
        self.in_flight = false;
        if response.session != session {
            log::debug!(
                "dropping inference result from stale session {}",
                response.session
            );
            return None;
        }
        if self.last_applied.is_some_and(|last| response.timestamp < last) {
            log::debug!("dropping out-of-order inference result");
            return None;
        }
        self.last_applied = Some(response.timestamp);
        Some(response)
    }

    /// Forgets queued work; a result still in flight will be discarded by session id.
    pub fn cancel(&mut self) {
        self.pending = None;
        self.last_applied = None;
    }

    fn dispatch(&mut self, request: InferenceRequest) {
        let Some(tx) = &self.request_tx else {
            return;
        };
        if tx.send(request).is_ok() {
            self.in_flight = true;
        } else {
            log::warn!("inference worker is gone; dropping request");
        }
    }
}

impl Drop for InferenceWorker {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.request_tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Numerically stable softmax. All zeros when the logits do not normalize.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|v| (v - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return vec![0.0; logits.len()];
    }
    exps.into_iter().map(|v| v / sum).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::pipeline::landmarks::FEATURE_LEN;

    struct Fixed(&'static str, f32);

    impl ClassifierModel for Fixed {
        fn predict(&mut self, _features: &FeatureVector) -> anyhow::Result<(String, f32)> {
            Ok((self.0.to_string(), self.1))
        }
    }

    #[test]
    fn softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }

    #[test]
    fn softmax_handles_large_logits() {
        let probs = softmax(&[1000.0, 1000.0]);
        assert!((probs[0] - 0.5).abs() < 1e-6);
    }

    fn features(v: f32) -> FeatureVector {
        FeatureVector::from_values(vec![v; FEATURE_LEN]).unwrap()
    }

    fn wait_for<F: FnMut() -> bool>(mut cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn classify_before_ready_is_not_ready() {
        let classifier = Classifier::new(Arc::new(|| {
            thread::sleep(Duration::from_millis(50));
            Ok(Box::new(Fixed("A", 0.9)) as Box<dyn ClassifierModel>)
        }));
        assert!(matches!(
            classifier.classify(&features(0.1), 0),
            Err(PipelineError::NotReady)
        ));
        classifier.load();
        assert!(matches!(
            classifier.classify(&features(0.1), 0),
            Err(PipelineError::NotReady)
        ));
        classifier.wait_ready(Duration::from_secs(5)).unwrap();
        let prediction = classifier.classify(&features(0.1), 7).unwrap();
        assert_eq!(prediction, Prediction::new("A", 0.9, 7));
    }

    #[test]
    fn repeated_loads_collapse() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let classifier = Classifier::new(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            Ok(Box::new(Fixed("A", 0.5)) as Box<dyn ClassifierModel>)
        }));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let c = classifier.clone();
                thread::spawn(move || c.load())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        classifier.wait_ready(Duration::from_secs(5)).unwrap();
        classifier.load();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_load_is_reported_and_retried() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let classifier = Classifier::new(Arc::new(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(anyhow::anyhow!("missing weights"))
            } else {
                Ok(Box::new(Fixed("B", 0.4)) as Box<dyn ClassifierModel>)
            }
        }));

        classifier.load();
        assert!(matches!(
            classifier.wait_ready(Duration::from_secs(5)),
            Err(PipelineError::ModelLoadFailed(_))
        ));
        assert!(matches!(classifier.status(), ModelStatus::Failed(_)));

        classifier.load();
        classifier.wait_ready(Duration::from_secs(5)).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn load_wait_is_bounded() {
        let classifier = Classifier::new(Arc::new(|| {
            thread::sleep(Duration::from_millis(200));
            Ok(Box::new(Fixed("A", 0.5)) as Box<dyn ClassifierModel>)
        }));
        classifier.load();
        assert!(matches!(
            classifier.wait_ready(Duration::from_millis(10)),
            Err(PipelineError::ModelLoadTimeout(_))
        ));
        assert!(classifier.loading_for().is_some());
    }

    struct Gated {
        gate: Arc<Mutex<()>>,
        seen: Arc<Mutex<Vec<f32>>>,
    }

    impl ClassifierModel for Gated {
        fn predict(&mut self, features: &FeatureVector) -> anyhow::Result<(String, f32)> {
            let _open = self.gate.lock().unwrap();
            let first = features.as_slice()[0];
            self.seen.lock().unwrap().push(first);
            Ok((format!("{first}"), 1.0))
        }
    }

    #[test]
    fn worker_keeps_only_latest_pending_request() {
        let gate = Arc::new(Mutex::new(()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let classifier = Classifier::preloaded(Box::new(Gated {
            gate: Arc::clone(&gate),
            seen: Arc::clone(&seen),
        }));
        let mut worker = InferenceWorker::spawn(classifier);
        let session = SessionId::default();

        let held = gate.lock().unwrap();
        worker.submit(session, features(1.0), 1);
        assert!(worker.is_busy());
        worker.submit(session, features(2.0), 2);
        worker.submit(session, features(3.0), 3);
        assert_eq!(worker.superseded(), 1);
        drop(held);

        let mut results = Vec::new();
        wait_for(|| {
            results.extend(worker.poll(session));
            results.len() == 2
        });

        assert_eq!(*seen.lock().unwrap(), vec![1.0, 3.0]);
        let stamps: Vec<_> = results.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![1, 3]);
        assert!(!worker.is_busy());
    }

    #[test]
    fn results_from_other_sessions_are_discarded() {
        let classifier = Classifier::preloaded(Box::new(Fixed("A", 0.9)));
        let mut worker = InferenceWorker::spawn(classifier);
        let old = SessionId::default();

        worker.submit(old, features(1.0), 1);
        thread::sleep(Duration::from_millis(50));
        let current = SessionId::default().next();
        let mut drained = Vec::new();
        wait_for(|| {
            drained.extend(worker.poll(current));
            !worker.is_busy()
        });
        assert!(drained.is_empty());
    }
}
