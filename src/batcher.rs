//! Single-consumer coalescer: stack → forward → split → fan out results (§4.9).

use crate::error::Result;
use crate::tensor::Tensor;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// `{max_batch_size, max_wait_ms}` (§6.4).
#[derive(Debug, Clone, Copy)]
pub struct BatcherConfig {
    pub max_batch_size: usize,
    pub max_wait_ms: u64,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 8,
            max_wait_ms: 10,
        }
    }
}

/// Anything the batcher can drive a forward pass through. Implemented by
/// [`crate::engine::InferenceEngine`]; kept as a trait so the batcher's consumer thread
/// doesn't need to know about the handle/mutex layer above it.
pub trait BatchForward: Send {
    fn forward_batch(&mut self, stacked: &Tensor, batch_size: usize) -> Result<Tensor>;
    fn sample_output_shape(&self) -> Vec<usize>;
    fn input_shape(&self) -> Vec<usize>;
}

type ResultSlot = Arc<(Mutex<Option<Result<Tensor>>>, Condvar)>;

struct Pending {
    input: Tensor,
    slot: ResultSlot,
}

struct Shared {
    queue: Mutex<VecDeque<Pending>>,
    condvar: Condvar,
    stop: Mutex<bool>,
}

/// Owns a queue of pending (input, promise) pairs and a single consumer thread that
/// coalesces them into stacked batches (§4.9).
pub struct DynamicBatcher {
    shared: Arc<Shared>,
    consumer: Option<JoinHandle<()>>,
}

impl DynamicBatcher {
    pub fn new<M: BatchForward + 'static>(model: M, config: BatcherConfig) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            condvar: Condvar::new(),
            stop: Mutex::new(false),
        });
        let consumer_shared = Arc::clone(&shared);
        let consumer = thread::spawn(move || consumer_loop(consumer_shared, model, config));
        Self {
            shared,
            consumer: Some(consumer),
        }
    }

    /// Enqueues `input` and blocks the calling thread until the batcher delivers a
    /// result (direct call for a batch of size 1, or a stack/forward/split cycle).
    #[instrument(skip(self, input))]
    pub fn predict(&self, input: Tensor) -> Result<Tensor> {
        let slot: ResultSlot = Arc::new((Mutex::new(None), Condvar::new()));
        {
            let mut queue = self.shared.queue.lock().unwrap();
            queue.push_back(Pending {
                input,
                slot: Arc::clone(&slot),
            });
        }
        self.shared.condvar.notify_one();

        let (lock, condvar) = &*slot;
        let mut guard = lock.lock().unwrap();
        loop {
            if let Some(result) = guard.take() {
                return result;
            }
            guard = condvar.wait(guard).unwrap();
        }
    }
}

fn consumer_loop<M: BatchForward>(shared: Arc<Shared>, mut model: M, config: BatcherConfig) {
    loop {
        let batch = drain_batch(&shared, &config);
        match batch {
            Some(batch) if !batch.is_empty() => run_batch(&mut model, batch),
            _ => {
                if *shared.stop.lock().unwrap() {
                    break;
                }
            }
        }
    }
    // Drain anything still queued after stop was requested so no promise is abandoned.
    let remaining: Vec<Pending> = shared.queue.lock().unwrap().drain(..).collect();
    if !remaining.is_empty() {
        run_batch(&mut model, remaining);
    }
    debug!("batcher consumer exiting");
}

fn drain_batch(shared: &Arc<Shared>, config: &BatcherConfig) -> Option<Vec<Pending>> {
    let mut queue = shared.queue.lock().unwrap();
    while queue.is_empty() && !*shared.stop.lock().unwrap() {
        queue = shared.condvar.wait(queue).unwrap();
    }
    if queue.is_empty() {
        return None;
    }

    let deadline = Instant::now() + Duration::from_millis(config.max_wait_ms);
    let mut batch = Vec::new();
    loop {
        while let Some(item) = queue.pop_front() {
            batch.push(item);
            if batch.len() >= config.max_batch_size {
                return Some(batch);
            }
        }
        let now = Instant::now();
        if now >= deadline {
            return Some(batch);
        }
        let (guard, timeout) = shared
            .condvar
            .wait_timeout(queue, deadline - now)
            .unwrap();
        queue = guard;
        if timeout.timed_out() && queue.is_empty() {
            return Some(batch);
        }
    }
}

fn run_batch<M: BatchForward>(model: &mut M, mut batch: Vec<Pending>) {
    if batch.len() == 1 {
        let pending = batch.pop().unwrap();
        let result = forward_one(model, &pending.input);
        deliver(&pending.slot, result);
        return;
    }

    let sample_shape = model.input_shape();
    let sample_size: usize = sample_shape.iter().product();
    let mut stacked_shape = vec![batch.len()];
    stacked_shape.extend_from_slice(&sample_shape);

    let stacked = match Tensor::from_shape(stacked_shape) {
        Ok(mut t) => {
            for (i, pending) in batch.iter().enumerate() {
                t.as_mut_slice()[i * sample_size..(i + 1) * sample_size].copy_from_slice(pending.input.as_slice());
            }
            t
        }
        Err(e) => {
            for pending in &batch {
                deliver(&pending.slot, Err(e.clone()));
            }
            return;
        }
    };

    match model.forward_batch(&stacked, batch.len()) {
        Ok(output) => {
            let out_shape = model.sample_output_shape();
            let out_size: usize = out_shape.iter().product();
            for (i, pending) in batch.into_iter().enumerate() {
                let sample = Tensor::from_data(out_shape.clone(), &output.as_slice()[i * out_size..(i + 1) * out_size]);
                deliver(&pending.slot, sample);
            }
        }
        Err(e) => {
            // Broadcast the failure to every promise in the batch (§4.9 step 6).
            for pending in &batch {
                deliver(&pending.slot, Err(e.clone()));
            }
        }
    }
}

fn forward_one<M: BatchForward>(model: &mut M, input: &Tensor) -> Result<Tensor> {
    model.forward_batch(input, 1)
}

fn deliver(slot: &ResultSlot, result: Result<Tensor>) {
    let (lock, condvar) = &**slot;
    *lock.lock().unwrap() = Some(result);
    condvar.notify_all();
}

/// Destructor sets `stop`, wakes the consumer, and joins; the consumer drains any
/// remaining queued requests before exiting (§4.9 step 7).
impl Drop for DynamicBatcher {
    fn drop(&mut self) {
        *self.shared.stop.lock().unwrap() = true;
        self.shared.condvar.notify_all();
        if let Some(consumer) = self.consumer.take() {
            let _ = consumer.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Doubler {
        calls: Arc<AtomicUsize>,
    }

    impl BatchForward for Doubler {
        fn forward_batch(&mut self, stacked: &Tensor, batch_size: usize) -> Result<Tensor> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut out = Tensor::from_shape(vec![batch_size, 4]).unwrap();
            for (dst, &src) in out.as_mut_slice().iter_mut().zip(stacked.as_slice()) {
                *dst = src * 2.0;
            }
            Ok(out)
        }

        fn sample_output_shape(&self) -> Vec<usize> {
            vec![4]
        }

        fn input_shape(&self) -> Vec<usize> {
            vec![4]
        }
    }

    #[test]
    fn single_request_direct_path_matches_model() {
        let batcher = DynamicBatcher::new(
            Doubler { calls: Arc::new(AtomicUsize::new(0)) },
            BatcherConfig { max_batch_size: 1, max_wait_ms: 5 },
        );
        let input = Tensor::from_data(vec![4], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let out = batcher.predict(input).unwrap();
        assert_eq!(out.as_slice(), &[2.0, 4.0, 6.0, 8.0]);
    }

    #[test]
    fn concurrent_requests_are_all_fulfilled() {
        let batcher = Arc::new(DynamicBatcher::new(
            Doubler { calls: Arc::new(AtomicUsize::new(0)) },
            BatcherConfig { max_batch_size: 16, max_wait_ms: 50 },
        ));
        let mut handles = Vec::new();
        for t in 0..4 {
            let batcher = Arc::clone(&batcher);
            handles.push(thread::spawn(move || {
                for _ in 0..10 {
                    let input = Tensor::from_data(vec![4], &[1.0, 1.0, 1.0, 1.0]).unwrap();
                    let out = batcher.predict(input).unwrap();
                    assert_eq!(out.shape(), &[4]);
                    let _ = t;
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn dropping_batcher_with_pending_requests_does_not_hang() {
        let batcher = Arc::new(DynamicBatcher::new(
            Doubler { calls: Arc::new(AtomicUsize::new(0)) },
            BatcherConfig { max_batch_size: 16, max_wait_ms: 1000 },
        ));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let batcher = Arc::clone(&batcher);
            handles.push(thread::spawn(move || {
                let input = Tensor::from_data(vec![4], &[1.0, 1.0, 1.0, 1.0]).unwrap();
                batcher.predict(input)
            }));
        }
        // Give requests a moment to enqueue before the batcher (held only by this
        // thread's Arc once handles finish) is dropped.
        thread::sleep(Duration::from_millis(5));
        for h in handles {
            assert!(h.join().unwrap().is_ok());
        }
    }
}
