use std::sync::Arc;
use std::thread;

use titaninfer::batcher::{BatcherConfig, DynamicBatcher};
use titaninfer::layers::{Activation, Dense};
use titaninfer::{compile, init_logging, CompileOptions, InferenceEngine, Sequential, Tensor};

fn main() {
    init_logging();

    let w1 = Tensor::from_data(vec![4, 2], &[0.2, -0.1, 0.3, 0.4, -0.2, 0.1, 0.5, 0.2]).unwrap();
    let w2 = Tensor::from_data(vec![1, 4], &[0.1, 0.2, 0.3, -0.1]).unwrap();
    let model = Sequential::from_layers(vec![
        Box::new(Dense::new(w1, None).unwrap()),
        Box::new(Activation::ReLU),
        Box::new(Dense::new(w2, None).unwrap()),
    ]);

    let compiled = compile(&model, &[2], CompileOptions::default()).unwrap();
    let engine = InferenceEngine::new(compiled, false);
    let batcher = Arc::new(DynamicBatcher::new(engine, BatcherConfig { max_batch_size: 4, max_wait_ms: 5 }));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let batcher = Arc::clone(&batcher);
            thread::spawn(move || {
                let input = Tensor::from_data(vec![2], &[i as f32, -i as f32]).unwrap();
                let output = batcher.predict(input).unwrap();
                println!("request {i} -> {:?}", output.as_slice());
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}
