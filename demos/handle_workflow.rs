use titaninfer::layers::{Activation, Dense};
use titaninfer::{init_logging, save_to_path, ModelHandle, Sequential, Tensor};

fn main() {
    init_logging();

    let w1 = Tensor::from_data(vec![4, 2], &[0.2, -0.1, 0.3, 0.4, -0.2, 0.1, 0.5, 0.2]).unwrap();
    let w2 = Tensor::from_data(vec![1, 4], &[0.1, 0.2, 0.3, -0.1]).unwrap();
    let model = Sequential::from_layers(vec![
        Box::new(Dense::new(w1, None).unwrap()),
        Box::new(Activation::ReLU),
        Box::new(Dense::new(w2, None).unwrap()),
    ]);

    let path = std::env::temp_dir().join("titaninfer_demo_handle.titn");
    save_to_path(&model, &path).unwrap();

    let handle = ModelHandle::builder(&path)
        .enable_profiling(true)
        .warmup_runs(5)
        .build()
        .unwrap();

    println!("expected input shape: {:?}", handle.expected_input_shape());
    let output = handle.predict(Tensor::from_data(vec![2], &[1.0, -0.5]).unwrap()).unwrap();
    println!("output = {:?}", output.as_slice());
    println!("stats after warmup+1 predict: count={}", handle.stats().count);

    std::fs::remove_file(&path).ok();
}
