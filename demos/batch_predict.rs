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
    let mut engine = InferenceEngine::new(compiled, true);

    let inputs = vec![
        Tensor::from_data(vec![2], &[1.0, -0.5]).unwrap(),
        Tensor::from_data(vec![2], &[0.0, 1.0]).unwrap(),
        Tensor::from_data(vec![2], &[-1.0, -1.0]).unwrap(),
    ];
    let outputs = engine.predict_batch(&inputs).unwrap();
    for (i, out) in outputs.iter().enumerate() {
        println!("input[{i}] -> {:?}", out.as_slice());
    }
    println!("mean latency: {:?}", engine.stats().mean());
}
