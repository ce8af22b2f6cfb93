use titaninfer::layers::{Activation, Dense};
use titaninfer::{compile, init_logging, CompileOptions, Sequential, Tensor};

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
    println!("fused model has {} layers, output shape {:?}", compiled.model().len(), compiled.output_shape());
    for layer in compiled.model().layers() {
        println!("  {}", layer.name());
    }
}
