use titaninfer::layers::{Activation, Dense};
use titaninfer::{init_logging, load_from_path, save_to_path, Sequential, Tensor};

fn main() {
    init_logging();

    let w1 = Tensor::from_data(vec![4, 2], &[0.2, -0.1, 0.3, 0.4, -0.2, 0.1, 0.5, 0.2]).unwrap();
    let w2 = Tensor::from_data(vec![1, 4], &[0.1, 0.2, 0.3, -0.1]).unwrap();
    let model = Sequential::from_layers(vec![
        Box::new(Dense::new(w1, None).unwrap()),
        Box::new(Activation::ReLU),
        Box::new(Dense::new(w2, None).unwrap()),
    ]);

    let path = std::env::temp_dir().join("titaninfer_demo_model.titn");
    save_to_path(&model, &path).unwrap();
    println!("wrote model to {}", path.display());

    let reloaded = load_from_path(&path).unwrap();
    println!("reloaded model has {} layers", reloaded.len());

    std::fs::remove_file(&path).ok();
}
