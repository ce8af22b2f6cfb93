use titaninfer::layers::{Activation, Dense};
use titaninfer::{init_logging, Sequential, Tensor};

fn main() {
    init_logging();

    let w1 = Tensor::from_data(vec![4, 2], &[0.2, -0.1, 0.3, 0.4, -0.2, 0.1, 0.5, 0.2]).unwrap();
    let w2 = Tensor::from_data(vec![1, 4], &[0.1, 0.2, 0.3, -0.1]).unwrap();

    let model = Sequential::from_layers(vec![
        Box::new(Dense::new(w1, None).unwrap()),
        Box::new(Activation::ReLU),
        Box::new(Dense::new(w2, None).unwrap()),
    ]);

    let input = Tensor::from_data(vec![2], &[1.0, -0.5]).unwrap();
    let mut a = Tensor::from_shape(vec![4]).unwrap();
    let mut b = Tensor::from_shape(vec![1]).unwrap();
    let output = model.forward(&input, &mut a, &mut b).unwrap();

    println!("{}", model.summary(&[2]).unwrap());
    println!("output = {:?}", output.as_slice());
}
