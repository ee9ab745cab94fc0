#![cfg(test)]

use ndarray::{Array2, Axis};
use rand::{SeedableRng, rngs::StdRng};

use crate::{
    arch::{Model, Sequential, activations::ActFn, layers::Layer},
    dataset::{DataLoader, InMemoryDataset},
    loss::LossKind,
    optimization::GradientDescent,
    param_gen::ParamGen,
    training::{EnsembleTrainer, TrainOptions, TrainSettings},
};

fn gate_dataset(table: &[f32], inputs: usize) -> InMemoryDataset {
    let data = Array2::from_shape_vec((table.len() / (inputs + 1), inputs + 1), table.to_vec())
        .unwrap();
    let (x, y) = data.view().split_at(Axis(1), inputs);

    InMemoryDataset::new(
        vec![
            ("x".into(), x.to_owned().into_dyn()),
            ("y".into(), y.to_owned().into_dyn()),
        ],
        None,
    )
    .unwrap()
}

fn gate_model(inputs: usize, hidden: usize, seed: u64) -> Sequential {
    let mut model = Sequential::new(
        [
            Layer::dense((inputs, hidden), Some(ActFn::sigmoid(1.0))),
            Layer::dense((hidden, 1), Some(ActFn::sigmoid(1.0))),
        ],
        vec!["x".into()],
        vec!["y".into()],
    );

    let mut rng = StdRng::seed_from_u64(seed);
    ParamGen::XavierUniform.init(&mut model, &mut rng).unwrap();
    model
}

fn train_gate(table: &[f32], inputs: usize, hidden: usize, epochs: usize) -> Vec<f64> {
    let dir = tempfile::tempdir().unwrap();
    let names = ["x".to_string(), "y".to_string()];
    let len = table.len() / (inputs + 1);

    let mut train =
        DataLoader::<StdRng>::new(gate_dataset(table, inputs), &names, len, None).unwrap();
    let mut val =
        DataLoader::<StdRng>::new(gate_dataset(table, inputs), &names, len, None).unwrap();

    let models = (0..2).map(|seed| gate_model(inputs, hidden, seed)).collect();
    let settings = (0..2)
        .map(|_| {
            TrainSettings::new(
                LossKind::Mse.build(),
                Box::new(GradientDescent::new(5.0)),
                epochs,
            )
        })
        .collect();

    let options = TrainOptions {
        print_log: false,
        seed: Some(0),
        ..TrainOptions::new(dir.path().join("gate"))
    };

    let mut trainer = EnsembleTrainer::new(models, settings, options).unwrap();
    let log = trainer.train(&mut train, &mut val).unwrap();

    assert_eq!(log.len(), epochs);
    assert!(trainer.models().iter().all(|m| m.size() == (inputs + 2) * hidden + 1));

    log.last().unwrap().val_losses.clone()
}

#[test]
fn test_ml_and2_gate_convergence() {
    let and2 = [
        0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, //
        1.0, 0.0, 0.0, //
        1.0, 1.0, 1.0, //
    ];

    let losses = train_gate(&and2, 2, 3, 3000);
    assert!(losses.iter().all(|&l| l < 0.05), "losses: {losses:?}");
}

#[test]
fn test_ml_and3_gate_convergence() {
    let and3 = [
        0.0, 0.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 1.0, 1.0, 0.0, //
        1.0, 0.0, 0.0, 0.0, //
        1.0, 0.0, 1.0, 0.0, //
        1.0, 1.0, 0.0, 0.0, //
        1.0, 1.0, 1.0, 1.0, //
    ];

    let losses = train_gate(&and3, 3, 2, 3000);
    assert!(losses.iter().all(|&l| l < 0.05), "losses: {losses:?}");
}
