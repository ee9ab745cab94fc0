use std::{fs, path::Path};

use machine_learning::{
    arch::{Model, Sequential, layers::Layer},
    dataset::InMemoryDataset,
    training::{CheckpointKind, ScalarLog, checkpoint_path, load_checkpoint},
};
use ndarray::{Array1, Array2};
use orchestrator::{
    FoldSettings, OrchestratorError, check_element_names, configs::SettingsConfig, load_datasets,
    load_settings, run_folds,
};

fn dataset(examples: usize, offset: f32) -> InMemoryDataset {
    let x = Array2::from_shape_fn((examples, 2), |(i, j)| {
        (i as f32 + offset) / examples as f32 * if j == 0 { 1.0 } else { 0.5 }
    });
    let y: Array1<f32> = x.rows().into_iter().map(|r| r[0] - r[1]).collect();

    InMemoryDataset::new(
        vec![("x".into(), x.into_dyn()), ("y".into(), y.into_dyn())],
        None,
    )
    .unwrap()
}

fn write_settings(dir: &Path, id: &str, label: &str) {
    let content = format!(
        r#"{{
            "settings_id": "{id}",
            "input_names": ["x"],
            "label_names": ["{label}"],
            "model": {{"type": "sequential", "layers": [
                {{"type": "dense", "dim": [2, 4], "act_fn": {{"type": "tanh"}}}},
                {{"type": "dense", "dim": [4, 1]}}
            ]}},
            "loss": "weighted_mse",
            "optimizer": {{"type": "adam", "lr": 0.01}},
            "batch_size": 4,
            "shuffle": true,
            "seed": 7
        }}"#
    );

    fs::write(dir.join(format!("{id}.json")), content).unwrap();
}

fn folds(settings: Vec<SettingsConfig>, root: &Path) -> Vec<FoldSettings> {
    settings
        .into_iter()
        .map(|settings| FoldSettings {
            settings,
            epochs: 3,
            base_out_dir: root.join("out"),
            base_log_dir: root.join("logs"),
            num_nets_to_train: 2,
            batch_use_prob: 1.0,
            print_log: false,
        })
        .collect()
}

#[test]
fn every_fold_is_trained_and_checkpointed() {
    let dir = tempfile::tempdir().unwrap();
    let settings_dir = dir.path().join("settings");
    fs::create_dir(&settings_dir).unwrap();
    write_settings(&settings_dir, "wide", "y");
    write_settings(&settings_dir, "narrow", "y");

    let pattern = settings_dir.join("*.json");
    let settings = load_settings(&pattern.to_string_lossy()).unwrap();
    assert_eq!(settings.len(), 2);
    assert_eq!(settings[0].settings_id, "narrow");
    assert_eq!(check_element_names(&settings).unwrap(), ["x", "y"]);

    let folds = folds(settings, dir.path());
    let results = run_folds(&folds, &dataset(12, 0.0), &dataset(8, 0.5), 2, None).unwrap();

    let ids: Vec<_> = results.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, ["narrow", "wide"]);

    for (fold, (_, log)) in folds.iter().zip(&results) {
        assert_eq!(log.len(), 3);

        for i in 0..2 {
            let last = checkpoint_path(&fold.out_prefix(), i, CheckpointKind::Last);
            let state = load_checkpoint(&last).unwrap();

            let mut model = Sequential::new(
                [Layer::dense((2, 4), None), Layer::dense((4, 1), None)],
                vec!["x".into()],
                vec!["y".into()],
            );
            model.load_state_dict(&state).unwrap();

            assert!(checkpoint_path(&fold.out_prefix(), i, CheckpointKind::Best).exists());
        }

        let events = ScalarLog::read(&fold.log_dir().join("scalars.jsonl")).unwrap();
        assert_eq!(events.len(), 6);
    }
}

#[test]
fn folds_run_on_bounded_accelerators() {
    let dir = tempfile::tempdir().unwrap();
    let settings_dir = dir.path().join("settings");
    fs::create_dir(&settings_dir).unwrap();
    write_settings(&settings_dir, "small", "y");

    let settings = load_settings(&settings_dir.join("*.json").to_string_lossy()).unwrap();
    let folds = folds(settings, dir.path());

    let results = run_folds(&folds, &dataset(8, 0.0), &dataset(4, 0.5), 1, Some(1 << 20));
    assert!(results.is_ok());

    let exhausted = run_folds(&folds, &dataset(8, 0.0), &dataset(4, 0.5), 1, Some(16));
    assert!(matches!(
        exhausted,
        Err(OrchestratorError::FoldFailed { ref settings_id, .. }) if settings_id == "small"
    ));
}

#[test]
fn settings_must_agree_on_element_names() {
    let dir = tempfile::tempdir().unwrap();
    write_settings(dir.path(), "a", "y");
    write_settings(dir.path(), "b", "z");

    let settings = load_settings(&dir.path().join("*.json").to_string_lossy()).unwrap();
    assert!(matches!(
        check_element_names(&settings),
        Err(OrchestratorError::InvalidConfig(_))
    ));
}

#[test]
fn invalid_settings_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("broken.json"), "{\"settings_id\": 3}").unwrap();

    assert!(matches!(
        load_settings(&dir.path().join("*.json").to_string_lossy()),
        Err(OrchestratorError::Json(_))
    ));
    assert!(matches!(
        load_settings("[unclosed"),
        Err(OrchestratorError::Glob(_))
    ));
}

#[test]
fn dataset_directories_are_joined() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = (dir.path().join("a"), dir.path().join("b"));
    fs::create_dir(&a).unwrap();
    fs::create_dir(&b).unwrap();

    dataset(3, 0.0).save(&a.join("train-data.json")).unwrap();
    dataset(5, 0.0).save(&b.join("train-data.json")).unwrap();
    fs::write(b.join("notes.txt"), "not a dataset").unwrap();

    let dirs = format!("{},{}", a.display(), b.display());
    let joined = load_datasets(&dirs, "data.json").unwrap();
    assert_eq!(joined.len(), 8);

    assert!(matches!(
        load_datasets(&dirs, "missing.json"),
        Err(OrchestratorError::InvalidConfig(_))
    ));
}
