use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use orchestrator::{
    FoldSettings, OrchestratorError, check_element_names, load_datasets, load_settings, run_folds,
};

/// Trains an ensemble of networks for every hyperparameter settings file.
#[derive(Parser, Debug)]
#[command(name = "hyperparams_search", version, about)]
struct Args {
    /// Comma separated directories holding the training dataset files
    #[arg(long)]
    data_dirs: String,

    /// Comma separated directories holding the validation dataset files
    #[arg(long)]
    validation_data_dirs: String,

    /// Suffix of the dataset file names
    #[arg(long, default_value = "data.json")]
    data_file_suffix: String,

    /// Glob matching the training settings files, one fold each
    #[arg(long)]
    train_settings_json_glob: String,

    /// Amount of epochs every fold is trained for
    #[arg(long)]
    epochs: usize,

    /// Directory the checkpoints are written to
    #[arg(long)]
    out_dir: PathBuf,

    /// Directory the scalar series are written to
    #[arg(long)]
    log_dir: PathBuf,

    /// Maximum amount of folds trained at once
    #[arg(long, default_value_t = 1)]
    parallelism: usize,

    /// Amount of networks trained simultaneously per fold
    #[arg(long, default_value_t = 1)]
    num_nets_to_train: usize,

    /// Probability of each network training on each batch
    #[arg(long, default_value_t = 1.0)]
    batch_use_prob: f64,

    /// Byte capacity of each fold's accelerator, folds run on the host when absent
    #[arg(long)]
    accelerator_memory: Option<usize>,

    /// Print a summary line per epoch
    #[arg(long)]
    print_log: bool,
}

fn run(args: Args) -> Result<(), OrchestratorError> {
    let settings = load_settings(&args.train_settings_json_glob)?;
    check_element_names(&settings)?;

    let train = load_datasets(&args.data_dirs, &args.data_file_suffix)?;
    let val = load_datasets(&args.validation_data_dirs, &args.data_file_suffix)?;
    log::info!(
        "loaded {} training and {} validation examples",
        train.len(),
        val.len()
    );

    let folds: Vec<_> = settings
        .into_iter()
        .map(|settings| FoldSettings {
            settings,
            epochs: args.epochs,
            base_out_dir: args.out_dir.clone(),
            base_log_dir: args.log_dir.clone(),
            num_nets_to_train: args.num_nets_to_train,
            batch_use_prob: args.batch_use_prob,
            print_log: args.print_log,
        })
        .collect();

    run_folds(
        &folds,
        &train,
        &val,
        args.parallelism,
        args.accelerator_memory,
    )?;

    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
