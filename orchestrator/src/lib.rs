pub mod configs;
pub mod error;
pub mod fold;

use std::path::{Path, PathBuf};

use configs::SettingsConfig;
use machine_learning::dataset::InMemoryDataset;

pub use error::OrchestratorError;
pub use fold::{FoldSettings, check_element_names, run_folds, run_training};

/// Loads every settings file matching `pattern`, sorted by path.
///
/// # Errors
/// Returns `OrchestratorError::Glob` if the pattern is invalid or a match can't be read, or the
/// error of the first settings file that can't be loaded.
pub fn load_settings(pattern: &str) -> Result<Vec<SettingsConfig>, OrchestratorError> {
    let paths = glob_paths(pattern)?;
    log::info!("loading {} settings file(s) matching {pattern}", paths.len());

    paths.iter().map(|path| SettingsConfig::load(path)).collect()
}

/// Loads and concatenates the dataset files ending in `suffix` found in each of `dirs`.
///
/// # Arguments
/// * `dirs` - A comma separated list of directories.
/// * `suffix` - The suffix of the dataset file names.
///
/// # Errors
/// Returns `OrchestratorError::InvalidConfig` if no dataset file is found.
pub fn load_datasets(dirs: &str, suffix: &str) -> Result<InMemoryDataset, OrchestratorError> {
    let mut paths = Vec::new();
    for dir in dirs.split(',').map(str::trim).filter(|d| !d.is_empty()) {
        let pattern = Path::new(dir).join(format!("*{suffix}"));
        paths.extend(glob_paths(&pattern.to_string_lossy())?);
    }

    if paths.is_empty() {
        return Err(OrchestratorError::InvalidConfig(format!(
            "no files ending in {suffix} found in {dirs}"
        )));
    }

    log::debug!("loading datasets {paths:?}");
    Ok(InMemoryDataset::load_all(&paths)?)
}

fn glob_paths(pattern: &str) -> Result<Vec<PathBuf>, OrchestratorError> {
    let mut paths = glob::glob(pattern)
        .map_err(|e| OrchestratorError::Glob(format!("{pattern}: {e}")))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| OrchestratorError::Glob(e.to_string()))?;

    paths.sort();
    Ok(paths)
}
