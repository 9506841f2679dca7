//! Dataset persistence.
//!
//! Writes the final [`Dataset`] snapshot to `<output_root>/metadata.json` and
//! reads it back for inspection.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument};

use imageset_shared::{Dataset, DatasetError, Result, metadata_path};

/// Validate `dataset` and write it to `<output_root>/metadata.json`.
///
/// The file is replaced atomically: the JSON goes to a sibling temp file that
/// is renamed over the previous snapshot.
#[instrument(skip_all, fields(root = %output_root.display(), images = dataset.images().len()))]
pub fn persist_dataset(output_root: &Path, dataset: &Dataset) -> Result<PathBuf> {
    dataset.validate()?;

    std::fs::create_dir_all(output_root).map_err(|e| DatasetError::io(output_root, e))?;

    let path = metadata_path(output_root);
    write_json(&path, dataset)?;

    info!(path = %path.display(), "dataset metadata written");
    Ok(path)
}

/// Read and validate the snapshot under `output_root`.
pub fn load_dataset(output_root: &Path) -> Result<Dataset> {
    let path = metadata_path(output_root);
    let content = std::fs::read_to_string(&path).map_err(|e| DatasetError::io(&path, e))?;

    let dataset: Dataset = serde_json::from_str(&content).map_err(|e| {
        DatasetError::parse(format!("invalid {}: {e}", path.display()))
    })?;
    dataset.validate()?;

    debug!(path = %path.display(), images = dataset.images().len(), "dataset loaded");
    Ok(dataset)
}

fn write_json(path: &Path, dataset: &Dataset) -> Result<()> {
    let json = serde_json::to_string_pretty(dataset).map_err(|e| {
        DatasetError::validation(format!("JSON serialization failed: {e}"))
    })?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| DatasetError::io(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(DatasetError::io(path, e));
    }

    debug!(path = %path.display(), "wrote JSON file");
    Ok(())
}
