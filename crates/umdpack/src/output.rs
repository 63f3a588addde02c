//! Output-location preparation.

use log::debug;
use std::fs;
use std::path::Path;

use crate::error::{BuildError, BuildResult};

/// Ensure `dir` and every missing ancestor exist.
///
/// Idempotent: an existing directory is left as is, contents included.
/// A path that collides with an existing non-directory is an error.
pub fn prepare_output_dir(dir: &Path) -> BuildResult<()> {
    if dir.is_dir() {
        debug!("Output directory already present: {:?}", dir);
        return Ok(());
    }

    fs::create_dir_all(dir)
        .map_err(|e| BuildError::filesystem("Failed to create output directory", dir, e))?;

    // create_dir_all reports success for some races where the path ends up a file
    if !dir.is_dir() {
        return Err(BuildError::filesystem(
            "Output path is not a directory",
            dir,
            std::io::Error::new(std::io::ErrorKind::AlreadyExists, "not a directory"),
        ));
    }

    debug!("Created output directory: {:?}", dir);
    Ok(())
}
