use std::fs::File;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::ProgramContext;
use crate::error::EpkError;
use crate::utils::common;

pub struct Format {
    pub name: &'static str,
    pub detect_func: fn(&[u8]) -> bool,
    pub run_func: fn(&Path, &ProgramContext, &dyn FileHandler) -> Result<PathBuf, EpkError>,
}

/// Called once for every partition file an extractor finishes writing.
pub trait FileHandler {
    fn handle_file(&self, path: &Path, app_ctx: &ProgramContext) -> Result<(), EpkError>;
}

pub struct NoopHandler;

impl FileHandler for NoopHandler {
    fn handle_file(&self, _path: &Path, _app_ctx: &ProgramContext) -> Result<(), EpkError> {
        Ok(())
    }
}

pub mod epk;
pub mod epk2;
pub mod epk3;

pub fn get_registry() -> Vec<Format> {
    // order matters, the first match wins
    vec![
        crate::formats::epk2::format(),
        crate::formats::epk3::format(),
    ]
}

/// Picks the format of a file from its leading bytes. At most one format matches.
pub fn detect(probe: &[u8]) -> Option<Format> {
    get_registry().into_iter().find(|format| (format.detect_func)(probe))
}

/// Reads the probe window of `path` and picks its format.
pub fn sniff_file(path: &Path) -> Result<Option<Format>, EpkError> {
    let file = File::open(path)?;
    let probe = common::read_file(&file, 0, epk::PROBE_SIZE)?;
    Ok(detect(&probe))
}

/// Sniffs `path` and runs the matching extractor, returning the firmware output directory.
pub fn extract_file(path: &Path, app_ctx: &ProgramContext, handler: &dyn FileHandler) -> Result<PathBuf, EpkError> {
    let format = sniff_file(path)?
        .ok_or_else(|| EpkError::FormatUnrecognized(format!("{} is neither EPK2 nor EPK3", path.display())))?;
    info!("{} file detected!", format.name.to_uppercase());

    (format.run_func)(path, app_ctx, handler)
}
