//! Reference-file locator resolution.
//!
//! Calibration headers name their reference files with locator strings in
//! the `var$name.fits` form, where `var` is an environment variable holding
//! the reference directory. A plain path without `$` is used as-is.

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{CteError, Result};

/// Turns a locator string from an image header into a filesystem path.
///
/// The trait seam lets tests and embedding pipelines swap in their own
/// directory layout without touching the process environment.
pub trait RefPathResolver {
    /// Resolve a locator to a path without checking the filesystem.
    fn resolve(&self, locator: &str) -> PathBuf;

    /// Resolve a locator and require the file to exist.
    fn resolve_existing(&self, locator: &str) -> Result<PathBuf> {
        let path = self.resolve(locator);
        if path.is_file() {
            Ok(path)
        } else {
            Err(CteError::RefFileNotFound { path })
        }
    }
}

/// Resolver backed by the process environment.
///
/// `jref$tab.fits` becomes `$jref/tab.fits`. When the variable is unset the
/// bare file name is tried, which covers the common case of running in the
/// reference directory itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvPathResolver;

impl RefPathResolver for EnvPathResolver {
    fn resolve(&self, locator: &str) -> PathBuf {
        match locator.split_once('$') {
            Some((var, name)) => match env::var(var) {
                Ok(dir) => Path::new(&dir).join(name),
                Err(_) => {
                    log::warn!(
                        "environment variable {var} from locator {locator} is not set, \
                         trying {name} in the working directory"
                    );
                    PathBuf::from(name)
                }
            },
            None => PathBuf::from(locator),
        }
    }
}
