//! Output file naming

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

const FILE_TIME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// `dir/yyyyMMdd_HHmmss.ext` for the current local time
pub fn capture_file_path(dir: &Path, extension: &str) -> PathBuf {
    file_path_at(dir, extension, Local::now())
}

fn file_path_at(dir: &Path, extension: &str, time: DateTime<Local>) -> PathBuf {
    dir.join(format!("{}.{}", time.format(FILE_TIME_FORMAT), extension))
}
