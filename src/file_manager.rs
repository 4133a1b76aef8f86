// src/file_manager.rs - G-code file loading
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum FileManagerError {
    #[error("IO error reading '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Extensions offered by the file picker; anything else is still readable.
pub const GCODE_EXTENSIONS: [&str; 3] = ["gcode", "gc", "txt"];

#[derive(Debug, Clone)]
pub struct FileManager {
    current_directory: PathBuf,
}

impl FileManager {
    /// Create a new FileManager rooted at the process working directory.
    pub fn new() -> Self {
        Self {
            current_directory: PathBuf::from("."),
        }
    }

    /// Set the directory relative paths are resolved against.
    pub fn set_current_directory(&mut self, dir: impl Into<PathBuf>) {
        self.current_directory = dir.into();
    }

    pub fn get_current_directory(&self) -> &Path {
        &self.current_directory
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.current_directory.join(candidate)
        }
    }

    /// Read a G-code file as ordered raw lines.
    ///
    /// Invalid UTF-8 is replaced rather than rejected. Comment and blank-line
    /// filtering is left to the print controller.
    pub async fn read_gcode_lines(&self, path: &str) -> Result<Vec<String>, FileManagerError> {
        let full = self.resolve(path);
        tracing::info!("Reading G-code file: {}", full.display());
        let bytes = fs::read(&full).await.map_err(|source| FileManagerError::Io {
            path: full.display().to_string(),
            source,
        })?;
        let lines: Vec<String> = String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect();
        tracing::debug!("Read {} raw lines from {}", lines.len(), full.display());
        Ok(lines)
    }

    pub fn is_gcode_file(path: &str) -> bool {
        Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| GCODE_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext)))
    }

    /// File name without directories, used in log messages.
    pub fn display_name(path: &str) -> String {
        Path::new(path)
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string())
    }
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new()
    }
}

// Tests live in tests/file_manager.rs
