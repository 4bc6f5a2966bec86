//! File system collaborator

use std::path::Path;

/// Bytes of a file plus whether reading it succeeded
#[derive(Debug, Clone, Default)]
pub struct FileContents {
    pub is_loaded: bool,
    pub path: String,
    pub data: Vec<u8>,
}

impl FileContents {
    /// Read `path`. A missing or unreadable file yields `is_loaded == false`.
    pub fn read<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let display = path.to_string_lossy().into_owned();
        match std::fs::read(path) {
            Ok(data) => Self {
                is_loaded: true,
                path: display,
                data,
            },
            Err(e) => {
                log::warn!("Could not read '{}': {}", display, e);
                Self::not_loaded(display)
            }
        }
    }

    /// In-memory contents, as if read from `path`
    pub fn from_bytes(path: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            is_loaded: true,
            path: path.into(),
            data,
        }
    }

    pub fn not_loaded(path: impl Into<String>) -> Self {
        Self {
            is_loaded: false,
            path: path.into(),
            data: Vec::new(),
        }
    }

    /// Lower-cased extension of `path`, without the dot
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_not_loaded() {
        let contents = FileContents::read("/definitely/not/here.png");
        assert!(!contents.is_loaded);
        assert!(contents.data.is_empty());
        assert_eq!(contents.extension().as_deref(), Some("png"));
    }

    #[test]
    fn extension_is_lower_cased() {
        assert_eq!(FileContents::not_loaded("a/B.DDS").extension().as_deref(), Some("dds"));
        assert_eq!(FileContents::not_loaded("noext").extension(), None);
    }
}
