//! Paper text loading.
//!
//! Only plain text and markdown are read. PDF extraction is left to
//! dedicated tools (`pdftotext paper.pdf paper.txt`).

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Extensions that are known to be binary documents.
const UNSUPPORTED_EXTENSIONS: [&str; 3] = ["pdf", "doc", "docx"];

#[derive(Debug, Error)]
pub enum PaperError {
    #[error("{}: .{extension} input is not supported; convert it to plain text first (e.g. `pdftotext`)", path.display())]
    Unsupported { path: PathBuf, extension: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid UTF-8 text", path.display())]
    NotUtf8 { path: PathBuf },

    #[error("{} contains no text", path.display())]
    Empty { path: PathBuf },
}

/// A loaded paper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paper {
    pub path: PathBuf,
    /// File name without extension; names the output directory.
    pub stem: String,
    pub text: String,
}

/// Read the paper at `path`.
pub fn load_paper(path: &Path) -> Result<Paper, PaperError> {
    if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
        let lowered = extension.to_ascii_lowercase();
        if UNSUPPORTED_EXTENSIONS.contains(&lowered.as_str()) {
            return Err(PaperError::Unsupported {
                path: path.to_path_buf(),
                extension: lowered,
            });
        }
    }

    let bytes = std::fs::read(path).map_err(|source| PaperError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8(bytes).map_err(|_| PaperError::NotUtf8 {
        path: path.to_path_buf(),
    })?;
    if text.trim().is_empty() {
        return Err(PaperError::Empty {
            path: path.to_path_buf(),
        });
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("paper")
        .to_string();

    Ok(Paper {
        path: path.to_path_buf(),
        stem,
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loads_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smith2024.md");
        std::fs::write(&path, "# Title\n\nBody").unwrap();

        let paper = load_paper(&path).unwrap();
        assert_eq!(paper.stem, "smith2024");
        assert_eq!(paper.text, "# Title\n\nBody");
    }

    #[test]
    fn test_rejects_pdf_before_reading() {
        let err = load_paper(Path::new("/nonexistent/paper.PDF")).unwrap_err();
        assert!(matches!(err, PaperError::Unsupported { ref extension, .. } if extension == "pdf"));
        assert!(err.to_string().contains("pdftotext"));
    }

    #[test]
    fn test_rejects_empty_and_binary() {
        let dir = tempfile::tempdir().unwrap();

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "  \n").unwrap();
        assert!(matches!(load_paper(&empty), Err(PaperError::Empty { .. })));

        let binary = dir.path().join("blob.txt");
        std::fs::write(&binary, [0xff, 0xfe, 0x00]).unwrap();
        assert!(matches!(load_paper(&binary), Err(PaperError::NotUtf8 { .. })));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_paper(Path::new("/nonexistent/paper.txt")).unwrap_err();
        assert!(matches!(err, PaperError::Io { .. }));
    }
}
