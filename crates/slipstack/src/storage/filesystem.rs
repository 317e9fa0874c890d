use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// URL prefix under which files in the uploads directory are served.
pub const PUBLIC_PREFIX: &str = "/files/";

/// File name of the annotated overlay for an upload.
pub fn marked_image_name(upload_id: i64) -> String {
    format!("marked-{}.jpg", upload_id)
}

/// File name of the cropped image for one region of an upload.
pub fn receipt_image_name(upload_id: i64, index: usize) -> String {
    format!("receipt-{}-{}.jpg", upload_id, index)
}

/// A file written to the uploads directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub public_url: String,
}

/// Flat file store rooted at the uploads directory. Names are chosen by the
/// caller, so writing the same name twice replaces the earlier file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    uploads_directory: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(uploads_directory: P) -> Self {
        Self {
            uploads_directory: uploads_directory.as_ref().to_path_buf(),
        }
    }

    pub fn uploads_directory(&self) -> &Path {
        &self.uploads_directory
    }

    /// Writes `content` as `name`, replacing any existing file.
    ///
    /// The bytes go to a hidden temporary file first and are renamed into
    /// place, so readers never observe a half-written image.
    pub fn save(&self, name: &str, content: &[u8]) -> Result<StoredFile, StorageError> {
        validate_name(name)?;
        self.ensure_directory(&self.uploads_directory)?;

        let path = self.uploads_directory.join(name);
        let tmp = self.uploads_directory.join(format!(".{}.tmp", name));

        std::fs::write(&tmp, content).map_err(|e| StorageError::WriteFile {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp);
            StorageError::WriteFile {
                path: path.clone(),
                source: e,
            }
        })?;

        Ok(StoredFile {
            public_url: public_url(name),
            path,
        })
    }

    /// Brings a source sheet under the uploads directory. A file already
    /// stored there is used as is; anything else is copied in under a fresh
    /// name.
    pub fn import(&self, source: &Path) -> Result<StoredFile, StorageError> {
        if let (Some(parent), Some(name)) = (source.parent(), source.file_name()) {
            if parent == self.uploads_directory {
                if let Some(name) = name.to_str() {
                    return Ok(StoredFile {
                        path: source.to_path_buf(),
                        public_url: public_url(name),
                    });
                }
            }
        }

        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("jpg")
            .to_lowercase();
        let name = format!("upload-{}.{}", uuid::Uuid::new_v4().simple(), extension);
        let content = std::fs::read(source).map_err(|e| StorageError::ReadFile {
            path: source.to_path_buf(),
            source: e,
        })?;
        self.save(&name, &content)
    }

    /// Resolves a job's image path: absolute paths and paths starting with
    /// `uploads/` are used as given, bare names are looked up in the uploads
    /// directory.
    pub fn resolve_image_path(&self, image_path: &str) -> PathBuf {
        let path = Path::new(image_path);
        if path.is_absolute() || path.starts_with("uploads") {
            path.to_path_buf()
        } else {
            self.uploads_directory.join(path)
        }
    }

    /// Maps a stored `/files/…` URL back to the job image path that
    /// [`resolve_image_path`](Self::resolve_image_path) understands. Other
    /// values are already image paths.
    pub fn image_path_for_url(&self, url: &str) -> String {
        url.strip_prefix(PUBLIC_PREFIX).unwrap_or(url).to_string()
    }

    fn ensure_directory(&self, path: &Path) -> Result<(), StorageError> {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }
}

pub fn public_url(name: &str) -> String {
    format!("{}{}", PUBLIC_PREFIX, name)
}

fn validate_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\'])
        || name.contains("..")
    {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}
