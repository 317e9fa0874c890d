pub mod filesystem;

pub use filesystem::{marked_image_name, receipt_image_name, FileStorage, StoredFile};
