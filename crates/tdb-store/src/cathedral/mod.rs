pub mod export;
pub mod format;
pub mod import;

pub use export::{export, ArchiveFormat, ExportOptions};
pub use format::CathedralManifest;
pub use import::{import, read_manifest, verify_integrity};
