//! Store files are the immutable, sequence-ordered units the primary persists on flush and
//! rewrites on compaction. This module is the collaborator boundary: everything that touches the
//! directory layout or the on-disk encoding lives here, nothing above it knows about paths beyond
//! using them as identities.

mod codec;
mod file_system;
mod local;
mod reader;

pub use file_system::ListFilesError;
pub use file_system::OpenFileError;
pub use file_system::OpenOutcome;
pub use file_system::StoreFileMeta;
pub use file_system::StoreFileSystem;
pub use file_system::StoreLocation;
pub use local::LocalStoreFiles;
pub use reader::SequenceId;
pub use reader::StoreFileReader;
