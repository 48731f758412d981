use crate::storefile::codec;
use crate::storefile::{
    ListFilesError, OpenFileError, OpenOutcome, SequenceId, StoreFileMeta, StoreFileReader, StoreFileSystem,
    StoreLocation,
};
use bytes::Bytes;
use std::fs;
use std::fs::File;
use std::io;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

const STORE_FILE_EXTENSION: &str = "sf";
const TMP_PREFIX: &str = ".tmp-";

/// LocalStoreFiles keeps store files on the local filesystem:
///
/// ```text
/// {root}/{table}/{region_id}/{family}/{sequence_id:020}.sf
/// ```
///
/// New files are written under a temporary name in the same directory and renamed into place.
pub struct LocalStoreFiles {
    root: PathBuf,
}

impl LocalStoreFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalStoreFiles { root: root.into() }
    }

    pub fn directory(&self, location: &StoreLocation) -> PathBuf {
        self.root
            .join(&location.table)
            .join(location.region_id.as_u64().to_string())
            .join(&location.family)
    }

    fn file_name(sequence_id: SequenceId) -> String {
        format!("{:020}.{}", sequence_id.as_u64(), STORE_FILE_EXTENSION)
    }

    fn parse_file_name(path: &Path) -> Option<SequenceId> {
        if path.extension()? != STORE_FILE_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        if stem.starts_with('.') {
            return None;
        }
        stem.parse::<u64>().ok().map(SequenceId::new)
    }
}

impl StoreFileSystem for LocalStoreFiles {
    fn create_location(&self, location: &StoreLocation) -> io::Result<()> {
        fs::create_dir_all(self.directory(location))
    }

    fn list(&self, location: &StoreLocation) -> Result<Vec<StoreFileMeta>, ListFilesError> {
        let path = self.directory(location);
        let read_dir = match fs::read_dir(&path) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ListFilesError::MissingDirectory { path }),
            Err(source) => return Err(ListFilesError::Unreadable { path, source }),
        };

        let mut files = Vec::new();
        for entry in read_dir {
            // A failure half-way through the directory is reported as a failed listing. Returning
            // the partial list would make the caller retire files that still exist.
            let entry = entry.map_err(|source| ListFilesError::Unreadable {
                path: path.clone(),
                source,
            })?;
            let file_path = entry.path();
            if let Some(sequence_id) = Self::parse_file_name(&file_path) {
                files.push(StoreFileMeta::new(file_path, sequence_id));
            }
        }
        files.sort_by_key(|meta| meta.sequence_id());

        Ok(files)
    }

    fn open(&self, logger: &slog::Logger, meta: &StoreFileMeta) -> Result<OpenOutcome, OpenFileError> {
        match StoreFileReader::open(logger.clone(), meta.clone()) {
            Ok(reader) => Ok(OpenOutcome::Opened(reader)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(OpenOutcome::Vanished),
            Err(source) => Err(OpenFileError::Io {
                path: meta.path().to_path_buf(),
                source,
            }),
        }
    }

    fn write(
        &self,
        location: &StoreLocation,
        sequence_id: SequenceId,
        entries: &[(Bytes, Bytes)],
    ) -> io::Result<StoreFileMeta> {
        let directory = self.directory(location);
        fs::create_dir_all(&directory)?;

        let file_name = Self::file_name(sequence_id);
        let final_path = directory.join(&file_name);
        let tmp_path = directory.join(format!("{}{}", TMP_PREFIX, file_name));

        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        codec::write_store_file(&mut writer, sequence_id.as_u64(), entries)?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &final_path)?;

        Ok(StoreFileMeta::new(final_path, sequence_id))
    }

    fn remove(&self, meta: &StoreFileMeta) -> io::Result<()> {
        match fs::remove_file(meta.path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
