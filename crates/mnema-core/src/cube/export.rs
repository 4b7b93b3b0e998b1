//! Cube Export
//!
//! A cube exports as a ZIP holding `db/<cube_id>.db` plus caller-supplied
//! metadata files at the archive root. The WAL is checkpointed first so the
//! archived main file is the complete cube.

use std::io::{Read, Seek, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{EngineError, Result};
use crate::storage::GraphStorage;

use super::CubeHandle;

/// Write the cube archive into `writer`.
pub fn export_cube<W: Write + Seek>(
    handle: &CubeHandle,
    metadata: &[(String, Vec<u8>)],
    writer: W,
) -> Result<()> {
    handle.storage().checkpoint()?;

    let mut db_file = std::fs::File::open(handle.path())?;
    let mut db_bytes = Vec::new();
    db_file.read_to_end(&mut db_bytes)?;

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut archive = ZipWriter::new(writer);

    archive
        .start_file(format!("db/{}.db", handle.cube_id()), options.clone())
        .map_err(zip_err)?;
    archive.write_all(&db_bytes)?;

    for (name, bytes) in metadata {
        if name.contains('/') || name.contains('\\') {
            return Err(EngineError::InvalidConfig(format!(
                "metadata file name {name:?} must stay at the archive root"
            )));
        }
        archive.start_file(name, options.clone()).map_err(zip_err)?;
        archive.write_all(bytes)?;
    }

    archive.finish().map_err(zip_err)?;
    Ok(())
}

/// Write the cube archive to a file at `path`.
pub fn export_cube_to_path(
    handle: &CubeHandle,
    metadata: &[(String, Vec<u8>)],
    path: impl AsRef<Path>,
) -> Result<()> {
    let file = std::fs::File::create(path)?;
    export_cube(handle, metadata, file)
}

fn zip_err(e: zip::result::ZipError) -> EngineError {
    EngineError::Internal(format!("zip error: {e}"))
}
