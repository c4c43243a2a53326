//! On-disk format for native indexes.
//!
//! A file is a fixed [`BlobHeader`] followed by the engine state, both
//! bincode-encoded with fixed-width integers. Files are written to a sibling
//! temp file and renamed into place, so a failed write never leaves a
//! truncated index at `path`. A decoded engine must pass its own
//! consistency checks before it is handed out.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use bincode::Options;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::descriptor::MethodType;
use crate::error::{HandleError, Result};
use crate::handle::NativeKind;
use crate::native::{BinaryIvfIndex, IvfPqIndex, NativeIndex, QuantizedGraphIndex};

/// File magic.
pub const MAGIC: [u8; 4] = *b"IHMX";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Leading record of every index file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobHeader {
    pub magic: [u8; 4],
    pub version: u32,
    /// Raw method tag of the stored engine.
    pub method: i32,
    pub dimension: u64,
    pub ntotal: u64,
}

impl BlobHeader {
    pub fn for_index(native: &NativeKind) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            method: native.method().as_raw(),
            dimension: native.dimension() as u64,
            ntotal: native.ntotal() as u64,
        }
    }
}

fn io_failure(path: &Path, err: impl ToString) -> HandleError {
    HandleError::IoFailure {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}

fn format_mismatch(path: &Path, message: impl Into<String>) -> HandleError {
    HandleError::FormatMismatch {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn encoding() -> impl Options {
    bincode::DefaultOptions::new().with_fixint_encoding()
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write `native` to `path`, replacing any existing file.
pub fn write_index(path: &Path, native: &NativeKind) -> Result<()> {
    let header = BlobHeader::for_index(native);
    let tmp = temp_path(path);

    let written = write_blob(&tmp, &header, native);
    if let Err(err) = written {
        let _ = fs::remove_file(&tmp);
        return Err(io_failure(path, err));
    }
    fs::rename(&tmp, path).map_err(|e| io_failure(path, e))?;

    tracing::debug!(path = %path.display(), method = %native.method(), ntotal = header.ntotal, "wrote index");
    Ok(())
}

fn write_blob(path: &Path, header: &BlobHeader, native: &NativeKind) -> bincode::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    encoding().serialize_into(&mut writer, header)?;
    match native {
        NativeKind::QuantizedIvf(index) => encoding().serialize_into(&mut writer, index.as_ref())?,
        NativeKind::BinaryIvf(index) => encoding().serialize_into(&mut writer, index.as_ref())?,
        NativeKind::QuantizedGraph(index) => encoding().serialize_into(&mut writer, index.as_ref())?,
    }
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
}

/// Read the index stored at `path`, which must hold a `method` engine.
pub fn read_index(path: &Path, method: MethodType) -> Result<NativeKind> {
    let file = File::open(path).map_err(|e| io_failure(path, e))?;
    // Bounds allocations made from corrupt length prefixes.
    let limit = file.metadata().map_err(|e| io_failure(path, e))?.len();
    let mut reader = BufReader::new(file);

    let header: BlobHeader = encoding()
        .with_limit(limit)
        .deserialize_from(&mut reader)
        .map_err(|e| format_mismatch(path, format!("unreadable header: {e}")))?;
    check_header(path, &header, method)?;

    let native = match method {
        MethodType::QuantizedIvf => NativeKind::QuantizedIvf(read_engine::<IvfPqIndex>(path, &mut reader, limit)?),
        MethodType::BinaryIvf => NativeKind::BinaryIvf(read_engine::<BinaryIvfIndex>(path, &mut reader, limit)?),
        MethodType::QuantizedGraph => {
            NativeKind::QuantizedGraph(read_engine::<QuantizedGraphIndex>(path, &mut reader, limit)?)
        }
    };

    if native.dimension() as u64 != header.dimension || native.ntotal() as u64 != header.ntotal {
        return Err(format_mismatch(path, "engine state disagrees with header"));
    }

    tracing::debug!(path = %path.display(), %method, ntotal = header.ntotal, "read index");
    Ok(native)
}

fn check_header(path: &Path, header: &BlobHeader, method: MethodType) -> Result<()> {
    if header.magic != MAGIC {
        return Err(format_mismatch(path, "not an index file"));
    }
    if header.version != FORMAT_VERSION {
        return Err(format_mismatch(
            path,
            format!("unsupported format version {}", header.version),
        ));
    }
    if header.method != method.as_raw() {
        let stored = MethodType::from_raw(header.method)
            .map(|m| m.to_string())
            .unwrap_or_else(|| format!("unknown method {}", header.method));
        return Err(format_mismatch(
            path,
            format!("file holds a {stored} index, requested {method}"),
        ));
    }
    Ok(())
}

fn read_engine<T>(path: &Path, reader: &mut BufReader<File>, limit: u64) -> Result<Box<T>>
where
    T: DeserializeOwned + NativeIndex,
{
    let engine: T = encoding()
        .with_limit(limit)
        .deserialize_from(reader)
        .map_err(|e| format_mismatch(path, format!("corrupt index body: {e}")))?;
    engine.validate().map_err(|e| format_mismatch(path, e.to_string()))?;
    Ok(Box::new(engine))
}
