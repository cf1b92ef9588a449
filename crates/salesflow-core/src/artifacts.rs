//! Reading and writing the tabular artifacts passed between stages.

use std::fs::{self, File};
use std::path::Path;

use polars::prelude::*;
use tracing::debug;

use crate::error::{PipelineError, Result};

/// Write `df` as CSV with a header row, replacing anything already at `path`.
pub fn write_table(path: &Path, df: &mut DataFrame) -> Result<()> {
    ensure_parent_dir(path)?;

    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(df)?;

    debug!(path = %path.display(), rows = df.height(), "artifact written");
    Ok(())
}

/// Read a CSV artifact, forcing the given column types. A missing column is
/// reported by name instead of as a generic parse failure.
pub fn read_table(path: &Path, schema: Schema) -> Result<DataFrame> {
    if !path.exists() {
        return Err(PipelineError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("artifact {} does not exist", path.display()),
        )));
    }

    // Everything comes in as text so values like "007" survive until cast.
    let raw = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;

    let present = raw.get_column_names();
    for name in schema.iter_names() {
        if !present.iter().any(|column| column.as_str() == name.as_str()) {
            return Err(PipelineError::MissingColumn {
                artifact: path.display().to_string(),
                column: name.to_string(),
            });
        }
    }

    let columns: Vec<Expr> = schema
        .iter()
        .map(|(name, dtype)| col(name.clone()).strict_cast(dtype.clone()))
        .collect();
    Ok(raw.lazy().select(columns).collect()?)
}

pub(crate) fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// blake3 digest of a file's bytes, hex encoded.
pub fn fingerprint(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}
