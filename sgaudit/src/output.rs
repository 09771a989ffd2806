//! CSV report output
use crate::error::Result;
use log::{debug, info, warn};
use serde::Serialize;
use sgaudit_api::ResultRow;
use std::fs;
use std::path::{Path, PathBuf};

/// Create the parent directory of `path` if it doesn't exist
fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Write typed rows to a CSV file
///
/// The header comes from the row type's serialized field names, so the
/// column order is the struct's field order.
///
/// # Returns
///
/// `Ok(None)` without touching the filesystem when `rows` is empty,
/// otherwise the path that was written
///
/// # Errors
///
/// Returns error if the file cannot be created or a row fails to serialize
pub fn write_rows<R: Serialize>(path: &Path, rows: &[R]) -> Result<Option<PathBuf>> {
    if rows.is_empty() {
        info!("No data to save.");
        return Ok(None);
    }

    ensure_parent_dir(path)?;
    debug!("Writing {} row(s) to: {}", rows.len(), path.display());

    let mut writer = csv::Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    info!("Data successfully saved to {}", path.display());
    Ok(Some(path.to_path_buf()))
}

/// Write Logs Insights result rows to a CSV file
///
/// The header is the field names of the first row. Values are written by
/// position; short rows are padded with empty cells and extra fields are
/// dropped.
///
/// # Errors
///
/// Returns error if the file cannot be written
pub fn write_dynamic_rows(path: &Path, rows: &[ResultRow]) -> Result<Option<PathBuf>> {
    let Some(first) = rows.first() else {
        info!("No data to save.");
        return Ok(None);
    };

    ensure_parent_dir(path)?;

    let header: Vec<&str> = first.iter().map(|f| f.field.as_str()).collect();
    debug!("Dynamic CSV header: {:?}", header);

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&header)?;

    for (index, row) in rows.iter().enumerate() {
        if row.len() > header.len() {
            warn!(
                "Row {} has {} fields but the header has {}, extra fields dropped",
                index,
                row.len(),
                header.len()
            );
        }
        let record: Vec<&str> = (0..header.len())
            .map(|i| row.get(i).map_or("", |f| f.value.as_str()))
            .collect();
        writer.write_record(&record)?;
    }
    writer.flush()?;

    info!("Logs written to {}", path.display());
    Ok(Some(path.to_path_buf()))
}
