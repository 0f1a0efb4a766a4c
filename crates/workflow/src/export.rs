//! ZIP download of a pose collection.

use std::io::{Cursor, Write};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use lookbook_core::collection::Collection;
use lookbook_core::naming::{export_filename, image_extension};
use lookbook_store::BlobStore;

use crate::error::WorkflowResult;

/// Bundle every item of `collection` into one archive.
///
/// Entries follow collection order and are named
/// `<pose>-<item>-variation-<n>.<ext>`. Images are stored uncompressed.
pub async fn export_collection(
    blobs: &dyn BlobStore,
    pose_name: &str,
    collection: &Collection,
) -> WorkflowResult<Vec<u8>> {
    let mut entries = Vec::with_capacity(collection.len());
    for (index, item) in collection.iter().enumerate() {
        let bytes = blobs.get(&item.image_ref).await?;
        let name = export_filename(pose_name, &item.id, index, image_extension(&bytes));
        entries.push((name, bytes));
    }

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        zip.start_file(name, options)?;
        zip.write_all(&bytes).map_err(zip::result::ZipError::Io)?;
    }
    let archive = zip.finish()?.into_inner();

    tracing::debug!(
        pose_name,
        items = collection.len(),
        bytes = archive.len(),
        "Collection archive built",
    );
    Ok(archive)
}
