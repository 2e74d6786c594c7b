//! File handling shared by the pipeline stages.
//!
//! Inputs (structure files, SVML count records) may arrive compressed; outputs that other
//! stages or users consume are written atomically so a failed run never leaves a truncated
//! artifact behind.

use anyhow::{Context, Result};
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

/// Opens a file with automatic compression detection.
///
/// gzip, bzip2, xz, zstd and plain files are all returned as a buffered reader.
///
/// # Examples
/// ```no_run
/// use catres::io::open_maybe_compressed;
/// use std::io::BufRead;
///
/// let reader = open_maybe_compressed("1abc.pdb.gz")?;
/// for line in reader.lines() {
///     let line = line?;
///     // Process line...
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn open_maybe_compressed<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    // niffler autodetects gzip/bzip2/xz/zstd/uncompressed
    let (reader, _format) = niffler::get_reader(Box::new(file))?;
    Ok(Box::new(BufReader::new(reader)))
}

/// Reads the whole (possibly compressed) file into a string.
pub fn read_to_string<P: AsRef<Path>>(path: P) -> Result<String> {
    let mut reader = open_maybe_compressed(path)?;
    let mut contents = String::new();
    reader.read_to_string(&mut contents)?;
    Ok(contents)
}

/// Writes `path` through a temporary file in the same directory, renaming it into place
/// only after `write` returned successfully.
pub fn write_atomically<P, F>(path: P, write: F) -> Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut dyn Write) -> Result<()>,
{
    let path = path.as_ref();
    let dir = parent_dir(path);
    let mut tmp = NamedTempFile::new_in(&dir)
        .with_context(|| format!("cannot create temporary file in {}", dir.display()))?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        write(&mut writer)?;
        writer.flush()?;
    }
    tmp.persist(path).with_context(|| format!("cannot move output into {}", path.display()))?;
    Ok(())
}

/// Lists files in `dir` carrying `extension`, sorted by file name.
pub fn list_files_with_extension<P: AsRef<Path>>(dir: P, extension: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("cannot list {}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_file() && path.extension().and_then(|ext| ext.to_str()) == Some(extension) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
