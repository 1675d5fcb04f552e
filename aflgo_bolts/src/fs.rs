//! Filesystem helpers for the preprocessing artifacts

use std::{
    fs::{self, File, OpenOptions},
    io::{self, BufWriter},
    path::Path,
};

use crate::Error;

/// Creates `path` as a directory, succeeding if it already is one.
pub fn create_dir_if_missing<P>(path: P) -> Result<(), Error>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(err) => Err(Error::illegal_state(format!(
            "Could not create directory {}: {err}",
            path.display()
        ))),
    }
}

/// Opens `path` for appending, creating it if needed.
///
/// Several compilation units of one program write into the same artifact
/// files, so they are never truncated.
pub fn open_append<P>(path: P) -> Result<BufWriter<File>, Error>
where
    P: AsRef<Path>,
{
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}
