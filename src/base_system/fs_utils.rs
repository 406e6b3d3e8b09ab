//! 文件系统小工具。

use std::fs;
use std::io;
use std::path::Path;

/// `Ok(true)` for an existing regular file, `Ok(false)` when nothing is there,
/// an error when the path exists but is not a regular file.
pub fn file_exists(path: impl AsRef<Path>) -> io::Result<bool> {
    let path = path.as_ref();
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(true),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} exists but is not a regular file", path.display()),
        )),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// `Ok(true)` for a directory with no entries, `Ok(false)` for one with entries
/// or when nothing is there. A regular file is an error.
pub fn is_empty_dir(path: impl AsRef<Path>) -> io::Result<bool> {
    let path = path.as_ref();
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(fs::read_dir(path)?.next().is_none()),
        Ok(_) => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} exists but is not a directory", path.display()),
        )),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Copies `src` to `dst`, creating the parent directories of `dst`.
/// Returns the number of bytes copied.
pub fn copy_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> io::Result<u64> {
    let (src, dst) = (src.as_ref(), dst.as_ref());
    if !file_exists(src)? {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} not found", src.display()),
        ));
    }
    if let Some(parent) = dst.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst)
}
