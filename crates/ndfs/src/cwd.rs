//! Per-handle working directory.
//!
//! The stored value is always an absolute, slash-terminated URI. Readers
//! clone what they need under the read lock; `set` swaps a fully resolved
//! value in under the write lock and drops the old one after the swap.

use std::sync::{PoisonError, RwLock};

use crate::{
    uri::{Uri, UriFlags},
    utils::Result,
};

#[derive(Debug)]
pub struct WorkingDir {
    uri: RwLock<Uri>,
}

impl WorkingDir {
    pub fn new(uri: Uri) -> WorkingDir {
        WorkingDir {
            uri: RwLock::new(uri),
        }
    }

    /// Full working directory URI as text.
    pub fn get(&self) -> String {
        self.uri
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .to_string()
    }

    /// Copy the working directory URI into `buf`, NUL terminated.
    ///
    /// Fails with `ENAMETOOLONG` naming the required size when `buf` is too
    /// small; `buf` is left untouched in that case.
    pub fn get_into(&self, buf: &mut [u8]) -> Result<usize> {
        let guard = self.uri.read().unwrap_or_else(PoisonError::into_inner);
        let text = guard.as_str().as_bytes();
        let needed = text.len() + 1;
        if buf.len() < needed {
            return Err(ndfs_err!(
                ENAMETOOLONG,
                "get_working_directory: the buffer supplied was only {} bytes, \
                 but we need {} bytes to hold the working directory",
                buf.len(),
                needed
            ));
        }
        buf[..text.len()].copy_from_slice(text);
        buf[text.len()] = 0;
        Ok(text.len())
    }

    /// Resolve `path` against the current value and make it the new one.
    pub fn set(&self, path: &str) -> Result<()> {
        let mut guard = self.uri.write().unwrap_or_else(PoisonError::into_inner);
        let uri = Uri::parse(path, Some(&*guard), UriFlags::APPEND_SLASH)
            .map_err(|e| e.prepend("set_working_directory"))?;
        let old = std::mem::replace(&mut *guard, uri);
        drop(guard);
        drop(old);
        Ok(())
    }

    /// Absolute path of `path` relative to the working directory.
    ///
    /// An input without a path component (such as `hdfs://nn`) names the
    /// working directory itself.
    pub fn resolve(&self, path: &str) -> Result<String> {
        let guard = self.uri.read().unwrap_or_else(PoisonError::into_inner);
        let uri = Uri::parse(path, Some(&*guard), UriFlags::empty())?;
        if uri.path().is_empty() {
            return Ok(guard.path().to_owned());
        }
        Ok(uri.path().to_owned())
    }
}
