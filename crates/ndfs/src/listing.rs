//! Paginated directory listing.
//!
//! The authority answers a listing in pages, each with a count of entries
//! still to come. That count may change between pages since the directory
//! is not snapshotted; it only says whether to ask again. Pages are fetched
//! strictly one after the other, each starting after the raw name of the
//! last entry of the previous page.

use log::debug;

use crate::{
    error::{Error, errno::*},
    info::FileInfo,
    meta::{Handle, unexpected},
    proto::*,
    utils::Result,
};

impl Handle {
    /// List every entry of the directory at `uri`, in server order.
    ///
    /// On failure nothing accumulated so far is returned.
    pub fn list_directory(&self, uri: &str) -> Result<Vec<FileInfo>> {
        let path = self.build_path("list_directory", uri)?;
        let prefix = if path.ends_with('/') {
            format!("{}{}", self.url_prefix, path)
        } else {
            format!("{}{}/", self.url_prefix, path)
        };

        let mut entries: Vec<FileInfo> = Vec::new();
        let mut cursor = Data::default();
        loop {
            let page = self.list_partial(&path, &cursor)?;
            let remaining = page.remaining_entries;
            debug!(
                "list_directory({}): {} entries, {} remaining",
                path,
                page.partial_listing.len(),
                remaining
            );

            let last = match page.partial_listing.last() {
                Some(status) => status.path.clone(),
                None if remaining > 0 => {
                    return Err(ndfs_err!(
                        EIO,
                        "list_directory({}): empty page with {} entries remaining",
                        path,
                        remaining
                    ));
                }
                None => break,
            };

            let batch: Vec<FileInfo> = page
                .partial_listing
                .iter()
                .map(|status| FileInfo::from_status(status, &prefix))
                .collect();
            entries.try_reserve(batch.len()).map_err(|e| {
                Error::with_cause(
                    ENOMEM,
                    format!(
                        "list_directory({}): failed to allocate space for {} new entries",
                        path,
                        batch.len()
                    ),
                    e,
                )
            })?;
            entries.extend(batch);

            if remaining == 0 {
                break;
            }
            cursor = last;
        }

        Ok(entries)
    }

    /// Fetch one page of `path` starting after `start_after`.
    fn list_partial(&self, path: &str, start_after: &Data) -> Result<DirectoryListing> {
        let ctx = format!(
            "list_directory(path={}, prev={})",
            path,
            String::from_utf8_lossy(start_after.as_bytes())
        );
        let req = Call::TGetListing {
            src: path.to_owned(),
            start_after: start_after.clone(),
            need_location: false,
        };
        match self.call(&ctx, req)? {
            Call::RGetListing {
                dir_list: Some(listing),
            } => Ok(listing),
            Call::RGetListing { dir_list: None } => {
                Err(ndfs_err!(ENOENT, "{}: no such directory", ctx))
            }
            other => unexpected(ctx, &other),
        }
    }
}
