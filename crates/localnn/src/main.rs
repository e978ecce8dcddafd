use {
    async_trait::async_trait,
    clap::Parser,
    filetime::FileTime,
    futures::TryStreamExt,
    log::info,
    ndfs::{
        srv::{Namesystem, srv_async},
        *,
    },
    std::{
        io,
        os::unix::{ffi::OsStrExt, fs::PermissionsExt},
        path::PathBuf,
    },
    tokio::fs,
    tokio_stream::wrappers::ReadDirStream,
};

mod utils;
use crate::utils::*;

#[derive(Clone)]
struct LocalNn {
    realroot: PathBuf,
    listing_limit: usize,
    block_size: u64,
}

impl LocalNn {
    async fn lookup(&self, src: &str) -> Result<Option<std::fs::Metadata>> {
        let path = real_path(&self.realroot, src)?;
        match fs::symlink_metadata(&path).await {
            Ok(attr) => Ok(Some(attr)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Namesystem for LocalNn {
    async fn rconnect(&self, protocol: &str, user: &str) -> Result<Call> {
        if protocol != CLIENT_PROTOCOL {
            return Err(ndfs_err!(EPROTONOSUPPORT, "unknown protocol {}", protocol));
        }
        info!("session for {}", user);
        Ok(Call::RConnect)
    }

    async fn rget_server_defaults(&self) -> Result<Call> {
        Ok(Call::RGetServerDefaults {
            defaults: ServerDefaults {
                block_size: self.block_size,
                bytes_per_checksum: 512,
                write_packet_size: 64 * 1024,
                replication: 1,
                file_buffer_size: 4096,
            },
        })
    }

    async fn rget_file_info(&self, src: &str) -> Result<Call> {
        let fs = self
            .lookup(src)
            .await?
            .map(|attr| status_from_attr(&attr, b"", self.block_size));

        Ok(Call::RGetFileInfo { fs })
    }

    async fn rget_listing(&self, src: &str, start_after: &Data, _need_location: bool) -> Result<Call> {
        let dir = real_path(&self.realroot, src)?;
        match self.lookup(src).await? {
            None => return Ok(Call::RGetListing { dir_list: None }),
            Some(attr) if !attr.is_dir() => {
                return Err(ndfs_err!(ENOTDIR, "{}: not a directory", src));
            }
            Some(_) => {}
        }

        let mut names: Vec<Vec<u8>> = ReadDirStream::new(fs::read_dir(&dir).await?)
            .map_ok(|entry| entry.file_name().as_bytes().to_vec())
            .try_collect()
            .await?;
        names.sort();
        names.retain(|name| name.as_slice() > start_after.as_bytes());

        let take = names.len().min(self.listing_limit);
        let mut partial_listing = Vec::with_capacity(take);
        for name in &names[..take] {
            let path = dir.join(std::ffi::OsStr::from_bytes(name));
            let attr = fs::symlink_metadata(&path).await?;
            partial_listing.push(status_from_attr(&attr, name, self.block_size));
        }

        Ok(Call::RGetListing {
            dir_list: Some(DirectoryListing {
                partial_listing,
                remaining_entries: u32::try_from(names.len() - take).unwrap_or(u32::MAX),
            }),
        })
    }

    async fn rmkdirs(&self, src: &str, masked: u32, create_parent: bool) -> Result<Call> {
        let target = real_path(&self.realroot, src)?;
        let mut path = self.realroot.clone();

        for component in target.strip_prefix(&self.realroot).unwrap_or(target.as_path()).iter() {
            path.push(component);
            match fs::symlink_metadata(&path).await {
                Ok(attr) if attr.is_dir() => continue,
                Ok(_) => return Ok(Call::RMkdirs { result: false }),
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
                Err(_) => {}
            }
            if !create_parent && path != target {
                return Err(ndfs_err!(ENOENT, "{}: parent does not exist", src));
            }
            fs::create_dir(&path).await?;
            fs::set_permissions(&path, PermissionsExt::from_mode(masked)).await?;
        }

        Ok(Call::RMkdirs { result: true })
    }

    async fn rdelete(&self, src: &str, recursive: bool) -> Result<Call> {
        let path = real_path(&self.realroot, src)?;
        if path == self.realroot {
            return Err(ndfs_err!(EPERM, "refusing to delete the root"));
        }

        match self.lookup(src).await? {
            None => return Ok(Call::RDelete { result: false }),
            Some(ref attr) if attr.is_dir() && recursive => fs::remove_dir_all(&path).await?,
            Some(ref attr) if attr.is_dir() => fs::remove_dir(&path).await?,
            Some(_) => fs::remove_file(&path).await?,
        };

        Ok(Call::RDelete { result: true })
    }

    async fn rrename2(&self, src: &str, dst: &str, overwrite_dest: bool) -> Result<Call> {
        let oldpath = real_path(&self.realroot, src)?;
        let newpath = real_path(&self.realroot, dst)?;

        if !overwrite_dest && self.lookup(dst).await?.is_some() {
            return Err(ndfs_err!(EEXIST, "rename destination {} already exists", dst));
        }
        fs::rename(&oldpath, &newpath).await?;

        Ok(Call::RRename2)
    }

    async fn rset_replication(&self, src: &str, _replication: u16) -> Result<Call> {
        let result = match self.lookup(src).await? {
            Some(attr) => attr.is_file(),
            None => false,
        };

        Ok(Call::RSetReplication { result })
    }

    async fn rset_permission(&self, src: &str, permission: u32) -> Result<Call> {
        let path = real_path(&self.realroot, src)?;
        fs::set_permissions(&path, PermissionsExt::from_mode(permission & 0o7777)).await?;

        Ok(Call::RSetPermission)
    }

    async fn rset_owner(
        &self,
        src: &str,
        username: Option<&str>,
        groupname: Option<&str>,
    ) -> Result<Call> {
        let path = real_path(&self.realroot, src)?;

        let uid = match username {
            Some(name) => Some(
                nix::unistd::User::from_name(name)?
                    .ok_or_else(|| ndfs_err!(EINVAL, "unknown user {}", name))?
                    .uid,
            ),
            None => None,
        };
        let gid = match groupname {
            Some(name) => Some(
                nix::unistd::Group::from_name(name)?
                    .ok_or_else(|| ndfs_err!(EINVAL, "unknown group {}", name))?
                    .gid,
            ),
            None => None,
        };
        nix::unistd::chown(&path, uid, gid)?;

        Ok(Call::RSetOwner)
    }

    async fn rset_times(&self, src: &str, mtime: Option<u64>, atime: Option<u64>) -> Result<Call> {
        let path = real_path(&self.realroot, src)?;
        let attr = fs::symlink_metadata(&path).await?;

        let mtime = match mtime {
            Some(ms) => FileTime::from_system_time(system_time(ms)),
            None => FileTime::from_last_modification_time(&attr),
        };
        let atime = match atime {
            Some(ms) => FileTime::from_system_time(system_time(ms)),
            None => FileTime::from_last_access_time(&attr),
        };
        filetime::set_symlink_file_times(&path, atime, mtime)?;

        Ok(Call::RSetTimes)
    }

    async fn rget_preferred_block_size(&self, src: &str) -> Result<Call> {
        if self.lookup(src).await?.is_none() {
            return Err(ndfs_err!(ENOENT, "{}: no such file or directory", src));
        }

        Ok(Call::RGetPreferredBlockSize {
            bsize: self.block_size,
        })
    }

    async fn rget_fs_stats(&self) -> Result<Call> {
        let path = self.realroot.clone();

        let vfs = tokio::task::spawn_blocking(move || nix::sys::statvfs::statvfs(&path))
            .await
            .map_err(|e| Error::internal("statvfs task failed", e))??;

        let frsize = vfs.fragment_size() as u64;
        let blocks = vfs.blocks() as u64;
        let free = vfs.blocks_free() as u64;
        let available = vfs.blocks_available() as u64;

        Ok(Call::RGetFsStats {
            stats: FsStats {
                capacity: blocks * frsize,
                used: blocks.saturating_sub(free) * frsize,
                remaining: available * frsize,
                ..Default::default()
            },
        })
    }
}

#[derive(Debug, clap::Parser)]
struct Cli {
    /// proto!address!port
    /// where: proto = tcp | unix
    address: String,

    /// Directory to export
    exportdir: PathBuf,

    /// Entries per listing page
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u32).range(1..))]
    listing_limit: u32,

    /// Default block size reported to clients, in bytes
    #[arg(long, default_value_t = 128 * 1024 * 1024)]
    block_size: u64,
}

async fn localnn_main(
    Cli {
        address,
        exportdir,
        listing_limit,
        block_size,
    }: Cli,
) -> ndfs::Result<i32> {
    if !fs::try_exists(&exportdir).await? {
        fs::create_dir_all(&exportdir).await?;
    }
    if !fs::metadata(&exportdir).await?.is_dir() {
        return res!(io_err!(Other, "export directory must be a directory"));
    }

    println!("[*] Listing page size: {}", listing_limit);
    println!("[*] Ready to accept clients: {}", address);
    srv_async(
        LocalNn {
            realroot: exportdir,
            listing_limit: listing_limit as usize,
            block_size,
        },
        &address,
    )
    .await
    .and(Ok(0))
}

#[tokio::main]
async fn main() {
    env_logger::init();

    let exit_code = localnn_main(Cli::parse()).await.unwrap_or_else(|e| {
        eprintln!("Error: {:?}", e);
        -1
    });

    std::process::exit(exit_code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    fn export(listing_limit: usize) -> (tempfile::TempDir, LocalNn) {
        let dir = tempfile::tempdir().unwrap();
        let nn = LocalNn {
            realroot: dir.path().to_path_buf(),
            listing_limit,
            block_size: 1 << 20,
        };
        (dir, nn)
    }

    fn listing(call: Call) -> DirectoryListing {
        match call {
            Call::RGetListing { dir_list: Some(l) } => l,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn listing_is_sorted_and_paged() {
        let (dir, nn) = export(2);
        for name in ["c", "a", "e", "b", "d"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let page = listing(nn.rget_listing("/", &Data::default(), false).await.unwrap());
        let names: Vec<&[u8]> = page.partial_listing.iter().map(|s| s.path.as_bytes()).collect();
        assert_eq!(names, [&b"a"[..], &b"b"[..]]);
        assert_eq!(page.remaining_entries, 3);
        assert_eq!(page.partial_listing[0].block_replication, Some(1));

        let page = listing(nn.rget_listing("/", &Data::from("d"), false).await.unwrap());
        assert_eq!(page.partial_listing.len(), 1);
        assert_eq!(page.partial_listing[0].path, Data::from("e"));
        assert_eq!(page.remaining_entries, 0);

        assert_eq!(
            nn.rget_listing("/missing", &Data::default(), false).await.unwrap(),
            Call::RGetListing { dir_list: None }
        );
    }

    #[tokio::test]
    async fn mkdirs_masks_mode_and_stops_at_files() {
        let (dir, nn) = export(10);
        assert_eq!(
            nn.rmkdirs("/a/b", 0o750, true).await.unwrap(),
            Call::RMkdirs { result: true }
        );
        let attr = std::fs::metadata(dir.path().join("a/b")).unwrap();
        assert_eq!(attr.mode() & 0o777, 0o750);

        std::fs::write(dir.path().join("f"), b"").unwrap();
        assert_eq!(
            nn.rmkdirs("/f/g", 0o755, true).await.unwrap(),
            Call::RMkdirs { result: false }
        );
        let err = nn.rmkdirs("/x/y", 0o755, false).await.unwrap_err();
        assert_eq!(err.errno(), errno::ENOENT);
    }

    #[tokio::test]
    async fn delete_and_rename() {
        let (dir, nn) = export(10);
        std::fs::create_dir_all(dir.path().join("d/sub")).unwrap();
        std::fs::write(dir.path().join("f"), b"").unwrap();

        let err = nn.rdelete("/d", false).await.unwrap_err();
        assert_eq!(err.errno(), errno::ENOTEMPTY);
        assert_eq!(nn.rdelete("/d", true).await.unwrap(), Call::RDelete { result: true });
        assert_eq!(nn.rdelete("/d", true).await.unwrap(), Call::RDelete { result: false });

        std::fs::write(dir.path().join("g"), b"").unwrap();
        let err = nn.rrename2("/f", "/g", false).await.unwrap_err();
        assert_eq!(err.errno(), errno::EEXIST);
        nn.rrename2("/f", "/h", false).await.unwrap();
        assert!(dir.path().join("h").exists());
    }

    #[tokio::test]
    async fn replication_and_times() {
        let (dir, nn) = export(10);
        std::fs::write(dir.path().join("f"), b"hello").unwrap();

        assert_eq!(
            nn.rset_replication("/f", 3).await.unwrap(),
            Call::RSetReplication { result: true }
        );
        assert_eq!(
            nn.rset_replication("/", 3).await.unwrap(),
            Call::RSetReplication { result: false }
        );

        let before = std::fs::metadata(dir.path().join("f")).unwrap();
        nn.rset_times("/f", Some(1_600_000_000_000), None).await.unwrap();
        let after = std::fs::metadata(dir.path().join("f")).unwrap();
        assert_eq!(after.mtime(), 1_600_000_000);
        assert_eq!(after.atime(), before.atime());

        match nn.rget_file_info("/f").await.unwrap() {
            Call::RGetFileInfo { fs: Some(status) } => {
                assert_eq!(status.length, 5);
                assert_eq!(status.modification_time, 1_600_000_000_000);
                assert_eq!(status.blocksize, Some(1 << 20));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            nn.rget_file_info("/nope").await.unwrap(),
            Call::RGetFileInfo { fs: None }
        );
    }

    #[tokio::test]
    async fn fs_stats_are_consistent() {
        let (_dir, nn) = export(10);
        match nn.rget_fs_stats().await.unwrap() {
            Call::RGetFsStats { stats } => {
                assert!(stats.capacity >= stats.used);
                assert!(stats.capacity >= stats.remaining);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
