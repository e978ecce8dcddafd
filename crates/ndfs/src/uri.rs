//! URI parsing and relative path resolution.
//!
//! Paths handed to the authority are the percent-decoded path component of
//! a URI (escaped slashes and percent signs excepted) resolved against the handle's working directory. Hadoop treats any
//! URI with a non-empty path as absolute, so `hdfs://nn/` is the root while
//! `hdfs://nn` (no slash) has an empty path, meaning "the working directory".

use std::{fmt, str::Utf8Error};

use bitflags::bitflags;
use percent_encoding::percent_decode_str;
use url::Url;

use crate::{proto::DEFAULT_SCHEME, utils::Result};

bitflags! {
    /// Options for [`Uri::parse`]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct UriFlags: u32 {
        /// Name a directory: drop any query or fragment and make the path
        /// end in `/`.
        const APPEND_SLASH = 0x01;
    }
}

/// A parsed, normalized URI with its decoded path.
#[derive(Clone, PartialEq, Eq)]
pub struct Uri {
    url: Url,
    path: String,
}

impl Uri {
    /// Parse `text`, resolving it against `base` when one is given.
    ///
    /// Dot segments are normalized away. Malformed input is `EINVAL`.
    pub fn parse(text: &str, base: Option<&Uri>, flags: UriFlags) -> Result<Uri> {
        let parsed = match base {
            Some(base) => base.url.join(text),
            None => Url::parse(text),
        };
        let mut url = parsed.map_err(|e| {
            ndfs_err!(EINVAL, "uri_parse: failed to parse '{}' as a URI: {}", text, e)
        })?;
        if flags.contains(UriFlags::APPEND_SLASH) {
            url.set_query(None);
            url.set_fragment(None);
            if !url.path().ends_with('/') {
                let path = format!("{}/", url.path());
                url.set_path(&path);
            }
        }
        let path = decode_path(url.path()).map_err(|e| {
            ndfs_err!(EINVAL, "uri_parse: path of '{}' is not valid UTF-8: {}", text, e)
        })?;

        Ok(Uri { url, path })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// User info, or the empty string.
    pub fn user_info(&self) -> &str {
        self.url.username()
    }

    /// Host part of the authority, or the empty string.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or("")
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// Decoded path; empty when the URI has no path at all.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl fmt::Debug for Uri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Uri")
            .field("scheme", &self.scheme())
            .field("user_info", &self.user_info())
            .field("host", &self.host())
            .field("port", &self.port())
            .field("path", &self.path)
            .finish()
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}

/// Percent-decode a URI path.
///
/// `%2F` and `%25` stay escaped so the result names the same components
/// as the encoded path.
fn decode_path(raw: &str) -> std::result::Result<String, Utf8Error> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(at) = find_kept_escape(rest) {
        out.push_str(&percent_decode_str(&rest[..at]).decode_utf8()?);
        out.push_str(&rest[at..at + 3].to_ascii_uppercase());
        rest = &rest[at + 3..];
    }
    out.push_str(&percent_decode_str(rest).decode_utf8()?);
    Ok(out)
}

fn find_kept_escape(s: &str) -> Option<usize> {
    s.as_bytes().windows(3).position(|w| {
        w[0] == b'%' && (w[1..].eq_ignore_ascii_case(b"2F") || w[1..].eq_ignore_ascii_case(b"25"))
    })
}

/// Turn a name node string into URI text.
///
/// A name node set as a bare `host` or `host:port` pair is not a URI and
/// gets the default scheme in front of it.
pub fn namenode_uri_text(nn: &str) -> String {
    if nn.contains('/') {
        nn.to_owned()
    } else {
        format!("{}://{}", DEFAULT_SCHEME, nn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn cwd() -> Uri {
        Uri::parse("hdfs:///user/alice/", None, UriFlags::APPEND_SLASH).unwrap()
    }

    #[test]
    fn relative_paths_join_the_base() {
        let base = cwd();
        let uri = Uri::parse("data/part-0", Some(&base), UriFlags::empty()).unwrap();
        assert_eq!(uri.path(), "/user/alice/data/part-0");

        let uri = Uri::parse("../bob/./x", Some(&base), UriFlags::empty()).unwrap();
        assert_eq!(uri.path(), "/user/bob/x");

        let uri = Uri::parse("/tmp", Some(&base), UriFlags::APPEND_SLASH).unwrap();
        assert_eq!(uri.path(), "/tmp/");
    }

    #[test]
    fn authority_is_split() {
        let uri = Uri::parse("hdfs://bob@nn.example.com:9000/a%20b", None, UriFlags::empty())
            .unwrap();
        assert_eq!(uri.scheme(), "hdfs");
        assert_eq!(uri.user_info(), "bob");
        assert_eq!(uri.host(), "nn.example.com");
        assert_eq!(uri.port(), Some(9000));
        assert_eq!(uri.path(), "/a b");
    }

    #[test]
    fn escaped_slash_and_percent_stay_escaped() {
        for (input, expected) in [
            ("hdfs://nn/a%2Fb", "/a%2Fb"),
            ("hdfs://nn/a%2fb", "/a%2Fb"),
            ("hdfs://nn/100%25", "/100%25"),
            ("hdfs://nn/%2F%20x%25y", "/%2F x%25y"),
            ("hdfs://nn/caf%C3%A9", "/caf\u{e9}"),
        ] {
            let uri = Uri::parse(input, None, UriFlags::empty()).unwrap();
            assert_eq!(uri.path(), expected, "{}", input);
        }

        let err = Uri::parse("hdfs://nn/%FF", None, UriFlags::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn directory_uris_drop_query_and_fragment() {
        let base = cwd();
        let uri = Uri::parse("dir#frag", Some(&base), UriFlags::APPEND_SLASH).unwrap();
        assert_eq!(uri.as_str(), "hdfs:///user/alice/dir/");
        assert_eq!(uri.path(), "/user/alice/dir/");

        let uri = Uri::parse("q?a=1", Some(&base), UriFlags::APPEND_SLASH).unwrap();
        assert_eq!(uri.as_str(), "hdfs:///user/alice/q/");

        let uri = Uri::parse("hdfs://nn", None, UriFlags::APPEND_SLASH).unwrap();
        assert_eq!(uri.path(), "/");
    }

    #[test]
    fn no_slash_means_empty_path() {
        let uri = Uri::parse("hdfs://nn", None, UriFlags::empty()).unwrap();
        assert_eq!(uri.path(), "");
        assert_eq!(uri.port(), None);
    }

    #[test]
    fn garbage_is_invalid() {
        let err = Uri::parse("hdfs://nn:99999/", None, UriFlags::empty()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.message().contains("hdfs://nn:99999/"));
    }

    #[test]
    fn bare_hosts_get_a_scheme() {
        assert_eq!(namenode_uri_text("nn:8020"), "hdfs://nn:8020");
        assert_eq!(namenode_uri_text("nn"), "hdfs://nn");
        assert_eq!(namenode_uri_text("hdfs://nn/"), "hdfs://nn/");
    }
}
