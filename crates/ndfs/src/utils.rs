use crate::error;

pub type Result<T> = ::std::result::Result<T, error::Error>;

#[macro_export]
macro_rules! io_err {
    ($kind:ident, $msg:expr) => {
        ::std::io::Error::new(::std::io::ErrorKind::$kind, $msg)
    };
}

#[macro_export]
macro_rules! res {
    ($err:expr) => {
        Err(From::from($err))
    };
}

/// Build an [`Error`](crate::Error) from an errno name and a format string.
#[macro_export]
macro_rules! ndfs_err {
    ($code:ident, $($arg:tt)+) => {
        $crate::error::Error::new($crate::error::errno::Errno::$code, format!($($arg)+))
    };
}

/// Split a `proto!address!port` listen string.
pub fn parse_proto(arg: &str) -> Option<(&str, &str, &str)> {
    let mut split = arg.split('!');
    let (proto, addr, port) = (split.next()?, split.next()?, split.next()?);

    Some((proto, addr, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_proto_splits_on_bang() {
        assert_eq!(
            parse_proto("tcp!127.0.0.1!8020"),
            Some(("tcp", "127.0.0.1", "8020"))
        );
        assert_eq!(parse_proto("tcp!127.0.0.1"), None);
    }
}
