use crate::utils::Result;

/// Parse an octal permission string such as `"022"`.
///
/// Symbolic forms (`u=rwx,g=r`) are not understood yet and are reported as
/// `ENOTSUP`. Like `strtol`, parsing stops at the first space after the
/// leading digits and an empty string is zero.
pub fn parse_permission(s: &str) -> Result<u32> {
    if !s.chars().all(|c| c == ' ' || ('0'..='7').contains(&c)) {
        return Err(ndfs_err!(
            ENOTSUP,
            "parse_permission({}): can't parse non-octal permissions (yet)",
            s
        ));
    }
    let digits: String = s
        .trim_start()
        .chars()
        .take_while(|c| *c != ' ')
        .collect();
    if digits.is_empty() {
        return Ok(0);
    }
    u32::from_str_radix(&digits, 8).map_err(|e| {
        ndfs_err!(
            EINVAL,
            "parse_permission({}): failed to parse this octal string: {}",
            s,
            e
        )
    })
}
