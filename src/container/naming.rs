//! Group/dataset name encoding, supplemented from `bpImsUtils.cxx`: names
//! may contain characters that would otherwise collide with the container's
//! own path separator.

/// Escapes `%` to `%p` first, then `/` to `%s`, so a name can be embedded as
/// one path segment without being split by the container's separator.
pub fn encode_name(name: &str) -> String {
    name.replace('%', "%p").replace('/', "%s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_separators_and_escapes() {
        assert_eq!(encode_name("a/b"), "a%sb");
        assert_eq!(encode_name("100%"), "100%p");
        assert_eq!(encode_name("50%/done"), "50%p%sdone");
    }
}
