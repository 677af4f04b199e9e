//! Names shared by both peers: upload identifiers and segment files.

/// Builds the upload identifier for `file_name` uploaded by `identity`.
pub fn upload_uid(identity: &str, file_name: &str) -> String {
    format!("{identity}_{file_name}")
}

/// File name of segment `index` of upload `uid`.
pub fn segment_file_name(uid: &str, index: u64) -> String {
    format!("{uid}_{index}")
}

/// Returns `true` if `uid` was derived from `identity`.
///
/// Only the `identity_` prefix is checked; the server additionally compares
/// the owner recorded on the session.
pub fn uid_belongs_to(uid: &str, identity: &str) -> bool {
    uid.strip_prefix(identity)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|file_name| !file_name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_joins_identity_and_file_name() {
        assert_eq!(upload_uid("client", "movie.mkv"), "client_movie.mkv");
    }

    #[test]
    fn segment_names_are_indexed() {
        assert_eq!(segment_file_name("client_a.bin", 0), "client_a.bin_0");
        assert_eq!(segment_file_name("client_a.bin", 12), "client_a.bin_12");
    }

    #[test]
    fn uid_ownership_requires_separator() {
        assert!(uid_belongs_to("client_a.bin", "client"));
        assert!(!uid_belongs_to("clientx_a.bin", "client"));
        assert!(!uid_belongs_to("client_a.bin", "cli"));
        assert!(!uid_belongs_to("client_", "client"));
        assert!(!uid_belongs_to("other_a.bin", "client"));
    }
}
