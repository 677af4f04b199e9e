use std::path::{Component, Path};

use crate::TransferError;

/// Validates that a client-supplied name is a single plain file name.
///
/// The name becomes part of on-disk file names, so it must not be able to
/// reach another directory. Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Any separator, i.e. more than one path component
/// - `.` and `..`
/// - Whitespace, which cannot travel as a single protocol token
pub fn validate_file_name(file_name: &str) -> Result<(), TransferError> {
    if file_name.is_empty() {
        return Err(TransferError::InvalidFileName("empty name".into()));
    }

    if file_name.chars().any(char::is_whitespace) {
        return Err(TransferError::InvalidFileName(format!(
            "whitespace not allowed: {file_name:?}"
        )));
    }

    if file_name.contains(['/', '\\']) {
        return Err(TransferError::InvalidFileName(format!(
            "path separators not allowed: {file_name}"
        )));
    }

    let path = Path::new(file_name);
    if path.is_absolute() {
        return Err(TransferError::InvalidFileName(format!(
            "absolute path not allowed: {file_name}"
        )));
    }

    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::ParentDir), _) | (Some(Component::CurDir), _) => Err(
            TransferError::InvalidFileName(format!("directory reference not allowed: {file_name}")),
        ),
        (Some(Component::Prefix(_)), _) => Err(TransferError::InvalidFileName(format!(
            "path prefix not allowed: {file_name}"
        ))),
        _ => Err(TransferError::InvalidFileName(format!(
            "not a plain file name: {file_name}"
        ))),
    }
}
