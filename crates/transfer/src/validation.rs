use crate::TransferError;

/// Validates a target path in the store's key space.
///
/// Accepts absolute, slash-separated paths such as `/assets/logo.png`.
/// Rejects:
/// - Empty paths and the bare root `/`
/// - Relative paths
/// - Empty segments (`//`, trailing `/`)
/// - `.` and `..` segments
/// - NUL and other control characters
pub fn validate_target_path(path: &str) -> Result<(), TransferError> {
    if path.is_empty() {
        return Err(TransferError::InvalidPath("empty path".into()));
    }

    let Some(rest) = path.strip_prefix('/') else {
        return Err(TransferError::InvalidPath(format!(
            "target path must start with '/': {path}"
        )));
    };

    if path.chars().any(char::is_control) {
        return Err(TransferError::InvalidPath(format!(
            "control characters not allowed: {path:?}"
        )));
    }

    for segment in rest.split('/') {
        match segment {
            "" => {
                return Err(TransferError::InvalidPath(format!(
                    "empty path segment: {path}"
                )));
            }
            "." | ".." => {
                return Err(TransferError::InvalidPath(format!(
                    "relative segment not allowed: {path}"
                )));
            }
            _ => {}
        }
    }

    Ok(())
}
