//! Path helpers shared by the controller operations.

use camino::Utf8Path;
use tokio_util::sync::CancellationToken;

use super::error::{ControllerError, StepError};
use crate::connector::ConnectorFuture;
use crate::identifier::data_dir_name;

/// Awaits one connector call unless the request was cancelled first.
pub(super) async fn step<T>(
    cancel: &CancellationToken,
    call: ConnectorFuture<'_, T>,
) -> Result<T, StepError> {
    if cancel.is_cancelled() {
        return Err(StepError::Cancelled);
    }
    Ok(call.await?)
}

/// Strips the primary mount point from an absolute symlink path, yielding a
/// path relative to the primary filesystem root.
pub(super) fn relative_to_mount(path: &str, mount_point: &str) -> String {
    path.replacen(mount_point, "", 1)
        .trim_matches(|ch| ch == '!' || ch == '/')
        .to_owned()
}

/// Final component of a path, or an empty string when it has none.
pub(super) fn base_name(path: &str) -> &str {
    Utf8Path::new(path).file_name().unwrap_or_default()
}

/// Data directory of a fileset volume relative to its filesystem root.
///
/// Both the junction path and the mount point must be known.
pub(super) fn fileset_target_path(
    link_path: &str,
    mount_point: &str,
    volume: &str,
) -> Result<String, ControllerError> {
    if link_path.is_empty() || mount_point.is_empty() {
        return Err(ControllerError::Internal(format!(
            "cannot derive the data path of volume [{volume}]: junction path [{link_path}], \
             mount point [{mount_point}]"
        )));
    }
    let relative = relative_to_mount(link_path, mount_point);
    let data = data_dir_name(volume);
    if relative.is_empty() {
        return Ok(data);
    }
    Ok(format!("{relative}/{data}"))
}

/// Joins a mount point and a relative path.
pub(super) fn absolute_path(mount_point: &str, relative: &str) -> String {
    format!("{}/{}", mount_point.trim_end_matches('/'), relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/ibm/fs0/csi-store/.volumes/pvc-1", "/ibm/fs0", "csi-store/.volumes/pvc-1")]
    #[case("/ibm/fs0/!pvc-1/", "/ibm/fs0", "pvc-1")]
    #[case("/other/pvc-1", "/ibm/fs0", "other/pvc-1")]
    fn strips_mount_point_once(#[case] path: &str, #[case] mount: &str, #[case] expected: &str) {
        assert_eq!(relative_to_mount(path, mount), expected);
    }

    #[rstest]
    #[case("csi-store/.volumes/pvc-1", "pvc-1")]
    #[case("pvc-1", "pvc-1")]
    #[case("", "")]
    fn base_name_takes_last_component(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(base_name(path), expected);
    }

    #[rstest]
    #[case("/ibm/fs0/pvc-1", "/ibm/fs0", "pvc-1", "pvc-1/pvc-1-data")]
    #[case("/ibm/fs0/nested/pvc-1", "/ibm/fs0", "pvc-1", "nested/pvc-1/pvc-1-data")]
    #[case("/ibm/fs0", "/ibm/fs0", "pvc-1", "pvc-1-data")]
    fn target_path_sits_under_link(
        #[case] link: &str,
        #[case] mount: &str,
        #[case] volume: &str,
        #[case] expected: &str,
    ) {
        assert_eq!(fileset_target_path(link, mount, volume), Ok(expected.to_owned()));
    }

    #[rstest]
    #[case("", "/ibm/fs0")]
    #[case("/ibm/fs0/pvc-1", "")]
    fn target_path_needs_link_and_mount(#[case] link: &str, #[case] mount: &str) {
        let err = fileset_target_path(link, mount, "pvc-1").expect_err("incomplete location");
        assert_eq!(err.code(), crate::controller::StatusCode::Internal);
    }

    #[test]
    fn absolute_path_avoids_double_separator() {
        assert_eq!(absolute_path("/ibm/fs0/", "pvc-1/pvc-1-data"), "/ibm/fs0/pvc-1/pvc-1-data");
    }

    #[tokio::test]
    async fn cancelled_token_skips_the_call() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let call: ConnectorFuture<'_, u8> = Box::pin(async { Ok(1) });
        assert!(matches!(step(&cancel, call).await, Err(StepError::Cancelled)));
    }
}
