//! Integration tests for volume creation and deletion.

#[path = "common/cluster.rs"]
mod cluster;

use std::sync::Arc;

use cluster::{
    GIB, PRIMARY_CLUSTER_ID, PRIMARY_FS, PRIMARY_FS_UUID, controller_with, create_request,
    fileset_volume_id, primary_fake, symlink_abs, symlink_rel,
};
use fileset_csi::controller::{
    DeleteVolumeRequest, PARAM_CLUSTER_ID, PARAM_DIR_BASE_PATH, PARAM_FILESYSTEM,
    PARAM_NODE_CLASS, VolumeContentSource,
};
use fileset_csi::test_support::{FakeConnector, FakeFilesystem, FilesetSeed};
use fileset_csi::{ControllerError, StatusCode, VolumeId};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn creates_and_deletes_a_fileset_volume() {
    let fake = Arc::new(primary_fake());
    let controller = controller_with(&fake, &[]);
    let cancel = CancellationToken::new();

    let response = controller
        .create_volume(create_request("pvc-1", GIB, &[]), &cancel)
        .await
        .expect("volume created");

    let volume = response.volume;
    assert_eq!(volume.volume_id, fileset_volume_id(2, "pvc-1"));
    assert_eq!(volume.capacity_bytes, GIB);
    assert_eq!(
        volume.volume_context.get(PARAM_FILESYSTEM).map(String::as_str),
        Some(PRIMARY_FS)
    );

    let fileset = fake.fileset(PRIMARY_FS, "pvc-1").expect("fileset created");
    assert!(fileset.is_independent());
    assert_eq!(fileset.link_path(), Some("/ibm/fs0/pvc-1"));
    assert_eq!(fake.fileset_quota_bytes(PRIMARY_FS, "pvc-1"), Some(GIB));
    assert!(fake.has_directory(PRIMARY_FS, "pvc-1/pvc-1-data"));
    assert_eq!(
        fake.symlink(PRIMARY_FS, &symlink_rel("pvc-1")),
        Some((PRIMARY_FS.to_owned(), String::from("pvc-1/pvc-1-data")))
    );
    assert!(controller.in_flight().is_empty());

    controller
        .delete_volume(
            &DeleteVolumeRequest {
                volume_id: volume.volume_id,
            },
            &cancel,
        )
        .await
        .expect("volume deleted");
    assert!(fake.fileset(PRIMARY_FS, "pvc-1").is_none());
    assert!(fake.symlink(PRIMARY_FS, &symlink_rel("pvc-1")).is_none());
}

#[tokio::test]
async fn repeating_a_create_converges() {
    let fake = Arc::new(primary_fake());
    let controller = controller_with(&fake, &[]);
    let cancel = CancellationToken::new();

    let first = controller
        .create_volume(create_request("pvc-1", GIB, &[]), &cancel)
        .await
        .expect("first create");
    let second = controller
        .create_volume(create_request("pvc-1", GIB, &[]), &cancel)
        .await
        .expect("second create");

    assert_eq!(first.volume.volume_id, second.volume.volume_id);
    assert_eq!(fake.call_count("create_fileset"), 1);
    assert_eq!(fake.call_count("set_fileset_quota"), 1);
    assert_eq!(fake.call_count("create_symlink"), 1);
}

#[tokio::test]
async fn creates_and_deletes_a_lightweight_volume() {
    let fake = Arc::new(primary_fake().with_directory(PRIMARY_FS, "lw"));
    let controller = controller_with(&fake, &[]);
    let cancel = CancellationToken::new();

    let response = controller
        .create_volume(
            create_request("pvc-2", GIB, &[(PARAM_DIR_BASE_PATH, "lw")]),
            &cancel,
        )
        .await
        .expect("volume created");

    let id: VolumeId = response.volume.volume_id.parse().expect("volume id");
    assert!(!id.is_fileset_backed());
    assert_eq!(id.cluster_id(), PRIMARY_CLUSTER_ID);
    assert_eq!(id.fs_uuid(), PRIMARY_FS_UUID);
    assert_eq!(id.path(), symlink_abs("pvc-2"));
    assert!(fake.has_directory(PRIMARY_FS, "lw/pvc-2"));
    assert_eq!(fake.call_count("create_fileset"), 0);

    controller
        .delete_volume(
            &DeleteVolumeRequest {
                volume_id: response.volume.volume_id,
            },
            &cancel,
        )
        .await
        .expect("volume deleted");
    assert!(!fake.has_directory(PRIMARY_FS, "lw/pvc-2"));
    assert!(fake.symlink(PRIMARY_FS, &symlink_rel("pvc-2")).is_none());
}

#[tokio::test]
async fn missing_base_directory_is_internal() {
    let fake = Arc::new(primary_fake());
    let controller = controller_with(&fake, &[]);
    let err = controller
        .create_volume(
            create_request("pvc-2", GIB, &[(PARAM_DIR_BASE_PATH, "missing")]),
            &CancellationToken::new(),
        )
        .await
        .expect_err("base directory missing");
    assert_eq!(err.code(), StatusCode::Internal);
}

#[tokio::test]
async fn existing_matching_quota_is_left_alone() {
    let fake = Arc::new(
        primary_fake().with_fileset(
            PRIMARY_FS,
            "pvc-3",
            FilesetSeed::linked("/ibm/fs0/pvc-3").with_quota("1G"),
        ),
    );
    let controller = controller_with(&fake, &[]);

    controller
        .create_volume(create_request("pvc-3", GIB, &[]), &CancellationToken::new())
        .await
        .expect("converged");
    assert_eq!(fake.call_count("set_fileset_quota"), 0);
    assert_eq!(fake.call_count("create_fileset"), 0);
}

#[tokio::test]
async fn conflicting_quota_is_internal() {
    let fake = Arc::new(
        primary_fake().with_fileset(
            PRIMARY_FS,
            "pvc-3",
            FilesetSeed::linked("/ibm/fs0/pvc-3").with_quota("1G"),
        ),
    );
    let controller = controller_with(&fake, &[]);

    let err = controller
        .create_volume(create_request("pvc-3", 2 * GIB, &[]), &CancellationToken::new())
        .await
        .expect_err("quota mismatch");
    assert_eq!(err.code(), StatusCode::Internal);
    assert_eq!(fake.call_count("set_fileset_quota"), 0);
    assert!(controller.in_flight().is_empty());
}

#[tokio::test]
async fn unlinked_fileset_is_linked_on_retry() {
    let fake = Arc::new(primary_fake().with_fileset(PRIMARY_FS, "pvc-4", FilesetSeed::unlinked()));
    let controller = controller_with(&fake, &[]);

    controller
        .create_volume(create_request("pvc-4", 0, &[]), &CancellationToken::new())
        .await
        .expect("created");
    let fileset = fake.fileset(PRIMARY_FS, "pvc-4").expect("fileset");
    assert_eq!(fileset.link_path(), Some("/ibm/fs0/pvc-4"));
    assert_eq!(fake.call_count("quota_enabled"), 0);
    assert_eq!(fake.call_count("set_fileset_quota"), 0);
}

#[tokio::test]
async fn quota_must_be_enabled_for_sized_volumes() {
    let fake = Arc::new(
        FakeConnector::new()
            .with_filesystem(
                FakeFilesystem::local(PRIMARY_FS, PRIMARY_FS_UUID, "/ibm/fs0").without_quota(),
            )
            .with_fileset(PRIMARY_FS, "csi-store", FilesetSeed::linked("/ibm/fs0/csi-store")),
    );
    let controller = controller_with(&fake, &[]);
    let err = controller
        .create_volume(create_request("pvc-5", GIB, &[]), &CancellationToken::new())
        .await
        .expect_err("quota disabled");
    assert_eq!(err.code(), StatusCode::Internal);
    assert_eq!(fake.call_count("create_fileset"), 0);
}

#[tokio::test]
async fn creates_filesets_on_the_owning_cluster() {
    let primary = Arc::new(primary_fake().with_filesystem(
        FakeFilesystem::local("fs1", "REMOTE-UUID", "/ibm/fs1").remote_from("owner:gpfs1"),
    ));
    let owner = Arc::new(
        FakeConnector::new().with_filesystem(FakeFilesystem::local("gpfs1", "REMOTE-UUID", "/gpfs/gpfs1")),
    );
    let controller = controller_with(&primary, &[("2002", Arc::clone(&owner))]);

    let response = controller
        .create_volume(
            create_request("pvc-r", GIB, &[(PARAM_FILESYSTEM, "fs1"), (PARAM_CLUSTER_ID, "2002")]),
            &CancellationToken::new(),
        )
        .await
        .expect("remote volume created");

    let id: VolumeId = response.volume.volume_id.parse().expect("volume id");
    assert_eq!(id.cluster_id(), "2002");
    assert_eq!(id.fs_uuid(), "REMOTE-UUID");
    assert_eq!(id.fileset_id(), Some("1"));
    let fileset = owner.fileset("gpfs1", "pvc-r").expect("fileset on owner");
    assert_eq!(fileset.link_path(), Some("/gpfs/gpfs1/pvc-r"));
    assert!(owner.has_directory("gpfs1", "pvc-r/pvc-r-data"));
    assert_eq!(
        primary.symlink(PRIMARY_FS, &symlink_rel("pvc-r")),
        Some((String::from("fs1"), String::from("pvc-r/pvc-r-data")))
    );
    assert_eq!(primary.call_count("create_fileset"), 0);
}

#[tokio::test]
async fn empty_remote_device_name_keeps_the_local_filesystem_name() {
    let primary = Arc::new(primary_fake().with_filesystem(
        FakeFilesystem::local("fs1", "REMOTE-UUID", "/ibm/fs1").remote_from(""),
    ));
    let owner = Arc::new(
        FakeConnector::new().with_filesystem(FakeFilesystem::local("fs1", "REMOTE-UUID", "/gpfs/fs1")),
    );
    let controller = controller_with(&primary, &[("2002", Arc::clone(&owner))]);

    let response = controller
        .create_volume(
            create_request("pvc-r", GIB, &[(PARAM_FILESYSTEM, "fs1"), (PARAM_CLUSTER_ID, "2002")]),
            &CancellationToken::new(),
        )
        .await
        .expect("remote volume created");

    let id: VolumeId = response.volume.volume_id.parse().expect("volume id");
    assert_eq!(id.cluster_id(), "2002");
    assert_eq!(owner.call_count("create_fileset"), 1);
    assert_eq!(primary.call_count("create_fileset"), 0);
    let fileset = owner.fileset("fs1", "pvc-r").expect("fileset on owner under the local name");
    assert_eq!(fileset.link_path(), Some("/gpfs/fs1/pvc-r"));
    assert!(owner.has_directory("fs1", "pvc-r/pvc-r-data"));
}

#[tokio::test]
async fn remote_filesystem_needs_an_explicit_cluster() {
    let primary = Arc::new(primary_fake().with_filesystem(
        FakeFilesystem::local("fs1", "REMOTE-UUID", "/ibm/fs1").remote_from("owner:gpfs1"),
    ));
    let controller = controller_with(&primary, &[]);

    let err = controller
        .create_volume(
            create_request("pvc-r", GIB, &[(PARAM_FILESYSTEM, "fs1")]),
            &CancellationToken::new(),
        )
        .await
        .expect_err("cluster id required");
    assert_eq!(err.code(), StatusCode::Internal);
}

#[tokio::test]
async fn unknown_owning_cluster_is_not_found() {
    let primary = Arc::new(primary_fake());
    let controller = controller_with(&primary, &[]);

    let err = controller
        .create_volume(
            create_request("pvc-r", GIB, &[(PARAM_CLUSTER_ID, "9999")]),
            &CancellationToken::new(),
        )
        .await
        .expect_err("unknown cluster");
    assert_eq!(err.code(), StatusCode::NotFound);
}

#[tokio::test]
async fn clones_a_fileset_volume() {
    let fake = Arc::new(primary_fake());
    let controller = controller_with(&fake, &[]);
    let cancel = CancellationToken::new();
    let source = controller
        .create_volume(create_request("pvc-src", GIB, &[]), &cancel)
        .await
        .expect("source created");

    let mut request = create_request("pvc-clone", GIB, &[]);
    request.content_source = Some(VolumeContentSource::Volume {
        volume_id: source.volume.volume_id,
    });
    controller
        .create_volume(request, &cancel)
        .await
        .expect("clone created");

    let copies = fake.copies();
    assert_eq!(copies.len(), 1);
    let copy = copies.first().expect("copy");
    assert_eq!(copy.fileset, "pvc-src");
    assert_eq!(copy.snapshot, None);
    assert_eq!(copy.source_path, "pvc-src-data");
    assert_eq!(copy.target_path, "/ibm/fs0/pvc-clone/pvc-clone-data");
}

#[tokio::test]
async fn clones_a_snapshot_with_node_class() {
    let fake = Arc::new(
        primary_fake()
            .with_fileset(PRIMARY_FS, "pvc-src", FilesetSeed::linked("/ibm/fs0/pvc-src"))
            .with_snapshot(PRIMARY_FS, "pvc-src", "snap-a")
            .with_node_class("copy-nodes"),
    );
    let controller = controller_with(&fake, &[]);

    let mut request = create_request("pvc-clone", GIB, &[(PARAM_NODE_CLASS, "copy-nodes")]);
    request.content_source = Some(VolumeContentSource::Snapshot {
        snapshot_id: format!("{PRIMARY_CLUSTER_ID};{PRIMARY_FS_UUID};pvc-src;snap-a;pvc-src-data"),
    });
    controller
        .create_volume(request, &CancellationToken::new())
        .await
        .expect("clone created");

    let copies = fake.copies();
    let copy = copies.first().expect("copy");
    assert_eq!(copy.snapshot.as_deref(), Some("snap-a"));
    assert_eq!(copy.source_path, "pvc-src-data");
    assert_eq!(copy.node_class.as_deref(), Some("copy-nodes"));
}

#[tokio::test]
async fn clone_source_checks_run_before_provisioning() {
    let fake = Arc::new(
        primary_fake()
            .with_fileset(PRIMARY_FS, "pvc-src", FilesetSeed::linked("/ibm/fs0/pvc-src"))
            .without_snapshot_support(),
    );
    let controller = controller_with(&fake, &[]);

    let mut request = create_request("pvc-clone", GIB, &[]);
    request.content_source = Some(VolumeContentSource::Snapshot {
        snapshot_id: format!("{PRIMARY_CLUSTER_ID};{PRIMARY_FS_UUID};pvc-src;snap-a"),
    });
    let err = controller
        .create_volume(request, &CancellationToken::new())
        .await
        .expect_err("old cluster software");
    assert_eq!(err.code(), StatusCode::FailedPrecondition);
    assert_eq!(fake.call_count("create_fileset"), 0);
}

#[tokio::test]
async fn clone_from_unknown_node_class_is_not_found() {
    let fake = Arc::new(
        primary_fake().with_fileset(PRIMARY_FS, "pvc-src", FilesetSeed::linked("/ibm/fs0/pvc-src").with_id(5)),
    );
    let controller = controller_with(&fake, &[]);

    let mut request = create_request("pvc-clone", GIB, &[(PARAM_NODE_CLASS, "nope")]);
    request.content_source = Some(VolumeContentSource::Volume {
        volume_id: fileset_volume_id(5, "pvc-src"),
    });
    let err = controller
        .create_volume(request, &CancellationToken::new())
        .await
        .expect_err("unknown node class");
    assert_eq!(err.code(), StatusCode::NotFound);
}

#[tokio::test]
async fn cross_cluster_clone_is_rejected() {
    let fake = Arc::new(primary_fake());
    let other = Arc::new(FakeConnector::new());
    let controller = controller_with(&fake, &[("2002", other)]);

    let mut request = create_request("pvc-clone", GIB, &[]);
    request.content_source = Some(VolumeContentSource::Volume {
        volume_id: format!("2002;{PRIMARY_FS_UUID};fileset=5;path=/ibm/fs0/x/pvc-src"),
    });
    let err = controller
        .create_volume(request, &CancellationToken::new())
        .await
        .expect_err("cross cluster");
    assert_eq!(err.code(), StatusCode::InvalidArgument);
}

#[tokio::test]
async fn delete_leaves_a_renamed_fileset_alone() {
    let fake = Arc::new(
        primary_fake().with_fileset(PRIMARY_FS, "other", FilesetSeed::linked("/ibm/fs0/other").with_id(50)),
    );
    let controller = controller_with(&fake, &[]);

    controller
        .delete_volume(
            &DeleteVolumeRequest {
                volume_id: fileset_volume_id(50, "pvc-x"),
            },
            &CancellationToken::new(),
        )
        .await
        .expect("delete succeeds");
    assert!(fake.fileset(PRIMARY_FS, "other").is_some());
    assert_eq!(fake.call_count("delete_fileset"), 0);
    assert_eq!(fake.call_count("delete_symlink"), 1);
}

#[tokio::test]
async fn delete_refuses_filesets_with_snapshots() {
    let fake = Arc::new(
        primary_fake()
            .with_fileset(PRIMARY_FS, "pvc-6", FilesetSeed::linked("/ibm/fs0/pvc-6").with_id(6))
            .with_snapshot(PRIMARY_FS, "pvc-6", "snap-a"),
    );
    let controller = controller_with(&fake, &[]);

    let err = controller
        .delete_volume(
            &DeleteVolumeRequest {
                volume_id: fileset_volume_id(6, "pvc-6"),
            },
            &CancellationToken::new(),
        )
        .await
        .expect_err("snapshots present");
    assert_eq!(err.code(), StatusCode::InvalidArgument);
    assert!(fake.fileset(PRIMARY_FS, "pvc-6").is_some());
}

#[tokio::test]
async fn deleting_a_missing_fileset_succeeds() {
    let fake = Arc::new(primary_fake());
    let controller = controller_with(&fake, &[]);

    controller
        .delete_volume(
            &DeleteVolumeRequest {
                volume_id: fileset_volume_id(77, "pvc-gone"),
            },
            &CancellationToken::new(),
        )
        .await
        .expect("already gone");
    assert_eq!(fake.call_count("delete_fileset"), 0);
}

#[tokio::test]
async fn malformed_delete_ids_are_invalid() {
    let fake = Arc::new(primary_fake());
    let controller = controller_with(&fake, &[]);

    for volume_id in ["", "1001;AA", "1001;AA;fsetid=1;path=/x"] {
        let err = controller
            .delete_volume(
                &DeleteVolumeRequest {
                    volume_id: volume_id.to_owned(),
                },
                &CancellationToken::new(),
            )
            .await
            .expect_err("malformed id");
        assert_eq!(err.code(), StatusCode::InvalidArgument, "id {volume_id:?}");
    }
    assert!(fake.calls().is_empty());
}

#[tokio::test]
async fn cancelled_requests_stop_before_the_backend() {
    let fake = Arc::new(primary_fake());
    let controller = controller_with(&fake, &[]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = controller
        .create_volume(create_request("pvc-7", GIB, &[]), &cancel)
        .await
        .expect_err("cancelled");
    assert_eq!(err, ControllerError::Cancelled);
    assert!(fake.calls().is_empty());
    assert!(controller.in_flight().is_empty());
}

#[tokio::test]
async fn connector_failures_surface_as_internal() {
    let fake = Arc::new(primary_fake());
    fake.inject_failure("create_fileset");
    let controller = controller_with(&fake, &[]);

    let err = controller
        .create_volume(create_request("pvc-8", GIB, &[]), &CancellationToken::new())
        .await
        .expect_err("create_fileset fails");
    assert_eq!(err.code(), StatusCode::Internal);
    assert!(controller.in_flight().is_empty());
}
