// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

mod test_utils;

use bytes::Bytes;
use serde_json::json;
use test_utils::{create_item, new_repo, new_repo_with_config};
use tuf_reposerver::targets::{
    EditTargetItem, TargetContent, TargetListQuery, UploadParams,
};
use tuf_reposerver::{Error, RepoServerConfig};
use tuf_schema::{RoleType, TargetFilename};

const DIGEST: &str = "af2bdbe1aa9b6ec1e2ade1d694f41fc71a831d0268e9891562113d8a62add1bf";

#[tokio::test]
async fn listing_is_ordered_filtered_and_paginated() {
    let ctx = new_repo().await;
    for name in ["zeta.bin", "alpha.bin", "middle.img"] {
        ctx.server
            .add_target(ctx.repo_id, name.parse().unwrap(), create_item(1, DIGEST))
            .await
            .unwrap();
    }

    let page = ctx
        .server
        .list_targets(ctx.repo_id, TargetListQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    let names: Vec<&str> = page
        .values
        .iter()
        .map(|item| item.filename.as_str())
        .collect();
    assert_eq!(names, ["alpha.bin", "middle.img", "zeta.bin"]);

    let filtered = ctx
        .server
        .list_targets(
            ctx.repo_id,
            TargetListQuery {
                name_contains: Some(".bin".to_string()),
                ..TargetListQuery::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(filtered.total, 2);

    let second_page = ctx
        .server
        .list_targets(
            ctx.repo_id,
            TargetListQuery {
                offset: Some(1),
                limit: Some(1),
                ..TargetListQuery::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(second_page.total, 3);
    assert_eq!(second_page.values.len(), 1);
    assert_eq!(second_page.values[0].filename.as_str(), "middle.img");
}

#[tokio::test]
async fn proprietary_patch_respects_reserved_fields() {
    let ctx = new_repo().await;
    let filename: TargetFilename = "demo.bin".parse().unwrap();
    let mut request = create_item(1, DIGEST);
    request.name = Some("demo".to_string());
    request.version = Some("1.0".to_string());
    ctx.server
        .add_target(ctx.repo_id, filename.clone(), request)
        .await
        .unwrap();

    let before = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Targets)
        .await
        .unwrap();

    // An empty patch changes nothing, not even the role version.
    let untouched = ctx
        .server
        .patch_proprietary_custom(ctx.repo_id, &filename, serde_json::Map::new())
        .await
        .unwrap();
    assert!(untouched.custom.proprietary.is_empty());
    let after_empty = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Targets)
        .await
        .unwrap();
    assert_eq!(after_empty.version, before.version);

    // A patch that names a reserved field must not override it.
    let mut patch = serde_json::Map::new();
    patch.insert("name".to_string(), json!("hijacked"));
    patch.insert("fleet".to_string(), json!("canary"));
    let item = ctx
        .server
        .patch_proprietary_custom(ctx.repo_id, &filename, patch)
        .await
        .unwrap();
    assert_eq!(item.custom.name, "demo");
    assert_eq!(item.custom.proprietary["fleet"], json!("canary"));
    assert!(!item.custom.proprietary.contains_key("name"));

    // Patching again with a different value overwrites at the top level.
    let mut patch = serde_json::Map::new();
    patch.insert("fleet".to_string(), json!("stable"));
    let item = ctx
        .server
        .patch_proprietary_custom(ctx.repo_id, &filename, patch)
        .await
        .unwrap();
    assert_eq!(item.custom.proprietary["fleet"], json!("stable"));
    assert!(item.custom.updated_at >= item.custom.created_at);
}

#[tokio::test]
async fn edit_updates_only_named_fields() {
    let ctx = new_repo().await;
    let filename: TargetFilename = "demo.bin".parse().unwrap();
    ctx.server
        .add_target(ctx.repo_id, filename.clone(), create_item(1, DIGEST))
        .await
        .unwrap();

    let item = ctx
        .server
        .edit_target(
            ctx.repo_id,
            &filename,
            EditTargetItem {
                hardware_ids: Some(vec!["rpi4".to_string(), "rpi5".to_string()]),
                uri: Some("https://dl.example.com/demo.bin".parse().unwrap()),
                proprietary_custom: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(item.custom.hardware_ids, ["rpi4", "rpi5"]);
    assert!(item.custom.uri.is_some());

    // Unnamed fields survived.
    assert_eq!(item.length, 1);
}

#[tokio::test]
async fn upload_stores_blob_and_serves_it_back() {
    let ctx = new_repo().await;
    let filename: TargetFilename = "ota/fw.bin".parse().unwrap();
    let content = Bytes::from_static(b"firmware image");
    let item = ctx
        .server
        .upload_target(
            ctx.repo_id,
            filename.clone(),
            content.clone(),
            UploadParams {
                name: Some("fw".to_string()),
                version: Some("2.0".to_string()),
                ..UploadParams::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(item.length, content.len() as u64);
    assert_eq!(item.custom.cli_uploaded, Some(true));

    match ctx
        .server
        .download_target(ctx.repo_id, &filename)
        .await
        .unwrap()
    {
        TargetContent::Bytes(bytes) => assert_eq!(bytes, content),
        TargetContent::Redirect(uri) => panic!("expected stored bytes, got redirect to {uri}"),
    }

    // Uploading the same path again conflicts.
    let duplicate = ctx
        .server
        .upload_target(
            ctx.repo_id,
            filename.clone(),
            content,
            UploadParams::default(),
        )
        .await;
    assert!(matches!(duplicate, Err(Error::EntityAlreadyExists { .. })));
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
    let config = RepoServerConfig {
        max_target_bytes: 8,
        ..RepoServerConfig::default()
    };
    let ctx = new_repo_with_config(config).await;
    let result = ctx
        .server
        .upload_target(
            ctx.repo_id,
            "big.bin".parse().unwrap(),
            Bytes::from_static(b"way too much content"),
            UploadParams::default(),
        )
        .await;
    assert!(matches!(
        result,
        Err(Error::PayloadTooLarge { size: 20, max: 8 })
    ));
}

#[tokio::test]
async fn unmanaged_targets_redirect_or_fail() {
    let ctx = new_repo().await;

    // Registered with a URI: download redirects.
    let with_uri: TargetFilename = "external.bin".parse().unwrap();
    ctx.server
        .upload_target(
            ctx.repo_id,
            with_uri.clone(),
            Bytes::from_static(b"mirror copy"),
            UploadParams {
                file_uri: Some("https://mirror.example.com/external.bin".parse().unwrap()),
                ..UploadParams::default()
            },
        )
        .await
        .unwrap();
    match ctx
        .server
        .download_target(ctx.repo_id, &with_uri)
        .await
        .unwrap()
    {
        TargetContent::Redirect(uri) => {
            assert_eq!(uri.as_str(), "https://mirror.example.com/external.bin");
        }
        TargetContent::Bytes(_) => panic!("unmanaged target must not be stored"),
    }

    // Registered by metadata only, with no URI: download cannot be served.
    let without_uri: TargetFilename = "metadata-only.bin".parse().unwrap();
    ctx.server
        .add_target(ctx.repo_id, without_uri.clone(), create_item(1, DIGEST))
        .await
        .unwrap();
    assert!(matches!(
        ctx.server.download_target(ctx.repo_id, &without_uri).await,
        Err(Error::NoUriForUnmanagedTarget { .. })
    ));
}

#[tokio::test]
async fn delete_requires_an_online_targets_key() {
    let ctx = new_repo().await;
    let filename: TargetFilename = "demo.bin".parse().unwrap();
    ctx.server
        .add_target(ctx.repo_id, filename.clone(), create_item(1, DIGEST))
        .await
        .unwrap();

    // Deleting something that is not there is a 404.
    let missing: TargetFilename = "ghost.bin".parse().unwrap();
    assert!(matches!(
        ctx.server.delete_target(ctx.repo_id, &missing).await,
        Err(Error::MissingEntity { .. })
    ));

    // Take the targets key offline; deletion is now refused.
    let root = ctx.keyserver.find_root(ctx.repo_id).await.unwrap();
    let targets_keyid = root.signed.roles[&RoleType::Targets].keyids[0].clone();
    ctx.keyserver
        .delete_private_key(ctx.repo_id, &targets_keyid)
        .await
        .unwrap();
    assert!(matches!(
        ctx.server.delete_target(ctx.repo_id, &filename).await,
        Err(Error::PreconditionFailed { .. })
    ));
}

#[tokio::test]
async fn delete_removes_item_and_regenerates() {
    let ctx = new_repo().await;
    let filename: TargetFilename = "demo.bin".parse().unwrap();
    ctx.server
        .upload_target(
            ctx.repo_id,
            filename.clone(),
            Bytes::from_static(b"content"),
            UploadParams::default(),
        )
        .await
        .unwrap();

    ctx.server
        .delete_target(ctx.repo_id, &filename)
        .await
        .unwrap();
    let page = ctx
        .server
        .list_targets(ctx.repo_id, TargetListQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total, 0);
    assert!(matches!(
        ctx.server.download_target(ctx.repo_id, &filename).await,
        Err(Error::MissingEntity { .. })
    ));
}
