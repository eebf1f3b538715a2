// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

mod test_utils;

use bytes::Bytes;
use chrono::{Duration, Utc};
use maplit::hashmap;
use serde_json::json;
use std::collections::HashMap;
use std::num::NonZeroU64;
use test_utils::{new_repo, TestContext};
use tuf_reposerver::targets::UploadParams;
use tuf_reposerver::Error;
use tuf_schema::decoded::{Decoded, Hex};
use tuf_schema::{Hashes, RoleType, Signed, Target, Targets};

const DIGEST: &str = "af2bdbe1aa9b6ec1e2ade1d694f41fc71a831d0268e9891562113d8a62add1bf";

/// A target entry carrying the full custom metadata a new target must have.
fn full_target(length: u64) -> Target {
    Target {
        length,
        hashes: Hashes {
            sha256: DIGEST.parse().unwrap(),
            _extra: HashMap::new(),
        },
        custom: hashmap! {
            "name".to_string() => json!("pkg"),
            "version".to_string() => json!("1.0.0"),
            "hardwareIds".to_string() => json!(["rpi4"]),
        },
        _extra: HashMap::new(),
    }
}

/// Builds the next offline targets payload from the current one, letting the
/// caller mutate the document, and signs it with the repository's declared
/// targets key. Returns the payload and the checksum of the current targets.
async fn offline_payload(
    ctx: &TestContext,
    mutate: impl FnOnce(&mut Targets),
) -> (Signed<Targets>, Decoded<Hex>) {
    let current = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Targets)
        .await
        .unwrap();
    let parsed: Signed<Targets> = current.parse().unwrap();
    let mut doc = parsed.signed;
    doc.version = NonZeroU64::new(doc.version.get() + 1).unwrap();
    doc.expires = Utc::now() + Duration::days(30);
    mutate(&mut doc);
    (sign_targets(ctx, &doc).await, current.checksum)
}

async fn sign_targets(ctx: &TestContext, doc: &Targets) -> Signed<Targets> {
    let value = serde_json::to_value(doc).unwrap();
    let signed = ctx
        .keyserver
        .sign_payload(ctx.repo_id, RoleType::Targets, value)
        .await
        .unwrap();
    Signed {
        signed: doc.clone(),
        signatures: signed.signatures,
    }
}

#[tokio::test]
async fn checksum_preconditions_are_enforced_in_order() {
    let ctx = new_repo().await;
    let (payload, checksum) = offline_payload(&ctx, |doc| {
        doc.targets.insert("pkg.bin".parse().unwrap(), full_target(4));
    })
    .await;

    let snapshot_before = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Snapshot)
        .await
        .unwrap();
    let timestamp_before = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Timestamp)
        .await
        .unwrap();

    // Missing checksum while a targets role exists.
    assert!(matches!(
        ctx.server
            .put_offline_targets(ctx.repo_id, payload.clone(), None)
            .await,
        Err(Error::PreconditionRequired { .. })
    ));

    // Wrong checksum.
    assert!(matches!(
        ctx.server
            .put_offline_targets(
                ctx.repo_id,
                payload.clone(),
                Some(tuf_schema::sha256(b"junk"))
            )
            .await,
        Err(Error::PreconditionFailed { .. })
    ));

    // Correct checksum goes through and regenerates only snapshot and
    // timestamp.
    ctx.server
        .put_offline_targets(ctx.repo_id, payload.clone(), Some(checksum))
        .await
        .unwrap();

    let targets = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Targets)
        .await
        .unwrap();
    assert_eq!(targets.version, payload.signed.version);
    assert_eq!(
        targets.canonical_bytes,
        payload.canonical_form().unwrap()
    );

    let snapshot_after = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Snapshot)
        .await
        .unwrap();
    let timestamp_after = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Timestamp)
        .await
        .unwrap();
    assert_eq!(
        snapshot_after.version.get(),
        snapshot_before.version.get() + 1
    );
    assert_eq!(
        timestamp_after.version.get(),
        timestamp_before.version.get() + 1
    );

    // The catalog mirrors the push.
    let page = ctx
        .server
        .list_targets(
            ctx.repo_id,
            tuf_reposerver::targets::TargetListQuery::default(),
        )
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.values[0].custom.name, "pkg");
}

#[tokio::test]
async fn identical_re_push_is_a_no_op() {
    let ctx = new_repo().await;
    let (payload, checksum) = offline_payload(&ctx, |doc| {
        doc.targets.insert("pkg.bin".parse().unwrap(), full_target(4));
    })
    .await;
    ctx.server
        .put_offline_targets(ctx.repo_id, payload.clone(), Some(checksum))
        .await
        .unwrap();

    let current = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Targets)
        .await
        .unwrap();
    ctx.server
        .put_offline_targets(ctx.repo_id, payload.clone(), Some(current.checksum.clone()))
        .await
        .unwrap();

    // Nothing changed, bytes included.
    let after = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Targets)
        .await
        .unwrap();
    assert_eq!(after.version, current.version);
    assert_eq!(after.canonical_bytes, current.canonical_bytes);
}

#[tokio::test]
async fn version_skips_are_rejected() {
    let ctx = new_repo().await;
    let (mut payload, checksum) = offline_payload(&ctx, |doc| {
        doc.targets.insert("pkg.bin".parse().unwrap(), full_target(4));
    })
    .await;
    payload.signed.version = NonZeroU64::new(20).unwrap();
    let payload = sign_targets(&ctx, &payload.signed).await;

    match ctx
        .server
        .put_offline_targets(ctx.repo_id, payload, Some(checksum))
        .await
    {
        Err(Error::InvalidVersionBump {
            expected, given: 20, ..
        }) => assert_eq!(expected, 2),
        other => panic!("expected InvalidVersionBump, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_signatures_are_rejected() {
    let ctx = new_repo().await;

    // A corrupted signature no longer counts toward the threshold.
    let (mut payload, checksum) = offline_payload(&ctx, |doc| {
        doc.targets.insert("pkg.bin".parse().unwrap(), full_target(4));
    })
    .await;
    payload.signatures[0].sig = tuf_schema::sha256(b"garbage");
    assert!(matches!(
        ctx.server
            .put_offline_targets(ctx.repo_id, payload, Some(checksum.clone()))
            .await,
        Err(Error::PayloadSignatureInvalid { .. })
    ));

    // A signature by a key the root never declared is rejected outright.
    let (mut payload, checksum) = offline_payload(&ctx, |doc| {
        doc.targets.insert("pkg.bin".parse().unwrap(), full_target(4));
    })
    .await;
    payload.signatures[0].keyid = tuf_schema::sha256(b"stranger");
    assert!(matches!(
        ctx.server
            .put_offline_targets(ctx.repo_id, payload, Some(checksum))
            .await,
        Err(Error::PayloadSignatureInvalid { .. })
    ));
}

#[tokio::test]
async fn new_targets_must_be_well_formed() {
    let ctx = new_repo().await;

    // New target without custom metadata.
    let (payload, checksum) = offline_payload(&ctx, |doc| {
        let mut bare = full_target(4);
        bare.custom.clear();
        doc.targets.insert("bare.bin".parse().unwrap(), bare);
    })
    .await;
    match ctx
        .server
        .put_offline_targets(ctx.repo_id, payload, Some(checksum))
        .await
    {
        Err(Error::MalformedPayload { causes }) => {
            assert!(causes.iter().any(|cause| cause.contains("custom metadata")));
        }
        other => panic!("expected MalformedPayload, got {other:?}"),
    }

    // Zero-length target.
    let (payload, checksum) = offline_payload(&ctx, |doc| {
        doc.targets.insert("empty.bin".parse().unwrap(), full_target(0));
    })
    .await;
    match ctx
        .server
        .put_offline_targets(ctx.repo_id, payload, Some(checksum))
        .await
    {
        Err(Error::MalformedPayload { causes }) => {
            assert!(causes.iter().any(|cause| cause.contains("positive length")));
        }
        other => panic!("expected MalformedPayload, got {other:?}"),
    }
}

#[tokio::test]
async fn dropped_targets_lose_their_blobs() {
    let ctx = new_repo().await;
    ctx.server
        .upload_target(
            ctx.repo_id,
            "old.bin".parse().unwrap(),
            Bytes::from_static(b"old content"),
            UploadParams::default(),
        )
        .await
        .unwrap();
    let blob_path = ctx
        .blob_dir
        .path()
        .join(ctx.repo_id.to_string())
        .join("old.bin");
    assert!(blob_path.exists());

    let (payload, checksum) = offline_payload(&ctx, |doc| {
        let old: tuf_schema::TargetFilename = "old.bin".parse().unwrap();
        doc.targets.remove(&old);
        doc.targets.insert("new.bin".parse().unwrap(), full_target(4));
    })
    .await;
    ctx.server
        .put_offline_targets(ctx.repo_id, payload, Some(checksum))
        .await
        .unwrap();

    assert!(!blob_path.exists());
    let page = ctx
        .server
        .list_targets(
            ctx.repo_id,
            tuf_reposerver::targets::TargetListQuery::default(),
        )
        .await
        .unwrap();
    let names: Vec<&str> = page
        .values
        .iter()
        .map(|item| item.filename.as_str())
        .collect();
    assert_eq!(names, ["new.bin"]);
}

#[tokio::test]
async fn stale_checksums_fail_after_a_push() {
    let ctx = new_repo().await;
    let (payload, checksum) = offline_payload(&ctx, |doc| {
        doc.targets.insert("pkg.bin".parse().unwrap(), full_target(4));
    })
    .await;
    ctx.server
        .put_offline_targets(ctx.repo_id, payload, Some(checksum.clone()))
        .await
        .unwrap();

    // The old checksum no longer matches the current targets.
    let (next, _) = offline_payload(&ctx, |doc| {
        doc.targets.insert("more.bin".parse().unwrap(), full_target(4));
    })
    .await;
    assert!(matches!(
        ctx.server
            .put_offline_targets(ctx.repo_id, next, Some(checksum))
            .await,
        Err(Error::PreconditionFailed { .. })
    ));
}

#[tokio::test]
async fn offline_targets_are_served_after_the_key_goes_offline() {
    let ctx = new_repo().await;
    let (payload, checksum) = offline_payload(&ctx, |doc| {
        doc.targets.insert("pkg.bin".parse().unwrap(), full_target(4));
    })
    .await;
    ctx.server
        .put_offline_targets(ctx.repo_id, payload.clone(), Some(checksum))
        .await
        .unwrap();

    let root = ctx.keyserver.find_root(ctx.repo_id).await.unwrap();
    let targets_keyid = root.signed.roles[&RoleType::Targets].keyids[0].clone();
    ctx.keyserver
        .delete_private_key(ctx.repo_id, &targets_keyid)
        .await
        .unwrap();

    let row = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Targets)
        .await
        .unwrap();
    assert_eq!(row.version, payload.signed.version);
}
