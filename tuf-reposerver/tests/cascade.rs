// Copyright 2019 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: MIT OR Apache-2.0

mod test_utils;

use chrono::{Duration, Utc};
use test_utils::{create_item, new_repo, new_repo_with_config};
use tuf_reposerver::{Error, RepoServerConfig};
use tuf_schema::{RoleType, Snapshot, Targets, Timestamp};

const DIGEST: &str = "af2bdbe1aa9b6ec1e2ade1d694f41fc71a831d0268e9891562113d8a62add1bf";

#[tokio::test]
async fn fresh_repo_serves_initial_roles() {
    let ctx = new_repo().await;
    for role_type in [RoleType::Targets, RoleType::Snapshot, RoleType::Timestamp] {
        let row = ctx.server.signed_role(ctx.repo_id, role_type).await.unwrap();
        assert_eq!(row.version.get(), 1, "{role_type} should start at 1");
    }
    let targets = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Targets)
        .await
        .unwrap()
        .parse::<Targets>()
        .unwrap();
    assert!(targets.signed.targets.is_empty());
}

#[tokio::test]
async fn adding_a_target_cascades_through_the_roles() {
    let ctx = new_repo().await;
    let targets_row = ctx
        .server
        .add_target(ctx.repo_id, "myfile".parse().unwrap(), create_item(2, DIGEST))
        .await
        .unwrap();
    assert_eq!(targets_row.version.get(), 2);

    let targets = targets_row.parse::<Targets>().unwrap();
    let filename: tuf_schema::TargetFilename = "myfile".parse().unwrap();
    let entry = &targets.signed.targets[&filename];
    assert_eq!(entry.length, 2);
    assert_eq!(entry.hashes.sha256.to_string(), DIGEST);

    // The targets payload verifies under the root's declared targets keys.
    let root = ctx.keyserver.find_root(ctx.repo_id).await.unwrap();
    let canonical = tuf_schema::canonical_bytes(&targets.signed, "targets").unwrap();
    tuf_schema::verify_signatures(
        &root.signed.keys,
        &root.signed.roles[&RoleType::Targets],
        "targets",
        &canonical,
        &targets.signatures,
    )
    .unwrap();

    // snapshot references exactly this targets document.
    let snapshot_row = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Snapshot)
        .await
        .unwrap();
    assert_eq!(snapshot_row.version.get(), 2);
    let snapshot = snapshot_row.parse::<Snapshot>().unwrap();
    let targets_meta = &snapshot.signed.meta["targets.json"];
    assert_eq!(targets_meta.version, targets_row.version);
    assert_eq!(targets_meta.length, Some(targets_row.length));
    assert_eq!(
        targets_meta.hashes.as_ref().unwrap().sha256,
        targets_row.checksum
    );
    assert!(snapshot.signed.meta.contains_key("root.json"));

    // timestamp references exactly this snapshot.
    let timestamp_row = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Timestamp)
        .await
        .unwrap();
    let timestamp = timestamp_row.parse::<Timestamp>().unwrap();
    let snapshot_meta = &timestamp.signed.meta["snapshot.json"];
    assert_eq!(snapshot_meta.version, snapshot_row.version);
    assert_eq!(snapshot_meta.length, snapshot_row.length);
    assert_eq!(snapshot_meta.hashes.sha256, snapshot_row.checksum);
}

#[tokio::test]
async fn expire_not_before_bumps_once_and_sticks() {
    let ctx = new_repo().await;
    let not_before = Utc::now() + Duration::days(180);
    ctx.server
        .set_targets_expire_not_before(ctx.repo_id, not_before)
        .await
        .unwrap();

    let row = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Targets)
        .await
        .unwrap();
    assert_eq!(row.version.get(), 2);
    assert!(row.expires >= not_before - Duration::seconds(1));

    // Serving the role again does not regenerate it.
    let again = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Targets)
        .await
        .unwrap();
    assert_eq!(again.version.get(), 2);
    assert_eq!(again.checksum, row.checksum);
}

#[tokio::test]
async fn rotation_regenerates_the_derived_roles() {
    let ctx = new_repo().await;
    let old_root = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Root)
        .await
        .unwrap();
    let old_targets = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Targets)
        .await
        .unwrap();

    ctx.server.rotate_root(ctx.repo_id).await.unwrap();

    let new_root = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Root)
        .await
        .unwrap();
    assert_eq!(new_root.version.get(), old_root.version.get() + 1);
    let new_targets = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Targets)
        .await
        .unwrap();
    assert_eq!(new_targets.version.get(), old_targets.version.get() + 1);

    // snapshot references the rotated root version.
    let snapshot = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Snapshot)
        .await
        .unwrap()
        .parse::<Snapshot>()
        .unwrap();
    assert_eq!(snapshot.signed.meta["root.json"].version, new_root.version);
}

#[tokio::test]
async fn short_lived_timestamp_is_resigned_on_read() {
    let config = RepoServerConfig {
        // Every signed timestamp is already inside the refresh window, so
        // each read re-signs it.
        timestamp_expiry: Duration::minutes(30),
        timestamp_extension: Duration::minutes(10),
        ..RepoServerConfig::default()
    };
    let ctx = new_repo_with_config(config).await;
    let first = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Timestamp)
        .await
        .unwrap();
    let second = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Timestamp)
        .await
        .unwrap();
    assert_eq!(second.version.get(), first.version.get() + 1);
    assert!(second.expires > first.expires);

    // Only the timestamp moved; the snapshot reference is unchanged.
    let snapshot = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Snapshot)
        .await
        .unwrap();
    let timestamp = second.parse::<Timestamp>().unwrap();
    assert_eq!(
        timestamp.signed.meta["snapshot.json"].version,
        snapshot.version
    );
}

#[tokio::test]
async fn concurrent_writers_never_diverge() {
    let ctx = new_repo().await;
    let first = ctx.server.add_target(
        ctx.repo_id,
        "a.bin".parse().unwrap(),
        create_item(1, DIGEST),
    );
    let second = ctx.server.add_target(
        ctx.repo_id,
        "b.bin".parse().unwrap(),
        create_item(1, DIGEST),
    );
    let (first, second) = tokio::join!(first, second);

    let failures = [&first, &second]
        .iter()
        .filter(|result| result.is_err())
        .count();
    assert!(failures <= 1, "at most one writer may lose the race");

    // A loser fails with InvalidVersionBump and retries, after which the
    // write goes through.
    for (filename, result) in [("a.bin", first), ("b.bin", second)] {
        if let Err(err) = result {
            assert!(matches!(err, Error::InvalidVersionBump { .. }));
            ctx.server
                .add_target(
                    ctx.repo_id,
                    filename.parse().unwrap(),
                    create_item(1, DIGEST),
                )
                .await
                .unwrap();
        }
    }

    // After retries the catalog and roles agree.
    let row = ctx
        .server
        .signed_role(ctx.repo_id, RoleType::Targets)
        .await
        .unwrap();
    let targets = row.parse::<Targets>().unwrap();
    let listed = ctx
        .server
        .list_targets(ctx.repo_id, tuf_reposerver::targets::TargetListQuery::default())
        .await
        .unwrap();
    assert_eq!(targets.signed.targets.len() as u64, listed.total);
}

#[tokio::test]
async fn historical_roots_are_proxied() {
    let ctx = new_repo().await;
    ctx.server.rotate_root(ctx.repo_id).await.unwrap();
    let v1 = ctx
        .server
        .root_version(ctx.repo_id, std::num::NonZeroU64::new(1).unwrap())
        .await
        .unwrap();
    assert_eq!(v1.version.get(), 1);
    let missing = ctx
        .server
        .root_version(ctx.repo_id, std::num::NonZeroU64::new(7).unwrap())
        .await;
    assert!(matches!(missing, Err(Error::MissingEntity { .. })));
}
