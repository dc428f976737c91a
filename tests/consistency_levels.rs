//! Consistency levels, quorum failures and write validation

mod common;

use common::{article_class, contents, paragraph, paragraph_class, TestCluster};
use replikv::common::{
    ConsistencyLevel, DeletionStrategy, Object, ObjectKey, Principal, PropertyValue, Reference,
    Role, RoleAuthorizer,
};
use replikv::coordinator::{ClassDef, DataType, Operation, OperationOutput};
use replikv::{Error, OpContext};
use std::sync::Arc;
use uuid::Uuid;

fn at(level: ConsistencyLevel) -> OpContext {
    OpContext::new().with_level(level)
}

#[tokio::test]
async fn test_one_succeeds_with_single_node() {
    let cluster = TestCluster::new(3, vec![paragraph_class(3, DeletionStrategy::DeleteOnConflict)]);
    let id = Uuid::new_v4();
    cluster.down(1);
    cluster.down(2);

    cluster
        .coordinator
        .put(paragraph(id, "x"), &at(ConsistencyLevel::One))
        .await
        .unwrap();
    let got = cluster
        .coordinator
        .get(&ObjectKey::new("Paragraph", id), &at(ConsistencyLevel::One))
        .await
        .unwrap();
    assert_eq!(contents(&got), Some("x"));
}

#[tokio::test]
async fn test_all_fails_with_one_node_down() {
    let cluster = TestCluster::new(3, vec![paragraph_class(3, DeletionStrategy::DeleteOnConflict)]);
    let id = Uuid::new_v4();
    cluster.down(3);

    let err = cluster
        .coordinator
        .put(paragraph(id, "x"), &at(ConsistencyLevel::All))
        .await
        .unwrap_err();
    match err {
        Error::QuorumUnreachable { needed, got, detail } => {
            assert_eq!(needed, 3);
            assert!(got <= 2);
            assert!(detail.contains("node3"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    // nothing is rolled back
    cluster.settle().await;
    assert_eq!(cluster.record_count(), 2);
}

#[tokio::test]
async fn test_quorum_read_survives_one_failure() {
    let cluster = TestCluster::new(3, vec![paragraph_class(3, DeletionStrategy::DeleteOnConflict)]);
    let id = Uuid::new_v4();
    cluster
        .coordinator
        .put(paragraph(id, "q"), &at(ConsistencyLevel::All))
        .await
        .unwrap();

    cluster.down(2);
    let key = ObjectKey::new("Paragraph", id);
    assert!(cluster
        .coordinator
        .exists(&key, &at(ConsistencyLevel::Quorum))
        .await
        .unwrap());

    cluster.down(3);
    assert!(matches!(
        cluster.coordinator.exists(&key, &at(ConsistencyLevel::Quorum)).await,
        Err(Error::QuorumUnreachable { needed: 2, got: 1, .. })
    ));
    assert_eq!(cluster.coordinator.metrics().quorum_failures.get(), 1);
}

#[tokio::test]
async fn test_factor_larger_than_cluster() {
    let cluster = TestCluster::new(2, vec![paragraph_class(3, DeletionStrategy::DeleteOnConflict)]);
    let err = cluster
        .coordinator
        .put(paragraph(Uuid::new_v4(), "x"), &OpContext::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InsufficientReplicas {
            needed: 3,
            available: 2
        }
    ));
    assert_eq!(cluster.record_count(), 0);
}

#[tokio::test]
async fn test_schema_barrier_blocks_writes_without_io() {
    let cluster = TestCluster::new(3, vec![paragraph_class(3, DeletionStrategy::DeleteOnConflict)]);
    // validation already sees a newer class version than the node applied
    let staged = cluster
        .schema
        .stage_class(
            paragraph_class(3, DeletionStrategy::DeleteOnConflict)
                .with_property("title", DataType::Text),
        )
        .unwrap();

    let id = Uuid::new_v4();
    let err = cluster
        .coordinator
        .put(paragraph(id, "x"), &OpContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SchemaVersionTimeout { version, .. } if version == staged));
    assert_eq!(cluster.record_count(), 0);

    // once applied, the same write goes through
    cluster.schema.mark_applied(staged);
    cluster
        .coordinator
        .put(paragraph(id, "x"), &OpContext::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn test_merge_keeps_other_properties() {
    let class = ClassDef::new(
        "Paragraph",
        replikv::common::ReplicationConfig::new(3, DeletionStrategy::TimeBasedResolution),
    )
    .with_property("contents", DataType::Text)
    .with_property("words", DataType::Int);
    let cluster = TestCluster::new(3, vec![class]);
    let id = Uuid::new_v4();
    let key = ObjectKey::new("Paragraph", id);
    let ctx = at(ConsistencyLevel::All);

    cluster.coordinator.put(paragraph(id, "text"), &ctx).await.unwrap();
    let patch = Object::new("Paragraph", id).with_property("words", PropertyValue::Int(1));
    cluster.coordinator.merge(patch, &ctx).await.unwrap();

    let got = cluster.coordinator.get(&key, &ctx).await.unwrap();
    assert_eq!(contents(&got), Some("text"));
    assert_eq!(got.properties.get("words"), Some(&PropertyValue::Int(1)));
    assert!(got.last_update > got.created_at);
}

#[tokio::test]
async fn test_add_references() {
    let cluster = TestCluster::new(
        3,
        vec![
            paragraph_class(3, DeletionStrategy::DeleteOnConflict),
            article_class(3),
        ],
    );
    let coordinator = &cluster.coordinator;
    let ctx = at(ConsistencyLevel::All);
    let article = Uuid::new_v4();
    let id = Uuid::new_v4();
    let key = ObjectKey::new("Paragraph", id);

    coordinator
        .put(
            Object::new("Article", article)
                .with_property("title", PropertyValue::Text("a".into())),
            &ctx,
        )
        .await
        .unwrap();
    coordinator.put(paragraph(id, "p"), &ctx).await.unwrap();

    let out = coordinator
        .execute(
            Operation::AddReferences {
                key: key.clone(),
                property: "ofArticle".into(),
                references: vec![Reference::to("Article", article)],
            },
            &ctx,
        )
        .await
        .unwrap();
    assert!(matches!(out, OperationOutput::Written { .. }));

    let got = coordinator.get(&key, &ctx).await.unwrap();
    assert_eq!(
        got.properties.get("ofArticle"),
        Some(&PropertyValue::References(vec![Reference::to("Article", article)]))
    );
    assert_eq!(contents(&got), Some("p"));

    // missing target
    let err = coordinator
        .add_references(&key, "ofArticle", vec![Reference::to("Article", Uuid::new_v4())], &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValidationFailed(_)));

    // not a reference property
    let err = coordinator
        .add_references(&key, "contents", vec![Reference::to("Article", article)], &ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValidationFailed(_)));

    // class-less beacon resolves to the only target class
    let bare = Reference {
        beacon: format!("{}{}", replikv::common::object::BEACON_SCHEME, article),
    };
    coordinator
        .add_references(&key, "ofArticle", vec![bare], &ctx)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_multi_tenant_isolation() {
    let cluster = TestCluster::new(
        3,
        vec![paragraph_class(3, DeletionStrategy::DeleteOnConflict).with_multi_tenancy(true)],
    );
    let coordinator = &cluster.coordinator;
    let id = Uuid::new_v4();
    let key = ObjectKey::new("Paragraph", id);
    let t1 = OpContext::new().with_tenant("t1");
    let t2 = OpContext::new().with_tenant("t2");

    coordinator.put(paragraph(id, "t1 data"), &t1).await.unwrap();
    assert!(coordinator.exists(&key, &t1).await.unwrap());
    assert!(!coordinator.exists(&key, &t2).await.unwrap());
    assert!(matches!(
        coordinator.get(&key, &OpContext::new()).await,
        Err(Error::ValidationFailed(_))
    ));
}

#[tokio::test]
async fn test_authorization_happens_first() {
    let cluster = TestCluster::new(3, vec![paragraph_class(3, DeletionStrategy::DeleteOnConflict)]);
    let TestCluster {
        nodes, coordinator, ..
    } = cluster;
    let coordinator = coordinator.with_authorizer(Arc::new(RoleAuthorizer));
    let id = Uuid::new_v4();

    let writer = OpContext::new().with_principal(Principal::new("w", Role::ReadWrite));
    let reader = OpContext::new().with_principal(Principal::new("r", Role::ReadOnly));

    coordinator.put(paragraph(id, "x"), &writer).await.unwrap();
    assert!(matches!(
        coordinator
            .delete(&ObjectKey::new("Paragraph", id), &reader)
            .await,
        Err(Error::Forbidden(_))
    ));
    assert!(nodes.iter().all(|n| n.store().exists(&ObjectKey::new("Paragraph", id), None)));
    assert!(matches!(
        coordinator
            .get(&ObjectKey::new("Paragraph", id), &OpContext::new())
            .await,
        Err(Error::Forbidden(_))
    ));
}

#[tokio::test]
async fn test_unknown_class_is_rejected() {
    let cluster = TestCluster::new(3, vec![paragraph_class(3, DeletionStrategy::DeleteOnConflict)]);
    let err = cluster
        .coordinator
        .put(Object::new("Chapter", Uuid::new_v4()), &OpContext::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ValidationFailed(_)));
    assert!(!err.is_retryable());
    assert_eq!(cluster.record_count(), 0);
}
