//! Storage Integration Tests.
//!
//! These tests exercise the DataStore contract through generic helpers so any
//! backend can be plugged into the same scenarios. Only the in-memory backend
//! ships today.

use rbac_storage::{
    DataStore, MemoryDataStore, NewPolicy, NewRole, NewRoleParent, NewRolePolicy, PolicyFilter,
    RoleFilter, RoleParentFilter, RolePatch, RolePolicyFilter, RolePolicyPatch,
};

/// Create an in-memory store for testing.
fn create_memory_store() -> MemoryDataStore {
    MemoryDataStore::new()
}

/// Soft delete then restore a role; everything but timestamps must survive.
async fn run_role_delete_restore_test<S: DataStore>(store: &S) {
    let mut input = NewRole::new("auditor");
    input.description = Some("Read-only access".to_string());
    let created = store.create_roles(vec![input]).await.unwrap();
    let role = created[0].clone();

    let deleted = store.delete_roles(&[role.id.clone()]).await.unwrap();
    assert_eq!(deleted, vec![role.id.clone()]);

    let listed = store.list_roles(&RoleFilter::default()).await.unwrap();
    assert!(listed.iter().all(|r| r.id != role.id));

    store.restore_roles(&deleted).await.unwrap();
    let listed = store
        .list_roles(&RoleFilter::by_ids([role.id.clone()]))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, role.name);
    assert_eq!(listed[0].description, role.description);
    assert_eq!(listed[0].metadata, role.metadata);
    assert!(listed[0].deleted_at.is_none());
}

/// Assignment lifecycle: create, duplicate, patch, delete, restore.
async fn run_assignment_lifecycle_test<S: DataStore>(store: &S) {
    let roles = store
        .create_roles(vec![NewRole::new("editor")])
        .await
        .unwrap();
    let policies = store
        .create_policies(vec![NewPolicy::new("order", "update")])
        .await
        .unwrap();

    let assignment = store
        .create_role_policies(vec![NewRolePolicy::new(&roles[0].id, &policies[0].id)])
        .await
        .unwrap()
        .remove(0);

    let err = store
        .create_role_policies(vec![NewRolePolicy::new(&roles[0].id, &policies[0].id)])
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let mut metadata = serde_json::Map::new();
    metadata.insert("source".to_string(), serde_json::json!("import"));
    let updated = store
        .update_role_policies(
            &RolePolicyFilter::by_ids([assignment.id.clone()]),
            &RolePolicyPatch {
                metadata: Some(Some(metadata.clone())),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated[0].metadata, Some(metadata));

    store
        .delete_role_policies(&[assignment.id.clone()])
        .await
        .unwrap();
    let remaining = store
        .list_role_policies(&RolePolicyFilter {
            role_ids: Some(vec![roles[0].id.clone()]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(remaining.is_empty());

    store
        .restore_role_policies(&[assignment.id.clone()])
        .await
        .unwrap();
    let remaining = store
        .list_role_policies(&RolePolicyFilter {
            role_ids: Some(vec![roles[0].id.clone()]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn test_memory_role_delete_restore() {
    let store = create_memory_store();
    run_role_delete_restore_test(&store).await;
}

#[tokio::test]
async fn test_memory_assignment_lifecycle() {
    let store = create_memory_store();
    run_assignment_lifecycle_test(&store).await;
}

#[tokio::test]
async fn test_deleted_policy_hides_its_assignments() {
    let store = create_memory_store();
    let roles = store
        .create_roles(vec![NewRole::new("viewer")])
        .await
        .unwrap();
    let policies = store
        .create_policies(vec![NewPolicy::new("product", "read")])
        .await
        .unwrap();
    store
        .create_role_policies(vec![NewRolePolicy::new(&roles[0].id, &policies[0].id)])
        .await
        .unwrap();

    store
        .delete_policies(&[policies[0].id.clone()])
        .await
        .unwrap();
    let visible = store
        .list_role_policies(&RolePolicyFilter::default())
        .await
        .unwrap();
    assert!(visible.is_empty());

    let filtered = store
        .list_policies(&PolicyFilter {
            resource: Some("PRODUCT".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(filtered.is_empty());
}

#[tokio::test]
async fn test_role_rename_conflict_leaves_store_unchanged() {
    let store = create_memory_store();
    let roles = store
        .create_roles(vec![NewRole::new("admin"), NewRole::new("support")])
        .await
        .unwrap();

    let err = store
        .update_roles(
            &RoleFilter::by_ids([roles[1].id.clone()]),
            &RolePatch {
                name: Some("admin".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let support = store
        .list_roles(&RoleFilter::by_ids([roles[1].id.clone()]))
        .await
        .unwrap();
    assert_eq!(support[0].name, "support");
}

#[tokio::test]
async fn test_parent_edges_are_unique_and_direct_only() {
    let store = create_memory_store();
    let roles = store
        .create_roles(vec![
            NewRole::new("child"),
            NewRole::new("parent"),
            NewRole::new("grandparent"),
        ])
        .await
        .unwrap();
    let (child, parent, grandparent) = (&roles[0].id, &roles[1].id, &roles[2].id);

    store
        .create_role_parents(vec![
            NewRoleParent::new(child, parent),
            NewRoleParent::new(parent, grandparent),
        ])
        .await
        .unwrap();

    let err = store
        .create_role_parents(vec![NewRoleParent::new(child, parent)])
        .await
        .unwrap_err();
    assert!(err.is_conflict());

    let direct = store.list_parent_edges(child).await.unwrap();
    assert_eq!(direct.len(), 1);
    assert_eq!(&direct[0].parent_id, parent);

    let by_parent = store
        .list_role_parents(&RoleParentFilter {
            parent_ids: Some(vec![grandparent.clone()]),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_parent.len(), 1);
    assert_eq!(&by_parent[0].role_id, parent);
}
