mod common;

use admin_panel::{
    query_params::ListParams,
    repository::{BaseRepository, RepoError, Repository, fields},
    scope::RequestScope,
    store::{FieldMap, MemoryStore, StoreError},
};
use common::{Task, seed_tasks, task, task_repo};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn names(items: &[Task]) -> Vec<&str> {
    items.iter().map(|t| t.name.as_str()).collect()
}

fn ids(items: &[Task]) -> Vec<u64> {
    items.iter().map(|t| t.id).collect()
}

fn params(sort_by: &str, order_by: &str) -> ListParams {
    ListParams {
        sort_by: sort_by.to_string(),
        order_by: order_by.to_string(),
        ..ListParams::default()
    }
}

fn actor(id: u64) -> RequestScope {
    RequestScope::for_actor(id)
}

// --- Listing ---

#[tokio::test]
async fn test_get_all_ignores_sort_column_outside_allow_list() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(&repo, &[("b", "pending"), ("a", "pending"), ("c", "pending")]).await;

    // `name` is not in the default allow-list, and the injection attempt never reaches the store.
    for sort_by in ["name", "name; DROP TABLE tasks", "password"] {
        let (items, total) = repo
            .get_all(&RequestScope::anonymous(), &params(sort_by, "asc"))
            .await
            .unwrap();
        assert_eq!(total, 3);
        assert_eq!(ids(&items), vec![1, 2, 3], "sort_by={sort_by}");
    }
}

#[tokio::test]
async fn test_get_all_sorts_by_allowed_column() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store).with_sort_columns(["id", "name"]);
    seed_tasks(&repo, &[("b", "pending"), ("a", "pending"), ("c", "pending")]).await;

    let (items, _) = repo
        .get_all(&RequestScope::anonymous(), &params("name", "asc"))
        .await
        .unwrap();
    assert_eq!(names(&items), vec!["a", "b", "c"]);

    let (items, _) = repo
        .get_all(&RequestScope::anonymous(), &params("name", "desc"))
        .await
        .unwrap();
    assert_eq!(names(&items), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn test_set_allowed_sort_columns_replaces_the_list() {
    let store = Arc::new(MemoryStore::new());
    let mut repo = task_repo(&store);
    repo.set_allowed_sort_columns(["name"]);

    assert!(repo.allowed_sort_columns().contains("name"));
    assert!(!repo.allowed_sort_columns().contains("created_at"));
}

#[tokio::test]
async fn test_get_all_uses_default_direction_for_unknown_order() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(&repo, &[("a", "x"), ("b", "x"), ("c", "x")]).await;

    for order_by in ["", "sideways", "ascending", "1"] {
        let (items, _) = repo
            .get_all(&RequestScope::anonymous(), &params("id", order_by))
            .await
            .unwrap();
        assert_eq!(ids(&items), vec![3, 2, 1], "order_by={order_by}");
    }

    // Case does not matter for the valid values.
    let (items, _) = repo
        .get_all(&RequestScope::anonymous(), &params("id", "ASC"))
        .await
        .unwrap();
    assert_eq!(ids(&items), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_get_all_with_no_matches_skips_the_row_query() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);

    let (items, total) = repo
        .get_all(&RequestScope::anonymous(), &ListParams::default())
        .await
        .unwrap();

    assert!(items.is_empty());
    assert_eq!(total, 0);
    let calls = store.calls();
    assert_eq!(calls.counts, 1);
    assert_eq!(calls.selects, 0);
}

#[tokio::test]
async fn test_get_all_paginates_and_reports_full_total() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    let seeds: Vec<(String, &str)> = (1..=25).map(|i| (format!("task {i}"), "open")).collect();
    let seeds: Vec<(&str, &str)> = seeds.iter().map(|(n, s)| (n.as_str(), *s)).collect();
    seed_tasks(&repo, &seeds).await;

    let page_three = ListParams {
        page: 3,
        per_page: 10,
        order_by: "asc".to_string(),
        ..ListParams::default()
    };
    let (items, total) = repo
        .get_all(&RequestScope::anonymous(), &page_three)
        .await
        .unwrap();
    assert_eq!(total, 25);
    assert_eq!(ids(&items), vec![21, 22, 23, 24, 25]);

    // Out-of-range paging input is normalized, not rejected.
    let wild = ListParams {
        page: -4,
        per_page: 10_000,
        ..ListParams::default()
    };
    let (items, total) = repo.get_all(&RequestScope::anonymous(), &wild).await.unwrap();
    assert_eq!(total, 25);
    assert_eq!(items.len(), 25);
}

#[tokio::test]
async fn test_get_all_filters_by_folded_name_and_exact_status() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(
        &repo,
        &[
            ("Çağrı Yılmaz", "active"),
            ("cagri demir", "passive"),
            ("Ayşe Öztürk", "active"),
        ],
    )
    .await;

    let by_name = ListParams {
        name: "  CAGRI ".to_string(),
        ..ListParams::default()
    };
    let (_, total) = repo.get_all(&RequestScope::anonymous(), &by_name).await.unwrap();
    assert_eq!(total, 2);

    let by_name_and_status = ListParams {
        name: "çağrı".to_string(),
        status: "active".to_string(),
        ..ListParams::default()
    };
    let (items, total) = repo
        .get_all(&RequestScope::anonymous(), &by_name_and_status)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(names(&items), vec!["Çağrı Yılmaz"]);

    let by_type = ListParams {
        kind: "chore".to_string(),
        ..ListParams::default()
    };
    let count = repo
        .get_count(&RequestScope::anonymous(), &by_type)
        .await
        .unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_get_count_matches_get_all_total() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(&repo, &[("a", "open"), ("b", "closed"), ("c", "open")]).await;

    let open = ListParams {
        status: "open".to_string(),
        per_page: 1,
        ..ListParams::default()
    };
    let scope = RequestScope::anonymous();
    let (items, total) = repo.get_all(&scope, &open).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(repo.get_count(&scope, &open).await.unwrap(), total);
    assert_eq!(repo.count_all(&scope).await.unwrap(), 3);
}

// --- Create / read ---

#[tokio::test]
async fn test_create_assigns_id_and_timestamps() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);

    let mut t = task("write docs", "open");
    repo.create(&RequestScope::anonymous(), &mut t).await.unwrap();

    assert_eq!(t.id, 1);
    assert_eq!(t.audit.created_at, t.audit.updated_at);
    let loaded = repo.get_by_id(&RequestScope::anonymous(), 1).await.unwrap();
    assert_eq!(loaded.name, "write docs");
    assert_eq!(loaded.audit.created_at, t.audit.created_at);
    assert!(loaded.audit.deleted_at.is_none());
}

#[tokio::test]
async fn test_bulk_create_is_one_statement() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);

    let mut batch = vec![task("a", "open"), task("b", "open"), task("c", "open")];
    repo.bulk_create(&RequestScope::anonymous(), &mut batch)
        .await
        .unwrap();

    assert_eq!(ids(&batch), vec![1, 2, 3]);
    assert_eq!(store.calls().inserts, 1);
}

#[tokio::test]
async fn test_bulk_create_failure_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    store.fail_writes_after(0);

    let mut batch = vec![task("a", "open"), task("b", "open")];
    let err = repo
        .bulk_create(&RequestScope::anonymous(), &mut batch)
        .await
        .unwrap_err();

    assert!(matches!(err, RepoError::Store(StoreError::Unavailable(_))));
    assert_eq!(repo.count_all(&RequestScope::anonymous()).await.unwrap(), 0);
}

#[tokio::test]
async fn test_get_by_id_missing_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);

    let err = repo
        .get_by_id(&RequestScope::anonymous(), 99)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn test_find_one_returns_lowest_id_match() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(&repo, &[("a", "open"), ("b", "done"), ("c", "done")]).await;

    let scope = RequestScope::anonymous();
    let found = repo
        .find_one(&scope, &fields(json!({ "status": "done" })).unwrap())
        .await
        .unwrap();
    assert_eq!(found.name, "b");

    let missing = repo
        .find_one(&scope, &fields(json!({ "status": "archived" })).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(missing, RepoError::NotFound));

    let empty = repo.find_one(&scope, &FieldMap::new()).await.unwrap_err();
    assert!(matches!(empty, RepoError::EmptyCondition));
}

// --- Update ---

#[tokio::test]
async fn test_update_stamps_actor_when_positive() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(&repo, &[("a", "open"), ("b", "open")]).await;
    let scope = RequestScope::anonymous();

    repo.update(&scope, 1, fields(json!({ "status": "done" })).unwrap(), 7)
        .await
        .unwrap();
    let stamped = repo.get_by_id(&scope, 1).await.unwrap();
    assert_eq!(stamped.status, "done");
    assert_eq!(stamped.audit.updated_by, Some(7));

    repo.update(&scope, 2, fields(json!({ "status": "done" })).unwrap(), 0)
        .await
        .unwrap();
    let unstamped = repo.get_by_id(&scope, 2).await.unwrap();
    assert_eq!(unstamped.status, "done");
    assert_eq!(unstamped.audit.updated_by, None);
}

#[tokio::test]
async fn test_update_missing_row_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);

    let err = repo
        .update(
            &RequestScope::anonymous(),
            42,
            fields(json!({ "status": "done" })).unwrap(),
            1,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn test_update_refuses_protected_columns() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(&repo, &[("a", "open")]).await;

    for column in ["id", "created_at", "deleted_at", "deleted_by"] {
        let mut map = FieldMap::new();
        map.insert(column.to_string(), Value::from(5));
        let err = repo
            .update(&RequestScope::anonymous(), 1, map, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::ProtectedColumn(ref c) if c == column));
    }
    assert_eq!(store.calls().updates, 0);
}

#[tokio::test]
async fn test_bulk_update_stamps_every_matching_row() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(
        &repo,
        &[("a", "pending"), ("b", "pending"), ("c", "open"), ("d", "pending")],
    )
    .await;
    let scope = RequestScope::anonymous();

    let affected = repo
        .bulk_update(
            &scope,
            &fields(json!({ "status": "pending" })).unwrap(),
            fields(json!({ "status": "done" })).unwrap(),
            7,
        )
        .await
        .unwrap();
    assert_eq!(affected, 3);

    for id in [1, 2, 4] {
        let t = repo.get_by_id(&scope, id).await.unwrap();
        assert_eq!(t.status, "done");
        assert_eq!(t.audit.updated_by, Some(7));
    }
    let untouched = repo.get_by_id(&scope, 3).await.unwrap();
    assert_eq!(untouched.status, "open");
    assert_eq!(untouched.audit.updated_by, None);
}

#[tokio::test]
async fn test_bulk_update_with_no_matches_is_not_an_error() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(&repo, &[("a", "open")]).await;

    let affected = repo
        .bulk_update(
            &RequestScope::anonymous(),
            &fields(json!({ "status": "pending" })).unwrap(),
            fields(json!({ "status": "done" })).unwrap(),
            7,
        )
        .await
        .unwrap();
    assert_eq!(affected, 0);
}

#[tokio::test]
async fn test_bulk_update_requires_a_condition() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);

    let err = repo
        .bulk_update(
            &RequestScope::anonymous(),
            &FieldMap::new(),
            fields(json!({ "status": "done" })).unwrap(),
            7,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::EmptyCondition));
    assert_eq!(store.calls().writes(), 0);
}

// --- Soft delete ---

#[tokio::test]
async fn test_delete_stamps_deleted_by_and_keeps_the_row() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(&repo, &[("a", "open"), ("b", "open")]).await;

    repo.delete(&actor(7), 1).await.unwrap();

    let err = repo.get_by_id(&actor(7), 1).await.unwrap_err();
    assert!(matches!(err, RepoError::NotFound));

    let row = store.raw_row("tasks", 1).await.expect("row still stored");
    assert_eq!(row.get("deleted_by"), Some(&Value::from(7)));
    assert!(row.get("deleted_at").is_some_and(|v| !v.is_null()));

    let audited = repo.find_with_deleted(&actor(7), 1).await.unwrap();
    assert_eq!(audited.audit.deleted_by, Some(7));
    assert!(audited.audit.is_deleted());

    // The other row is untouched and the live count drops by one.
    assert_eq!(repo.count_all(&actor(7)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_delete_without_actor_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(&repo, &[("a", "open")]).await;
    let before = store.calls();

    for scope in [RequestScope::anonymous(), RequestScope::for_actor(0)] {
        let err = repo.delete(&scope, 1).await.unwrap_err();
        assert!(matches!(err, RepoError::MissingActor));
    }

    assert_eq!(store.calls(), before);
    assert!(repo.get_by_id(&RequestScope::anonymous(), 1).await.is_ok());
}

#[tokio::test]
async fn test_delete_missing_or_already_deleted_is_not_found() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(&repo, &[("a", "open")]).await;

    assert!(matches!(
        repo.delete(&actor(3), 99).await.unwrap_err(),
        RepoError::NotFound
    ));

    repo.delete(&actor(3), 1).await.unwrap();
    assert!(matches!(
        repo.delete(&actor(4), 1).await.unwrap_err(),
        RepoError::NotFound
    ));
    // The first deleter stays on record.
    let row = store.raw_row("tasks", 1).await.unwrap();
    assert_eq!(row.get("deleted_by"), Some(&Value::from(3)));
}

#[tokio::test]
async fn test_delete_never_soft_deletes_after_a_failed_stamp() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(&repo, &[("a", "open")]).await;
    store.fail_writes_after(0);

    let err = repo.delete(&actor(7), 1).await.unwrap_err();
    assert!(matches!(err, RepoError::Store(_)));
    assert_eq!(store.calls().soft_deletes, 0);

    let row = store.raw_row("tasks", 1).await.unwrap();
    assert!(row.get("deleted_at").is_none_or(Value::is_null));
}

#[tokio::test]
async fn test_bulk_delete_removes_every_match() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(&repo, &[("a", "done"), ("b", "open"), ("c", "done")]).await;

    let deleted = repo
        .bulk_delete(&actor(5), &fields(json!({ "status": "done" })).unwrap())
        .await
        .unwrap();
    assert_eq!(deleted, 2);

    for id in [1, 3] {
        let row = store.raw_row("tasks", id).await.unwrap();
        assert_eq!(row.get("deleted_by"), Some(&Value::from(5)));
    }
    assert_eq!(repo.count_all(&actor(5)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_bulk_delete_stops_at_first_failure() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(&repo, &[("a", "done"), ("b", "done"), ("c", "done")]).await;

    // Row 1: stamp + delete. Row 2: stamp, then the delete fails.
    store.fail_writes_after(3);
    let err = repo
        .bulk_delete(&actor(9), &fields(json!({ "status": "done" })).unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Store(StoreError::Unavailable(_))));

    let first = store.raw_row("tasks", 1).await.unwrap();
    assert!(first.get("deleted_at").is_some_and(|v| !v.is_null()));
    assert_eq!(first.get("deleted_by"), Some(&Value::from(9)));

    // Stamped but not deleted: the accepted partial state.
    let second = store.raw_row("tasks", 2).await.unwrap();
    assert!(second.get("deleted_at").is_none_or(Value::is_null));
    assert_eq!(second.get("deleted_by"), Some(&Value::from(9)));

    let third = store.raw_row("tasks", 3).await.unwrap();
    assert!(third.get("deleted_by").is_none_or(Value::is_null));
}

#[tokio::test]
async fn test_bulk_delete_requires_actor_and_condition() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    seed_tasks(&repo, &[("a", "done")]).await;

    let err = repo
        .bulk_delete(
            &RequestScope::anonymous(),
            &fields(json!({ "status": "done" })).unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::MissingActor));

    let err = repo.bulk_delete(&actor(1), &FieldMap::new()).await.unwrap_err();
    assert!(matches!(err, RepoError::EmptyCondition));
    assert_eq!(store.calls().writes(), 1);
}

// --- Request scope ---

#[tokio::test]
async fn test_cancelled_scope_never_reaches_the_store() {
    let store = Arc::new(MemoryStore::new());
    let repo = task_repo(&store);
    let before = store.calls();

    let cancel = CancellationToken::new();
    let scope = RequestScope::for_actor(1).with_cancellation(cancel.clone());
    assert!(!scope.is_cancelled());
    cancel.cancel();
    assert!(scope.is_cancelled());

    assert!(matches!(
        repo.get_all(&scope, &ListParams::default()).await.unwrap_err(),
        RepoError::Cancelled
    ));
    assert!(matches!(
        repo.bulk_delete(&scope, &fields(json!({ "status": "done" })).unwrap())
            .await
            .unwrap_err(),
        RepoError::Cancelled
    ));
    assert_eq!(store.calls(), before);
}

#[tokio::test]
async fn test_expired_deadline_fails_fast() {
    let store = Arc::new(MemoryStore::new());
    let repo: BaseRepository<Task> = task_repo(&store);

    let scope = RequestScope::anonymous().with_deadline(tokio::time::Instant::now());
    tokio::time::sleep(Duration::from_millis(1)).await;

    let err = repo.get_by_id(&scope, 1).await.unwrap_err();
    assert!(matches!(err, RepoError::DeadlineExceeded));
    assert_eq!(store.calls().reads(), 0);
}

#[tokio::test]
async fn test_fields_helper_requires_an_object() {
    assert!(fields(json!({ "a": 1 })).is_ok());
    assert!(matches!(fields(json!([1, 2])), Err(RepoError::InvalidFields)));
}
