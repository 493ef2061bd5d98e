use admin_panel::{
    models::UserType,
    session::{
        SessionClaims, SessionError, USER_ID_KEY, USER_NAME_KEY, USER_STATUS_KEY, USER_TYPE_KEY,
        UserSession, user_id_from_value, user_type_from_value,
    },
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower_sessions::{MemoryStore, Session};

fn fresh_session() -> UserSession {
    UserSession::new(Session::new(None, Arc::new(MemoryStore::default()), None))
}

fn claims() -> SessionClaims {
    SessionClaims {
        user_id: 42,
        user_type: UserType::Panel,
        user_status: true,
        user_name: "Ada".to_string(),
    }
}

#[tokio::test]
async fn test_start_writes_all_four_claims() {
    let session = fresh_session();
    assert!(session.is_anonymous().await.unwrap());

    session.start(&claims()).await.unwrap();

    assert!(!session.is_anonymous().await.unwrap());
    assert_eq!(session.user_id().await.unwrap(), 42);
    assert_eq!(session.user_type().await.unwrap(), UserType::Panel);
    assert_eq!(session.get::<bool>(USER_STATUS_KEY).await.unwrap(), Some(true));
    assert_eq!(
        session.get::<String>(USER_NAME_KEY).await.unwrap().as_deref(),
        Some("Ada")
    );
    assert_eq!(
        session.get_value(USER_TYPE_KEY).await.unwrap(),
        Some(Value::from("panel"))
    );
}

#[tokio::test]
async fn test_destroy_clears_identity() {
    let session = fresh_session();
    session.start(&claims()).await.unwrap();

    session.destroy().await.unwrap();

    assert!(session.is_anonymous().await.unwrap());
    assert!(matches!(
        session.user_id().await.unwrap_err(),
        SessionError::MissingUserId
    ));
    assert!(matches!(
        session.user_type().await.unwrap_err(),
        SessionError::MissingUserType
    ));
}

#[tokio::test]
async fn test_user_id_stored_as_float_is_accepted() {
    let session = fresh_session();
    session.set(USER_ID_KEY, 7.0_f64).await.unwrap();
    assert_eq!(session.user_id().await.unwrap(), 7);

    session.set(USER_ID_KEY, "7").await.unwrap();
    assert!(matches!(
        session.user_id().await.unwrap_err(),
        SessionError::InvalidUserId(_)
    ));
}

#[tokio::test]
async fn test_unknown_user_type_is_rejected() {
    let session = fresh_session();
    session.set(USER_TYPE_KEY, "superuser").await.unwrap();
    assert!(matches!(
        session.user_type().await.unwrap_err(),
        SessionError::InvalidUserType(_)
    ));
}

#[test]
fn test_user_id_normalization() {
    assert_eq!(user_id_from_value(&json!(5)).unwrap(), 5);
    assert_eq!(user_id_from_value(&json!(5_i64)).unwrap(), 5);
    assert_eq!(user_id_from_value(&json!(5.0)).unwrap(), 5);
    assert_eq!(user_id_from_value(&json!(u64::MAX)).unwrap(), u64::MAX);

    for bad in [
        json!(0),
        json!(0.0),
        json!(-3),
        json!(-3.0),
        json!(2.5),
        json!("5"),
        json!(null),
        json!(true),
        json!([5]),
    ] {
        assert!(
            matches!(user_id_from_value(&bad), Err(SessionError::InvalidUserId(_))),
            "value={bad}"
        );
    }
}

#[test]
fn test_user_type_normalization() {
    assert_eq!(user_type_from_value(&json!("panel")).unwrap(), UserType::Panel);
    assert_eq!(
        user_type_from_value(&json!("dashboard")).unwrap(),
        UserType::Dashboard
    );
    assert!(user_type_from_value(&json!("Panel")).is_err());
    assert!(user_type_from_value(&json!(1)).is_err());
}
