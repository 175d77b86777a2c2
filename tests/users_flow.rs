mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{
    acquire_db_lock, error_field, read_json, xlsx_fixture, MultipartForm, TestApp, TestUser,
    XLSX_CONTENT_TYPE,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

const USER_HEADERS: &[&str] = &[
    "氏名コード",
    "姓",
    "名",
    "会社",
    "地区",
    "チーム",
    "グループ",
    "スタッフ権限",
];

#[derive(Debug, Deserialize)]
struct StagedUserRow {
    row_id: u32,
    code: String,
    is_staff: bool,
    exists: bool,
}

#[derive(Debug, Deserialize)]
struct StagedUsers {
    token: Uuid,
    rows: Vec<StagedUserRow>,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    id: Uuid,
    code: String,
    full_name: String,
    district: String,
    group: String,
    is_staff: bool,
}

#[tokio::test]
async fn user_import_skips_registered_codes() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, staff) = app.user_with_token(TestUser::staff("6000001")).await?;

    let sheet = xlsx_fixture(&[
        USER_HEADERS,
        &["42", "山田", "太郎", "A社", "北", "1班", "G1", "1"],
        &["6000001", "既存", "者", "A社", "北", "1班", "G1", "0"],
        &["77", "佐藤", "花子", "B社", "南", "2班", "G2", "0"],
    ])?;
    let form = MultipartForm::new().file("file", "users.xlsx", XLSX_CONTENT_TYPE, &sheet);
    let staged = app
        .post_multipart("/api/imports/users", form, &staff)
        .await?;
    assert_eq!(staged.status(), StatusCode::CREATED);
    let staged: StagedUsers = read_json(staged).await?;

    let codes: Vec<&str> = staged.rows.iter().map(|row| row.code.as_str()).collect();
    assert_eq!(codes, vec!["0000042", "6000001", "0000077"]);
    assert!(staged.rows[0].is_staff);
    assert!(!staged.rows[0].exists);
    assert!(staged.rows[1].exists);

    let base = format!("/api/imports/users/{}", staged.token);
    let edited = app
        .patch_json(
            &format!("{base}/rows/{}", staged.rows[2].row_id),
            &json!({"is_staff": true}),
            Some(&staff),
        )
        .await?;
    assert_eq!(edited.status(), StatusCode::OK);
    let edited: StagedUsers = read_json(edited).await?;
    assert!(edited.rows[2].is_staff);

    let confirmed = app
        .post_json(&format!("{base}/confirm"), &json!({}), Some(&staff))
        .await?;
    assert_eq!(confirmed.status(), StatusCode::OK);
    let result: serde_json::Value = read_json(confirmed).await?;
    assert_eq!(result["imported"], 2);
    assert_eq!(result["skipped"], 1);

    // Imported users sign in with their code as the password.
    app.login_token("0000042", "0000042").await?;

    let users: Vec<UserInfo> = read_json(app.get("/api/users", Some(&staff)).await?).await?;
    assert_eq!(users.len(), 3);
    let sato = users
        .iter()
        .find(|user| user.code == "0000077")
        .expect("imported user listed");
    assert_eq!(sato.full_name, "佐藤 花子");
    assert_eq!(sato.group, "G2");
    assert!(sato.is_staff);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn user_administration_is_staff_only() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (staff_id, staff) = app
        .user_with_token(TestUser::staff("6000010").in_district("北"))
        .await?;
    let (worker_id, worker) = app
        .user_with_token(TestUser::worker("6000011").in_district("南"))
        .await?;

    let forbidden = app.get("/api/users", Some(&worker)).await?;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    let choices: serde_json::Value =
        read_json(app.get("/api/users/choices?district=%E5%8D%97", Some(&staff)).await?).await?;
    assert_eq!(choices["districts"], json!(["北", "南"]));
    assert_eq!(choices["users"].as_array().map(Vec::len), Some(1));

    let updated = app
        .patch_json(
            &format!("/api/users/{worker_id}"),
            &json!({"district": "  東  ", "group": "G9"}),
            Some(&staff),
        )
        .await?;
    assert_eq!(updated.status(), StatusCode::OK);
    let updated: UserInfo = read_json(updated).await?;
    assert_eq!(updated.id, worker_id);
    assert_eq!(updated.district, "東");
    assert_eq!(updated.group, "G9");

    let self_delete = app
        .post_json(
            "/api/users/bulk-delete",
            &json!({"user_ids": [staff_id, worker_id]}),
            Some(&staff),
        )
        .await?;
    assert_eq!(self_delete.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_field(self_delete).await?.as_deref(), Some("user_ids"));

    let deleted = app
        .post_json(
            "/api/users/bulk-delete",
            &json!({"user_ids": [worker_id]}),
            Some(&staff),
        )
        .await?;
    assert_eq!(deleted.status(), StatusCode::OK);
    let deleted: serde_json::Value = read_json(deleted).await?;
    assert_eq!(deleted["deleted"], 1);

    app.cleanup().await?;
    Ok(())
}
