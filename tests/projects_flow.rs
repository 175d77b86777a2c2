mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, error_field, read_json, TestApp, TestUser};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
struct ProjectInfo {
    id: Uuid,
    name: String,
    order_no: Option<String>,
    district: String,
    is_completed: bool,
}

#[derive(Deserialize)]
struct ProjectList {
    in_progress: Vec<ProjectInfo>,
    completed: Vec<ProjectInfo>,
    selected_district: String,
}

#[derive(Deserialize)]
struct ProjectDetail {
    project: ProjectInfo,
    allowed_user_ids: Vec<Uuid>,
    assignments: Vec<serde_json::Value>,
    progress: Progress,
}

#[derive(Deserialize)]
struct Progress {
    total: usize,
    pct: usize,
}

#[tokio::test]
async fn staff_creates_and_members_see_projects() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    let (staff_id, staff) = app
        .user_with_token(TestUser::staff("2000001").in_district("北"))
        .await?;
    let (member_id, member) = app.user_with_token(TestUser::worker("2000002")).await?;
    let (_, outsider) = app.user_with_token(TestUser::worker("2000003")).await?;

    let created = app
        .post_json(
            "/api/projects",
            &json!({"name": "  北団地 開栓  ", "order_no": "A12345", "allowed_user_ids": [member_id]}),
            Some(&staff),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let project: ProjectInfo = read_json(created).await?;
    assert_eq!(project.name, "北団地 開栓");
    assert_eq!(project.order_no.as_deref(), Some("A12345"));
    assert_eq!(project.district, "北");

    let detail = app
        .get(&format!("/api/projects/{}", project.id), Some(&member))
        .await?;
    assert_eq!(detail.status(), StatusCode::OK);
    let detail: ProjectDetail = read_json(detail).await?;
    assert!(detail.allowed_user_ids.contains(&staff_id));
    assert!(detail.allowed_user_ids.contains(&member_id));
    assert!(detail.assignments.is_empty());
    assert_eq!(detail.progress.total, 0);
    assert_eq!(detail.progress.pct, 0);

    let hidden = app
        .get(&format!("/api/projects/{}", project.id), Some(&outsider))
        .await?;
    assert_eq!(hidden.status(), StatusCode::NOT_FOUND);

    let outsider_list: ProjectList = read_json(app.get("/api/projects", Some(&outsider)).await?).await?;
    assert!(outsider_list.in_progress.is_empty());

    let forbidden = app
        .post_json("/api/projects", &json!({"name": "x"}), Some(&member))
        .await?;
    assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn create_project_validates_order_number() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, staff) = app.user_with_token(TestUser::staff("2000010")).await?;

    let bad = app
        .post_json(
            "/api/projects",
            &json!({"name": "現場", "order_no": "a12345"}),
            Some(&staff),
        )
        .await?;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_field(bad).await?.as_deref(), Some("order_no"));

    let blank_name = app
        .post_json("/api/projects", &json!({"name": "   "}), Some(&staff))
        .await?;
    assert_eq!(blank_name.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_field(blank_name).await?.as_deref(), Some("name"));

    let unknown_member = app
        .post_json(
            "/api/projects",
            &json!({"name": "現場", "allowed_user_ids": [Uuid::new_v4()]}),
            Some(&staff),
        )
        .await?;
    assert_eq!(unknown_member.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        error_field(unknown_member).await?.as_deref(),
        Some("allowed_user_ids")
    );

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn update_complete_and_delete_project() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let (_, staff) = app
        .user_with_token(TestUser::staff("2000020").in_district("南"))
        .await?;

    let created: ProjectInfo = read_json(
        app.post_json(
            "/api/projects",
            &json!({"name": "南団地", "order_no": "B00001"}),
            Some(&staff),
        )
        .await?,
    )
    .await?;
    let path = format!("/api/projects/{}", created.id);

    let updated = app
        .patch_json(&path, &json!({"order_no": null, "name": "南団地 二期"}), Some(&staff))
        .await?;
    assert_eq!(updated.status(), StatusCode::OK);
    let updated: ProjectInfo = read_json(updated).await?;
    assert_eq!(updated.name, "南団地 二期");
    assert_eq!(updated.order_no, None);

    let completed = app
        .post_json(&format!("{path}/complete"), &json!({}), Some(&staff))
        .await?;
    assert_eq!(completed.status(), StatusCode::OK);
    let completed: ProjectInfo = read_json(completed).await?;
    assert!(completed.is_completed);

    let list: ProjectList = read_json(app.get("/api/projects", Some(&staff)).await?).await?;
    assert_eq!(list.selected_district, "南");
    assert!(list.in_progress.is_empty());
    assert_eq!(list.completed.len(), 1);

    let other_district: ProjectList =
        read_json(app.get("/api/projects?district=%E5%8C%97", Some(&staff)).await?).await?;
    assert!(other_district.completed.is_empty());

    let bad_date = app
        .get("/api/projects?date_from=2025-13-01", Some(&staff))
        .await?;
    assert_eq!(bad_date.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_field(bad_date).await?.as_deref(), Some("date_from"));

    let deleted = app.delete(&path, Some(&staff)).await?;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    let gone = app.get(&path, Some(&staff)).await?;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);

    app.cleanup().await?;
    Ok(())
}
