mod common;

use anyhow::{anyhow, Result};
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, TestApp};
use serde_json::{json, Value};

fn id_of(body: &Value) -> Result<String> {
    body["data"]["id"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("response carried no id"))
}

#[tokio::test]
async fn upload_validate_and_download() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_company("ALPHA", "Alpha Company").await?;
    app.insert_company("BRAVO", "Bravo Company").await?;
    app.insert_staff("alpha.clerk@battalion.mil", "s3cret-pass", &["ALPHA"])
        .await?;
    app.insert_staff("bravo.clerk@battalion.mil", "s3cret-pass", &["BRAVO"])
        .await?;
    let reservist = app
        .insert_reservist("alpha.one@battalion.mil", "s3cret-pass", Some("ALPHA"))
        .await?;
    let reservist_token = app
        .login_token("alpha.one@battalion.mil", "s3cret-pass")
        .await?;
    let staff_token = app
        .login_token("alpha.clerk@battalion.mil", "s3cret-pass")
        .await?;
    let other_token = app
        .login_token("bravo.clerk@battalion.mil", "s3cret-pass")
        .await?;

    let upload = app
        .upload_document(
            "birth-certificate.pdf",
            "application/pdf",
            b"%PDF-1.4 certificate",
            "birth_certificate",
            None,
            &reservist_token,
        )
        .await?;
    assert_eq!(upload.status(), StatusCode::CREATED);
    let upload = json_body(upload).await?;
    assert_eq!(upload["data"]["status"], "pending");
    assert_eq!(upload["data"]["reservist_id"], reservist.to_string());
    assert_eq!(app.storage().object_count().await, 1);
    let document_id = id_of(&upload)?;

    let foreign = app
        .get(&format!("/api/documents/{document_id}"), Some(&other_token))
        .await?;
    assert_eq!(foreign.status(), StatusCode::FORBIDDEN);

    let foreign_list = app.get("/api/documents", Some(&other_token)).await?;
    let foreign_list = json_body(foreign_list).await?;
    assert_eq!(foreign_list["pagination"]["total"], 0);

    let validated = app
        .post_json(
            &format!("/api/documents/{document_id}/validate"),
            &json!({}),
            Some(&staff_token),
        )
        .await?;
    assert_eq!(validated.status(), StatusCode::OK);
    let validated = json_body(validated).await?;
    assert_eq!(validated["data"]["status"], "verified");
    assert!(validated["data"]["validated_by"].is_string());

    let again = app
        .post_json(
            &format!("/api/documents/{document_id}/validate"),
            &json!({}),
            Some(&staff_token),
        )
        .await?;
    assert_eq!(again.status(), StatusCode::CONFLICT);

    let notifications = app.get("/api/notifications", Some(&reservist_token)).await?;
    let notifications = json_body(notifications).await?;
    assert_eq!(notifications["pagination"]["total"], 1);
    assert_eq!(notifications["data"][0]["kind"], "document");
    assert_eq!(notifications["data"][0]["read"], false);

    let download = app
        .get(
            &format!("/api/documents/{document_id}/download"),
            Some(&reservist_token),
        )
        .await?;
    assert_eq!(download.status(), StatusCode::OK);
    let download = json_body(download).await?;
    let url = download["data"]["url"].as_str().unwrap_or_default();
    assert!(url.starts_with("https://fake-storage/reservists/"));

    let delete = app
        .delete(
            &format!("/api/documents/{document_id}"),
            Some(&reservist_token),
        )
        .await?;
    assert_eq!(delete.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn status_changes_need_a_reason() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_company("ALPHA", "Alpha Company").await?;
    app.insert_account("admin@battalion.mil", "s3cret-pass", "admin", "active")
        .await?;
    let reservist = app
        .insert_reservist("alpha.one@battalion.mil", "s3cret-pass", Some("ALPHA"))
        .await?;
    let admin_token = app.login_token("admin@battalion.mil", "s3cret-pass").await?;

    let upload = app
        .upload_document(
            "id-card.png",
            "image/png",
            b"not really a png",
            "government_id",
            Some(reservist),
            &admin_token,
        )
        .await?;
    assert_eq!(upload.status(), StatusCode::CREATED);
    let document_id = id_of(&json_body(upload).await?)?;
    let path = format!("/api/documents/{document_id}/status");

    let missing = app
        .patch_json(&path, &json!({ "status": "rejected" }), Some(&admin_token))
        .await?;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);

    let rejected = app
        .patch_json(
            &path,
            &json!({ "status": "rejected", "reason": "photo is unreadable" }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(rejected.status(), StatusCode::OK);
    let rejected = json_body(rejected).await?;
    assert_eq!(rejected["data"]["status"], "rejected");
    assert_eq!(rejected["data"]["rejection_reason"], "photo is unreadable");

    let reopened = app
        .patch_json(
            &path,
            &json!({ "status": "pending", "reason": "new scan requested" }),
            Some(&admin_token),
        )
        .await?;
    assert_eq!(reopened.status(), StatusCode::OK);
    let reopened = json_body(reopened).await?;
    assert_eq!(reopened["data"]["status"], "pending");
    assert!(reopened["data"]["validated_by"].is_null());

    let removed = app
        .delete(&format!("/api/documents/{document_id}"), Some(&admin_token))
        .await?;
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);
    assert_eq!(app.storage().object_count().await, 0);

    app.cleanup().await?;
    Ok(())
}
