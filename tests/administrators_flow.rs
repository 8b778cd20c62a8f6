mod common;

use anyhow::{anyhow, Result};
use axum::http::StatusCode;
use common::{acquire_db_lock, json_body, TestApp};
use serde_json::json;

#[tokio::test]
async fn super_admin_manages_administrators() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let root = app
        .insert_account("root@battalion.mil", "s3cret-pass", "super_admin", "active")
        .await?;
    app.insert_account("admin@battalion.mil", "s3cret-pass", "admin", "active")
        .await?;
    let root_token = app.login_token("root@battalion.mil", "s3cret-pass").await?;
    let admin_token = app.login_token("admin@battalion.mil", "s3cret-pass").await?;

    let payload = json!({
        "email": "deputy@battalion.mil",
        "password": "s3cret-pass",
        "first_name": "Dana",
        "last_name": "Santos",
        "role": "admin"
    });

    let by_admin = app
        .post_json("/api/administrators", &payload, Some(&admin_token))
        .await?;
    assert_eq!(by_admin.status(), StatusCode::FORBIDDEN);

    let created = app
        .post_json("/api/administrators", &payload, Some(&root_token))
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = json_body(created).await?;
    let deputy = created["data"]["id"]
        .as_str()
        .ok_or_else(|| anyhow!("missing id"))?
        .to_string();

    let listing = app.get("/api/administrators", Some(&admin_token)).await?;
    assert_eq!(listing.status(), StatusCode::OK);
    let listing = json_body(listing).await?;
    assert_eq!(listing["pagination"]["total"], 3);

    let self_deactivate = app
        .patch_json(
            &format!("/api/administrators/{root}/status"),
            &json!({ "status": "deactivated" }),
            Some(&root_token),
        )
        .await?;
    assert_eq!(self_deactivate.status(), StatusCode::BAD_REQUEST);

    let deactivated = app
        .patch_json(
            &format!("/api/administrators/{deputy}/status"),
            &json!({ "status": "deactivated", "reason": "reassigned" }),
            Some(&root_token),
        )
        .await?;
    assert_eq!(deactivated.status(), StatusCode::OK);
    let deactivated = json_body(deactivated).await?;
    assert_eq!(deactivated["data"]["status"], "deactivated");

    let audit = app.get("/api/audit-logs?entity_type=account", Some(&admin_token)).await?;
    assert_eq!(audit.status(), StatusCode::OK);
    let audit = json_body(audit).await?;
    let actions: Vec<&str> = audit["data"]
        .as_array()
        .map(|rows| rows.iter().filter_map(|row| row["action"].as_str()).collect())
        .unwrap_or_default();
    assert!(actions.contains(&"account.status_changed"));

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn companies_and_staff_assignments() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_account("admin@battalion.mil", "s3cret-pass", "admin", "active")
        .await?;
    let token = app.login_token("admin@battalion.mil", "s3cret-pass").await?;

    for (code, name) in [("ALPHA", "Alpha Company"), ("BRAVO", "Bravo Company")] {
        let response = app
            .post_json("/api/companies", &json!({ "code": code, "name": name }), Some(&token))
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
    }
    let duplicate = app
        .post_json(
            "/api/companies",
            &json!({ "code": "ALPHA", "name": "Again" }),
            Some(&token),
        )
        .await?;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let unknown = app
        .post_json(
            "/api/staff",
            &json!({
                "email": "clerk@battalion.mil",
                "password": "s3cret-pass",
                "first_name": "Carla",
                "last_name": "Lim",
                "assigned_companies": ["CHARLIE"]
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);

    let staff = app
        .post_json(
            "/api/staff",
            &json!({
                "email": "clerk@battalion.mil",
                "password": "s3cret-pass",
                "first_name": "Carla",
                "last_name": "Lim",
                "assigned_companies": ["ALPHA", "BRAVO"]
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(staff.status(), StatusCode::CREATED);
    let staff = json_body(staff).await?;
    assert_eq!(staff["data"]["assigned_companies"], json!(["ALPHA", "BRAVO"]));

    app.insert_reservist("alpha.one@battalion.mil", "s3cret-pass", Some("ALPHA"))
        .await?;
    let in_use = app.delete("/api/companies/ALPHA", Some(&token)).await?;
    assert_eq!(in_use.status(), StatusCode::CONFLICT);

    let removed = app.delete("/api/companies/BRAVO", Some(&token)).await?;
    assert!(removed.status().is_success());

    let clerk_token = app.login_token("clerk@battalion.mil", "s3cret-pass").await?;
    let me = json_body(app.get("/api/auth/me", Some(&clerk_token)).await?).await?;
    assert_eq!(me["data"]["assigned_companies"], json!(["ALPHA"]));

    let companies = json_body(app.get("/api/companies", Some(&clerk_token)).await?).await?;
    assert_eq!(companies["data"][0]["code"], "ALPHA");
    assert_eq!(companies["data"][0]["reservist_count"], 1);

    app.cleanup().await?;
    Ok(())
}
