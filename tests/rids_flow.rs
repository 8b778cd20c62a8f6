mod common;

use anyhow::{anyhow, Result};
use axum::http::{Method, StatusCode};
use common::{acquire_db_lock, json_body, json_request, TestApp};
use serde_json::json;
use tower::util::ServiceExt;
use uuid::Uuid;

#[tokio::test]
async fn rids_review_cycle() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_company("ALPHA", "Alpha Company").await?;
    app.insert_staff("alpha.clerk@battalion.mil", "s3cret-pass", &["ALPHA"])
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

    let created = app
        .post_json(
            "/api/rids",
            &json!({ "personal_info": { "blood_type": "O+" } }),
            Some(&reservist_token),
        )
        .await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = json_body(created).await?;
    assert_eq!(created["data"]["status"], "draft");
    assert_eq!(created["data"]["reservist_id"], reservist.to_string());
    let form_id = created["data"]["id"]
        .as_str()
        .ok_or_else(|| anyhow!("missing form id"))?
        .to_string();

    let duplicate = app
        .post_json("/api/rids", &json!({}), Some(&reservist_token))
        .await?;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let incomplete = app
        .post_json(
            &format!("/api/rids/{form_id}/sections/dependents"),
            &json!({ "name": "Maria" }),
            Some(&reservist_token),
        )
        .await?;
    assert_eq!(incomplete.status(), StatusCode::BAD_REQUEST);

    let entry = app
        .post_json(
            &format!("/api/rids/{form_id}/sections/dependents"),
            &json!({ "name": "Maria", "relationship": "spouse" }),
            Some(&reservist_token),
        )
        .await?;
    assert_eq!(entry.status(), StatusCode::CREATED);

    let approve_draft = app
        .post_json(
            &format!("/api/rids/{form_id}/approve"),
            &json!({}),
            Some(&staff_token),
        )
        .await?;
    assert_eq!(approve_draft.status(), StatusCode::CONFLICT);

    let submitted = app
        .post_json(
            &format!("/api/rids/{form_id}/submit"),
            &json!({}),
            Some(&reservist_token),
        )
        .await?;
    assert_eq!(submitted.status(), StatusCode::OK);
    let submitted = json_body(submitted).await?;
    assert_eq!(submitted["data"]["status"], "submitted");
    assert!(submitted["data"]["submitted_at"].is_string());

    let locked = app
        .patch_json(
            &format!("/api/rids/{form_id}"),
            &json!({ "personal_info": { "blood_type": "A+" } }),
            Some(&reservist_token),
        )
        .await?;
    assert_eq!(locked.status(), StatusCode::CONFLICT);

    let no_reason = app
        .post_json(
            &format!("/api/rids/{form_id}/reject"),
            &json!({}),
            Some(&staff_token),
        )
        .await?;
    assert_eq!(no_reason.status(), StatusCode::BAD_REQUEST);

    let rejected = app
        .post_json(
            &format!("/api/rids/{form_id}/reject"),
            &json!({ "reason": "missing AFPSN" }),
            Some(&staff_token),
        )
        .await?;
    assert_eq!(rejected.status(), StatusCode::OK);
    let rejected = json_body(rejected).await?;
    assert_eq!(rejected["data"]["status"], "rejected");
    assert_eq!(rejected["data"]["rejection_reason"], "missing AFPSN");

    let notifications = app.get("/api/notifications?unread=true", Some(&reservist_token)).await?;
    let notifications = json_body(notifications).await?;
    assert_eq!(notifications["pagination"]["total"], 1);
    assert_eq!(notifications["data"][0]["kind"], "rids");

    let edited = app
        .patch_json(
            &format!("/api/rids/{form_id}"),
            &json!({ "personal_info": { "blood_type": "O+", "afpsn": "123-456" } }),
            Some(&reservist_token),
        )
        .await?;
    assert_eq!(edited.status(), StatusCode::OK);
    let edited = json_body(edited).await?;
    assert_eq!(edited["data"]["status"], "draft");
    assert_eq!(edited["data"]["version"], 2);
    assert!(edited["data"]["rejection_reason"].is_null());

    let resubmitted = app
        .post_json(
            &format!("/api/rids/{form_id}/submit"),
            &json!({}),
            Some(&reservist_token),
        )
        .await?;
    assert_eq!(resubmitted.status(), StatusCode::OK);

    let approved = app
        .post_json(
            &format!("/api/rids/{form_id}/approve"),
            &json!({}),
            Some(&staff_token),
        )
        .await?;
    assert_eq!(approved.status(), StatusCode::OK);
    let approved = json_body(approved).await?;
    assert_eq!(approved["data"]["status"], "approved");
    assert!(approved["data"]["approved_by"].is_string());

    let detail = app
        .get(&format!("/api/rids/{form_id}"), Some(&reservist_token))
        .await?;
    let detail = json_body(detail).await?;
    assert_eq!(detail["data"]["sections"]["dependents"][0]["data"]["name"], "Maria");
    assert_eq!(
        detail["data"]["sections"]
            .as_object()
            .map(|sections| sections.len()),
        Some(8)
    );

    let delete = app
        .delete(&format!("/api/rids/{form_id}"), Some(&reservist_token))
        .await?;
    assert_eq!(delete.status(), StatusCode::CONFLICT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test]
async fn reservists_cannot_review_their_own_form() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_company("ALPHA", "Alpha Company").await?;
    app.insert_reservist("alpha.one@battalion.mil", "s3cret-pass", Some("ALPHA"))
        .await?;
    let token = app
        .login_token("alpha.one@battalion.mil", "s3cret-pass")
        .await?;

    let created = json_body(
        app.post_json("/api/rids", &json!({}), Some(&token))
            .await?,
    )
    .await?;
    let form_id = created["data"]["id"].as_str().unwrap_or_default().to_string();

    let status = app
        .patch_json(
            &format!("/api/rids/{form_id}/status"),
            &json!({ "status": "approved", "reason": "looks fine" }),
            Some(&token),
        )
        .await?;
    assert_eq!(status.status(), StatusCode::FORBIDDEN);

    let removed = app
        .delete(&format!("/api/rids/{form_id}"), Some(&token))
        .await?;
    assert_eq!(removed.status(), StatusCode::NO_CONTENT);

    app.cleanup().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reviews_settle_on_one_outcome() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    app.insert_company("ALPHA", "Alpha Company").await?;
    app.insert_staff("alpha.clerk@battalion.mil", "s3cret-pass", &["ALPHA"])
        .await?;
    app.insert_reservist("alpha.one@battalion.mil", "s3cret-pass", Some("ALPHA"))
        .await?;
    let reservist_token = app
        .login_token("alpha.one@battalion.mil", "s3cret-pass")
        .await?;
    let staff_token = app
        .login_token("alpha.clerk@battalion.mil", "s3cret-pass")
        .await?;

    let created = json_body(
        app.post_json("/api/rids", &json!({}), Some(&reservist_token))
            .await?,
    )
    .await?;
    let form_id: Uuid = created["data"]["id"]
        .as_str()
        .ok_or_else(|| anyhow!("missing form id"))?
        .parse()?;
    let submitted = app
        .post_json(
            &format!("/api/rids/{form_id}/submit"),
            &json!({}),
            Some(&reservist_token),
        )
        .await?;
    assert_eq!(submitted.status(), StatusCode::OK);

    let approve = json_request(
        Method::POST,
        &format!("/api/rids/{form_id}/approve"),
        &json!({}),
        Some(&staff_token),
    )?;
    let reject = json_request(
        Method::POST,
        &format!("/api/rids/{form_id}/reject"),
        &json!({ "reason": "unit mismatch" }),
        Some(&staff_token),
    )?;
    let (approved, rejected) = tokio::join!(
        tokio::spawn(app.router().oneshot(approve)),
        tokio::spawn(app.router().oneshot(reject)),
    );
    let approved = approved??.status();
    let rejected = rejected??.status();

    let mut outcomes = [approved, rejected];
    outcomes.sort_by_key(|status| status.as_u16());
    assert_eq!(outcomes, [StatusCode::OK, StatusCode::CONFLICT]);

    let winner = if approved == StatusCode::OK {
        "approved"
    } else {
        "rejected"
    };
    let form = json_body(
        app.get(&format!("/api/rids/{form_id}"), Some(&staff_token))
            .await?,
    )
    .await?;
    assert_eq!(form["data"]["status"], winner);

    let transitions = app
        .with_conn(move |conn| {
            use diesel::prelude::*;
            use reservist_portal::schema::audit_logs;
            audit_logs::table
                .filter(audit_logs::action.eq("rids.status_changed"))
                .filter(audit_logs::entity_id.eq(form_id))
                .count()
                .get_result::<i64>(conn)
                .map_err(|err| anyhow!(err))
        })
        .await?;
    assert_eq!(transitions, 2);

    app.cleanup().await?;
    Ok(())
}
