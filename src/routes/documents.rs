use std::time::Duration;

use axum::extract::{Json, Multipart, Path, Query, State};
use axum::http::StatusCode;
use chrono::{NaiveDateTime, Utc};
use diesel::{prelude::*, PgConnection};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    audit,
    auth::AuthenticatedUser,
    error::{ensure_status_unchanged, AppError, AppResult},
    models::{Document, NewDocument},
    notify,
    response::{ApiResponse, PageParams},
    schema::{documents, reservist_details},
    scope::AccessScope,
    state::AppState,
    storage::{document_key, inline_content_disposition},
    workflow::documents::{self as flow, DocumentChange, DocumentStatus, ValidatorUpdate},
};

#[derive(Debug, Default, Deserialize)]
pub struct DocumentFilters {
    pub status: Option<String>,
    pub reservist_id: Option<Uuid>,
    pub company: Option<String>,
    pub document_type: Option<String>,
}

#[derive(Deserialize)]
pub struct StatusChangeRequest {
    pub status: DocumentStatus,
    pub reason: Option<String>,
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub reservist_id: Uuid,
    pub document_type: String,
    pub title: String,
    pub original_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: String,
    pub status: String,
    pub rejection_reason: Option<String>,
    pub validated_by: Option<Uuid>,
    pub validated_at: Option<NaiveDateTime>,
    pub uploaded_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            reservist_id: doc.reservist_id,
            document_type: doc.document_type,
            title: doc.title,
            original_name: doc.original_name,
            content_type: doc.content_type,
            size_bytes: doc.size_bytes,
            checksum: doc.checksum,
            status: doc.status,
            rejection_reason: doc.rejection_reason,
            validated_by: doc.validated_by,
            validated_at: doc.validated_at,
            uploaded_at: doc.uploaded_at,
            updated_at: doc.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct DocumentDownloadResponse {
    pub url: String,
    pub expires_in: u64,
    pub filename: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
}

struct UploadRequest {
    bytes: Vec<u8>,
    original_name: String,
    content_type: Option<String>,
    document_type: String,
    title: Option<String>,
    reservist_id: Option<Uuid>,
}

/// Loads a document and checks that its owner is within the caller's scope.
fn load_document(
    conn: &mut PgConnection,
    scope: &AccessScope,
    document_id: Uuid,
) -> AppResult<Document> {
    let doc: Document = documents::table.find(document_id).first(conn)?;
    scope.load_reservist(conn, doc.reservist_id)?;
    Ok(doc)
}

fn derive_title(original_name: &str) -> String {
    let stem = std::path::Path::new(original_name)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .map(str::trim)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(original_name);
    stem.replace(['_', '-'], " ")
}

pub async fn list_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(filters): Query<DocumentFilters>,
    Query(page): Query<PageParams>,
) -> AppResult<ApiResponse<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    scope.check_company_filter(filters.company.as_deref())?;
    let status = filters
        .status
        .as_deref()
        .map(str::parse::<DocumentStatus>)
        .transpose()
        .map_err(AppError::bad_request)?;

    let build = || {
        let mut query = documents::table.into_boxed();
        match &scope {
            AccessScope::All => {}
            AccessScope::Companies(companies) => {
                query = query.filter(
                    documents::reservist_id.eq_any(
                        reservist_details::table
                            .filter(reservist_details::company.eq_any(companies.clone()))
                            .select(reservist_details::account_id),
                    ),
                );
            }
            AccessScope::Reservist(own_id) => {
                query = query.filter(documents::reservist_id.eq(*own_id));
            }
        }
        if let Some(company) = &filters.company {
            query = query.filter(
                documents::reservist_id.eq_any(
                    reservist_details::table
                        .filter(reservist_details::company.eq(company.clone()))
                        .select(reservist_details::account_id),
                ),
            );
        }
        if let Some(reservist_id) = filters.reservist_id {
            query = query.filter(documents::reservist_id.eq(reservist_id));
        }
        if let Some(status) = status {
            query = query.filter(documents::status.eq(status.as_str()));
        }
        if let Some(document_type) = &filters.document_type {
            query = query.filter(documents::document_type.eq(document_type.clone()));
        }
        query
    };

    let total: i64 = build().count().get_result(&mut conn)?;
    let rows: Vec<Document> = build()
        .order(documents::uploaded_at.desc())
        .limit(page.per_page())
        .offset(page.offset())
        .load(&mut conn)?;

    let data = rows.into_iter().map(DocumentResponse::from).collect();
    Ok(ApiResponse::paginated(data, page.paginate(total)))
}

pub async fn get_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<ApiResponse<DocumentResponse>> {
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let doc = load_document(&mut conn, &scope, document_id)?;
    Ok(ApiResponse::success(doc.into()))
}

pub async fn upload_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    mut multipart: Multipart,
) -> AppResult<ApiResponse<DocumentResponse>> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;
    let mut document_type: Option<String> = None;
    let mut title: Option<String> = None;
    let mut reservist_id: Option<Uuid> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                original_name = field.file_name().map(|n| n.to_string());
                content_type = field.content_type().map(|mime| mime.to_string());
                let data = field.bytes().await.map_err(|err| {
                    error!(error = %err, "failed to read file bytes");
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                file_bytes = Some(data.to_vec());
            }
            Some("document_type") => {
                document_type = Some(read_text(field, "document_type").await?);
            }
            Some("title") => {
                title = Some(read_text(field, "title").await?);
            }
            Some("reservist_id") => {
                let value = read_text(field, "reservist_id").await?;
                if !value.trim().is_empty() {
                    let parsed = Uuid::parse_str(value.trim())
                        .map_err(|_| AppError::bad_request("reservist_id must be a valid UUID"))?;
                    reservist_id = Some(parsed);
                }
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    if bytes.len() > state.config.max_upload_bytes {
        return Err(AppError::bad_request(format!(
            "file exceeds the {} byte upload limit",
            state.config.max_upload_bytes
        )));
    }
    let original_name =
        original_name.ok_or_else(|| AppError::bad_request("filename is required"))?;
    let document_type = document_type
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AppError::bad_request("document_type is required"))?;

    let request = UploadRequest {
        bytes,
        original_name,
        content_type,
        document_type,
        title,
        reservist_id,
    };

    match process_upload(&state, &user, request).await {
        Ok(doc) => {
            info!(
                document_id = %doc.id,
                reservist_id = %doc.reservist_id,
                uploaded_by = %user.account_id,
                "document upload succeeded"
            );
            Ok(ApiResponse::created(doc.into()))
        }
        Err(err) => {
            warn!(error = %err, account_id = %user.account_id, "document upload failed");
            Err(err)
        }
    }
}

async fn read_text(field: axum::extract::multipart::Field<'_>, name: &str) -> AppResult<String> {
    field
        .text()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid {name}: {err}")))
}

async fn process_upload(
    state: &AppState,
    user: &AuthenticatedUser,
    request: UploadRequest,
) -> AppResult<Document> {
    let UploadRequest {
        bytes,
        original_name,
        content_type,
        document_type,
        title,
        reservist_id,
    } = request;

    let owner_id = {
        let mut conn = state.db()?;
        let scope = AccessScope::resolve(&mut conn, user)?;
        let owner_id = match (&scope, reservist_id) {
            (AccessScope::Reservist(own_id), None) => *own_id,
            (AccessScope::Reservist(own_id), Some(requested)) if requested == *own_id => requested,
            (AccessScope::Reservist(_), Some(_)) => {
                return Err(AppError::forbidden(
                    "reservists can only upload their own documents",
                ))
            }
            (_, Some(requested)) => requested,
            (_, None) => return Err(AppError::bad_request("reservist_id is required")),
        };
        scope.load_reservist(&mut conn, owner_id)?;
        owner_id
    };

    let document_id = Uuid::new_v4();
    let checksum = hex::encode(Sha256::digest(&bytes));
    let size_bytes = bytes.len() as i64;
    let s3_key = document_key(owner_id, document_id, &original_name);
    let content_type = content_type
        .filter(|value| value != "application/octet-stream")
        .or_else(|| {
            mime_guess::from_path(&original_name)
                .first()
                .map(|mime| mime.essence_str().to_string())
        });

    state
        .storage
        .put_object(
            &s3_key,
            bytes,
            content_type.clone(),
            inline_content_disposition(&original_name),
        )
        .await
        .map_err(|err| {
            error!(error = %err, key = %s3_key, "failed to store document");
            AppError::internal(format!("failed to store document: {err}"))
        })?;

    let title = title
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| derive_title(&original_name));

    let new_document = NewDocument {
        id: document_id,
        reservist_id: owner_id,
        document_type,
        title,
        original_name,
        content_type,
        s3_key: s3_key.clone(),
        size_bytes,
        checksum,
        status: DocumentStatus::Pending.as_str().to_string(),
    };

    let inserted = {
        let mut conn = state.db()?;
        conn.transaction::<_, AppError, _>(|conn| {
            diesel::insert_into(documents::table)
                .values(&new_document)
                .execute(conn)?;
            audit::record(
                conn,
                Some(user.account_id),
                "document.uploaded",
                audit::ENTITY_DOCUMENT,
                Some(document_id),
                json!({
                    "reservist_id": owner_id,
                    "document_type": new_document.document_type,
                    "size_bytes": size_bytes,
                }),
            )?;
            Ok(documents::table.find(document_id).first::<Document>(conn)?)
        })
    };

    match inserted {
        Ok(doc) => Ok(doc),
        Err(err) => {
            if let Err(cleanup) = state.storage.delete_object(&s3_key).await {
                warn!(error = %cleanup, key = %s3_key, "failed to remove orphaned upload");
            }
            Err(err)
        }
    }
}

pub async fn download_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<ApiResponse<DocumentDownloadResponse>> {
    let doc = {
        let mut conn = state.db()?;
        let scope = AccessScope::resolve(&mut conn, &user)?;
        load_document(&mut conn, &scope, document_id)?
    };

    let expires_in = state.config.document_url_expiry_seconds;
    let url = state
        .storage
        .presign_get_object(&doc.s3_key, Duration::from_secs(expires_in))
        .await
        .map_err(|err| AppError::internal(format!("failed to generate download URL: {err}")))?;

    Ok(ApiResponse::success(DocumentDownloadResponse {
        url,
        expires_in,
        filename: doc.original_name,
        content_type: doc.content_type,
        size_bytes: doc.size_bytes,
    }))
}

pub async fn validate_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<ApiResponse<DocumentResponse>> {
    user.require_staff_or_above()?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let doc = load_document(&mut conn, &scope, document_id)?;
    let from: DocumentStatus = doc.status.parse().map_err(AppError::internal)?;

    let change = flow::validate(from)?;
    let updated = apply_change(&mut conn, &user, &doc, from, change)?;
    Ok(ApiResponse::success(updated.into()))
}

pub async fn change_document_status(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
    Json(payload): Json<StatusChangeRequest>,
) -> AppResult<ApiResponse<DocumentResponse>> {
    user.require_staff_or_above()?;
    let mut conn = state.db()?;
    let scope = AccessScope::resolve(&mut conn, &user)?;
    let doc = load_document(&mut conn, &scope, document_id)?;
    let from: DocumentStatus = doc.status.parse().map_err(AppError::internal)?;

    let change = flow::change_status(from, payload.status, payload.reason.as_deref())?;
    let updated = apply_change(&mut conn, &user, &doc, from, change)?;
    Ok(ApiResponse::success(updated.into()))
}

/// Persists a status change, then notifies the owner and writes the audit
/// entry in the same transaction.
fn apply_change(
    conn: &mut PgConnection,
    user: &AuthenticatedUser,
    doc: &Document,
    from: DocumentStatus,
    change: DocumentChange,
) -> AppResult<Document> {
    let now = Utc::now().naive_utc();
    let status = change.status.as_str();
    let rejection_reason = change.rejection_reason.as_deref();

    conn.transaction::<_, AppError, _>(|conn| {
        let target = documents::table
            .find(doc.id)
            .filter(documents::status.eq(from.as_str()));
        let rows = match change.validator {
            ValidatorUpdate::Set => diesel::update(target)
                .set((
                    documents::status.eq(status),
                    documents::rejection_reason.eq(rejection_reason),
                    documents::validated_by.eq(Some(user.account_id)),
                    documents::validated_at.eq(Some(now)),
                    documents::updated_at.eq(now),
                ))
                .execute(conn)?,
            ValidatorUpdate::Clear => diesel::update(target)
                .set((
                    documents::status.eq(status),
                    documents::rejection_reason.eq(rejection_reason),
                    documents::validated_by.eq(None::<Uuid>),
                    documents::validated_at.eq(None::<NaiveDateTime>),
                    documents::updated_at.eq(now),
                ))
                .execute(conn)?,
            ValidatorUpdate::Keep => diesel::update(target)
                .set((
                    documents::status.eq(status),
                    documents::rejection_reason.eq(rejection_reason),
                    documents::updated_at.eq(now),
                ))
                .execute(conn)?,
        };
        ensure_status_unchanged(rows)?;

        let (title, message) =
            flow::notification_text(change.status, &doc.title, change.reason.as_deref());
        notify::send(
            conn,
            doc.reservist_id,
            notify::KIND_DOCUMENT,
            title,
            message,
            Some(doc.id),
        )?;

        audit::record(
            conn,
            Some(user.account_id),
            "document.status_changed",
            audit::ENTITY_DOCUMENT,
            Some(doc.id),
            json!({ "from": from, "to": change.status, "reason": change.reason }),
        )?;

        Ok(documents::table.find(doc.id).first::<Document>(conn)?)
    })
}

/// Owners may delete while the document is still pending; administrators at
/// any time.
pub async fn delete_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(document_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let doc = {
        let mut conn = state.db()?;
        let scope = AccessScope::resolve(&mut conn, &user)?;
        let doc = load_document(&mut conn, &scope, document_id)?;

        let is_owner = doc.reservist_id == user.account_id;
        if !user.role.is_admin() {
            if !is_owner {
                return Err(AppError::forbidden(
                    "only the owner or an administrator may delete a document",
                ));
            }
            if doc.status != DocumentStatus::Pending.as_str() {
                return Err(AppError::conflict(
                    "documents can only be deleted while pending",
                ));
            }
        }

        conn.transaction::<_, AppError, _>(|conn| {
            let rows = diesel::delete(
                documents::table
                    .find(doc.id)
                    .filter(documents::status.eq(&doc.status)),
            )
            .execute(conn)?;
            ensure_status_unchanged(rows)?;
            audit::record(
                conn,
                Some(user.account_id),
                "document.deleted",
                audit::ENTITY_DOCUMENT,
                Some(doc.id),
                json!({ "reservist_id": doc.reservist_id, "status": doc.status }),
            )?;
            Ok(())
        })?;
        doc
    };

    if let Err(err) = state.storage.delete_object(&doc.s3_key).await {
        warn!(error = %err, key = %doc.s3_key, "failed to delete stored document");
    }

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::derive_title;

    #[test]
    fn title_comes_from_file_stem() {
        assert_eq!(derive_title("birth_certificate-2020.pdf"), "birth certificate 2020");
        assert_eq!(derive_title(".pdf"), ".pdf");
    }
}
