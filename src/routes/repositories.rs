//! Repository management endpoints.
//!
//! The caller is identified by the `x-user-id` header; roles come from the
//! workspace directory.
//!
//! - GET /api/v1/workspaces/{workspace}/repositories
//!   Lists repositories in a workspace (read role).
//!
//! - POST /api/v1/workspaces/{workspace}/repositories { name, description?, private?, branch? }
//!   Creates a bare repository with its sidecar (write role).
//!
//! - GET /api/v1/workspaces/{workspace}/repositories/{name}
//!   Single repository. Public repositories need no membership; a missing
//!   repository looks like a private one to non-members.
//!
//! - PATCH /api/v1/workspaces/{workspace}/repositories/{name} { description?, private?, branch? }
//!   Updates mutable fields (write role).
//!
//! - DELETE /api/v1/workspaces/{workspace}/repositories/{name}
//!   Removes the repository from disk (admin role).

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::get,
};

use crate::AppState;
use crate::auth::{Role, require_role};
use crate::error::{AppError, Result};
use crate::models::{CreateRepositoryRequest, GitRepository, UpdateRepositoryRequest};

const USER_HEADER: &str = "x-user-id";

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/api/v1/workspaces/{workspace}/repositories",
            get(list_repositories).post(create_repository),
        )
        .route(
            "/api/v1/workspaces/{workspace}/repositories/{name}",
            get(get_repository)
                .patch(update_repository)
                .delete(delete_repository),
        )
        .with_state(state)
}

fn caller(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

async fn authorize_caller(
    state: &AppState,
    headers: &HeaderMap,
    workspace: &str,
    required: Role,
) -> Result<String> {
    let user = caller(headers).ok_or(AppError::AuthorizationDenied)?;
    require_role(state.directory.as_ref(), user, workspace, required).await?;
    Ok(user.to_string())
}

async fn list_repositories(
    State(state): State<Arc<AppState>>,
    Path(workspace): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<GitRepository>>> {
    authorize_caller(&state, &headers, &workspace, Role::Read).await?;
    let repos = state.store.list(&workspace)?;
    Ok(Json(repos))
}

async fn create_repository(
    State(state): State<Arc<AppState>>,
    Path(workspace): Path<String>,
    headers: HeaderMap,
    Json(request): Json<CreateRepositoryRequest>,
) -> Result<(StatusCode, Json<GitRepository>)> {
    let user = authorize_caller(&state, &headers, &workspace, Role::Write).await?;
    let repo = state.store.create(&workspace, request, &user)?;
    Ok((StatusCode::CREATED, Json(repo)))
}

async fn get_repository(
    State(state): State<Arc<AppState>>,
    Path((workspace, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<GitRepository>> {
    let repo = match state.store.get(&workspace, &name) {
        Ok(repo) => repo,
        Err(e @ (AppError::RepositoryNotFound(_) | AppError::CorruptMetadata { .. })) => {
            // Outsiders get the same answer as for a private repository.
            authorize_caller(&state, &headers, &workspace, Role::Read).await?;
            return Err(e);
        }
        Err(e) => return Err(e),
    };
    if repo.private {
        authorize_caller(&state, &headers, &workspace, Role::Read).await?;
    }
    Ok(Json(repo))
}

async fn update_repository(
    State(state): State<Arc<AppState>>,
    Path((workspace, name)): Path<(String, String)>,
    headers: HeaderMap,
    Json(changes): Json<UpdateRepositoryRequest>,
) -> Result<Json<GitRepository>> {
    authorize_caller(&state, &headers, &workspace, Role::Write).await?;
    let repo = state.store.update(&workspace, &name, changes)?;
    Ok(Json(repo))
}

async fn delete_repository(
    State(state): State<Arc<AppState>>,
    Path((workspace, name)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode> {
    authorize_caller(&state, &headers, &workspace, Role::Admin).await?;
    state.store.delete(&workspace, &name)?;
    Ok(StatusCode::NO_CONTENT)
}
