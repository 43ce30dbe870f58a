use std::sync::Arc;

use axum::{extract::State, http::StatusCode};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::docs::{EmptyResponse, ErrorResponse, UserListResponse, UserResponse};
use crate::error::AppError;
use crate::response::ApiResponse;
use crate::store::{NewUser, User};
use crate::AppState;

use super::{IdParam, Payload};

const DUPLICATE_EMAIL: &str = "User with this email already exists";
const USER_NOT_FOUND: &str = "User not found";

// ─── Request bodies ──────────────────────────────────────────────

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUserRequest {
    #[schema(example = "John Doe")]
    pub name: Option<String>,
    #[schema(example = "john@example.com")]
    pub email: Option<String>,
}

/// Only fields that are present and non-blank are applied.
#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUserRequest {
    #[schema(example = "John Doe Updated")]
    pub name: Option<String>,
    #[schema(example = "john.updated@example.com")]
    pub email: Option<String>,
}

fn provided(field: Option<String>) -> Option<String> {
    field
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

// ─── GET /users ──────────────────────────────────────────────────

#[utoipa::path(
    get,
    path = "/users",
    tag = "Users",
    responses(
        (status = 200, description = "List of users, newest first", body = UserListResponse),
        (status = 500, description = "Server error", body = ErrorResponse),
    )
)]
pub async fn get_users(State(state): State<Arc<AppState>>) -> Result<ApiResponse<Vec<User>>, AppError> {
    let users = state.users.find_all().await?;
    Ok(ApiResponse::success(users, "Users retrieved successfully"))
}

// ─── GET /users/:id ──────────────────────────────────────────────

#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "User retrieved successfully", body = UserResponse),
        (status = 400, description = "Malformed id", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
pub async fn get_user_by_id(
    State(state): State<Arc<AppState>>,
    IdParam(id): IdParam,
) -> Result<ApiResponse<User>, AppError> {
    let user = state
        .users
        .find_by_id(&id)
        .await?
        .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))?;
    Ok(ApiResponse::success(user, "User retrieved successfully"))
}

// ─── POST /users ─────────────────────────────────────────────────

#[utoipa::path(
    post,
    path = "/users",
    tag = "Users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created successfully", body = UserResponse),
        (status = 400, description = "Duplicate email or validation error", body = ErrorResponse),
    )
)]
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Payload(req): Payload<CreateUserRequest>,
) -> Result<ApiResponse<User>, AppError> {
    let name = req.name.unwrap_or_default();
    let email = req.email.unwrap_or_default();

    if !email.trim().is_empty() && state.users.find_by_email(&email).await?.is_some() {
        return Err(AppError::bad_request(DUPLICATE_EMAIL));
    }

    // A racing create with the same email loses inside the store instead.
    let user = state.users.create(NewUser { name, email }).await?;
    tracing::debug!(id = %user.id, "user created");

    Ok(ApiResponse::success(user, "User created successfully").with_status(StatusCode::CREATED))
}

// ─── PUT /users/:id ──────────────────────────────────────────────

#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = String, Path, description = "User ID")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated successfully", body = UserResponse),
        (status = 400, description = "Duplicate email or malformed id", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    IdParam(id): IdParam,
    Payload(req): Payload<UpdateUserRequest>,
) -> Result<ApiResponse<User>, AppError> {
    let mut user = state
        .users
        .find_by_id(&id)
        .await?
        .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))?;

    let name = provided(req.name);
    let email = provided(req.email);

    if let Some(email) = &email {
        if *email != user.email && state.users.find_by_email(email).await?.is_some() {
            return Err(AppError::bad_request(DUPLICATE_EMAIL));
        }
    }

    if let Some(name) = name {
        user.name = name;
    }
    if let Some(email) = email {
        user.email = email;
    }

    let updated = state.users.save(user).await?;
    Ok(ApiResponse::success(updated, "User updated successfully"))
}

// ─── DELETE /users/:id ───────────────────────────────────────────

#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "Users",
    params(("id" = String, Path, description = "User ID")),
    responses(
        (status = 200, description = "User deleted successfully", body = EmptyResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
    )
)]
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    IdParam(id): IdParam,
) -> Result<ApiResponse<()>, AppError> {
    state
        .users
        .delete_by_id(&id)
        .await?
        .ok_or_else(|| AppError::not_found(USER_NOT_FOUND))?;
    Ok(ApiResponse::success((), "User deleted successfully"))
}
