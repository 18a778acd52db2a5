//! HTTP API for huddle.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `POST /api/auth/register`, `POST /api/auth/login` - Accounts
//! - `GET /api/auth/me`, `GET|PUT /api/users/profile` - The caller's profile
//! - `POST /api/groups` - Create a group
//! - `POST /api/groups/join` - Join a group by invite code
//! - `GET /api/groups/my-groups` - Groups of the caller
//! - `GET /api/groups/:id` - Group detail
//! - `DELETE /api/groups/:id/leave` - Leave a group
//! - `GET /api/groups/:id/stats` - Group statistics
//! - `POST|GET /api/groups/:id/daily-tasks` - Shared tasks
//! - `POST|GET /api/groups/:id/personal-tasks` - The caller's private tasks
//! - `PUT|DELETE /api/daily-tasks/:id`, `PUT|DELETE /api/personal-tasks/:id`
//! - `POST /api/tasks/complete/daily/:id`, `POST /api/tasks/complete/personal/:id`
//! - `GET /api/groups/:id/completions` - Completions of a group
//! - `POST /api/completions/:id/verify` - Verify a peer's completion
//! - `GET /api/users/stats`, `GET /api/users/my-completions`
//!
//! Every endpoint except health, register and login identifies the caller
//! by the `x-user-id` header.

mod accounts;
mod auth;
mod completions;
mod error;
mod groups;
mod routes;
mod tasks;
mod users;

pub use auth::{AuthUser, USER_HEADER};
pub use error::ApiError;
pub use routes::{app, serve, AppState};
