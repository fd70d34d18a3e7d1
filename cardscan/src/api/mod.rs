//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Request/response data structures
//!
//! # API Structure
//!
//! - **Cards** (`/upload`, alias `/api/upload`): scan a card and append it to the spreadsheet
//! - **Email** (`/send-email`, alias `/api/send-email`): send mail as the signed-in user
//! - **Authentication** (`/auth/*`): Google sign-in, session state, sign-out
//! - **Page** (`/`): the embedded browser page
//!
//! All endpoints are documented with `utoipa`; the rendered reference is served at `/docs`.

pub mod handlers;
pub mod models;
