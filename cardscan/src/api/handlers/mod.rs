//! HTTP request handlers.
//!
//! - [`cards`]: business card upload and extraction
//! - [`email`]: sending mail with the signed-in user's delegated credential
//! - [`auth`]: Google OAuth sign-in, session state and sign-out
//! - [`static_assets`]: the embedded browser page
//!
//! Handlers return [`crate::errors::Error`], which converts into the JSON error body and status
//! code for its kind.

pub mod auth;
pub mod cards;
pub mod email;
pub mod static_assets;
