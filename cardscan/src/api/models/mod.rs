//! API request and response models.

pub mod auth;
pub mod cards;
pub mod email;
