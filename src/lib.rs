//! Stylecard - request governor and proxy service for the StyleCard try-on app
//!
//! This crate serves the backend of a virtual try-on page. The costly
//! face-swap provider call is guarded by a sliding-window rate limiter and an
//! optional retry-with-backoff executor; curated reference images are listed
//! through a thin proxy to the ImageKit media library.

pub mod api;
pub mod config;
pub mod error;
pub mod face_swap;
pub mod governor;
pub mod image_ref;
pub mod upstream;
