//! Web 框架集成

pub mod axum;
