pub mod auth;
pub mod dashboard;
pub mod dispatch;
pub mod memory;
pub mod oauth;
pub mod queue;
pub mod route;
pub mod sessions;
pub mod tools;
pub mod workflows;
