pub mod auth;
pub mod health;
pub mod pipeline;
pub mod presence;
