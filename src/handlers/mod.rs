pub mod admin;
pub mod agreement;
pub mod health;
pub mod webhook;
