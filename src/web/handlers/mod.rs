pub mod api;
pub mod chat;
pub mod extensions;
pub mod health;
pub mod models;
pub mod pages;
