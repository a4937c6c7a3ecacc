pub mod commands;
pub mod health;
pub mod status;
pub mod upload;
