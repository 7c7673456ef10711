pub mod bank_loader;
pub mod config;
pub mod feedback_client;
pub mod runtime;
pub mod tts_client;
