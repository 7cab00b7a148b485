//! External API integrations

pub mod telegram;

pub use telegram::TelegramClient;
