//! HTTP handlers

pub mod auth;
pub mod health;
pub mod invoice;
pub mod moderation;
pub mod notification;
pub mod order;
pub mod product;
pub mod render;
pub mod reporting;
pub mod retouch;
pub mod st_request;
pub mod user;

pub use auth::*;
pub use health::*;
pub use invoice::*;
pub use moderation::*;
pub use notification::*;
pub use order::*;
pub use product::*;
pub use render::*;
pub use reporting::*;
pub use retouch::*;
pub use st_request::*;
pub use user::*;
