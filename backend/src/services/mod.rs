//! Business logic services for the studio operations backend

pub mod auth;
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

pub use auth::AuthService;
pub use invoice::InvoiceService;
pub use moderation::ModerationService;
pub use notification::NotificationService;
pub use order::OrderService;
pub use product::ProductService;
pub use render::RenderService;
pub use reporting::ReportingService;
pub use retouch::RetouchService;
pub use st_request::STRequestService;
pub use user::UserService;
