pub mod auth_service;
pub mod cookie_service;
pub mod jwt_service;
pub mod mailer;
pub mod password_reset_service;
