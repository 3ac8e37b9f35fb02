pub mod jwt;
pub mod reset;
pub mod response;
pub mod session;
pub mod user;
