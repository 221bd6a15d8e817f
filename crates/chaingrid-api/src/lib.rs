pub mod auth;
pub mod error;
pub mod extract;
pub mod mail;
pub mod middleware;
pub mod otp;
pub mod registrar;
pub mod registration;
pub mod routes;
pub mod validation;
