pub mod acl;
pub mod alerts;
pub mod auth;
pub mod health;
pub mod rental;
pub mod serial;
pub mod servers;
pub mod system;
pub mod traffic;
