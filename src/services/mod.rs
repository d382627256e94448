pub mod acl;
pub mod alerts;
pub mod container_control;
pub mod mailer;
pub mod metrics_source;
pub mod rate_limit;
pub mod rental;
pub mod serial;
pub mod traffic;
pub mod worker;
