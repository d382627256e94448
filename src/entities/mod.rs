pub mod prelude;

pub mod acl_logs;
pub mod docker_containers;
pub mod mail_outbox;
pub mod renewal_records;
pub mod rentals;
pub mod serial_numbers;
pub mod server_traffic;
pub mod servers;
pub mod system_alerts;
pub mod user_containers;
pub mod user_history;
pub mod user_servers;
pub mod user_traffic;
pub mod users;
