pub use super::acl_logs::Entity as AclLogs;
pub use super::docker_containers::Entity as DockerContainers;
pub use super::mail_outbox::Entity as MailOutbox;
pub use super::renewal_records::Entity as RenewalRecords;
pub use super::rentals::Entity as Rentals;
pub use super::serial_numbers::Entity as SerialNumbers;
pub use super::server_traffic::Entity as ServerTraffic;
pub use super::servers::Entity as Servers;
pub use super::system_alerts::Entity as SystemAlerts;
pub use super::user_containers::Entity as UserContainers;
pub use super::user_history::Entity as UserHistory;
pub use super::user_servers::Entity as UserServers;
pub use super::user_traffic::Entity as UserTraffic;
pub use super::users::Entity as Users;
