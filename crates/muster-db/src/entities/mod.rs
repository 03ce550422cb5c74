pub mod activity_events;
pub mod admin_users;
pub mod commands;
pub mod device_credentials;
pub mod devices;
pub mod heartbeats;
pub mod pre_registrations;
pub mod retention_policies;
