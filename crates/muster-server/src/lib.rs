pub mod admin_api;
pub mod admin_auth;
pub mod agent_api;
pub mod audit;
pub mod http;
pub mod state;
pub mod sweeps;
