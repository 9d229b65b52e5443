pub mod catalog;
pub mod config;
pub mod identity;
pub mod instances;
pub mod provisioner;
pub mod quota;
pub mod routes;
pub mod state;
pub mod storage;
pub mod web_server;

pub fn create_timestamp() -> String {
    use chrono::{SecondsFormat, Utc};
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
