pub mod auth;
pub mod clock;
pub mod compactor;
pub mod conference;
pub mod config;
pub mod limits;
pub mod model;
pub mod observability;
pub mod scheduler;
pub mod sql;
pub mod store;
pub mod tenant;
pub mod tls;
pub mod wal;
pub mod wire;
