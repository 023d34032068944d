pub mod config;
pub mod db;
pub mod discovery;
pub mod handlers;
pub mod helpcenter;
pub mod model;
pub mod publisher;
pub mod shutdown;
pub mod state;
pub mod watcher;
