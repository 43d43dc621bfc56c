pub mod auth;
pub mod calendar;
pub mod cli;
pub mod config;
pub mod database;
pub mod guard;
pub mod models;
pub mod schedule;
pub mod storage;
pub mod sync;
pub mod utils;
pub mod validation;

pub use config::Config;
pub use database::Database;
pub use models::{Task, User};
pub use sync::TaskSync;
pub use utils::Profile;
