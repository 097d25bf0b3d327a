pub mod db;
pub mod scheduler;
pub mod settings;
pub mod sync;
pub mod tracker;
