pub mod classify;
pub mod fields;
pub mod reconcile;
pub mod window;
