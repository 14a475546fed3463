pub mod api;
pub mod app;
pub mod errors;
pub mod logging;
pub mod mentions;
pub mod pagination;
pub mod ui;
pub mod users;
