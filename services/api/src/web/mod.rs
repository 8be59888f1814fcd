pub mod auth;
pub mod chat;
pub mod homework;
pub mod middleware;
pub mod protocol;
pub mod remarks;
pub mod rest;
pub mod school;
pub mod state;
#[cfg(test)]
pub(crate) mod test_support;
pub mod timetable;
pub mod ws_handler;

// Re-export the pieces the binary needs to build the web server router.
pub use middleware::require_auth;
pub use rest::ApiDoc;
pub use ws_handler::conversation_ws_handler;
