pub mod annotations;
pub mod auth;
pub mod middleware;
pub mod rest;
pub mod state;

// Re-export the admin guard and the shared state to make them easily accessible
// to the binary that will build the web server router.
pub use middleware::require_admin;
pub use state::AppState;
