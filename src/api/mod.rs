pub mod handlers;
pub mod routes;
pub mod user_extractor;

pub use handlers::{AppContext, AppState};
pub use routes::create_router;
