pub mod handlers;
pub mod pixel;
pub mod routes;

pub use handlers::AppState;
pub use pixel::Pixel;
pub use routes::create_router;
