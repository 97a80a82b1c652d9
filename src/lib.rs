pub mod config;
pub mod db;
pub mod error;
pub mod request;
pub mod router;
pub mod state;

pub mod crypto {
    pub mod session_id;
    pub mod signature;
}

pub mod models {
    pub mod app;
    pub mod session;
    pub mod user;
}

pub mod repositories;

pub mod services {
    pub mod access;
    pub mod origin;
    pub mod qr;
    pub mod reaper;
    pub mod session;
}

pub mod handlers {
    pub mod admin;
    pub mod auth;
    pub mod client;
}

pub mod middleware_layer {
    pub mod scope;
}

pub mod validation {
    pub mod auth;
}

pub use config::Config;
pub use router::router;
pub use state::AppState;
