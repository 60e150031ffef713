pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub mod crypto {
    pub mod cipher;
    pub mod token;
}

pub mod session {
    pub mod container;
    pub mod expiring;
    pub mod identity;
    pub mod notice;
    pub mod redis_store;
    pub mod store;
}

pub mod models {
    pub mod session_record;
}

pub mod repositories {
    pub mod memory;
    pub mod session_record;
}

pub mod services {
    pub mod activity;
    pub mod admission;
    pub mod enricher;
    pub mod geoip;
    pub mod sessions;
    pub mod user_agent;
}

pub mod handlers {
    pub mod sessions;
}

pub mod middleware_layer {
    pub mod activity;
    pub mod admission;
    pub mod session;
}

pub mod validation {
    pub mod session;
}
