pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod state;

pub mod models {
    pub mod machine;
    pub mod session;
    pub mod tag;
    pub mod weight;
    pub mod workout;
}

pub mod repositories {
    pub mod memory;
    pub mod workout;
}

pub mod services {
    pub mod event_loop;
    pub mod notifier;
    pub mod orchestrator;
    pub mod reader;
    pub mod reconciler;
    pub mod timeout;
    pub mod workouts;
}

pub mod handlers {
    pub mod notifications;
    pub mod response;
    pub mod tags;
    pub mod workouts;
}
