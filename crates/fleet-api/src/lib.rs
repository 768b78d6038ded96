//! fleet-api: REST API for the fleet controller.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/groups` | List server groups |
//! | POST | `/api/v1/groups` | Register a server group |
//! | GET | `/api/v1/groups/{name}` | Get a group's policy |
//! | DELETE | `/api/v1/groups/{name}` | Remove a group |
//! | GET | `/api/v1/servers` | List instance status records |
//! | GET | `/api/v1/servers/{name}` | Get one status record |
//! | PUT | `/api/v1/servers/{name}` | Instance heartbeat |
//! | DELETE | `/api/v1/servers/{name}` | Retire an instance |
//! | GET | `/api/v1/monitor` | Pending actions and lifecycle |
//!
//! The heartbeat route lets instances report into the embedded store; with
//! the Redis backend they write their records directly.

pub mod handlers;

use axum::Router;
use axum::routing::get;
use fleet_monitor::MonitorHandle;
use fleet_state::{Fleet, FleetStore};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState<S> {
    pub fleet: Fleet<S>,
    /// Absent when the API runs without a monitor (read-only ops host).
    pub monitor: Option<MonitorHandle>,
}

/// Build the complete API router.
pub fn build_router<S: FleetStore>(fleet: Fleet<S>, monitor: Option<MonitorHandle>) -> Router {
    let state = ApiState { fleet, monitor };

    let api_routes = Router::new()
        .route(
            "/groups",
            get(handlers::list_groups::<S>).post(handlers::create_group::<S>),
        )
        .route(
            "/groups/{name}",
            get(handlers::get_group::<S>).delete(handlers::delete_group::<S>),
        )
        .route("/servers", get(handlers::list_servers::<S>))
        .route(
            "/servers/{name}",
            get(handlers::get_server::<S>)
                .put(handlers::put_server::<S>)
                .delete(handlers::delete_server::<S>),
        )
        .route("/monitor", get(handlers::monitor_snapshot::<S>))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
