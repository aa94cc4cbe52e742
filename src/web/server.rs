//! Web server implementation using Axum

use crate::node::CoopNode;
use crate::web::handlers::{self, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// HTTP facade over the engine node.
pub struct WebServer {
    app_state: AppState,
    host: String,
    port: u16,
    cors_enabled: bool,
}

impl WebServer {
    pub fn new(node: CoopNode) -> Self {
        let host = node.config.web.host.clone();
        let port = node.config.web.port;
        let cors_enabled = node.config.web.cors_enabled;
        Self {
            app_state: AppState::new(node),
            host,
            port,
            cors_enabled,
        }
    }

    /// Build the router with all subsystem routes.
    pub fn build_router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(handlers::health_check))
            .route("/status", get(handlers::get_status))
            // CDS
            .route("/cds/issues", post(handlers::create_issue).get(handlers::get_issues))
            .route("/cds/issues/:id", get(handlers::get_issue))
            .route("/cds/issues/:id/submissions", post(handlers::add_submission))
            .route("/cds/issues/:id/structure", post(handlers::structure_issue))
            .route("/cds/issues/:id/context", post(handlers::prepare_context))
            .route("/cds/issues/:id/deliberation", post(handlers::open_deliberation))
            .route("/cds/issues/:id/scenarios", post(handlers::add_scenario))
            .route("/cds/scenarios/:id/vote", post(handlers::cast_vote))
            .route("/cds/scenarios/:id/objection", post(handlers::register_objection))
            .route("/cds/scenarios/:id/evaluate", get(handlers::evaluate_scenario))
            .route("/cds/decisions", post(handlers::make_decision))
            .route("/cds/decisions/:id/dispatch", post(handlers::dispatch_decision))
            .route("/cds/decisions/:id/review", post(handlers::request_review))
            // OAD
            .route("/oad/specs", post(handlers::create_spec))
            .route("/oad/versions", post(handlers::create_version))
            .route("/oad/versions/:id/eco/compute", post(handlers::compute_eco))
            .route("/oad/versions/:id/certification", post(handlers::request_certification))
            .route("/oad/versions/:id/certification/sign", post(handlers::sign_certification))
            .route("/oad/versions/:id/profile", get(handlers::valuation_profile))
            // ITC
            .route("/itc/labor", post(handlers::record_labor))
            .route("/itc/labor/:id/verify", post(handlers::verify_labor))
            .route("/itc/labor/:id/weight", post(handlers::compute_weighted))
            .route("/itc/accounts/:id", get(handlers::get_account))
            .route("/itc/accounts/:id/credit", post(handlers::credit_account))
            .route("/itc/accounts/:id/decay", post(handlers::apply_decay))
            .route("/itc/valuations/compute", post(handlers::compute_valuation))
            .route("/itc/redeem", post(handlers::redeem_access))
            // COS
            .route("/cos/plans", post(handlers::create_plan))
            .route("/cos/tasks/:id/assign", post(handlers::assign_task))
            .route("/cos/tasks/:id/start", post(handlers::start_task))
            .route("/cos/tasks/:id/block", post(handlers::block_task))
            .route("/cos/tasks/:id/complete", post(handlers::complete_task))
            .route("/cos/materials", post(handlers::record_material_flow))
            .route("/cos/plans/:id/inventory", get(handlers::material_inventory))
            .route("/cos/plans/:id/bottlenecks", get(handlers::detect_bottlenecks))
            .route("/cos/plans/:id/workload", get(handlers::workload_signal))
            .route("/cos/qa", post(handlers::record_qa))
            // FRS
            .route("/frs/signals/packet", post(handlers::create_packet))
            .route("/frs/findings/analyze", post(handlers::analyze_packet))
            .route("/frs/recommendations", post(handlers::generate_recommendations))
            .route("/frs/indices/:id", get(handlers::compute_indices))
            .route("/frs/memory", post(handlers::record_memory))
            .route("/frs/dashboard", get(handlers::dashboard))
            // Federation
            .route("/federation/announce", post(handlers::announce_node))
            .route("/federation/messages", post(handlers::send_message))
            .route("/federation/nodes/:id", get(handlers::query_node))
            // Ledger
            .route("/ledger/entries", get(handlers::get_ledger_entries))
            .route("/ledger/verify", get(handlers::verify_ledger))
            .with_state(self.app_state.clone());

        if self.cors_enabled {
            router = router.layer(
                ServiceBuilder::new()
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    )
                    .into_inner(),
            );
        }
        router
    }

    /// Start serving. Runs until the process is stopped.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        let app = self.build_router();
        let addr: SocketAddr = format!("{}:{}", self.host, self.port).parse()?;
        info!("starting web server on {}", addr);
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}
