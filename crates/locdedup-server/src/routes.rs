//! Route table.

use crate::handlers::{grupos, scan, stats};
use crate::state::AppState;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the full application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(stats::health))
        .route("/grupos", get(grupos::list_groups))
        .route("/grupos/auto-aprovaveis", get(grupos::auto_approvable))
        .route("/grupos/revalidar-llm", post(grupos::revalidate_llm))
        .route(
            "/grupos/aprovar-sugestoes-batch",
            post(grupos::approve_batch),
        )
        .route("/grupos/:id", get(grupos::get_group))
        .route("/grupos/:id/impacto", get(grupos::get_impact))
        .route("/grupos/:id/unificar", put(grupos::unify))
        .route("/grupos/:id/reverter", put(grupos::revert))
        .route("/grupos/:id/descartar", put(grupos::discard))
        .route("/grupos/:id/aprovar-sugestao", put(grupos::approve_suggestion))
        .route("/scan", post(scan::scan))
        .route("/scan/sync", post(scan::scan_sync))
        .route("/scan/enriquecer", post(scan::enrich))
        .route("/scan/historico", get(scan::history))
        .route("/stats", get(stats::stats))
        .route("/stats/ranking-cidades", get(stats::city_ranking))
        .route("/stats/cidades", get(stats::city_breakdown))
        .route("/relatorio/resumo", get(stats::report_summary))
        .route("/relatorio/por-empresa", get(stats::report_by_company))
        .route("/relatorio/grupos-executados", get(stats::report_executed))
        .route(
            "/relatorio/grupo/:id/detalhes",
            get(stats::report_group_details),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
