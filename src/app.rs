use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_http::trace::TraceLayer;

use crate::auth::{self, AuthEvent, AuthGateway, CurrentUser};
use crate::chart::{self, ChartOptions, ChartType};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::expense::{CollectionCard, CollectionKind, CollectionPatch, ExpenseCollection};
use crate::export;
use crate::form::CollectionForm;
use crate::legacy::{self, ImportReport, LegacyImport};
use crate::money::Money;
use crate::oauth::{GoogleOAuth, OAuthProvider, OAuthStates};
use crate::store::{DocumentStore, JsonFileStore};
use crate::totals::{self, Summary};
use crate::transaction::{ExpenseEntry, JsonTransactionLog, NewEntry, TransactionLog};

/// Everything a request handler can reach
pub struct AppState {
    pub config: AppConfig,
    pub auth: AuthGateway,
    pub store: Arc<dyn DocumentStore>,
    pub transactions: Arc<dyn TransactionLog>,
    pub oauth: Option<Arc<dyn OAuthProvider>>,
    pub oauth_states: OAuthStates,
}

impl AppState {
    /// Open the users file and document store under the configured data directory
    pub fn from_config(config: AppConfig) -> AppResult<Self> {
        let auth = AuthGateway::open(
            config.users_path(),
            Duration::from_secs(config.auth.session_hours * 60 * 60),
        )?;
        let store: Arc<dyn DocumentStore> = Arc::new(JsonFileStore::open(config.expenses_path())?);
        let oauth = config
            .google()
            .cloned()
            .map(|google| Arc::new(GoogleOAuth::new(google)) as Arc<dyn OAuthProvider>);
        if oauth.is_none() {
            log::info!("Google sign-in is not configured");
        }

        Ok(Self::with_parts(config, auth, store, oauth))
    }

    pub fn with_parts(
        config: AppConfig,
        auth: AuthGateway,
        store: Arc<dyn DocumentStore>,
        oauth: Option<Arc<dyn OAuthProvider>>,
    ) -> Self {
        let transactions = Arc::new(JsonTransactionLog::new(config.transactions_path()));
        AppState {
            config,
            auth,
            store,
            transactions,
            oauth,
            oauth_states: OAuthStates::new(),
        }
    }
}

#[derive(Deserialize)]
struct ListQuery {
    kind: Option<String>,
}

#[derive(Deserialize)]
struct TransactionQuery {
    group: Option<String>,
}

#[derive(Deserialize)]
struct LineTotalRequest {
    #[serde(default)]
    quantity: String,
    #[serde(default)]
    unit_price: String,
}

#[derive(Serialize)]
struct LineTotalResponse {
    line_total: Money,
}

#[derive(Deserialize)]
struct SplitRequest {
    total: String,
    members: usize,
}

#[derive(Serialize)]
struct SplitResponse {
    total: Money,
    members: usize,
    shares: Vec<Money>,
}

#[derive(Deserialize)]
struct ExportQuery {
    format: Option<String>,
}

#[derive(Deserialize)]
struct ChartQuery {
    #[serde(rename = "type")]
    chart_type: Option<ChartType>,
}

/// Build the router with every page and API route
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/me", get(me))
        .route("/line-total", post(preview_line_total))
        .route("/split", post(split))
        .route("/expenses", get(list_expenses).post(create_expense))
        .route(
            "/expenses/:id",
            get(get_expense).patch(update_expense).delete(delete_expense),
        )
        .route("/expenses/:id/summary", get(get_summary))
        .route("/expenses/:id/summary.html", get(get_summary_page))
        .route("/expenses/:id/export", get(export_expense))
        .route("/charts/totals", get(chart_totals))
        .route("/charts/totals.png", get(chart_totals_png))
        .route("/transactions", get(list_transactions).post(add_transaction))
        .route("/import/legacy", post(import_legacy))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/", get(serve_landing))
        .route(
            "/login",
            get(auth::serve_login_page).post(auth::handle_login),
        )
        .route(
            "/signup",
            get(auth::serve_signup_page).post(auth::handle_signup),
        )
        .route("/logout", post(auth::handle_logout))
        .route("/auth/google", get(auth::oauth_start))
        .route("/auth/google/callback", get(auth::oauth_callback))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the process is stopped
pub async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let bind = config.server.bind.clone();
    let state = Arc::new(AppState::from_config(config)?);

    let mut events = state.auth.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(AuthEvent::SignedIn(user)) => log::debug!("session opened for {}", user.id),
                Ok(AuthEvent::SignedOut(user)) => log::debug!("session closed for {}", user.id),
                Err(RecvError::Lagged(missed)) => log::warn!("missed {missed} auth event(s)"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let listener = TcpListener::bind(&bind).await?;
    log::info!("Listening on http://{bind}");
    axum::serve(listener, router(state)).await?;

    Ok(())
}

async fn serve_landing() -> Html<&'static str> {
    Html(include_str!("./static/landing.html"))
}

async fn me(Extension(user): Extension<CurrentUser>) -> Json<CurrentUser> {
    Json(user)
}

async fn preview_line_total(Json(request): Json<LineTotalRequest>) -> Json<LineTotalResponse> {
    Json(LineTotalResponse {
        line_total: totals::line_total(&request.quantity, &request.unit_price),
    })
}

async fn split(Json(request): Json<SplitRequest>) -> AppResult<Json<SplitResponse>> {
    let total = Money::parse_lenient(&request.total);
    let shares = totals::split_evenly(total, request.members)?;
    Ok(Json(SplitResponse {
        total,
        members: request.members,
        shares,
    }))
}

async fn list_expenses(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<Vec<CollectionCard>>> {
    let kind = query
        .kind
        .filter(|k| !k.trim().is_empty())
        .map(|k| k.parse::<CollectionKind>())
        .transpose()?;
    let collections = state.store.list(&user.id, kind).await?;
    Ok(Json(collections.iter().map(ExpenseCollection::card).collect()))
}

async fn create_expense(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(form): Json<CollectionForm>,
) -> AppResult<(StatusCode, Json<ExpenseCollection>)> {
    let new = form.submit()?;
    let created = state.store.create(&user.id, new).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_expense(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> AppResult<Json<ExpenseCollection>> {
    Ok(Json(state.store.get(&user.id, &id).await?))
}

async fn update_expense(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(patch): Json<CollectionPatch>,
) -> AppResult<Json<ExpenseCollection>> {
    if patch.is_empty() {
        return Err(AppError::BadRequest("Nothing to update".into()));
    }
    Ok(Json(state.store.update(&user.id, &id, patch).await?))
}

async fn delete_expense(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    state.store.delete(&user.id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn load_summary(state: &AppState, owner: &str, id: &str) -> AppResult<Summary> {
    let collection = state.store.get(owner, id).await?;
    Ok(totals::summarize(&collection))
}

async fn get_summary(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> AppResult<Json<Summary>> {
    Ok(Json(load_summary(&state, &user.id, &id).await?))
}

async fn get_summary_page(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Response {
    match load_summary(&state, &user.id, &id).await {
        Ok(summary) => Html(export::to_html(&summary)).into_response(),
        Err(AppError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Html("<h1>Collection not found</h1><p><a href=\"/\">Back to collections</a></p>"),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn export_expense(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> AppResult<Response> {
    let summary = load_summary(&state, &user.id, &id).await?;
    let stem = export::file_stem(&summary);

    match query.format.as_deref().unwrap_or("csv") {
        "csv" => Ok((
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{stem}.csv\""),
                ),
            ],
            export::to_csv(&summary),
        )
            .into_response()),
        "xlsx" => {
            let bytes = export::to_xlsx(&summary)?;
            Ok((
                [
                    (
                        header::CONTENT_TYPE,
                        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
                            .to_string(),
                    ),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{stem}.xlsx\""),
                    ),
                ],
                bytes,
            )
                .into_response())
        }
        other => Err(AppError::BadRequest(format!(
            "Unknown export format '{other}'"
        ))),
    }
}

async fn chart_totals(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> AppResult<Json<chart::ChartData>> {
    let collections = state.store.list(&user.id, None).await?;
    Ok(Json(chart::chart_data(&collections)))
}

async fn chart_totals_png(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<ChartQuery>,
) -> AppResult<Response> {
    let collections = state.store.list(&user.id, None).await?;
    let data = chart::chart_data(&collections);
    let options = ChartOptions {
        chart_type: query.chart_type.unwrap_or_default(),
        ..ChartOptions::default()
    };

    let png = tokio::task::spawn_blocking(move || chart::render_chart(&data, &options))
        .await
        .map_err(|e| AppError::Chart(format!("chart task failed: {e}")))??;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<TransactionQuery>,
) -> AppResult<Json<Vec<ExpenseEntry>>> {
    let group = query.group.filter(|g| !g.trim().is_empty());
    let entries = state.transactions.list(&user.id, group.as_deref()).await?;
    Ok(Json(entries))
}

async fn add_transaction(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(new): Json<NewEntry>,
) -> AppResult<(StatusCode, Json<ExpenseEntry>)> {
    let entry = state.transactions.add(&user.id, new).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn import_legacy(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(import): Json<LegacyImport>,
) -> AppResult<Json<ImportReport>> {
    let (documents, mut report) = legacy::migrate_batch(&user.id, import);
    let stored = state.store.import(&user.id, documents).await?;
    for drift in &mut report.drift {
        let pos = report.ids.iter().position(|id| *id == drift.id);
        if let Some(id) = pos.and_then(|pos| stored.get(pos)) {
            drift.id = id.clone();
        }
    }
    report.ids = stored;
    report.imported = report.ids.len();
    log::info!(
        "imported {} legacy collection(s) for {}",
        report.imported,
        user.id
    );
    Ok(Json(report))
}
