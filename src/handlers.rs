use crate::catalog::Catalog;
use crate::errors::AppError;
use crate::models::{
    CredentialsForm, Identity, LeaderboardRow, Preferences, ProgressKey, ThemeRequest,
    ToggleRequest, ToggleResponse,
};
use crate::preferences::PreferenceStore;
use crate::projector::{DashboardView, compute_overall_percentage, project_dashboard};
use crate::state::AppState;
use crate::store::ToggleOutcome;
use crate::transport::{self, Body, Destination, RequestMode};
use crate::ui::render_dashboard;
use axum::{
    Form, Json,
    body::{Body as AxumBody, to_bytes},
    extract::{Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
};
use chrono::Utc;
use tracing::{debug, warn};

const MAX_PROXY_BODY: usize = 2 * 1024 * 1024;

/// Headers that describe one connection and must not be forwarded.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
];

pub async fn index(State(state): State<AppState>) -> Html<String> {
    let view = current_view(&state).await;
    let theme = match state.preferences.load_local().await {
        Ok(preferences) => preferences.theme,
        Err(err) => {
            warn!("preferences unavailable, using default theme: {err}");
            Default::default()
        }
    };
    let identity = state.session.current().await;
    Html(render_dashboard(&view, theme, identity.as_ref()))
}

pub async fn dashboard(State(state): State<AppState>) -> Json<DashboardView> {
    Json(current_view(&state).await)
}

pub async fn toggle(
    State(state): State<AppState>,
    Json(payload): Json<ToggleRequest>,
) -> Result<Json<ToggleResponse>, AppError> {
    let key = toggle_key(&state.catalog, &payload)?;

    let response = match state.store.toggle(key.clone(), payload.checked).await {
        Ok(ToggleOutcome::Confirmed(snapshot)) => ToggleResponse {
            success: true,
            checked: payload.checked,
            error: None,
            percentage: Some(compute_overall_percentage(&snapshot)),
        },
        // A newer toggle for the same box owns the final value.
        Ok(ToggleOutcome::Superseded) => ToggleResponse {
            success: true,
            checked: state.store.value(&key).await,
            error: None,
            percentage: None,
        },
        Err(err) => ToggleResponse {
            success: false,
            checked: state.store.value(&key).await,
            error: Some(err.message()),
            percentage: None,
        },
    };
    Ok(Json(response))
}

/// Resolve a toggle request to a store key; only catalog tasks are accepted.
fn toggle_key(catalog: &Catalog, payload: &ToggleRequest) -> Result<ProgressKey, AppError> {
    let category = payload.category.trim();
    let task_id = payload.task_id.trim();
    if category.is_empty() || task_id.is_empty() {
        return Err(AppError::bad_request("category and task_id are required"));
    }
    if catalog.category(category).is_none() {
        return Err(AppError::bad_request(format!("unknown category {category}")));
    }
    if !catalog.tasks_in(category).iter().any(|task| task.id == task_id) {
        return Err(AppError::bad_request(format!("unknown task {task_id} in {category}")));
    }

    Ok(match payload.subtask.as_deref().map(str::trim) {
        Some(subtask) if !subtask.is_empty() => ProgressKey::subtask(category, task_id, subtask),
        _ => ProgressKey::task(category, task_id),
    })
}

pub async fn new_lab(State(state): State<AppState>) -> Result<Redirect, AppError> {
    state.store.start_new_lab().await?;
    Ok(Redirect::to("/"))
}

pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<CredentialsForm>,
) -> Result<Json<Identity>, AppError> {
    let (username, password) = credentials(&form)?;
    Ok(Json(state.session.login(username, password).await?))
}

pub async fn register(
    State(state): State<AppState>,
    Form(form): Form<CredentialsForm>,
) -> Result<Json<Identity>, AppError> {
    let (username, password) = credentials(&form)?;
    Ok(Json(state.session.register(username, password).await?))
}

pub async fn logout(State(state): State<AppState>) -> StatusCode {
    state.session.logout().await;
    StatusCode::NO_CONTENT
}

pub async fn set_theme(
    State(state): State<AppState>,
    Json(payload): Json<ThemeRequest>,
) -> Result<Json<Preferences>, AppError> {
    let preferences = state
        .preferences
        .update(|preferences| preferences.theme = payload.theme)
        .await?;
    Ok(Json(preferences))
}

pub async fn leaderboard(
    State(state): State<AppState>,
) -> Result<Json<Vec<LeaderboardRow>>, AppError> {
    Ok(Json(state.session.leaderboard().await?))
}

/// Everything not served locally goes to the backend through the cache layer.
pub async fn proxy(State(state): State<AppState>, request: Request) -> Result<Response, AppError> {
    let outbound = into_transport(request).await?;
    debug!(method = %outbound.method, path = %outbound.path, "proxying");
    let response = state.cache.handle(outbound).await;
    Ok(from_transport(response))
}

async fn current_view(state: &AppState) -> DashboardView {
    let now = Utc::now();
    match state.view.dashboard(&state.catalog, now) {
        Some(view) => view,
        None => project_dashboard(
            &state.store.snapshot().await,
            &state.catalog,
            state.view.notifications(now),
        ),
    }
}

fn credentials(form: &CredentialsForm) -> Result<(&str, &str), AppError> {
    let username = form.username.trim();
    if username.is_empty() || form.password.is_empty() {
        return Err(AppError::bad_request("username and password are required"));
    }
    Ok((username, form.password.as_str()))
}

async fn into_transport(request: Request) -> Result<transport::Request, AppError> {
    let (parts, body) = request.into_parts();
    let path = parts
        .uri
        .path_and_query()
        .map(|value| value.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut outbound = transport::Request::new(parts.method, path);
    for (name, value) in &parts.headers {
        if is_hop_by_hop(name.as_str()) || name.as_str() == "content-length" {
            continue;
        }
        if let Ok(value) = value.to_str() {
            outbound = outbound.with_header(name.as_str(), value);
        }
    }
    if outbound.header("sec-fetch-mode") == Some("navigate") {
        outbound.mode = RequestMode::Navigate;
    }
    outbound.destination = match outbound.header("sec-fetch-dest") {
        Some("document") => Destination::Document,
        Some("image") => Destination::Image,
        Some("script") => Destination::Script,
        Some("style") => Destination::Style,
        _ => Destination::Other,
    };

    let bytes = to_bytes(body, MAX_PROXY_BODY)
        .await
        .map_err(|err| AppError::bad_request(format!("unreadable request body: {err}")))?;
    if !bytes.is_empty() {
        outbound.body = Body::Raw(bytes.to_vec());
    }
    Ok(outbound)
}

fn from_transport(response: transport::Response) -> Response {
    let mut reply = (response.status, AxumBody::from(response.body)).into_response();
    let headers = reply.headers_mut();
    for (name, value) in &response.headers {
        if is_hop_by_hop(name) || name.eq_ignore_ascii_case("content-length") {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = %name, "dropping unrepresentable response header"),
        }
    }
    reply
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|hop| name.eq_ignore_ascii_case(hop))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ResponseSource;
    use axum::http::Method;

    #[tokio::test]
    async fn proxied_request_keeps_path_and_navigation_hints() {
        let request = axum::http::Request::builder()
            .method(Method::GET)
            .uri("/week1.html?tab=2")
            .header("sec-fetch-mode", "navigate")
            .header("sec-fetch-dest", "document")
            .header("connection", "keep-alive")
            .body(AxumBody::empty())
            .unwrap();

        let outbound = into_transport(request).await.unwrap();
        assert_eq!(outbound.path, "/week1.html?tab=2");
        assert_eq!(outbound.mode, RequestMode::Navigate);
        assert_eq!(outbound.destination, Destination::Document);
        assert!(outbound.header("connection").is_none());
        assert_eq!(outbound.body, Body::Empty);
    }

    fn toggle_request(category: &str, task_id: &str, subtask: Option<&str>) -> ToggleRequest {
        ToggleRequest {
            category: category.into(),
            task_id: task_id.into(),
            subtask: subtask.map(str::to_string),
            checked: true,
        }
    }

    #[test]
    fn toggles_resolve_only_catalog_tasks() {
        let catalog = Catalog::default();
        let task = toggle_key(&catalog, &toggle_request("week1", " week1-install-server2012 ", None));
        assert_eq!(task.unwrap(), ProgressKey::task("week1", "week1-install-server2012"));

        let subtask = toggle_key(
            &catalog,
            &toggle_request("week1", "week1-install-server2012", Some("1")),
        );
        assert_eq!(
            subtask.unwrap(),
            ProgressKey::subtask("week1", "week1-install-server2012", "1")
        );

        let unknown = toggle_key(&catalog, &toggle_request("week1", "made-up-task", None)).unwrap_err();
        assert_eq!(unknown.status, StatusCode::BAD_REQUEST);
        let elsewhere = toggle_key(&catalog, &toggle_request("week2", "week1-install-server2012", None));
        assert!(elsewhere.is_err());
        assert!(toggle_key(&catalog, &toggle_request("week9", "x", None)).is_err());
        assert!(toggle_key(&catalog, &toggle_request("week1", "  ", None)).is_err());
    }

    #[test]
    fn response_headers_skip_hop_by_hop() {
        let response = transport::Response::new(StatusCode::OK, "hi", ResponseSource::Cache)
            .with_header("content-type", "text/plain")
            .with_header("transfer-encoding", "chunked");
        let reply = from_transport(response);
        assert_eq!(reply.headers()["content-type"], "text/plain");
        assert!(reply.headers().get("transfer-encoding").is_none());
    }
}
