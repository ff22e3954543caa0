//! Management API for plots, datasets and tokens.
//!
//! Every route here sits behind the session check in [`super::router`].
//! Mutations are turned into restart jobs and acknowledged as soon as they
//! are accepted; callers poll the listings for the eventual status.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::content::{self, DeletePlot, RemoveFile, WriteFile};
use crate::gateway::AppState;
use crate::orchestrator::{JobTarget, RestartJob, StateChange};
use crate::registry::{Artifact, ArtifactKind};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/subscribe", get(subscribe))
        .route("/status", get(status))
        .route("/plots", get(list_plots).post(create_plot))
        .route("/plots/{id}", axum::routing::put(update_plot).delete(delete_plot))
        .route("/datasets", get(list_datasets))
        .route("/datasets/{name}", axum::routing::delete(delete_dataset))
        .route(
            "/tokens",
            axum::routing::post(create_token).delete(revoke_token),
        )
        .route("/tokens/{plot_id}", get(list_tokens))
}

fn rejected() -> Json<Value> {
    Json(json!({"success": false}))
}

async fn submit(state: &AppState, job: RestartJob) -> Result<(), StatusCode> {
    state.orchestrator.submit(job).await.map_err(|e| {
        tracing::error!("Failed to submit restart job: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })
}

/// Long-poll until the next successful restart.
async fn subscribe(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let restarted = state
        .orchestrator
        .subscribe()
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    restarted
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(json!({"restarted": true})))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "orchestrator": state.orchestrator.status(),
        "workers": state.orchestrator.pool().workers(),
    }))
}

async fn list_plots(State(state): State<AppState>) -> Json<Vec<Artifact>> {
    Json(state.orchestrator.registry().list_kind(ArtifactKind::Plot).await)
}

async fn list_datasets(State(state): State<AppState>) -> Json<Vec<Artifact>> {
    Json(
        state
            .orchestrator
            .registry()
            .list_kind(ArtifactKind::Dataset)
            .await,
    )
}

#[derive(Debug, Deserialize)]
struct PlotBody {
    code: Option<String>,
}

async fn create_plot(
    State(state): State<AppState>,
    Json(body): Json<PlotBody>,
) -> Result<Json<Value>, StatusCode> {
    let Some(code) = body.code.filter(|c| !c.is_empty()) else {
        return Ok(rejected());
    };

    let id = content::new_plot_id();
    let job = RestartJob::new(
        JobTarget::Plot(id.clone()),
        WriteFile {
            path: state.content.plot_path(&id),
            contents: code.clone(),
        },
        StateChange::Insert(Artifact::plot(id.clone(), code, content::today())),
    );
    submit(&state, job).await?;

    tracing::info!(plot = %id, "Plot created");
    Ok(Json(json!({"success": true, "id": id})))
}

async fn update_plot(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PlotBody>,
) -> Result<Json<Value>, StatusCode> {
    let target = JobTarget::Plot(id.clone());
    let Some(code) = body.code.filter(|c| !c.is_empty()) else {
        return Ok(rejected());
    };
    if !content::is_plot_id(&id) || state.orchestrator.registry().find_by_id(&target).await.is_none() {
        return Ok(rejected());
    }

    let write = WriteFile {
        path: state.content.plot_path(&id),
        contents: code.clone(),
    };
    let today = content::today();
    let change = StateChange::Update(Box::new(move |plot| plot.set_code(code, today)));
    submit(&state, RestartJob::new(target, write, change)).await?;
    Ok(Json(json!({"success": true})))
}

async fn delete_plot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let target = JobTarget::Plot(id.clone());
    if !content::is_plot_id(&id) || state.orchestrator.registry().find_by_id(&target).await.is_none() {
        return Ok(rejected());
    }

    let write = DeletePlot {
        file: state.content.plot_path(&id),
        tokens: state.tokens.clone(),
        id,
    };
    submit(&state, RestartJob::new(target, write, StateChange::Remove)).await?;
    Ok(Json(json!({"success": true})))
}

async fn delete_dataset(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, StatusCode> {
    let target = JobTarget::Dataset(name.clone());
    let Some(path) = state.content.dataset_path(&name) else {
        return Ok(rejected());
    };
    if state.orchestrator.registry().find_by_id(&target).await.is_none() {
        return Ok(rejected());
    }

    submit(
        &state,
        RestartJob::new(target, RemoveFile { path }, StateChange::Remove),
    )
    .await?;
    Ok(Json(json!({"success": true})))
}

async fn list_tokens(
    State(state): State<AppState>,
    Path(plot_id): Path<String>,
) -> Json<Value> {
    Json(json!({"success": true, "tokens": state.tokens.list(&plot_id).await}))
}

#[derive(Debug, Deserialize)]
struct CreateTokenBody {
    name: Option<String>,
    #[serde(alias = "plotId")]
    plot_id: Option<String>,
}

async fn create_token(
    State(state): State<AppState>,
    Json(body): Json<CreateTokenBody>,
) -> Result<Json<Value>, StatusCode> {
    let (Some(name), Some(plot_id)) = (body.name, body.plot_id) else {
        return Err(StatusCode::BAD_REQUEST);
    };
    if name.is_empty() || plot_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let token = state.tokens.create(&plot_id, &name).await.map_err(|e| {
        tracing::error!(plot = %plot_id, "Failed to issue token: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(json!({"success": true, "token": token})))
}

#[derive(Debug, Deserialize)]
struct RevokeTokenBody {
    #[serde(alias = "plotId")]
    plot_id: Option<String>,
    token: Option<String>,
}

async fn revoke_token(
    State(state): State<AppState>,
    Json(body): Json<RevokeTokenBody>,
) -> Result<Json<Value>, StatusCode> {
    let (Some(plot_id), Some(token)) = (body.plot_id, body.token) else {
        return Err(StatusCode::BAD_REQUEST);
    };

    state.tokens.revoke(&plot_id, &token).await.map_err(|e| {
        tracing::error!(plot = %plot_id, "Failed to revoke token: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(json!({"success": true})))
}
