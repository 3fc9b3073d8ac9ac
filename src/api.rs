use std::collections::BTreeMap;

use axum::{
    extract::{Json, Path, RawQuery, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use neo4rs::query;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, info_span, warn, Instrument};
use url::Url;
use uuid::Uuid;

use crate::{
    aggregates::{self, AggregateOption},
    app_state::{AppState, Status},
    error::QueryError,
    executor,
    models::{
        AggregateFunction, AggregateSpec, AttributeFilter, EntityPoints, EntitySummary,
        HierarchyNode, PointsResponse, QuerySpec, TreeEdge,
    },
    neo4j_client,
    path_model::QueryPath,
    schema::{Attribute, Entity, HierarchyRoot, RelationshipShape},
};

type ApiError = (StatusCode, Json<Value>);

// --- Payloads y Respuestas de la API ---

#[derive(Deserialize)]
pub struct ToggleNodePayload {
    #[serde(default)]
    path: QueryPath,
    node: String,
}

#[derive(Deserialize)]
pub struct ToggleEdgePayload {
    #[serde(default)]
    path: QueryPath,
    source: String,
    relationship: String,
    target: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateSpecPayload {
    tag: String,
    function: AggregateFunction,
    attribute: String,
    target_entity: String,
    subject_entity: String,
    #[serde(default)]
    subject_index: Option<usize>,
    path: QueryPath,
}

#[derive(Deserialize)]
pub struct RelatedByPathPayload {
    path: QueryPath,
    ids: Vec<i64>,
}

#[derive(Deserialize)]
pub struct RelatedByTreePayload {
    edges: Vec<TreeEdge>,
    ids: Vec<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataResponse {
    entities: Vec<Entity>,
    attributes: Vec<Attribute>,
    relationships: Vec<RelationshipShape>,
    hierarchy_roots: BTreeMap<String, Vec<HierarchyRoot>>,
    aggregates: BTreeMap<String, Vec<AggregateOption>>,
}

// --- Router ---

pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/metadata", get(metadata_handler))
        .route("/api/metadata/refresh", post(refresh_metadata_handler))
        .route("/api/entity-summary/:label", get(entity_summary_handler))
        .route("/api/entity-points/:label", get(entity_points_handler))
        .route("/api/entity-points", post(entity_points_json_handler))
        .route("/api/query-path/toggle-node", post(toggle_node_handler))
        .route("/api/query-path/toggle-edge", post(toggle_edge_handler))
        .route("/api/aggregate-spec", post(aggregate_spec_handler))
        .route("/api/related-by-path", post(related_by_path_handler))
        .route("/api/related-by-tree", post(related_by_tree_handler))
        .route("/api/hierarchy/:entity", get(hierarchy_handler))
        .route("/api/entity-points-by-id/:label", get(entity_points_by_id_handler))
        .route("/api/points-by-id", get(points_by_id_handler))
        .route("/api/status", get(status_handler))
        .route("/api/neo4j-info", get(neo4j_info_handler))
        .route("/api/shutdown", post(shutdown_handler))
        .with_state(app_state)
}

// --- Errores ---

fn error_response(err: QueryError) -> ApiError {
    let status = match &err {
        QueryError::InvalidRequest(_) | QueryError::DuplicateTag(_) => StatusCode::BAD_REQUEST,
        QueryError::UnknownEntity(_)
        | QueryError::UnknownAttribute { .. }
        | QueryError::UnsupportedAggregateFunction { .. }
        | QueryError::UnresolvablePath { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        QueryError::StoreExecution(_) => StatusCode::BAD_GATEWAY,
    };
    if err.is_compilation_error() {
        warn!("Consulta rechazada: {}", err);
    } else {
        error!("Error ejecutando la consulta: {}", err);
    }
    (status, Json(json!({ "error": err.to_string() })))
}

fn record_outcome(state: &AppState, ok: bool) {
    let mut status = state.status.lock().unwrap();
    if ok {
        status.queries_served += 1;
    } else {
        status.queries_failed += 1;
    }
}

// --- Decodificación de la query string ---

/// Interpreta un literal de cota: JSON si se puede, texto si no.
fn parse_bound(raw: Option<&str>) -> Option<Value> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }
    Some(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
}

fn is_truthy(raw: &str) -> bool {
    match serde_json::from_str::<Value>(raw.trim()) {
        Ok(Value::Null) => false,
        Ok(Value::Bool(b)) => b,
        Ok(Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
        Ok(Value::String(s)) => !s.is_empty(),
        Ok(Value::Array(_)) | Ok(Value::Object(_)) => true,
        Err(_) => !raw.is_empty(),
    }
}

/// `a=tag,name,include,min,max`
fn parse_attribute_entry(entry: &str) -> Result<AttributeFilter, QueryError> {
    let mut fields = entry.split(',');
    let tag = fields.next().map(str::trim).unwrap_or_default();
    let name = fields.next().map(str::trim).unwrap_or_default();
    if tag.is_empty() || name.is_empty() {
        return Err(QueryError::InvalidRequest(format!("Atributo mal formado: {entry}")));
    }
    Ok(AttributeFilter {
        tag: tag.to_string(),
        attribute_name: name.to_string(),
        include_in_output: fields.next().map_or(false, is_truthy),
        min: parse_bound(fields.next()),
        max: parse_bound(fields.next()),
    })
}

/// `agg=tag,function,rel+rel,entity,attribute`
fn parse_aggregate_entry(entry: &str) -> Result<AggregateSpec, QueryError> {
    let fields: Vec<&str> = entry.split(',').map(str::trim).collect();
    let [tag, function, path, entity, attribute] = fields.as_slice() else {
        return Err(QueryError::InvalidRequest(format!("Agregado mal formado: {entry}")));
    };
    Ok(AggregateSpec {
        tag: tag.to_string(),
        function: AggregateFunction::parse(function)?,
        path: path
            .split(|c: char| c == '+' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        target_entity: entity.to_string(),
        target_attribute: attribute.to_string(),
    })
}

fn parse_points_query(label: &str, raw: Option<&str>) -> Result<QuerySpec, QueryError> {
    let mut spec = QuerySpec {
        entity_label: label.to_string(),
        filters: Vec::new(),
        aggregates: Vec::new(),
    };
    for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
        match key.as_ref() {
            "a" => spec.filters.push(parse_attribute_entry(&value)?),
            "agg" => spec.aggregates.push(parse_aggregate_entry(&value)?),
            _ => {}
        }
    }
    Ok(spec)
}

fn parse_summary_attributes(raw: Option<&str>) -> Vec<String> {
    url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes())
        .filter(|(key, _)| key == "a")
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

/// `ids=1,2,3`
fn parse_ids(raw: Option<&str>) -> Result<Vec<i64>, QueryError> {
    let mut ids = Vec::new();
    for (key, value) in url::form_urlencoded::parse(raw.unwrap_or_default().as_bytes()) {
        if key != "ids" {
            continue;
        }
        for id in value.split(',').map(str::trim).filter(|id| !id.is_empty()) {
            let id = id
                .parse::<i64>()
                .map_err(|_| QueryError::InvalidRequest(format!("Identificador no válido: {id}")))?;
            ids.push(id);
        }
    }
    Ok(ids)
}

// --- Handlers ---

#[axum::debug_handler]
async fn metadata_handler(State(state): State<AppState>) -> Json<MetadataResponse> {
    let catalog = state.catalog();
    Json(MetadataResponse {
        entities: catalog.entities().cloned().collect(),
        attributes: catalog.attributes().cloned().collect(),
        relationships: catalog.relationship_shapes().to_vec(),
        hierarchy_roots: catalog.hierarchy_roots().clone(),
        aggregates: aggregates::discover_aggregates(&catalog),
    })
}

#[axum::debug_handler]
async fn refresh_metadata_handler(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    match neo4j_client::load_schema_catalog(&state.graph).await {
        Ok(catalog) => {
            let summary = catalog.summary();
            state.replace_catalog(catalog);
            let mut status = state.status.lock().unwrap();
            status.catalog_loaded_at = Some(Utc::now().to_rfc3339());
            status.message = format!("Catálogo recargado: {summary}");
            Ok((StatusCode::OK, Json(json!({ "message": status.message }))))
        }
        Err(e) => {
            error!("Error recargando el catálogo: {}", e);
            Err((
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": format!("No se pudo recargar el catálogo: {}", e)})),
            ))
        }
    }
}

#[axum::debug_handler]
async fn entity_summary_handler(
    State(state): State<AppState>,
    Path(label): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<Json<EntitySummary>, ApiError> {
    let attributes = parse_summary_attributes(raw.as_deref());
    let catalog = state.catalog();
    let result =
        executor::run_entity_summary(state.executor.as_ref(), &catalog, &label, &attributes).await;
    record_outcome(&state, result.is_ok());
    result.map(Json).map_err(error_response)
}

async fn run_points(state: &AppState, spec: QuerySpec) -> Result<Json<PointsResponse>, ApiError> {
    let span = info_span!("entity_points", request_id = %Uuid::new_v4(), entity = %spec.entity_label);
    let catalog = state.catalog();
    let result = executor::run_points_query(
        state.executor.as_ref(),
        &catalog,
        &spec,
        state.config.max_points,
    )
    .instrument(span)
    .await;
    record_outcome(state, result.is_ok());
    result.map(Json).map_err(error_response)
}

#[axum::debug_handler]
async fn entity_points_handler(
    State(state): State<AppState>,
    Path(label): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<Json<PointsResponse>, ApiError> {
    let spec = parse_points_query(&label, raw.as_deref()).map_err(error_response)?;
    run_points(&state, spec).await
}

#[axum::debug_handler]
async fn entity_points_json_handler(
    State(state): State<AppState>,
    Json(spec): Json<QuerySpec>,
) -> Result<Json<PointsResponse>, ApiError> {
    run_points(&state, spec).await
}

#[axum::debug_handler]
async fn toggle_node_handler(
    State(state): State<AppState>,
    Json(payload): Json<ToggleNodePayload>,
) -> Json<QueryPath> {
    let catalog = state.catalog();
    Json(payload.path.toggle_node(&catalog, &payload.node))
}

#[axum::debug_handler]
async fn toggle_edge_handler(
    State(state): State<AppState>,
    Json(payload): Json<ToggleEdgePayload>,
) -> Json<QueryPath> {
    let catalog = state.catalog();
    Json(payload.path.toggle_edge(
        &catalog,
        &payload.source,
        &payload.relationship,
        &payload.target,
    ))
}

#[axum::debug_handler]
async fn aggregate_spec_handler(
    State(state): State<AppState>,
    Json(payload): Json<AggregateSpecPayload>,
) -> Result<Json<AggregateSpec>, ApiError> {
    let catalog = state.catalog();
    aggregates::build_aggregate_spec(
        &catalog,
        &payload.tag,
        payload.function,
        &payload.attribute,
        &payload.target_entity,
        &payload.subject_entity,
        payload.subject_index,
        &payload.path,
    )
    .map(Json)
    .map_err(error_response)
}

#[axum::debug_handler]
async fn related_by_path_handler(
    State(state): State<AppState>,
    Json(payload): Json<RelatedByPathPayload>,
) -> Result<Json<Vec<i64>>, ApiError> {
    let catalog = state.catalog();
    let result = executor::run_related_by_path(
        state.executor.as_ref(),
        &catalog,
        &payload.path,
        &payload.ids,
    )
    .await;
    record_outcome(&state, result.is_ok());
    result.map(Json).map_err(error_response)
}

#[axum::debug_handler]
async fn related_by_tree_handler(
    State(state): State<AppState>,
    Json(payload): Json<RelatedByTreePayload>,
) -> Result<Json<Vec<i64>>, ApiError> {
    let catalog = state.catalog();
    let result = executor::run_related_by_tree(
        state.executor.as_ref(),
        &catalog,
        &payload.edges,
        &payload.ids,
    )
    .await;
    record_outcome(&state, result.is_ok());
    result.map(Json).map_err(error_response)
}

#[axum::debug_handler]
async fn hierarchy_handler(
    State(state): State<AppState>,
    Path(entity): Path<String>,
) -> Result<Json<Vec<HierarchyNode>>, ApiError> {
    let catalog = state.catalog();
    let result = executor::run_hierarchy(state.executor.as_ref(), &catalog, &entity).await;
    record_outcome(&state, result.is_ok());
    result.map(Json).map_err(error_response)
}

#[axum::debug_handler]
async fn entity_points_by_id_handler(
    State(state): State<AppState>,
    Path(label): Path<String>,
    RawQuery(raw): RawQuery,
) -> Result<Json<PointsResponse>, ApiError> {
    let ids = parse_ids(raw.as_deref()).map_err(error_response)?;
    let catalog = state.catalog();
    let result = executor::run_points_by_id(state.executor.as_ref(), &catalog, &label, &ids).await;
    record_outcome(&state, result.is_ok());
    result.map(Json).map_err(error_response)
}

#[axum::debug_handler]
async fn points_by_id_handler(
    State(state): State<AppState>,
    RawQuery(raw): RawQuery,
) -> Result<Json<Vec<EntityPoints>>, ApiError> {
    let ids = parse_ids(raw.as_deref()).map_err(error_response)?;
    let catalog = state.catalog();
    let result = executor::run_labelled_points_by_id(state.executor.as_ref(), &catalog, &ids).await;
    record_outcome(&state, result.is_ok());
    result.map(Json).map_err(error_response)
}

#[axum::debug_handler]
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    Json(state.status.lock().unwrap().clone())
}

#[axum::debug_handler]
async fn neo4j_info_handler(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let browser_url = match Url::parse(&state.config.neo4j_uri) {
        Ok(mut url) => {
            let _ = url.set_scheme("http");
            let _ = url.set_port(Some(7474));
            url.to_string()
        }
        Err(_) => "http://localhost:7474".to_string(),
    };

    match state.graph.run(query("RETURN 1")).await {
        Ok(_) => Ok(Json(json!({ "status": "ok", "browser_url": browser_url }))),
        Err(e) => {
            error!("Error en el health check de Neo4j: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// --- Handler de Apagado ---

#[axum::debug_handler]
async fn shutdown_handler(
    State(state): State<AppState>,
) -> impl IntoResponse {
    info!("Petición de apagado recibida.");
    if let Some(sender) = state.shutdown_sender.lock().unwrap().take() {
        let _ = sender.send(());
    }
    StatusCode::OK
}
