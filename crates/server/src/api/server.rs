use std::collections::HashMap;

use axum::extract::{Query, State};
use serde::Serialize;

use crate::art::ArtCacheStats;
use crate::scan::{DatabaseMetrics, MaintenanceState};
use crate::state::{AppState, JsonResult};
use crate::status::{network_metrics, process_status, NetworkMetrics, ProcessStatus};
use crate::utils::{blocking, catalog_error, envelope};

use super::API_VERSIONS;

const ENDPOINTS: &[&str] = &[
    "/api/v0/albums",
    "/api/v0/art",
    "/api/v0/artists",
    "/api/v0/folders",
    "/api/v0/login",
    "/api/v0/logout",
    "/api/v0/search",
    "/api/v0/songs",
    "/api/v0/status",
    "/api/v0/stream",
    "/api/v0/subsonic",
    "/api/v0/transcode",
    "/api/v0/users",
    "/api/v0/waveform",
];

#[derive(Debug, Serialize)]
pub struct DiscoveryBody {
    pub versions: &'static [&'static str],
    pub documentation: &'static str,
    pub endpoints: &'static [&'static str],
}

pub async fn discovery() -> JsonResult<DiscoveryBody> {
    Ok(envelope(DiscoveryBody {
        versions: API_VERSIONS,
        documentation: env!("CARGO_PKG_REPOSITORY"),
        endpoints: ENDPOINTS,
    }))
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maintenance: Option<MaintenanceState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub art_cache: Option<ArtCacheStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkMetrics>,
}

#[derive(Debug, Serialize)]
pub struct StatusBody {
    pub status: ProcessStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
}

/// `(database, network)` flags from a `metrics=` list.
pub fn metric_set(raw: Option<&str>) -> (bool, bool) {
    let mut database = false;
    let mut network = false;
    for name in raw.unwrap_or("").split(',').map(str::trim) {
        match name {
            "all" => {
                database = true;
                network = true;
            }
            "database" => database = true,
            "network" => network = true,
            _ => {}
        }
    }
    (database, network)
}

pub async fn get_status(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> JsonResult<StatusBody> {
    let status = process_status(state.started);
    let (database, network) = metric_set(params.get("metrics").map(String::as_str));
    if !database && !network {
        return Ok(envelope(StatusBody {
            status,
            metrics: None,
        }));
    }

    let mut metrics = Metrics::default();
    if database {
        let maintenance = state.maintenance.clone();
        metrics.database =
            Some(blocking(move || maintenance.database_metrics().map_err(catalog_error)).await?);
        metrics.maintenance = Some(state.maintenance.snapshot());
        metrics.art_cache = Some(state.art.stats());
    }
    if network {
        metrics.network = Some(network_metrics());
    }
    Ok(envelope(StatusBody {
        status,
        metrics: Some(metrics),
    }))
}
