//! Shared application state for the service.
//!
//! [`AppState`] owns one instance of every collaborator. Nothing is global:
//! the binary builds the state from configuration with
//! [`AppState::from_config`], tests build it directly with [`AppState::new`].

use chrono::{DateTime, Utc};
use potholes_core::{DedupGate, SubscriptionManager};
use potholes_db::{InMemoryReportStore, PostgresConfig, PostgresPool, PostgresReportStore, ReportBackend};
use potholes_share::{
    BlankTileFetcher, CompositorSettings, FontSet, GeocoderBackend, HttpGeocoder, HttpTileFetcher,
    Rasterizer, ShareCompositor, TileBackend, resolve_pin_url,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ServiceConfig, ShareConfig, StoreConfig, StoreKind};
use crate::server::ServerError;

/// Everything request handlers need.
pub struct AppState {
    store: ReportBackend,
    gate: DedupGate<ReportBackend>,
    subscriptions: SubscriptionManager<ReportBackend>,
    compositor: ShareCompositor<TileBackend>,
    geocoder: GeocoderBackend,
    shutdown: CancellationToken,
    started_at: DateTime<Utc>,
}

impl AppState {
    /// Assemble state from already constructed collaborators.
    pub fn new(
        store: ReportBackend,
        compositor: ShareCompositor<TileBackend>,
        geocoder: GeocoderBackend,
    ) -> Self {
        Self {
            gate: DedupGate::new(store.clone()),
            subscriptions: SubscriptionManager::new(store.clone()),
            store,
            compositor,
            geocoder,
            shutdown: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }

    /// Build every collaborator named by `config`.
    ///
    /// Connects and migrates the database when the `postgres` backend is
    /// selected.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Setup`] if the store cannot be reached, a font
    /// cannot be loaded, or an HTTP client cannot be built.
    pub async fn from_config(config: &ServiceConfig) -> Result<Self, ServerError> {
        let store = build_store(&config.store).await?;
        let (compositor, tiles) = build_compositor(&config.share)?;
        let geocoder = build_geocoder(&config.share);
        info!(
            store = store.name(),
            tiles = tiles,
            geocoder = matches!(geocoder, GeocoderBackend::Http(_)),
            "Application state ready"
        );
        Ok(Self::new(store, compositor, geocoder))
    }

    /// The report store.
    pub const fn store(&self) -> &ReportBackend {
        &self.store
    }

    /// Dedup-checked ingest.
    pub const fn gate(&self) -> &DedupGate<ReportBackend> {
        &self.gate
    }

    /// Live subscriptions.
    pub const fn subscriptions(&self) -> &SubscriptionManager<ReportBackend> {
        &self.subscriptions
    }

    /// Share image compositor.
    pub const fn compositor(&self) -> &ShareCompositor<TileBackend> {
        &self.compositor
    }

    /// Reverse geocoder.
    pub const fn geocoder(&self) -> &GeocoderBackend {
        &self.geocoder
    }

    /// Token for request work that should stop at shutdown.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.child_token()
    }

    /// Cancel in-flight share and geocode work and close every subscription.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.subscriptions.shutdown();
    }

    /// When this state was built.
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }
}

async fn build_store(config: &StoreConfig) -> Result<ReportBackend, ServerError> {
    match config.backend {
        StoreKind::Memory => {
            warn!("Using in-memory report store; reports are lost on restart");
            Ok(InMemoryReportStore::new().into())
        }
        StoreKind::Postgres => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                ServerError::Setup(String::from("postgres backend requires database_url"))
            })?;
            let pg_config = PostgresConfig::new(url)
                .with_max_connections(config.max_connections)
                .with_acquire_timeout(config.acquire_timeout());
            let pool = PostgresPool::connect(&pg_config)
                .await
                .map_err(|e| ServerError::Setup(format!("database connect failed: {e}")))?;
            pool.migrate()
                .await
                .map_err(|e| ServerError::Setup(format!("database migration failed: {e}")))?;
            let store = PostgresReportStore::start(&pool)
                .await
                .map_err(|e| ServerError::Setup(format!("change listener failed: {e}")))?;
            Ok(store.into())
        }
    }
}

fn build_compositor(
    config: &ShareConfig,
) -> Result<(ShareCompositor<TileBackend>, &'static str), ServerError> {
    let tiles = match config.tile_endpoint.as_deref() {
        Some(endpoint) => TileBackend::Http(
            HttpTileFetcher::new(endpoint, config.request_timeout())
                .map_err(|e| ServerError::Setup(e.to_string()))?,
        ),
        None => {
            warn!("No tile endpoint configured; share images use blank maps");
            TileBackend::Blank(BlankTileFetcher)
        }
    };

    let fonts = FontSet::load(config.font_regular.as_deref(), config.font_bold.as_deref())
        .map_err(|e| ServerError::Setup(e.to_string()))?;

    let settings = CompositorSettings {
        style: config.style.clone(),
        pin_url: resolve_pin_url(config.pin_url.as_deref()),
    };
    let name = tiles.name();
    Ok((
        ShareCompositor::new(tiles, Rasterizer::new(fonts), settings),
        name,
    ))
}

fn build_geocoder(config: &ShareConfig) -> GeocoderBackend {
    config
        .geocode_endpoint
        .as_deref()
        .and_then(|endpoint| HttpGeocoder::new(endpoint, config.request_timeout()))
        .map_or(GeocoderBackend::Disabled, GeocoderBackend::Http)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn default_config_builds_offline_state() {
        let state = AppState::from_config(&ServiceConfig::default()).await.unwrap();
        assert_eq!(state.store().name(), "memory");
        assert!(matches!(state.geocoder(), GeocoderBackend::Disabled));
        assert_eq!(state.subscriptions().active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn shutdown_cancels_request_tokens() {
        let state = AppState::from_config(&ServiceConfig::default()).await.unwrap();
        let token = state.shutdown_token();
        assert!(!token.is_cancelled());
        state.shutdown();
        assert!(token.is_cancelled());
        assert!(state.shutdown_token().is_cancelled());
    }

    #[tokio::test]
    async fn missing_font_fails_setup() {
        let mut config = ServiceConfig::default();
        config.share.font_regular = Some("/nonexistent/regular.ttf".into());
        let err = AppState::from_config(&config).await.err().unwrap();
        assert!(matches!(err, ServerError::Setup(_)));
    }
}
