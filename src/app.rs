use crate::cache::{CacheRegistry, CacheSettings};
use crate::cache::refresh::RefreshSettings;
use crate::cli::ServiceName;
use crate::config::Config;
use crate::provider::client::{ClientSettings, UpstreamClient};
use crate::provider::{Backend, JellyfinFlavor, JellyfinProvider, LibraryProvider, PlexProvider};
use crate::provider::{jellyfin, plex};
use crate::services::cache::CacheService;
use crate::services::manager::ServiceManager;
use crate::services::web::WebService;
use crate::state::AppState;
use crate::utils::fmt_duration;
use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use url::Url;

/// Main application struct containing all necessary components
pub struct App {
    config: Arc<Config>,
    app_state: AppState,
    service_manager: ServiceManager,
}

impl App {
    /// Build the provider and cache registry. No upstream call is made here;
    /// the first request or the cache service loads each instance.
    pub fn new(config: Config) -> Result<Self, anyhow::Error> {
        let config = Arc::new(config);
        let provider = build_provider(&config)?;

        let settings = CacheSettings {
            root: config.data_dir.clone(),
            refresh: RefreshSettings {
                interval: config.refresh_interval,
                jitter: config.refresh_jitter,
                catalog_interval: config.catalog_interval,
            },
            detail_concurrency: config.detail_concurrency,
            auto_refresh: true,
        };
        info!(
            backend = provider.backend().as_str(),
            data_dir = %settings.root.display(),
            refresh_interval = fmt_duration(settings.refresh.interval),
            refresh_jitter = fmt_duration(settings.refresh.jitter),
            catalog_interval = fmt_duration(settings.refresh.catalog_interval),
            "cache settings loaded"
        );

        let caches = CacheRegistry::new(provider, settings);
        let app_state = AppState::new(Arc::clone(&config), caches);

        Ok(App {
            config,
            app_state,
            service_manager: ServiceManager::new(),
        })
    }

    pub fn state(&self) -> &AppState {
        &self.app_state
    }

    /// Setup and register services based on enabled service list
    pub fn setup_services(&mut self, services: &[ServiceName]) -> Result<(), anyhow::Error> {
        if services.contains(&ServiceName::Cache) {
            let cache_service = Box::new(CacheService::new(
                self.app_state.caches.clone(),
                self.app_state.service_statuses.clone(),
                self.config.shutdown_timeout,
            ));
            self.service_manager
                .register_service(ServiceName::Cache.as_str(), cache_service);
        }

        if services.contains(&ServiceName::Web) {
            let web_service = Box::new(WebService::new(self.config.port, self.app_state.clone()));
            self.service_manager
                .register_service(ServiceName::Web.as_str(), web_service);
        }

        if !self.service_manager.has_services() {
            error!("No services enabled. Cannot start application.");
            return Err(anyhow::anyhow!("No services enabled"));
        }

        Ok(())
    }

    /// Start all registered services
    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    /// Run the application and handle shutdown signals
    pub async fn run(self) -> ExitCode {
        use crate::services::signals::handle_shutdown_signals;
        handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout).await
    }
}

/// Construct the owner-perspective provider for the configured backend.
fn build_provider(config: &Config) -> Result<Arc<dyn LibraryProvider>, anyhow::Error> {
    let settings = ClientSettings {
        requests_per_second: config.upstream_rate_limit,
        timeout: config.upstream_timeout,
    };
    let media_url = Url::parse(&config.media_url)
        .with_context(|| format!("invalid MEDIA_URL '{}'", config.media_url))?;

    let provider: Arc<dyn LibraryProvider> = match config.backend {
        Backend::Plex => {
            let server =
                UpstreamClient::new(media_url, plex::AUTH_HEADER, &config.media_token, &settings)
                    .context("failed to create Plex client")?;
            let plex_tv_url = Url::parse(&config.plex_tv_url)
                .with_context(|| format!("invalid PLEX_TV_URL '{}'", config.plex_tv_url))?;
            // plex.tv shares the server client's rate limiter and connection pool.
            let plex_tv = server.with_base_url(plex_tv_url);
            Arc::new(PlexProvider::new(server, plex_tv))
        }
        Backend::Jellyfin | Backend::Emby => {
            let flavor = if config.backend == Backend::Emby {
                JellyfinFlavor::Emby
            } else {
                JellyfinFlavor::Jellyfin
            };
            let user_id = config
                .media_user_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .with_context(|| {
                    format!("MEDIA_USER_ID is required for {}", config.backend.as_str())
                })?;
            let client = UpstreamClient::new(
                media_url,
                jellyfin::AUTH_HEADER,
                &config.media_token,
                &settings,
            )
            .with_context(|| format!("failed to create {} client", config.backend.as_str()))?;
            Arc::new(JellyfinProvider::new(client, flavor, user_id))
        }
    };
    Ok(provider)
}
