use std::sync::Arc;

use log::info;
use rocket::figment::Figment;
use rocket::{catchers, routes, Build, Rocket};

use crate::config::{Backend, Config};
use crate::error::{ConfigError, Result};
use crate::handlers::{self, ApiToken};
use crate::services::catalog::TrackCatalog;
use crate::services::gateway::BroadcastGateway;
use crate::services::player::PlayerHandle;
use crate::services::presence::PresenceReporter;
use crate::services::remote::{Extractor, RemoteApi, RemoteLookup};
use crate::services::resolver::LibraryResolver;
use crate::services::store::{CatalogStore, DocumentStore, JsonStore, NullStore};

/// Everything the HTTP surface needs, wired together.
pub struct RadioStation {
    pub catalog: Arc<TrackCatalog>,
    pub player: PlayerHandle,
    pub gateway: Arc<BroadcastGateway>,
    pub token: String,
}

impl RadioStation {
    /// Picks the store and remote lookup for the configured backend.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let extractor = || -> Arc<dyn RemoteLookup> {
            Arc::new(Extractor::new(config.extractor_bin.clone(), config.resolve_timeout))
        };
        let json_store = || -> Arc<dyn CatalogStore> {
            Arc::new(JsonStore::new(config.tracks_file.clone(), config.playlists_file.clone()))
        };

        let (store, remote): (Arc<dyn CatalogStore>, Arc<dyn RemoteLookup>) = match config.backend {
            Backend::Local => (Arc::new(NullStore), extractor()),
            Backend::PersistedJson => (json_store(), extractor()),
            Backend::RemoteApi => {
                let client_id = config
                    .remote_api_client_id
                    .clone()
                    .ok_or(ConfigError::Missing("REMOTE_API_CLIENT_ID"))?;
                let api = RemoteApi::new(config.remote_api_url.clone(), client_id, config.resolve_timeout)?;
                (json_store(), Arc::new(api))
            }
            Backend::DocumentStore => {
                let url = config
                    .storage_url
                    .as_deref()
                    .ok_or(ConfigError::Missing("STORAGE_URL"))?;
                (Arc::new(DocumentStore::connect(url).await?), extractor())
            }
        };

        Self::with_parts(config, store, remote).await
    }

    /// Loads the catalog and starts the player on top of the given backends.
    pub async fn with_parts(
        config: &Config,
        store: Arc<dyn CatalogStore>,
        remote: Arc<dyn RemoteLookup>,
    ) -> Result<Self> {
        info!("Using the {} store", store.name());

        let catalog = Arc::new(TrackCatalog::new(
            config.music_dir.clone(),
            config.scratch_dir.clone(),
            store.clone(),
            remote.clone(),
        ));
        let count = catalog.load_all().await?;
        info!("Catalog ready with {} tracks", count);

        let gateway = Arc::new(BroadcastGateway::new(config.ffmpeg_bin.clone(), config.bitrate_kbps));
        let resolver = Arc::new(LibraryResolver::new(
            remote,
            store,
            config.scratch_dir.clone(),
            config.resolve_timeout,
        ));
        let presence = PresenceReporter::new(gateway.clone(), config.presence_min_interval);

        let player = PlayerHandle::spawn(
            gateway.clone(),
            resolver,
            catalog.clone(),
            presence,
            config.watchdog_interval,
        );

        Ok(Self {
            catalog,
            player,
            gateway,
            token: config.token.clone(),
        })
    }

    pub fn rocket(self, figment: Figment) -> Rocket<Build> {
        rocket::custom(figment)
            .manage(self.catalog)
            .manage(self.player)
            .manage(self.gateway)
            .manage(ApiToken(self.token))
            .mount(
                "/",
                routes![
                    // Commands
                    handlers::start,
                    handlers::stop,
                    handlers::skip,
                    handlers::now_playing,
                    handlers::queue,
                    handlers::status,
                    // Library
                    handlers::add_track,
                    handlers::add_playlist,
                    handlers::list_playlists,
                    handlers::play_playlist,
                    handlers::upload,
                    // Gateway
                    handlers::presence,
                    handlers::health_check,
                    handlers::stream,
                ],
            )
            .register(
                "/",
                catchers![
                    handlers::unauthorized,
                    handlers::not_found,
                    handlers::unprocessable,
                    handlers::server_error,
                ],
            )
    }
}
