//! Scene discovery: catalog search and ranking.

mod client;
mod scene;
mod selector;

pub use client::{
    parse_features, CatalogConfig, SceneCatalog, StacCatalogClient, DEFAULT_ASSET_KEY,
    DEFAULT_SEARCH_LIMIT,
};
pub use scene::{Scene, SearchQuery};
pub use selector::{SceneSelector, DEFAULT_MAX_SCENES};
