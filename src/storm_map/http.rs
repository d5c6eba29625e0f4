// storm_map - Heat map of recent storm reports served over HTTP
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::cache::{CachedRender, RenderCache};
use crate::geocode::Geocoder;
use crate::pipeline::Pipeline;
use crate::render::{page_html, MapRenderer};
use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Where the map for each request comes from.
#[derive(Debug)]
pub enum RefreshMode<G, R> {
    /// Requests read whatever was most recently published by the background refresh.
    Scheduled(Arc<RenderCache>),
    /// Each request runs the whole pipeline before responding.
    OnDemand(Arc<Pipeline<G, R>>),
}

#[derive(Debug)]
pub struct RequestContext<G, R> {
    title: String,
    mode: RefreshMode<G, R>,
}

impl<G, R> RequestContext<G, R>
where
    G: Geocoder,
    R: MapRenderer,
{
    pub fn new<S: Into<String>>(title: S, mode: RefreshMode<G, R>) -> Self {
        RequestContext {
            title: title.into(),
            mode,
        }
    }

    pub async fn render(&self) -> Arc<CachedRender> {
        match &self.mode {
            RefreshMode::Scheduled(cache) => cache.current(),
            RefreshMode::OnDemand(pipeline) => Arc::new(pipeline.run_now().await),
        }
    }

    pub async fn page(&self) -> String {
        let render = self.render().await;
        page_html(&self.title, &render.map_html, &render.zip_html)
    }
}

/// Build the router for the single `GET /` route.
pub fn router<G, R>(context: Arc<RequestContext<G, R>>) -> Router
where
    G: Geocoder + Send + Sync + 'static,
    R: MapRenderer + Send + Sync + 'static,
{
    Router::new()
        .route("/", get(index::<G, R>))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

async fn index<G, R>(State(context): State<Arc<RequestContext<G, R>>>) -> Html<String>
where
    G: Geocoder + Send + Sync + 'static,
    R: MapRenderer + Send + Sync + 'static,
{
    Html(context.page().await)
}
