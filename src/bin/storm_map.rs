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

use clap::{Parser, ValueEnum};
use reqwest::Client;
use std::error::Error;
use std::io;
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use storm_map::cache::{self, RenderCache};
use storm_map::client::{DateRange, ReportClient};
use storm_map::filter::ReportFilter;
use storm_map::geocode::{NominatimClient, RetryPolicy, RetryingGeocoder};
use storm_map::http::{RefreshMode, RequestContext};
use storm_map::pipeline::Pipeline;
use storm_map::render::{LeafletRenderer, MapView, Severity};
use storm_map::report::GeoPoint;
use tokio::signal::unix::{self, SignalKind};
use tracing::{Instrument, Level};

const DEFAULT_LOG_LEVEL: Level = Level::INFO;
const DEFAULT_BIND_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 10000);
const DEFAULT_REFRESH_SECS: u64 = 86400;
const DEFAULT_TIMEOUT_MILLIS: u64 = 10000;
const DEFAULT_GEOCODER_URL: &str = "https://nominatim.openstreetmap.org/";
const DEFAULT_REGION: &str = "CO";
const DEFAULT_TITLE: &str = "Storm Damage in Colorado";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Build the map at startup and then in the background every `--refresh-secs`
    Scheduled,
    /// Build a new map for every request
    OnDemand,
}

#[derive(Debug, Parser)]
#[clap(name = "storm_map", version = clap::crate_version!())]
struct StormMapApplication {
    /// URL of the storm report API. `start`, `end`, `combine`, and `json` query parameters
    /// are added to it for each request.
    #[clap(long)]
    reports_url: String,

    /// Base URL of a Nominatim compatible reverse geocoding API
    #[clap(long, default_value_t = DEFAULT_GEOCODER_URL.into())]
    geocoder_url: String,

    /// State code of reports to include on the map
    #[clap(long, default_value_t = DEFAULT_REGION.into())]
    region: String,

    /// Type of reports to include on the map (e.g. 'HAIL'). All types are included if not set.
    #[clap(long)]
    report_type: Option<String>,

    /// Fetch reports from this many days before today, through today.
    #[clap(long, default_value_t = Pipeline::<NominatimClient, LeafletRenderer>::DEFAULT_LOOKBACK_DAYS)]
    lookback_days: u32,

    /// Reports with a numeric size at or above this value are drawn in red, others in blue.
    /// Uses the units of the report API `Size` field (hundredths of an inch for hail).
    #[clap(long, default_value_t = Severity::DEFAULT_SEVERE_SIZE)]
    severe_size: f64,

    /// Don't look up postal codes for reports.
    #[clap(long)]
    no_geocode: bool,

    /// Maximum number of attempts to look up the postal code for a single report.
    #[clap(long, default_value_t = RetryPolicy::DEFAULT_RETRIES)]
    retries: u32,

    /// Seconds to wait after the first failed postal code lookup, doubled after each
    /// subsequent failure.
    #[clap(long, default_value_t = RetryPolicy::DEFAULT_BACKOFF_FACTOR)]
    backoff_factor: f64,

    /// Timeout for each postal code lookup attempt, in milliseconds.
    #[clap(long, default_value_t = NominatimClient::DEFAULT_TIMEOUT.as_millis() as u64)]
    geocode_timeout_millis: u64,

    /// Timeout for fetching storm reports, in milliseconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT_MILLIS)]
    timeout_millis: u64,

    /// How the map served is built.
    #[clap(long, value_enum, default_value_t = Mode::Scheduled)]
    refresh_mode: Mode,

    /// Rebuild the map in the background at this interval, in seconds. Only used in
    /// 'scheduled' refresh mode.
    #[clap(long, default_value_t = DEFAULT_REFRESH_SECS)]
    refresh_secs: u64,

    /// Latitude of the initial center of the map
    #[clap(long, default_value_t = MapView::DEFAULT_LATITUDE, allow_negative_numbers = true)]
    center_lat: f64,

    /// Longitude of the initial center of the map
    #[clap(long, default_value_t = MapView::DEFAULT_LONGITUDE, allow_negative_numbers = true)]
    center_lon: f64,

    /// Initial zoom level of the map
    #[clap(long, default_value_t = MapView::DEFAULT_ZOOM)]
    zoom: u8,

    /// Title displayed above the map
    #[clap(long, default_value_t = DEFAULT_TITLE.into())]
    title: String,

    /// Logging verbosity. Allowed values are 'trace', 'debug', 'info', 'warn', and 'error'
    /// (case insensitive)
    #[clap(long, default_value_t = DEFAULT_LOG_LEVEL)]
    log_level: Level,

    /// Address to bind to. By default, storm_map will bind to public address since
    /// the purpose is to serve the map to other machines.
    #[clap(long, default_value_t = DEFAULT_BIND_ADDR.into())]
    bind: SocketAddr,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let opts = StormMapApplication::parse();
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_max_level(opts.log_level)
            .finish(),
    )
    .expect("failed to set tracing subscriber");

    let policy = RetryPolicy::new(opts.retries, opts.backoff_factor).unwrap_or_else(|| {
        tracing::error!(
            message = "invalid geocoding retry settings",
            retries = opts.retries,
            backoff_factor = opts.backoff_factor,
        );
        process::exit(1)
    });

    if opts.refresh_secs == 0 {
        tracing::error!(message = "refresh interval must be greater than zero");
        process::exit(1)
    }

    if DateRange::lookback(chrono::Utc::now().date_naive(), opts.lookback_days).is_none() {
        tracing::error!(message = "lookback period is too long", lookback_days = opts.lookback_days);
        process::exit(1)
    }

    if !opts.severe_size.is_finite() {
        tracing::error!(message = "invalid severe report size", severe_size = opts.severe_size);
        process::exit(1)
    }

    let view = MapView {
        center: GeoPoint::new(opts.center_lat, opts.center_lon),
        zoom: opts.zoom,
    };

    if !view.center.is_valid() {
        tracing::error!(message = "invalid map center", latitude = opts.center_lat, longitude = opts.center_lon);
        process::exit(1)
    }

    let timeout = Duration::from_millis(opts.timeout_millis);
    let http_client = Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize HTTP client", error = %e);
        process::exit(1)
    });

    let client = ReportClient::new(http_client.clone(), &opts.reports_url).unwrap_or_else(|e| {
        tracing::error!(message = "unable to initialize report client", error = %e);
        process::exit(1)
    });

    let filter = ReportFilter::new(opts.region.clone(), opts.report_type.clone());
    let mut pipeline = Pipeline::new(client, filter, LeafletRenderer::default())
        .with_view(view)
        .with_lookback_days(opts.lookback_days)
        .with_severe_size(opts.severe_size);

    if opts.no_geocode {
        tracing::info!(message = "postal code lookups disabled");
    } else {
        let geocode_timeout = Duration::from_millis(opts.geocode_timeout_millis);
        let geocoder =
            NominatimClient::new(http_client, &opts.geocoder_url, geocode_timeout).unwrap_or_else(|e| {
                tracing::error!(message = "unable to initialize geocoding client", error = %e);
                process::exit(1)
            });

        pipeline = pipeline.with_geocoder(RetryingGeocoder::new(geocoder, policy));
    }

    let pipeline = Arc::new(pipeline);
    let server = axum::Server::try_bind(&opts.bind).unwrap_or_else(|e| {
        tracing::error!(message = "error binding to address", address = %opts.bind, error = %e);
        process::exit(1)
    });

    let mode = match opts.refresh_mode {
        Mode::Scheduled => {
            // Build the map once before serving any requests so that the first visitors
            // don't get an empty page. Connections made in the meantime wait in the backlog.
            let cache = Arc::new(RenderCache::new());
            cache
                .refresh(&pipeline)
                .instrument(tracing::span!(Level::DEBUG, "storm_map_refresh"))
                .await;

            cache::spawn_refresh(
                Arc::clone(&pipeline),
                Arc::clone(&cache),
                Duration::from_secs(opts.refresh_secs),
            );

            RefreshMode::Scheduled(cache)
        }
        Mode::OnDemand => RefreshMode::OnDemand(pipeline),
    };

    let context = Arc::new(RequestContext::new(opts.title.clone(), mode));
    let app = storm_map::http::router(context);

    tracing::info!(
        message = "server started",
        address = %opts.bind,
        reports_url = %opts.reports_url,
        refresh_mode = ?opts.refresh_mode,
    );

    server
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            // Wait for either SIGTERM or SIGINT to shutdown
            tokio::select! {
                _ = sigterm() => {}
                _ = sigint() => {}
            }
        })
        .await?;

    tracing::info!("server shutdown");
    Ok(())
}

/// Return after the first SIGTERM signal received by this process
async fn sigterm() -> io::Result<()> {
    unix::signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

/// Return after the first SIGINT signal received by this process
async fn sigint() -> io::Result<()> {
    unix::signal(SignalKind::interrupt())?.recv().await;
    Ok(())
}
