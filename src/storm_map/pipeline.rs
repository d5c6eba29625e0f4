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

use crate::aggregate::{aggregate, Aggregation};
use crate::cache::CachedRender;
use crate::client::{DateRange, ReportClient};
use crate::filter::ReportFilter;
use crate::geocode::{Geocoder, PostalLookup, RetryingGeocoder};
use crate::render::{zip_list_html, MapRenderer, MapView, Marker, Severity};
use crate::report::{self, StormReport};
use chrono::{NaiveDate, Utc};

/// One complete refresh cycle: fetch, filter, geocode, aggregate, and render.
///
/// None of the steps fail. A failed fetch is logged and treated as a cycle without any
/// reports, failed geocoding leaves individual reports without a postal code.
#[derive(Debug)]
pub struct Pipeline<G, R> {
    client: ReportClient,
    filter: ReportFilter,
    geocoder: Option<RetryingGeocoder<G>>,
    renderer: R,
    view: MapView,
    lookback_days: u32,
    severe_size: f64,
}

impl<G, R> Pipeline<G, R>
where
    G: Geocoder,
    R: MapRenderer,
{
    pub const DEFAULT_LOOKBACK_DAYS: u32 = 7;

    pub fn new(client: ReportClient, filter: ReportFilter, renderer: R) -> Self {
        Pipeline {
            client,
            filter,
            geocoder: None,
            renderer,
            view: MapView::default(),
            lookback_days: Self::DEFAULT_LOOKBACK_DAYS,
            severe_size: Severity::DEFAULT_SEVERE_SIZE,
        }
    }

    pub fn with_geocoder(mut self, geocoder: RetryingGeocoder<G>) -> Self {
        self.geocoder = Some(geocoder);
        self
    }

    pub fn with_view(mut self, view: MapView) -> Self {
        self.view = view;
        self
    }

    pub fn with_lookback_days(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }

    /// Reports with a numeric size at or above `size` get severe markers.
    pub fn with_severe_size(mut self, size: f64) -> Self {
        self.severe_size = size;
        self
    }

    /// Fetch and filter reports for the lookback window ending `today`.
    pub async fn reports(&self, today: NaiveDate) -> Vec<StormReport> {
        let range = match DateRange::lookback(today, self.lookback_days) {
            Some(range) => range,
            None => {
                tracing::error!(
                    message = "lookback period starts before earliest supported date",
                    today = %today,
                    lookback_days = self.lookback_days,
                );
                return Vec::new();
            }
        };

        let raw = match self.client.reports(&range).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(message = "failed to fetch storm reports", range = %range, error = %e);
                return Vec::new();
            }
        };

        let fetched = raw.len();
        let reports = self.filter.apply(report::decode_all(raw));
        tracing::info!(
            message = "fetched storm reports",
            range = %range,
            fetched = fetched,
            matched = reports.len(),
            region = %self.filter.region(),
            report_type = self.filter.report_type().unwrap_or("all"),
        );

        reports
    }

    /// Look up postal codes one report at a time, in order.
    pub async fn geocode(&self, reports: &[StormReport]) -> Vec<PostalLookup> {
        let geocoder = match &self.geocoder {
            Some(g) => g,
            None => return vec![PostalLookup::none(); reports.len()],
        };

        let mut lookups = Vec::with_capacity(reports.len());
        for r in reports {
            lookups.push(geocoder.lookup(r.point).await);
        }

        tracing::debug!(
            message = "geocoded storm reports",
            reports = reports.len(),
            found = lookups.iter().filter(|l| l.postal_code.is_some()).count(),
        );

        lookups
    }

    pub async fn run(&self, today: NaiveDate) -> CachedRender {
        let reports = self.reports(today).await;
        let lookups = self.geocode(&reports).await;
        let Aggregation { heat_points, zip_counts } = aggregate(&reports, &lookups);

        let markers: Vec<Marker> = reports
            .iter()
            .zip(lookups.iter())
            .map(|(r, l)| Marker::for_report(r, l, self.severe_size))
            .collect();

        CachedRender {
            generation: 0,
            map_html: self.renderer.render(&self.view, &markers, &heat_points),
            zip_html: zip_list_html(&zip_counts),
            report_count: reports.len(),
        }
    }

    /// Run the pipeline for the current UTC date.
    pub async fn run_now(&self) -> CachedRender {
        self.run(Utc::now().date_naive()).await
    }
}

#[cfg(test)]
mod test {
    use super::Pipeline;
    use crate::client::ReportClient;
    use crate::filter::ReportFilter;
    use crate::geocode::{GeocodeError, Geocoder};
    use crate::render::LeafletRenderer;
    use crate::report::{GeoPoint, StormReport};
    use chrono::NaiveDate;
    use reqwest::Client;

    struct Unreachable;

    impl Geocoder for Unreachable {
        async fn reverse(&self, _point: GeoPoint) -> Result<Option<String>, GeocodeError> {
            panic!("geocoder should not be called");
        }
    }

    #[tokio::test]
    async fn test_geocode_disabled() {
        let client = ReportClient::new(Client::new(), "http://127.0.0.1:1/").unwrap();
        let pipeline: Pipeline<Unreachable, LeafletRenderer> =
            Pipeline::new(client, ReportFilter::new("CO", None), LeafletRenderer::default());
        let reports = vec![StormReport {
            report_type: "HAIL".to_owned(),
            state: "CO".to_owned(),
            point: GeoPoint::new(39.5, -104.9),
            size: None,
            remark: None,
        }];

        let lookups = pipeline.geocode(&reports).await;
        assert_eq!(1, lookups.len());
        assert_eq!(None, lookups[0].postal_code);
    }

    #[tokio::test]
    async fn test_lookback_overflow_is_empty_cycle() {
        let client = ReportClient::new(Client::new(), "http://127.0.0.1:1/").unwrap();
        let pipeline: Pipeline<Unreachable, LeafletRenderer> =
            Pipeline::new(client, ReportFilter::new("CO", None), LeafletRenderer::default())
                .with_lookback_days(u32::MAX);

        let render = pipeline.run(NaiveDate::from_ymd_opt(2024, 6, 8).unwrap()).await;
        assert_eq!(0, render.report_count);
        assert!(render.map_html.contains("var markers = [];"));
    }
}
