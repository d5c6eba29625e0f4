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

//! Heat map of recent storm reports served over HTTP
//!
//! ## Features
//!
//! `storm_map` fetches storm reports (hail, wind, etc.) for the last several days from a storm
//! report API, keeps the reports for a single state, optionally looks up the postal code of each
//! report using a [Nominatim] reverse geocoding server, and serves an interactive map of the
//! results. The map includes:
//!
//! * A marker for each report with its type, size, postal code, and remarks.
//! * A heat map layer built from the location of every report.
//! * A panel listing the number of reports in each postal code, most common first.
//!
//! [Nominatim]: https://nominatim.org/release-docs/latest/api/Reverse/
//!
//! ## Build
//!
//! `storm_map` is a Rust program and must be built from source using a [Rust toolchain](https://rustup.rs/).
//!
//! ```text
//! cargo build --release
//! ```
//!
//! ## Usage
//!
//! ### Report API
//!
//! `storm_map` needs to be told where to fetch storm reports from. It makes a single `GET` request
//! to the URL given with `--reports-url`, adding `start` and `end` dates (`YYYYMMDD`) along with
//! `combine=true` and `json=true` query parameters. The response must be a JSON array of objects
//! with the fields `St` (state code), `Type` (report type), `Lat` and `Lon` (hundredths of a
//! degree, longitude positive for the western hemisphere), `Size`, and `Remark`.
//!
//! ### Run
//!
//! Map Colorado hail reports from the last two weeks, refreshed once a day.
//!
//! ```text
//! ./storm_map --reports-url https://reports.example.com/api/reports --region CO --report-type HAIL --lookback-days 14
//! ```
//!
//! By default the map is built once at startup and then rebuilt in the background every day
//! (`--refresh-secs`). Pass `--refresh-mode on-demand` to build a new map for every request
//! instead. Reverse geocoding makes one request per report to the geocoding server, so large
//! numbers of reports can take a long time. Use `--no-geocode` to skip it.
//!
//! ### View
//!
//! The map is served on port `10000` at `/`.
//!
//! ```text
//! curl -sS 'http://localhost:10000/'
//! ```
//!

pub mod aggregate;
pub mod cache;
pub mod client;
pub mod filter;
pub mod geocode;
pub mod http;
pub mod pipeline;
pub mod render;
pub mod report;
