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

use crate::aggregate::ZipFrequencyTable;
use crate::geocode::PostalLookup;
use crate::report::{GeoPoint, StormReport};
use serde::Serialize;
use std::fmt::Write;

const LEAFLET_CSS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css";
const LEAFLET_JS: &str = "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js";
const LEAFLET_HEAT_JS: &str = "https://unpkg.com/leaflet.heat@0.2.0/dist/leaflet-heat.js";
const TILE_URL: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";
const TILE_ATTRIBUTION: &str = "&copy; OpenStreetMap contributors";
const UNKNOWN_ZIP: &str = "Unknown";

/// Initial center and zoom level of a rendered map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapView {
    pub center: GeoPoint,
    pub zoom: u8,
}

impl MapView {
    pub const DEFAULT_LATITUDE: f64 = 39.55;
    pub const DEFAULT_LONGITUDE: f64 = -104.95;
    pub const DEFAULT_ZOOM: u8 = 6;
}

impl Default for MapView {
    fn default() -> Self {
        MapView {
            center: GeoPoint::new(Self::DEFAULT_LATITUDE, Self::DEFAULT_LONGITUDE),
            zoom: Self::DEFAULT_ZOOM,
        }
    }
}

/// How a marker is drawn: red for severe reports, blue for everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Severe,
}

impl Severity {
    /// Default minimum report size for a severe report, in the units the report API uses
    /// for `Size` (hundredths of an inch for hail).
    pub const DEFAULT_SEVERE_SIZE: f64 = 100.0;

    /// `Severe` if `size` is a number at or above `severe_size`. Sizes that aren't numbers
    /// (e.g. "UNK") are never severe.
    pub fn for_size(size: Option<&str>, severe_size: f64) -> Self {
        match size.and_then(|s| s.trim().parse::<f64>().ok()) {
            Some(v) if v >= severe_size => Severity::Severe,
            _ => Severity::Normal,
        }
    }

    pub fn color(&self) -> &'static str {
        match self {
            Severity::Normal => "blue",
            Severity::Severe => "red",
        }
    }
}

/// Point on the map with an HTML popup label.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub point: GeoPoint,
    pub label: String,
    pub severity: Severity,
}

impl Marker {
    /// Marker for a report, labeled with its type, size, postal code, and remarks.
    ///
    /// All values from the report are HTML escaped.
    pub fn for_report(report: &StormReport, lookup: &PostalLookup, severe_size: f64) -> Self {
        let mut label = format!("Type: {}", escape_html(&report.report_type));
        if let Some(size) = &report.size {
            let _ = write!(label, "<br>Size: {}", escape_html(size));
        }

        let zip = lookup.postal_code.as_deref().unwrap_or(UNKNOWN_ZIP);
        let _ = write!(label, "<br>ZIP Code: {}", escape_html(zip));

        if let Some(remark) = &report.remark {
            let _ = write!(label, "<br>{}", escape_html(remark));
        }

        Marker {
            point: report.point,
            label,
            severity: Severity::for_size(report.size.as_deref(), severe_size),
        }
    }
}

/// Something that can turn markers and heat map points into an embeddable HTML fragment.
///
/// Implementations must produce the same output for the same input.
pub trait MapRenderer {
    fn render(&self, view: &MapView, markers: &[Marker], heat_points: &[GeoPoint]) -> String;
}

/// `MapRenderer` using Leaflet and the Leaflet.heat plugin loaded from a CDN.
#[derive(Debug, Clone)]
pub struct LeafletRenderer {
    element_id: String,
    heat_radius: u32,
}

impl LeafletRenderer {
    pub fn new<S: Into<String>>(element_id: S, heat_radius: u32) -> Self {
        LeafletRenderer {
            element_id: element_id.into(),
            heat_radius,
        }
    }
}

impl Default for LeafletRenderer {
    fn default() -> Self {
        Self::new("storm-map", 25)
    }
}

#[derive(Serialize)]
struct MarkerJs<'a> {
    lat: f64,
    lon: f64,
    label: &'a str,
    color: &'static str,
}

impl MapRenderer for LeafletRenderer {
    fn render(&self, view: &MapView, markers: &[Marker], heat_points: &[GeoPoint]) -> String {
        let marker_js: Vec<MarkerJs<'_>> = markers
            .iter()
            .map(|m| MarkerJs {
                lat: m.point.latitude,
                lon: m.point.longitude,
                label: &m.label,
                color: m.severity.color(),
            })
            .collect();
        let heat_js: Vec<[f64; 2]> = heat_points.iter().map(|p| [p.latitude, p.longitude]).collect();

        let id = escape_html(&self.element_id);
        let mut out = String::new();
        let _ = writeln!(out, r#"<div id="{}" class="storm-map"></div>"#, id);
        let _ = writeln!(out, r#"<link rel="stylesheet" href="{}"/>"#, LEAFLET_CSS);
        let _ = writeln!(out, r#"<script src="{}"></script>"#, LEAFLET_JS);
        let _ = writeln!(out, r#"<script src="{}"></script>"#, LEAFLET_HEAT_JS);
        out.push_str("<script>\n(function () {\n");
        let _ = writeln!(
            out,
            "  var map = L.map({}).setView([{}, {}], {});",
            script_json(&self.element_id),
            view.center.latitude,
            view.center.longitude,
            view.zoom
        );
        let _ = writeln!(
            out,
            "  L.tileLayer({}, {{maxZoom: 18, attribution: {}}}).addTo(map);",
            script_json(TILE_URL),
            script_json(TILE_ATTRIBUTION)
        );
        let _ = writeln!(out, "  var markers = {};", script_json(&marker_js));
        out.push_str("  markers.forEach(function (m) {\n");
        out.push_str("    L.circleMarker([m.lat, m.lon], {radius: 8, color: m.color, fillColor: m.color, fillOpacity: 0.8})\n");
        out.push_str("      .bindPopup(m.label)\n");
        out.push_str("      .addTo(map);\n");
        out.push_str("  });\n");
        let _ = writeln!(
            out,
            "  L.heatLayer({}, {{radius: {}}}).addTo(map);",
            script_json(&heat_js),
            self.heat_radius
        );
        out.push_str("})();\n</script>\n");
        out
    }
}

/// Serialize a value as JSON that is safe to embed in an inline `<script>` element.
fn script_json<T: Serialize + ?Sized>(value: &T) -> String {
    // '<' only appears inside strings so escaping it can't change the value
    serde_json::to_string(value)
        .map(|s| s.replace('<', "\\u003c"))
        .unwrap_or_else(|_| "null".to_owned())
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }

    out
}

/// Render postal code counts as an HTML list, most common first.
pub fn zip_list_html(table: &ZipFrequencyTable) -> String {
    if table.is_empty() {
        return r#"<p class="empty">No postal codes</p>"#.to_owned();
    }

    let mut out = String::from("<ol class=\"zip-counts\">\n");
    for (code, count) in table.iter() {
        let _ = writeln!(
            out,
            r#"<li><span class="zip">{}</span> <span class="count">{}</span></li>"#,
            escape_html(code),
            count
        );
    }

    out.push_str("</ol>");
    out
}

/// Render a complete HTML document with a map fragment and an overlay panel listing
/// postal code counts.
pub fn page_html(title: &str, map_html: &str, zip_html: &str) -> String {
    let title = escape_html(title);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
  body {{ margin: 0; font-family: sans-serif; }}
  h1 {{ margin: 0; padding: 0.5em; font-size: 1.4em; }}
  .storm-map {{ width: 100%; height: calc(100vh - 3em); }}
  .zip-panel {{
    position: fixed; top: 4em; right: 1em; z-index: 1000;
    max-height: 60vh; overflow-y: auto; min-width: 10em;
    padding: 0.5em 1em; background: rgba(255, 255, 255, 0.9);
    border: 1px solid #999; border-radius: 4px; box-shadow: 0 1px 4px rgba(0, 0, 0, 0.3);
  }}
  .zip-panel h2 {{ font-size: 1em; margin: 0.25em 0; }}
  .zip-counts {{ margin: 0; padding-left: 1.5em; }}
  .zip-counts .count {{ float: right; padding-left: 1em; font-weight: bold; }}
</style>
</head>
<body>
<h1>{title}</h1>
{map_html}
<div class="zip-panel">
<h2>Reports by ZIP Code</h2>
{zip_html}
</div>
</body>
</html>
"#
    )
}
