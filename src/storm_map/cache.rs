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
use crate::geocode::Geocoder;
use crate::pipeline::Pipeline;
use crate::render::{zip_list_html, MapRenderer};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, Level};

/// Output of a single refresh cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRender {
    /// Refresh cycle that produced this output, zero before the first cycle completes.
    pub generation: u64,
    pub map_html: String,
    pub zip_html: String,
    pub report_count: usize,
}

impl Default for CachedRender {
    fn default() -> Self {
        CachedRender {
            generation: 0,
            map_html: String::new(),
            zip_html: zip_list_html(&ZipFrequencyTable::default()),
            report_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Starting,
    Ready,
    Refreshing,
}

impl CacheState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Ready,
            2 => Self::Refreshing,
            _ => Self::Starting,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Starting => 0,
            Self::Ready => 1,
            Self::Refreshing => 2,
        }
    }
}

/// Most recent `CachedRender`, shared between one writer and any number of readers.
///
/// Each published value is a complete snapshot behind an `Arc`. Readers clone the `Arc`
/// and so always see every field from the same refresh cycle.
#[derive(Debug)]
pub struct RenderCache {
    current: RwLock<Arc<CachedRender>>,
    state: AtomicU8,
}

impl RenderCache {
    pub fn new() -> Self {
        RenderCache {
            current: RwLock::new(Arc::new(CachedRender::default())),
            state: AtomicU8::new(CacheState::Starting.as_u8()),
        }
    }

    pub fn current(&self) -> Arc<CachedRender> {
        // A poisoned lock still holds a complete snapshot since only whole values are stored
        match self.current.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Replace the current value, assigning it the next generation number. Returns the
    /// generation assigned.
    pub fn publish(&self, mut render: CachedRender) -> u64 {
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        render.generation = guard.generation + 1;
        let generation = render.generation;
        *guard = Arc::new(render);
        drop(guard);

        self.set_state(CacheState::Ready);
        generation
    }

    pub fn state(&self) -> CacheState {
        CacheState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: CacheState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Run the pipeline and publish the result.
    pub async fn refresh<G, R>(&self, pipeline: &Pipeline<G, R>) -> u64
    where
        G: Geocoder,
        R: MapRenderer,
    {
        if self.state() != CacheState::Starting {
            self.set_state(CacheState::Refreshing);
        }

        let render = pipeline.run_now().await;
        let reports = render.report_count;
        let generation = self.publish(render);

        tracing::info!(message = "published new map", generation = generation, reports = reports);
        generation
    }
}

impl Default for RenderCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Refresh `cache` every `interval` in a background task, starting one `interval` from now.
///
/// The first refresh is expected to have been done by the caller before serving requests.
pub fn spawn_refresh<G, R>(pipeline: Arc<Pipeline<G, R>>, cache: Arc<RenderCache>, interval: Duration) -> JoinHandle<()>
where
    G: Geocoder + Send + Sync + 'static,
    R: MapRenderer + Send + Sync + 'static,
{
    let mut ticks = tokio::time::interval_at(Instant::now() + interval, interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tokio::spawn(async move {
        tracing::info!(message = "map refresh started", interval_secs = interval.as_secs());

        loop {
            let _ = ticks.tick().await;
            cache
                .refresh(&pipeline)
                .instrument(tracing::span!(Level::DEBUG, "storm_map_refresh"))
                .await;
        }
    })
}
