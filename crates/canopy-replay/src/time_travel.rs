//! Live / paused viewing over a bounded tick history.
//!
//! The [`TimeTravelController`] is a two-state machine:
//!
//! ```text
//!            pause / go_to_tick / step_back
//!   Live  ─────────────────────────────────▶  Paused(frozen)
//!    ▲                                           │
//!    └────────────── jump_to_live ───────────────┘
//! ```
//!
//! The viewed tick is never stored: it is the store's newest tick while live
//! and the frozen id while paused. [`refresh`](TimeTravelController::refresh)
//! applies the reactive corrections (auto-reset when the store empties,
//! clamp to the oldest retained tick when the frozen one was evicted) and
//! returns the [`TimeTravelView`] read model.
//!
//! # "now" classification
//!
//! A tick's timestamp may be an application counter or a wall-clock epoch.
//! The first non-null timestamp *viewed* after a reset decides which, and the
//! answer is cached until the next reset so it cannot flicker while
//! scrubbing.

use std::time::{SystemTime, UNIX_EPOCH};

use canopy_trace::store::TickStore;
use canopy_trace::tick::TickId;
use serde::{Deserialize, Serialize};
use tracing::debug;

const MILLIS_PER_YEAR: f64 = 365.25 * 24.0 * 60.0 * 60.0 * 1000.0;

// ---------------------------------------------------------------------------
// TimeTravelConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeTravelConfig {
    /// A timestamp within this many years of the wall clock is epoch-like.
    pub epoch_window_years: f64,
}

impl Default for TimeTravelConfig {
    fn default() -> Self {
        Self {
            epoch_window_years: 50.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Read model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewMode {
    #[default]
    Live,
    Paused,
}

/// What the UI shows about the time-travel position.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimeTravelView {
    pub mode: ViewMode,
    pub viewed_tick_id: Option<TickId>,
    /// Timestamp of the viewed tick.
    pub viewed_now: Option<f64>,
    /// Whether timestamps are wall-clock epoch values.
    pub now_is_timestamp: bool,
    pub total_ticks: u64,
    pub oldest_tick_id: Option<TickId>,
    pub newest_tick_id: Option<TickId>,
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Whether `value` looks like a wall-clock time near `wall_clock_ms`.
///
/// Values with magnitude in `[1e9, 1e12)` are taken to be seconds and scaled
/// to milliseconds first.
pub fn looks_like_epoch(value: f64, wall_clock_ms: f64, window_years: f64) -> bool {
    if !value.is_finite() {
        return false;
    }
    let magnitude = value.abs();
    let millis = if (1e9..1e12).contains(&magnitude) {
        value * 1000.0
    } else {
        value
    };
    (millis - wall_clock_ms).abs() <= window_years * MILLIS_PER_YEAR
}

fn wall_clock_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

// ---------------------------------------------------------------------------
// TimeTravelController
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct TimeTravelController {
    config: TimeTravelConfig,
    mode: ViewMode,
    /// Meaningful only while paused.
    frozen_tick_id: Option<TickId>,
    /// Cached classification; `None` until a timestamp has been viewed.
    now_is_timestamp: Option<bool>,
}

impl TimeTravelController {
    pub fn new(config: TimeTravelConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn frozen_tick_id(&self) -> Option<TickId> {
        match self.mode {
            ViewMode::Paused => self.frozen_tick_id,
            ViewMode::Live => None,
        }
    }

    /// The tick being displayed, without applying corrections.
    pub fn viewed_tick_id<S: TickStore>(&self, store: &S) -> Option<TickId> {
        match self.mode {
            ViewMode::Live => store.stats().newest_tick_id,
            ViewMode::Paused => self.frozen_tick_id,
        }
    }

    /// Freeze at the newest tick. Re-freezes if already paused.
    pub fn pause<S: TickStore>(&mut self, store: &S) {
        self.mode = ViewMode::Paused;
        self.frozen_tick_id = store.stats().newest_tick_id;
    }

    /// Freeze at an arbitrary tick (scrubbing, jumping from an event).
    pub fn go_to_tick(&mut self, tick_id: TickId) {
        self.mode = ViewMode::Paused;
        self.frozen_tick_id = Some(tick_id);
    }

    /// Move to the next retained tick. No-op while live or at the newest tick.
    pub fn step_forward<S: TickStore>(&mut self, store: &S) {
        if self.mode != ViewMode::Paused {
            return;
        }
        let ids = store.stored_tick_ids();
        let Some(current) = self.frozen_tick_id else {
            return;
        };
        let next = ids.partition_point(|&id| id <= current);
        if let Some(&id) = ids.get(next) {
            self.frozen_tick_id = Some(id);
        }
    }

    /// Move to the previous retained tick, pausing if live. No-op at the
    /// oldest tick or with no ticks.
    pub fn step_back<S: TickStore>(&mut self, store: &S) {
        let ids = store.stored_tick_ids();
        let Some(current) = self.viewed_tick_id(store) else {
            return;
        };
        let before = ids.partition_point(|&id| id < current);
        if before == 0 {
            return;
        }
        self.mode = ViewMode::Paused;
        self.frozen_tick_id = Some(ids[before - 1]);
    }

    pub fn jump_to_live(&mut self) {
        self.mode = ViewMode::Live;
        self.frozen_tick_id = None;
    }

    /// Back to live with no cached timestamp classification, as if no tick
    /// had ever been viewed. Used when the underlying trace is replaced.
    pub fn reset(&mut self) {
        self.jump_to_live();
        self.now_is_timestamp = None;
    }

    /// Apply corrections and derive the read model using the system clock.
    pub fn refresh<S: TickStore>(&mut self, store: &S) -> TimeTravelView {
        self.refresh_at(store, wall_clock_ms())
    }

    /// [`refresh`](Self::refresh) with an explicit wall clock in epoch
    /// milliseconds.
    pub fn refresh_at<S: TickStore>(&mut self, store: &S, wall_clock_ms: f64) -> TimeTravelView {
        let stats = store.stats();

        if stats.total_tick_count == 0 {
            if self.mode != ViewMode::Live || self.now_is_timestamp.is_some() {
                debug!("tick store empty, resetting time travel");
            }
            self.reset();
        }

        if self.mode == ViewMode::Paused {
            self.clamp_to_retained(store);
        }

        let viewed_tick_id = self.viewed_tick_id(store);
        let viewed_now = viewed_tick_id
            .and_then(|id| store.tick_range(id, id).first().and_then(|t| t.timestamp));

        if self.now_is_timestamp.is_none() {
            if let Some(now) = viewed_now {
                let epoch = looks_like_epoch(now, wall_clock_ms, self.config.epoch_window_years);
                debug!(now, epoch, "classified tick timestamps");
                self.now_is_timestamp = Some(epoch);
            }
        }

        TimeTravelView {
            mode: self.mode,
            viewed_tick_id,
            viewed_now,
            now_is_timestamp: self.now_is_timestamp.unwrap_or(false),
            total_ticks: stats.total_tick_count,
            oldest_tick_id: stats.oldest_tick_id,
            newest_tick_id: stats.newest_tick_id,
        }
    }

    fn clamp_to_retained<S: TickStore>(&mut self, store: &S) {
        let ids = store.stored_tick_ids();
        let retained = self
            .frozen_tick_id
            .is_some_and(|id| ids.binary_search(&id).is_ok());
        if retained {
            return;
        }
        match ids.first() {
            Some(&oldest) => {
                debug!(
                    frozen = ?self.frozen_tick_id,
                    oldest,
                    "frozen tick no longer retained, clamping"
                );
                self.frozen_tick_id = Some(oldest);
            }
            // Ticks were ingested but none is retained; fall back to live.
            None => self.jump_to_live(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
