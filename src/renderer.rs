//! # Text Rendering
//!
//! Renders an engine [`Snapshot`] as a small plain-text panel for the terminal.
//! Times are shown exactly as held in the time set (24-hour `HH:MM`); locally
//! computed results are flagged as offline so the reader knows they are an
//! approximation of the authority's published times.

use crate::engine::Snapshot;
use crate::{EngineState, NextEventInfo, TimeSourceResult};
use std::fmt::Write;

const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

/// Nearest 16-point compass label for a bearing in degrees.
pub fn compass_point(bearing: f64) -> &'static str {
    let index = ((bearing.rem_euclid(360.0) / 22.5).round() as usize) % COMPASS_POINTS.len();
    COMPASS_POINTS[index]
}

/// Render the whole snapshot.
pub fn render(snapshot: &Snapshot) -> String {
    let mut out = String::new();

    match &snapshot.state {
        EngineState::Loading => {
            out.push_str("Loading prayer times...\n");
            if let Some(previous) = &snapshot.previous {
                out.push_str("(showing times for the previous location)\n");
                render_times(&mut out, previous);
            }
        }
        EngineState::Error { message } => {
            let _ = writeln!(out, "Error: {message}");
            out.push_str("Press r to retry.\n");
        }
        EngineState::Ready => {
            if let Some(coords) = &snapshot.coordinates {
                match &snapshot.location_name {
                    Some(name) => {
                        let _ = writeln!(out, "Location: {coords} ({name}, default location)");
                    }
                    None => {
                        let _ = writeln!(out, "Location: {coords}");
                    }
                }
            }
            if let Some(result) = &snapshot.result {
                render_times(&mut out, result);
            }
            if let Some(next) = &snapshot.next {
                render_next(&mut out, next);
            }
        }
    }

    out
}

fn render_times(out: &mut String, result: &TimeSourceResult) {
    match result.secondary_calendar_label() {
        Some(hijri) => {
            let _ = writeln!(out, "Hijri: {hijri}");
        }
        None => out.push_str("⚠ OFFLINE (computed locally)\n"),
    }

    for (name, time) in result.times.entries() {
        let _ = writeln!(out, "  {:<8} {}", capitalize(name), time.format("%H:%M"));
    }

    let _ = writeln!(
        out,
        "Qibla: {:.1}° {}",
        result.qibla_bearing,
        compass_point(result.qibla_bearing)
    );
}

fn render_next(out: &mut String, next: &NextEventInfo) {
    let _ = writeln!(
        out,
        "Next: {} at {} (in {})",
        capitalize(next.prayer.name()),
        next.clock_time.format("%H:%M"),
        next.remaining
    );
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Print the snapshot to stdout.
pub fn draw_ascii(snapshot: &Snapshot) {
    print!("{}", render(snapshot));
}
