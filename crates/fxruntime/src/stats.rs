//! Frame, texture and technique statistics for the overlay and the harness.

use std::fmt;
use std::time::Duration;

const FRAME_RATE_WINDOW: usize = 64;

/// Moving average of the frame rate over the last frames.
#[derive(Debug, Clone)]
pub struct FrameRate {
    samples: [f64; FRAME_RATE_WINDOW],
    next: usize,
    filled: usize,
}

impl Default for FrameRate {
    fn default() -> Self {
        Self {
            samples: [0.0; FRAME_RATE_WINDOW],
            next: 0,
            filled: 0,
        }
    }
}

impl FrameRate {
    pub fn push(&mut self, frame_time: Duration) {
        self.samples[self.next] = frame_time.as_secs_f64();
        self.next = (self.next + 1) % FRAME_RATE_WINDOW;
        self.filled = (self.filled + 1).min(FRAME_RATE_WINDOW);
    }

    pub fn average(&self) -> f64 {
        let total: f64 = self.samples[..self.filled].iter().sum();
        if total <= 0.0 {
            0.0
        } else {
            self.filled as f64 / total
        }
    }
}

/// Counters of host activity. Draw calls and vertices accumulate during a
/// frame and are published at its end.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    pub frame_count: u64,
    pub draw_calls: u32,
    pub vertices: u64,
    pub network_bytes: u64,
    pub date: [f32; 4],
    pub frame_time: Duration,
    pub post_processing: Duration,
    pub frame_rate: FrameRate,
    pending_draw_calls: u32,
    pending_vertices: u64,
    pending_network_bytes: u64,
}

impl FrameStats {
    pub fn record_draw(&mut self, vertices: u32) {
        self.pending_draw_calls = self.pending_draw_calls.saturating_add(1);
        self.pending_vertices += u64::from(vertices);
    }

    pub fn record_network(&mut self, bytes: u64) {
        self.pending_network_bytes = self.pending_network_bytes.saturating_add(bytes);
    }

    /// Network bytes seen since the last frame ended.
    pub fn pending_network_bytes(&self) -> u64 {
        self.pending_network_bytes
    }

    pub fn end_frame(&mut self, frame_time: Duration) {
        self.frame_count += 1;
        self.frame_time = frame_time;
        self.frame_rate.push(frame_time);
        self.draw_calls = std::mem::take(&mut self.pending_draw_calls);
        self.vertices = std::mem::take(&mut self.pending_vertices);
        self.network_bytes = std::mem::take(&mut self.pending_network_bytes);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureStats {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub levels: u32,
    pub storage_size: usize,
}

impl fmt::Display for TextureStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}x{}+{} ({} B)",
            self.name,
            self.width,
            self.height,
            self.levels.saturating_sub(1),
            self.storage_size
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TechniqueStats {
    pub name: String,
    pub enabled: bool,
    pub passes: usize,
    pub duration: Duration,
}

impl fmt::Display for TechniqueStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} passes): {:.3} ms",
            self.name,
            self.passes,
            self.duration.as_secs_f64() * 1000.0
        )
    }
}

/// Everything the shell shows in its statistics view.
#[derive(Debug, Clone)]
pub struct StatisticsReport {
    pub frame_count: u64,
    pub draw_calls: u32,
    pub vertices: u64,
    pub frame_rate: f64,
    pub date: [f32; 4],
    pub post_processing: Duration,
    pub network_bytes: u64,
    pub textures: Vec<TextureStats>,
    pub techniques: Vec<TechniqueStats>,
}

impl fmt::Display for StatisticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "frame count: {}", self.frame_count)?;
        writeln!(f, "draw calls: {} ({} vertices)", self.draw_calls, self.vertices)?;
        writeln!(f, "frame rate: {:.1} fps", self.frame_rate)?;
        writeln!(
            f,
            "date: {}-{}-{} {}",
            self.date[0], self.date[1], self.date[2], self.date[3]
        )?;
        writeln!(
            f,
            "post-processing: {:.3} ms",
            self.post_processing.as_secs_f64() * 1000.0
        )?;
        writeln!(f, "network: {} B", self.network_bytes)?;
        writeln!(f, "textures:")?;
        for texture in &self.textures {
            writeln!(f, "  {texture}")?;
        }
        writeln!(f, "techniques:")?;
        for technique in &self.techniques {
            writeln!(f, "  {technique}")?;
        }
        Ok(())
    }
}
