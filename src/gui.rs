//! GUI interaction contract: the driver trait the OS binding implements, the
//! grid-overlay screenshot protocol, and the normalized-coordinate mapping.
//!
//! The resolver looks at a screenshot overlaid with a 10x10 grid and answers
//! with normalized `[0,1000]` coordinates. The core accepts the answer only
//! above the confidence floor, maps it to screenshot pixels, then rescales to
//! the logical display (the two resolutions differ under display scaling). A
//! mapped point outside the logical bounds is an error, never clamped.

use crate::error::EngineError;
use crate::plan::ExecutionResult;
use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use image::{ImageOutputFormat, Rgba};
use serde::Deserialize;
use std::io::Cursor;
use std::time::Duration;

pub const CONFIDENCE_THRESHOLD: i64 = 60;
pub const GRID_CELLS: u32 = 10;

/// Raw screen capture plus its pixel dimensions.
#[derive(Debug, Clone)]
pub struct Screenshot {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// OS-level input binding. External collaborator; the engine only consumes
/// this contract.
pub trait GuiDriver: Send + Sync {
    fn is_available(&self) -> bool;
    fn logical_size(&self) -> (u32, u32);
    fn capture(&self) -> Result<Screenshot>;
    fn click(&self, x: i32, y: i32) -> Result<()>;
    fn type_text(&self, text: &str) -> Result<()>;
    fn press_key(&self, key: &str) -> Result<()>;
}

/// Vision service that maps a textual target description to grid coordinates.
#[async_trait]
pub trait GuiResolver: Send + Sync {
    async fn locate(&self, target: &str, grid_png_b64: &str) -> Result<ResolverReply>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverReply {
    pub found: bool,
    pub x: i64,
    pub y: i64,
    pub confidence: i64,
}

impl Default for ResolverReply {
    fn default() -> Self {
        Self {
            found: false,
            x: 500,
            y: 500,
            confidence: 0,
        }
    }
}

/// Parse a resolver reply out of free text (the JSON object between the
/// first `{` and the last `}`).
pub fn parse_resolver_reply(text: &str) -> Result<ResolverReply, EngineError> {
    let start = text
        .find('{')
        .ok_or_else(|| EngineError::PlanParse("resolver reply has no JSON object".to_string()))?;
    let end = text
        .rfind('}')
        .map(|i| i + 1)
        .filter(|&end| end > start)
        .ok_or_else(|| EngineError::PlanParse("resolver reply has no JSON object".to_string()))?;
    serde_json::from_str(&text[start..end]).map_err(|e| EngineError::PlanParse(e.to_string()))
}

/// Overlay the labeled 10x10 grid on a screenshot and return it as base64
/// PNG for the resolver call.
pub fn grid_overlay_b64(shot: &Screenshot) -> Result<String> {
    let mut img = image::load_from_memory(&shot.png)?.to_rgba8();
    let (width, height) = img.dimensions();
    let red = Rgba([255u8, 0, 0, 255]);

    for i in 1..GRID_CELLS {
        let x = width * i / GRID_CELLS;
        for y in 0..height {
            img.put_pixel(x.min(width - 1), y, red);
        }
        let y = height * i / GRID_CELLS;
        for x in 0..width {
            img.put_pixel(x, y.min(height - 1), red);
        }
    }

    let mut buffer = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(img).write_to(&mut buffer, ImageOutputFormat::Png)?;
    Ok(general_purpose::STANDARD.encode(buffer.get_ref()))
}

/// Map an accepted resolver reply to logical display coordinates.
pub fn map_to_logical(
    reply: &ResolverReply,
    shot_width: u32,
    shot_height: u32,
    logical_width: u32,
    logical_height: u32,
) -> Result<(i32, i32), EngineError> {
    let actual_x = (reply.x as f64 / 1000.0 * shot_width as f64) as i32;
    let actual_y = (reply.y as f64 / 1000.0 * shot_height as f64) as i32;

    let scale_x = logical_width as f64 / shot_width as f64;
    let scale_y = logical_height as f64 / shot_height as f64;

    let click_x = (actual_x as f64 * scale_x) as i32;
    let click_y = (actual_y as f64 * scale_y) as i32;

    if click_x < 0
        || click_y < 0
        || click_x > logical_width as i32
        || click_y > logical_height as i32
    {
        return Err(EngineError::OutOfBounds {
            x: click_x,
            y: click_y,
        });
    }

    Ok((click_x, click_y))
}

/// Resolve a textual target on screen and click it. One attempt; the hybrid
/// executor owns the bounded retry loop around this.
pub async fn find_and_click(
    driver: &dyn GuiDriver,
    resolver: &dyn GuiResolver,
    target: &str,
    settle: Duration,
) -> ExecutionResult {
    if !driver.is_available() {
        return ExecutionResult::failure(EngineError::GuiUnavailable.to_string());
    }

    // Let the UI settle before looking at it.
    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }

    let shot = match driver.capture() {
        Ok(shot) => shot,
        Err(e) => return ExecutionResult::failure(format!("Failed to capture screen: {}", e)),
    };

    let grid_b64 = match grid_overlay_b64(&shot) {
        Ok(b64) => b64,
        Err(e) => return ExecutionResult::failure(format!("Failed to prepare screenshot: {}", e)),
    };

    let reply = match resolver.locate(target, &grid_b64).await {
        Ok(reply) => reply,
        Err(e) => return ExecutionResult::failure(format!("Resolver error: {}", e)),
    };

    if !reply.found {
        return ExecutionResult::failure(EngineError::ElementNotFound(target.to_string()).to_string());
    }
    if reply.confidence < CONFIDENCE_THRESHOLD {
        return ExecutionResult::failure(
            EngineError::LowConfidence {
                confidence: reply.confidence,
                target: target.to_string(),
            }
            .to_string(),
        );
    }

    let (logical_w, logical_h) = driver.logical_size();
    let (x, y) = match map_to_logical(&reply, shot.width, shot.height, logical_w, logical_h) {
        Ok(point) => point,
        Err(e) => return ExecutionResult::failure(e.to_string()),
    };

    println!("  🎯 GUI: Click at ({}, {}) confidence: {}%", x, y, reply.confidence);
    match driver.click(x, y) {
        Ok(()) => ExecutionResult::ok_output(format!("Clicked ({}, {})", x, y)),
        Err(e) => ExecutionResult::failure(format!("Click failed: {}", e)),
    }
}
