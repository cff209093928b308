//! CPU rasterizer for canvas snapshots and offline frames.

use std::path::Path;

use anyhow::{Context, Result};
use glam::Vec2;
use image::{Rgba, RgbaImage};

use crate::canvas::{Canvas, Shape, ShapeKind};

const BACKGROUND: Rgba<u8> = Rgba([24, 24, 28, 255]);

/// Draw every shape in insertion order onto a fresh image the size of the canvas.
pub fn rasterize(canvas: &dyn Canvas) -> RgbaImage {
    let extent = canvas.extent();
    let width = extent.x.max(1.0).round() as u32;
    let height = extent.y.max(1.0).round() as u32;
    let mut image = RgbaImage::from_pixel(width, height, BACKGROUND);

    for id in canvas.ids() {
        if let Some(shape) = canvas.get(id) {
            draw_shape(&mut image, shape);
        }
    }
    image
}

pub fn save_png(canvas: &dyn Canvas, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Creating {}", parent.display()))?;
    }
    rasterize(canvas)
        .save(path)
        .with_context(|| format!("Writing {}", path.display()))
}

fn draw_shape(image: &mut RgbaImage, shape: &Shape) {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let min = shape.position;
    let max = shape.position + shape.size;

    let x0 = (min.x.floor() as i64).clamp(0, w);
    let y0 = (min.y.floor() as i64).clamp(0, h);
    let x1 = (max.x.ceil() as i64).clamp(0, w);
    let y1 = (max.y.ceil() as i64).clamp(0, h);

    let centre = shape.position + shape.size * 0.5;
    let radii = shape.size * 0.5;

    for y in y0..y1 {
        for x in x0..x1 {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let inside = match shape.kind {
                ShapeKind::Rect => p.cmpge(min).all() && p.cmplt(max).all(),
                ShapeKind::Ellipse => {
                    if radii.x <= 0.0 || radii.y <= 0.0 {
                        false
                    } else {
                        let d = (p - centre) / radii;
                        d.length_squared() <= 1.0
                    }
                }
            };
            if inside {
                blend(image.get_pixel_mut(x as u32, y as u32), shape.fill);
            }
        }
    }
}

/// Source-over alpha blending onto an opaque destination.
fn blend(dst: &mut Rgba<u8>, src: [u8; 4]) {
    let alpha = src[3] as f32 / 255.0;
    for i in 0..3 {
        let mixed = src[i] as f32 * alpha + dst[i] as f32 * (1.0 - alpha);
        dst[i] = mixed.round() as u8;
    }
    dst[3] = 255;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::SceneCanvas;

    #[test]
    fn test_rect_and_ellipse_coverage() {
        let mut canvas = SceneCanvas::new(40.0, 20.0);
        let mut rect = Shape::new(ShapeKind::Rect, Vec2::new(10.0, 10.0)).at(Vec2::new(0.0, 0.0));
        rect.fill = [255, 0, 0, 255];
        canvas.add(rect);
        let mut ellipse = Shape::new(ShapeKind::Ellipse, Vec2::new(20.0, 20.0)).at(Vec2::new(20.0, 0.0));
        ellipse.fill = [0, 255, 0, 255];
        canvas.add(ellipse);

        let image = rasterize(&canvas);
        assert_eq!(image.dimensions(), (40, 20));
        assert_eq!(image.get_pixel(5, 5), &Rgba([255, 0, 0, 255]));
        assert_eq!(image.get_pixel(15, 15), &BACKGROUND);
        // Ellipse centre is filled, its bounding-box corner is not.
        assert_eq!(image.get_pixel(30, 10), &Rgba([0, 255, 0, 255]));
        assert_eq!(image.get_pixel(20, 0), &BACKGROUND);
    }

    #[test]
    fn test_alpha_blend_and_offscreen_clip() {
        let mut canvas = SceneCanvas::new(10.0, 10.0);
        let mut shape = Shape::new(ShapeKind::Rect, Vec2::new(100.0, 100.0)).at(Vec2::new(-50.0, -50.0));
        shape.fill = [255, 255, 255, 0];
        canvas.add(shape);

        let image = rasterize(&canvas);
        assert_eq!(image.get_pixel(0, 0), &BACKGROUND);
    }

    #[test]
    fn test_save_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("snap.png");
        let canvas = SceneCanvas::new(8.0, 8.0);
        save_png(&canvas, &path).unwrap();
        assert!(path.exists());
    }
}
