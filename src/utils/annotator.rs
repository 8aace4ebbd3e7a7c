use std::io::Cursor;

use image::{DynamicImage, ImageFormat, Rgb, Rgba};
use imageproc::drawing::{draw_hollow_rect_mut, Canvas};
use imageproc::rect::Rect;
use serde_json::Value;

use crate::models::detection::Detection;

/// Box outline colour (pure blue, RGB order).
pub const BOX_COLOR: [u8; 3] = [0, 0, 255];
pub const STROKE_WIDTH: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum AnnotateError {
    #[error("malformed detection at position {position}: {reason}")]
    MalformedDetection { position: usize, reason: String },
    #[error("failed to decode image: {0}")]
    Decode(#[source] image::ImageError),
    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),
}

/// Converts the detector's keyed entries into tagged detections. Inverted, empty or
/// negative boxes are rejected rather than drawn.
pub fn parse_detections(raw: &[Value]) -> Result<Vec<Detection>, AnnotateError> {
    raw.iter()
        .enumerate()
        .map(|(position, entry)| {
            let detection: Detection = serde_json::from_value(entry.clone()).map_err(|e| {
                AnnotateError::MalformedDetection { position, reason: e.to_string() }
            })?;

            if !detection.bbox.is_well_formed() {
                return Err(AnnotateError::MalformedDetection {
                    position,
                    reason: format!(
                        "box ({}, {}) -> ({}, {}) is empty or inverted",
                        detection.bbox.xmin, detection.bbox.ymin, detection.bbox.xmax, detection.bbox.ymax
                    ),
                });
            }

            Ok(detection)
        })
        .collect()
}

/// Draws every detection onto a copy of `data` and re-encodes it in the source format.
///
/// `image` decodes to RGB(A) and `imageproc` draws in the buffer's own channel order, so
/// no channel swap happens here. Images with alpha keep it; everything else is drawn on
/// an RGB copy. Boxes starting past the right or bottom edge are skipped; other corners
/// outside the image are clamped to the last row/column.
pub fn annotate(data: &[u8], detections: &[Detection]) -> Result<Vec<u8>, AnnotateError> {
    let format = image::guess_format(data).map_err(AnnotateError::Decode)?;
    let img = image::load_from_memory_with_format(data, format).map_err(AnnotateError::Decode)?;

    let annotated = if img.color().has_alpha() {
        let mut canvas = img.to_rgba8();
        let [r, g, b] = BOX_COLOR;
        draw_boxes(&mut canvas, detections, Rgba([r, g, b, 255]));
        DynamicImage::ImageRgba8(canvas)
    } else {
        let mut canvas = img.to_rgb8();
        draw_boxes(&mut canvas, detections, Rgb(BOX_COLOR));
        DynamicImage::ImageRgb8(canvas)
    };

    let output_format = match format {
        ImageFormat::Png | ImageFormat::Bmp | ImageFormat::Tiff | ImageFormat::WebP => format,
        ImageFormat::Jpeg => ImageFormat::Jpeg,
        _ => ImageFormat::Png,
    };

    let annotated = match output_format {
        ImageFormat::Jpeg if annotated.color().has_alpha() => DynamicImage::ImageRgb8(annotated.to_rgb8()),
        _ => annotated,
    };

    let mut buffer = Cursor::new(Vec::new());
    annotated
        .write_to(&mut buffer, output_format)
        .map_err(AnnotateError::Encode)?;

    Ok(buffer.into_inner())
}

fn draw_boxes<C: Canvas>(canvas: &mut C, detections: &[Detection], color: C::Pixel) {
    let (width, height) = canvas.dimensions();
    if width == 0 || height == 0 {
        return;
    }
    let max_x = width as i32 - 1;
    let max_y = height as i32 - 1;

    for detection in detections {
        let bbox = detection.bbox;
        // Nothing of this box is visible.
        if bbox.xmin > max_x || bbox.ymin > max_y {
            continue;
        }
        let (left, top) = (bbox.xmin.clamp(0, max_x), bbox.ymin.clamp(0, max_y));
        let (right, bottom) = (bbox.xmax.clamp(0, max_x), bbox.ymax.clamp(0, max_y));

        // The stroke grows inward so the outer corners stay on the reported coordinates.
        for inset in 0..STROKE_WIDTH as i32 {
            let (l, t, r, b) = (left + inset, top + inset, right - inset, bottom - inset);
            if r < l || b < t {
                break;
            }
            let rect = Rect::at(l, t).of_size((r - l + 1) as u32, (b - t + 1) as u32);
            draw_hollow_rect_mut(canvas, rect, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::detection::BoundingBox;
    use image::{ImageBuffer, Luma, RgbImage, RgbaImage};
    use serde_json::json;

    const BACKGROUND: Rgb<u8> = Rgb([120, 200, 40]);

    fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn test_png(width: u32, height: u32) -> Vec<u8> {
        png_bytes(DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, BACKGROUND)))
    }

    fn det(index: u32, xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Detection {
        Detection { index, bbox: BoundingBox { xmin, ymin, xmax, ymax } }
    }

    #[test]
    fn test_preserves_dimensions_and_channels() {
        let input = test_png(64, 48);
        let output = annotate(&input, &[det(0, 5, 6, 20, 30), det(1, 30, 10, 60, 40)]).unwrap();

        let decoded = image::load_from_memory(&output).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 48));
        assert_eq!(decoded.color().channel_count(), 3);
        assert_ne!(output, input);
    }

    #[test]
    fn test_corners_match_coordinates() {
        let input = test_png(64, 48);
        let output = annotate(&input, &[det(0, 5, 6, 20, 30)]).unwrap();
        let decoded = image::load_from_memory(&output).unwrap().to_rgb8();

        for (x, y) in [(5, 6), (20, 6), (5, 30), (20, 30)] {
            assert_eq!(*decoded.get_pixel(x, y), Rgb(BOX_COLOR), "corner ({x}, {y})");
        }
        // second stroke line sits just inside the outer one
        assert_eq!(*decoded.get_pixel(6, 7), Rgb(BOX_COLOR));
        // interior and exterior untouched
        assert_eq!(*decoded.get_pixel(12, 18), BACKGROUND);
        assert_eq!(*decoded.get_pixel(4, 5), BACKGROUND);
        assert_eq!(*decoded.get_pixel(21, 31), BACKGROUND);
    }

    #[test]
    fn test_drawn_pixels_are_blue_in_rgb_order() {
        let input = test_png(16, 16);
        let output = annotate(&input, &[det(0, 2, 2, 10, 10)]).unwrap();
        let decoded = image::load_from_memory(&output).unwrap().to_rgb8();

        let Rgb([r, g, b]) = *decoded.get_pixel(2, 2);
        assert_eq!((r, g, b), (0, 0, 255));
    }

    #[test]
    fn test_does_not_mutate_input() {
        let input = test_png(32, 32);
        let snapshot = input.clone();
        let _ = annotate(&input, &[det(0, 1, 1, 30, 30)]).unwrap();
        assert_eq!(input, snapshot);
    }

    #[test]
    fn test_keeps_alpha_channel() {
        let img = RgbaImage::from_pixel(20, 20, Rgba([10, 10, 10, 128]));
        let output = annotate(&png_bytes(DynamicImage::ImageRgba8(img)), &[det(0, 2, 2, 12, 12)]).unwrap();
        let decoded = image::load_from_memory(&output).unwrap();

        assert_eq!(decoded.color().channel_count(), 4);
        assert_eq!(*decoded.to_rgba8().get_pixel(2, 2), Rgba([0, 0, 255, 255]));
    }

    #[test]
    fn test_grayscale_is_promoted_to_rgb() {
        let img: ImageBuffer<Luma<u8>, Vec<u8>> = ImageBuffer::from_pixel(10, 10, Luma([90]));
        let output = annotate(&png_bytes(DynamicImage::ImageLuma8(img)), &[det(0, 1, 1, 8, 8)]).unwrap();
        let decoded = image::load_from_memory(&output).unwrap();

        assert_eq!(decoded.color().channel_count(), 3);
        assert_eq!(*decoded.to_rgb8().get_pixel(1, 1), Rgb(BOX_COLOR));
    }

    #[test]
    fn test_clamps_boxes_past_the_edge() {
        let input = test_png(64, 48);
        let output = annotate(&input, &[det(0, 50, 40, 200, 200)]).unwrap();
        let decoded = image::load_from_memory(&output).unwrap().to_rgb8();

        assert_eq!(*decoded.get_pixel(63, 47), Rgb(BOX_COLOR));
        assert_eq!(*decoded.get_pixel(50, 40), Rgb(BOX_COLOR));
    }

    #[test]
    fn test_skips_boxes_outside_the_image() {
        let input = test_png(64, 48);
        let output = annotate(&input, &[det(0, 70, 10, 90, 20), det(1, 10, 48, 20, 60)]).unwrap();
        let decoded = image::load_from_memory(&output).unwrap().to_rgb8();

        assert!(decoded.pixels().all(|p| *p == BACKGROUND));
    }

    #[test]
    fn test_rejects_undecodable_input() {
        let err = annotate(b"definitely not an image", &[]).unwrap_err();
        assert!(matches!(err, AnnotateError::Decode(_)));
    }

    #[test]
    fn test_parse_detections() {
        let raw = vec![
            json!({"0": {"xmin": 1, "ymin": 2, "xmax": 10, "ymax": 20}}),
            json!({"1": {"xmin": 5.7, "ymin": 6, "xmax": 15, "ymax": 16}}),
        ];
        let parsed = parse_detections(&raw).unwrap();

        assert_eq!(parsed, vec![det(0, 1, 2, 10, 20), det(1, 5, 6, 15, 16)]);
    }

    #[test]
    fn test_parse_detections_reports_position() {
        let raw = vec![
            json!({"0": {"xmin": 1, "ymin": 2, "xmax": 10, "ymax": 20}}),
            json!({"xmin": 1, "ymin": 2, "xmax": 10, "ymax": 20}),
        ];

        match parse_detections(&raw) {
            Err(AnnotateError::MalformedDetection { position, .. }) => assert_eq!(position, 1),
            other => panic!("expected malformed detection, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_detections_rejects_inverted_box() {
        let raw = vec![json!({"4": {"xmin": 40, "ymin": 2, "xmax": 10, "ymax": 20}})];
        assert!(matches!(
            parse_detections(&raw),
            Err(AnnotateError::MalformedDetection { position: 0, .. })
        ));
    }
}
