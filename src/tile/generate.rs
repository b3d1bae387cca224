//! Tile pyramid generation
//!
//! Slices a source image into a multi-level pyramid of fixed-size JPEG
//! tiles and packs them into a single zip archive: one directory per zoom
//! level (`<level>/<x>_<y>.jpg`, level 0 being the smallest) plus an
//! `ImageProperties.xml` descriptor for the viewer. Level dimensions halve
//! from one level to the next until the whole image fits in a single tile.
//!
//! This is strictly synchronous, CPU- and I/O-heavy work. It is meant to
//! run as the blocking body of an asynchronous job (see `jobs`), typically
//! through `FileCache::get_once`.

use image::imageops::FilterType;
use image::{DynamicImage, ImageOutputFormat};
use std::io::Write;
use std::path::Path;
use tracing::debug;
use zip::write::FileOptions;

use crate::constants::{TILE_JPEG_QUALITY, TILE_PROPERTIES_FILE};
use crate::error::Error;

/// Dimensions and layout of a generated pyramid
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyramidInfo {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub levels: u32,
    pub tile_count: u64,
}

/// Number of zoom levels for an image: full resolution plus one halving
/// per step until both edges fit in a single tile
pub fn level_count(width: u32, height: u32, tile_size: u32) -> u32 {
    let mut longest = width.max(height).max(1);
    let mut levels = 1;
    while longest > tile_size {
        longest = longest.div_ceil(2);
        levels += 1;
    }
    levels
}

fn tiles_at(width: u32, height: u32, tile_size: u32) -> u64 {
    u64::from(width.div_ceil(tile_size)) * u64::from(height.div_ceil(tile_size))
}

/// Dimensions of a given level, level `levels - 1` being full resolution
pub fn level_dimensions(width: u32, height: u32, levels: u32, level: u32) -> (u32, u32) {
    let halvings = levels - 1 - level;
    let mut w = width;
    let mut h = height;
    for _ in 0..halvings {
        w = w.div_ceil(2);
        h = h.div_ceil(2);
    }
    (w.max(1), h.max(1))
}

/// Generate the tile archive for the image at `image_path`, writing the
/// zip to `archive_path`. The archive is left behind only on success.
pub fn generate_archive(
    image_path: &Path,
    archive_path: &Path,
    tile_size: u32,
) -> Result<PyramidInfo, Error> {
    let result = write_archive(image_path, archive_path, tile_size);
    if result.is_err() {
        let _ = std::fs::remove_file(archive_path);
    }
    result
}

fn write_archive(
    image_path: &Path,
    archive_path: &Path,
    tile_size: u32,
) -> Result<PyramidInfo, Error> {
    // JPEG tiles have no alpha channel; flatten up front
    let source = image::open(image_path)?;
    let mut current = DynamicImage::ImageRgb8(source.to_rgb8());

    let width = current.width();
    let height = current.height();
    let levels = level_count(width, height, tile_size);

    let mut tile_count: u64 = 0;
    for level in 0..levels {
        let (w, h) = level_dimensions(width, height, levels, level);
        tile_count += tiles_at(w, h, tile_size);
    }

    let file = std::fs::File::create(archive_path)?;
    let mut archive = zip::ZipWriter::new(file);
    // JPEG data does not deflate; store members uncompressed
    let options: FileOptions =
        FileOptions::default().compression_method(zip::CompressionMethod::Stored);

    archive.start_file(TILE_PROPERTIES_FILE, options)?;
    write!(
        archive,
        r#"<IMAGE_PROPERTIES WIDTH="{}" HEIGHT="{}" NUMTILES="{}" NUMIMAGES="1" VERSION="1.8" TILESIZE="{}" />"#,
        width, height, tile_count, tile_size
    )
    .map_err(Error::from)?;

    for level in (0..levels).rev() {
        write_level(&mut archive, &current, level, tile_size, options)?;
        if level > 0 {
            let (w, h) = level_dimensions(width, height, levels, level - 1);
            current = current.resize_exact(w, h, FilterType::Triangle);
        }
    }

    archive.finish()?;

    let info = PyramidInfo {
        width,
        height,
        tile_size,
        levels,
        tile_count,
    };
    debug!(
        archive = %archive_path.display(),
        levels = info.levels,
        tiles = info.tile_count,
        "Generated tile pyramid"
    );
    Ok(info)
}

fn write_level<W: Write + std::io::Seek>(
    archive: &mut zip::ZipWriter<W>,
    image: &DynamicImage,
    level: u32,
    tile_size: u32,
    options: FileOptions,
) -> Result<(), Error> {
    let width = image.width();
    let height = image.height();
    let cols = width.div_ceil(tile_size);
    let rows = height.div_ceil(tile_size);

    let mut buffer = Vec::new();
    for y in 0..rows {
        for x in 0..cols {
            let tile_w = tile_size.min(width - x * tile_size);
            let tile_h = tile_size.min(height - y * tile_size);
            let tile = image.crop_imm(x * tile_size, y * tile_size, tile_w, tile_h);

            buffer.clear();
            tile.write_to(
                &mut std::io::Cursor::new(&mut buffer),
                ImageOutputFormat::Jpeg(TILE_JPEG_QUALITY),
            )?;

            archive.start_file(format!("{}/{}_{}.jpg", level, x, y), options)?;
            archive.write_all(&buffer).map_err(Error::from)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn write_test_image(path: &Path, width: u32, height: u32) {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        img.save(path).unwrap();
    }

    #[rstest]
    #[case(100, 100, 256, 1)]
    #[case(256, 256, 256, 1)]
    #[case(257, 100, 256, 2)]
    #[case(1024, 512, 256, 3)]
    #[case(1025, 512, 256, 4)]
    fn test_level_count(
        #[case] width: u32,
        #[case] height: u32,
        #[case] tile_size: u32,
        #[case] expected: u32,
    ) {
        assert_eq!(level_count(width, height, tile_size), expected);
    }

    #[test]
    fn test_level_dimensions_halve_per_level() {
        // 1000x600 at tile 256: levels 0..=2, full res at level 2
        let levels = level_count(1000, 600, 256);
        assert_eq!(levels, 3);
        assert_eq!(level_dimensions(1000, 600, levels, 2), (1000, 600));
        assert_eq!(level_dimensions(1000, 600, levels, 1), (500, 300));
        assert_eq!(level_dimensions(1000, 600, levels, 0), (250, 150));
    }

    #[test]
    fn test_archive_contains_descriptor_and_all_tiles() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("source.png");
        write_test_image(&image_path, 300, 200);

        let archive_path = dir.path().join("tiles.zip");
        let info = generate_archive(&image_path, &archive_path, 128).unwrap();

        assert_eq!(info.width, 300);
        assert_eq!(info.height, 200);
        assert_eq!(info.levels, 2);
        // Level 1: 3x2 tiles, level 0 (150x100): 2x1 tiles
        assert_eq!(info.tile_count, 8);

        let file = std::fs::File::open(&archive_path).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        assert_eq!(zip.len() as u64, info.tile_count + 1);
        assert!(zip.by_name(TILE_PROPERTIES_FILE).is_ok());
        assert!(zip.by_name("1/0_0.jpg").is_ok());
        assert!(zip.by_name("1/2_1.jpg").is_ok());
        assert!(zip.by_name("0/1_0.jpg").is_ok());
        assert!(zip.by_name("0/2_0.jpg").is_err());
    }

    #[test]
    fn test_single_level_for_small_images() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("source.png");
        write_test_image(&image_path, 64, 48);

        let archive_path = dir.path().join("tiles.zip");
        let info = generate_archive(&image_path, &archive_path, 256).unwrap();
        assert_eq!(info.levels, 1);
        assert_eq!(info.tile_count, 1);
    }

    #[test]
    fn test_edge_tiles_keep_remainder_dimensions() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("source.png");
        write_test_image(&image_path, 300, 200);

        let archive_path = dir.path().join("tiles.zip");
        generate_archive(&image_path, &archive_path, 128).unwrap();

        let file = std::fs::File::open(&archive_path).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        let mut member = zip.by_name("1/2_1.jpg").unwrap();
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut member, &mut bytes).unwrap();
        drop(member);

        let tile = image::load_from_memory(&bytes).unwrap();
        assert_eq!(tile.width(), 300 - 2 * 128);
        assert_eq!(tile.height(), 200 - 128);
    }

    #[test]
    fn test_unreadable_source_leaves_no_archive() {
        let dir = tempfile::tempdir().unwrap();
        let image_path = dir.path().join("not-an-image.png");
        std::fs::write(&image_path, b"garbage").unwrap();

        let archive_path = dir.path().join("tiles.zip");
        let err = generate_archive(&image_path, &archive_path, 256).unwrap_err();
        assert!(err.is_not_found() || err.is_transient());
        assert!(!archive_path.exists());
    }
}
