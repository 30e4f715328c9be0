//! End-to-end pyramid builds on raster slides.

use sha2::{Digest, Sha256};
use std::time::Duration;

use slide_tiler::error::BuildError;
use slide_tiler::ingest::PendingSlide;
use slide_tiler::pyramid::{LevelStatus, SlideOutcome};
use slide_tiler::slide::ImageSlideLibrary;
use slide_tiler::tile::tile_entry_name;

use super::test_utils::*;

const SLIDE_COLOR: [u8; 3] = [40, 90, 160];
const WHITE: [u8; 3] = [255, 255, 255];

fn names(slide_id: &str, level: usize, coords: &[u64]) -> Vec<String> {
    let mut names: Vec<String> = coords
        .iter()
        .flat_map(|&y| {
            coords
                .iter()
                .map(move |&x| tile_entry_name(slide_id, x, y, level, 256, 256))
        })
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_two_level_slide() {
    let ws = Workspace::new();
    let path = ws.write_slide("s1.pending", 1000, 1000, SLIDE_COLOR);
    let builder = builder(raster_library(), &ws.output, |c| c);

    let slide = PendingSlide::from_path(&path, ".pending").unwrap();
    let report = builder.build(&slide).await.unwrap();

    assert_eq!(report.outcome, SlideOutcome::Done);
    assert_eq!(report.tiles_written(), 20);
    assert_eq!(report.tile_failures(), 0);

    // Coarsest level first
    assert_eq!(report.levels[0].level, 1);
    assert_eq!((report.levels[0].cols, report.levels[0].rows), (2, 2));
    assert_eq!(report.levels[1].level, 0);
    assert_eq!((report.levels[1].cols, report.levels[1].rows), (4, 4));

    let coarse = read_archive(&ws.archive("s1", 1));
    assert_eq!(
        coarse.keys().cloned().collect::<Vec<_>>(),
        names("s1", 1, &[0, 512])
    );

    let full = read_archive(&ws.archive("s1", 0));
    assert_eq!(
        full.keys().cloned().collect::<Vec<_>>(),
        names("s1", 0, &[0, 256, 512, 768])
    );

    // The pending marker is gone
    assert!(!path.exists());
    assert!(ws.slides.join("s1").exists());
}

#[tokio::test]
async fn test_edge_tiles_are_padded_with_background() {
    let ws = Workspace::new();
    let path = ws.write_slide("s1.pending", 1000, 1000, SLIDE_COLOR);
    let builder = builder(raster_library(), &ws.output, |c| c);

    builder
        .build(&PendingSlide::from_path(&path, ".pending").unwrap())
        .await
        .unwrap();

    let full = read_archive(&ws.archive("s1", 0));
    let edge = decode_tile(&full[&tile_entry_name("s1", 768, 768, 0, 256, 256)]);
    assert_eq!(edge.dimensions(), (256, 256));
    assert_color_near(edge.get_pixel(100, 100).0, SLIDE_COLOR, 12);
    assert_color_near(edge.get_pixel(250, 100).0, WHITE, 12);
    assert_color_near(edge.get_pixel(100, 250).0, WHITE, 12);

    let coarse = read_archive(&ws.archive("s1", 1));
    let edge = decode_tile(&coarse[&tile_entry_name("s1", 512, 0, 1, 256, 256)]);
    assert_color_near(edge.get_pixel(100, 100).0, SLIDE_COLOR, 12);
    assert_color_near(edge.get_pixel(252, 100).0, WHITE, 12);
}

#[tokio::test]
async fn test_declared_background_fills_transparent_areas() {
    let ws = Workspace::new();
    let path = ws.write_half_transparent_slide("s1.pending", 600, 400);
    let library = ImageSlideLibrary::new()
        .with_min_level_size(1024)
        .with_background("000000");
    let builder = builder(library, &ws.output, |c| c);

    let report = builder
        .build(&PendingSlide::from_path(&path, ".pending").unwrap())
        .await
        .unwrap();
    assert_eq!(report.levels.len(), 1);
    assert_eq!(report.tiles_written(), 6);

    let tiles = read_archive(&ws.archive("s1", 0));
    let left = decode_tile(&tiles[&tile_entry_name("s1", 0, 0, 0, 256, 256)]);
    assert_color_near(left.get_pixel(100, 100).0, [200, 30, 30], 16);

    let right = decode_tile(&tiles[&tile_entry_name("s1", 512, 0, 0, 256, 256)]);
    assert_color_near(right.get_pixel(100, 100).0, [0, 0, 0], 12);
}

#[tokio::test]
async fn test_rebuild_produces_same_entry_names() {
    let ws = Workspace::new();
    let path = ws.write_slide("s1", 1000, 1000, SLIDE_COLOR);
    let builder = builder(raster_library(), &ws.output, |c| c);
    let slide = PendingSlide::for_path(&path, ".pending");

    builder.build(&slide).await.unwrap();
    let first: Vec<String> = read_archive(&ws.archive("s1", 0)).into_keys().collect();

    let report = builder.build(&slide).await.unwrap();
    assert!(report.is_done());
    let second: Vec<String> = read_archive(&ws.archive("s1", 0)).into_keys().collect();

    assert_eq!(first, second);
    assert!(path.exists());
}

#[tokio::test]
async fn test_slide_is_opened_once_per_cache_lifetime() {
    let ws = Workspace::new();
    let path = ws.write_slide("s1", 1000, 1000, SLIDE_COLOR);
    let library = FaultyLibrary::new(raster_library());
    let builder = builder(library.clone(), &ws.output, |c| c);
    let slide = PendingSlide::for_path(&path, ".pending");

    builder.build(&slide).await.unwrap();
    builder.build(&slide).await.unwrap();

    assert_eq!(library.open_count(), 1);
    assert_eq!(library.paint_count(), 40);
}

#[tokio::test]
async fn test_single_tile_failure_is_recorded() {
    let ws = Workspace::new();
    let path = ws.write_slide("s1.pending", 1000, 1000, SLIDE_COLOR);
    let library = FaultyLibrary::new(raster_library()).failing_at(0, 512, 256);
    let builder = builder(library, &ws.output, |c| c);

    let report = builder
        .build(&PendingSlide::from_path(&path, ".pending").unwrap())
        .await
        .unwrap();

    // A failed tile does not fail the level
    assert!(report.is_done());
    let base = &report.levels[1];
    assert!(base.is_sealed());
    assert_eq!(base.scheduled, 16);
    assert_eq!(base.written, 15);
    assert_eq!(base.failures.len(), 1);
    assert_eq!((base.failures[0].task.row, base.failures[0].task.col), (1, 2));

    let tiles = read_archive(&ws.archive("s1", 0));
    assert_eq!(tiles.len(), 15);
    assert!(!tiles.contains_key(&tile_entry_name("s1", 512, 256, 0, 256, 256)));
}

#[tokio::test]
async fn test_timeout_leaves_slide_pending() {
    let ws = Workspace::new();
    let path = ws.write_slide("s1.pending", 1000, 1000, SLIDE_COLOR);
    let library =
        FaultyLibrary::new(raster_library()).with_paint_delay(Duration::from_millis(200));
    let builder = builder(library, &ws.output, |c| {
        c.with_workers(1)
            .with_level_timeout(Duration::from_millis(50))
    });

    let report = builder
        .build(&PendingSlide::from_path(&path, ".pending").unwrap())
        .await
        .unwrap();

    assert_eq!(report.outcome, SlideOutcome::Failed);
    assert_eq!(report.levels.len(), 1);
    assert!(matches!(
        report.levels[0].status,
        LevelStatus::TimedOut { .. }
    ));

    assert!(path.exists());
    assert!(!ws.archive("s1", 0).exists());
    assert!(!ws.archive("s1", 1).exists());
}

#[tokio::test]
async fn test_corrupt_slide_writes_nothing() {
    let ws = Workspace::new();
    let bad = ws.write_garbage("bad.pending");
    let good = ws.write_slide("good.pending", 300, 300, SLIDE_COLOR);
    let builder = builder(raster_library(), &ws.output, |c| c);

    let result = builder
        .build(&PendingSlide::from_path(&bad, ".pending").unwrap())
        .await;
    assert!(matches!(result, Err(BuildError::NativeDecode(_))));
    assert!(bad.exists());
    assert_eq!(std::fs::read_dir(&ws.output).unwrap().count(), 0);

    // The next slide is unaffected
    let report = builder
        .build(&PendingSlide::from_path(&good, ".pending").unwrap())
        .await
        .unwrap();
    assert!(report.is_done());
    assert_eq!(report.tiles_written(), 4);
}

#[tokio::test]
async fn test_manifest_matches_archives() {
    let ws = Workspace::new();
    let path = ws.write_slide("s1.pending", 1000, 1000, SLIDE_COLOR);
    let builder = builder(raster_library(), &ws.output, |c| c);

    builder
        .build(&PendingSlide::from_path(&path, ".pending").unwrap())
        .await
        .unwrap();

    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(ws.output.join("s1.manifest.json")).unwrap())
            .unwrap();
    assert_eq!(manifest["outcome"], "done");
    assert_eq!(manifest["levels"].as_array().unwrap().len(), 2);

    for level in manifest["levels"].as_array().unwrap() {
        assert_eq!(level["status"], "sealed");
        let archive = std::path::PathBuf::from(level["archive"].as_str().unwrap());
        let bytes = std::fs::read(&archive).unwrap();
        assert_eq!(
            level["sha256"].as_str().unwrap(),
            hex::encode(Sha256::digest(&bytes))
        );
        assert_eq!(
            read_archive(&archive).len() as u64,
            level["written"].as_u64().unwrap()
        );
    }
}

#[tokio::test]
async fn test_manifest_can_be_disabled() {
    let ws = Workspace::new();
    let path = ws.write_slide("s1.pending", 300, 300, SLIDE_COLOR);
    let builder = builder(raster_library(), &ws.output, |c| c.with_manifest(false));

    builder
        .build(&PendingSlide::from_path(&path, ".pending").unwrap())
        .await
        .unwrap();
    assert!(!ws.output.join("s1.manifest.json").exists());
    assert!(ws.archive("s1", 0).exists());
}
