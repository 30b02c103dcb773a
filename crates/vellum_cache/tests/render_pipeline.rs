//! End-to-end tests for artifact construction, mapping and reuse.

mod support;

use std::fs::{self, OpenOptions};

use support::{scale, size, solid, wait_until, Harness, TIMEOUT};
use vellum_cache::header::{byte_align, HEADER_LEN};
use vellum_cache::surface::{pack_argb, unpack_argb};
use vellum_common::ArtifactKey;

// ---------------------------------------------------------------------------
// Geometry and file layout
// ---------------------------------------------------------------------------

#[test]
fn hundred_square_at_2x_layout() {
    let h = Harness::new("");
    h.store_original("B", &solid(200, 100, 50, 255));

    let image = h.fetch("B", size(100.0, 100.0), scale(2.0)).unwrap();
    let header = image.header();
    assert_eq!(image.pixel_size().width, 200);
    assert_eq!(image.pixel_size().height, 200);
    assert_eq!(header.bytes_per_row(), 800);
    assert_eq!(header.image_len(), byte_align(800 * 200, 64).unwrap());
    assert_eq!(header.image_len(), 160_000);

    let on_disk = fs::metadata(image.path()).unwrap().len();
    assert_eq!(on_disk, HEADER_LEN as u64 + 160_000);
    assert_eq!(image.pixels().len(), 160_000);
}

#[test]
fn artifact_lands_at_named_path() {
    let h = Harness::new("[storage]\noriginals = \"lib\"\nrenders = \"thumbs\"\n");
    h.store_original("cover", &solid(1, 2, 3, 255));

    let image = h.fetch("cover", size(64.9, 48.0), scale(1.5)).unwrap();
    let expected = h.cache.renders().artifact_path(&ArtifactKey::new(
        "cover".to_string(),
        size(64.9, 48.0),
        scale(1.5),
    ));
    assert_eq!(image.path(), expected);
    assert!(expected.starts_with(h.dir.path().join("renders").join("lib-thumbs")));
    assert!(expected.to_str().unwrap().ends_with("_@1.5x_64.9_48"));
}

#[test]
fn distinct_sizes_and_scales_use_distinct_files() {
    let h = Harness::new("");
    h.store_original("A", &solid(9, 9, 9, 255));

    let small = h.fetch("A", size(10.0, 10.0), scale(1.0)).unwrap();
    let large = h.fetch("A", size(20.0, 10.0), scale(1.0)).unwrap();
    let dense = h.fetch("A", size(10.0, 10.0), scale(2.0)).unwrap();
    assert_ne!(small.path(), large.path());
    assert_ne!(small.path(), dense.path());
    assert_eq!(h.renderer.draws(), 3);
    assert_eq!(h.cache.renders().mapped_count(), 3);
}

#[test]
fn fractional_sizes_do_not_share_files() {
    let h = Harness::new("");
    h.store_original("A", &solid(9, 9, 9, 255));

    let narrow = h.fetch("A", size(10.2, 4.0), scale(1.0)).unwrap();
    let wide = h.fetch("A", size(10.7, 4.0), scale(1.0)).unwrap();
    assert_ne!(narrow.path(), wide.path());

    let narrow_again = h.request("A", size(10.2, 4.0), scale(1.0)).ok().unwrap();
    let wide_again = h.request("A", size(10.7, 4.0), scale(1.0)).ok().unwrap();
    assert!(narrow.same_mapping(&narrow_again));
    assert!(wide.same_mapping(&wide_again));
    assert_eq!(h.renderer.draws(), 2);
}

// ---------------------------------------------------------------------------
// Reuse
// ---------------------------------------------------------------------------

#[test]
fn second_request_is_synchronous_and_identical() {
    let h = Harness::new("");
    h.store_original("A", &solid(10, 20, 30, 255));

    let first = h.fetch("A", size(16.0, 16.0), scale(1.0)).unwrap();
    let second = h
        .request("A", size(16.0, 16.0), scale(1.0))
        .ok()
        .expect("mapped artifact is served synchronously");
    assert!(first.same_mapping(&second));
    assert_eq!(first.pixels(), second.pixels());
    assert_eq!(second.pixel(3, 3), Some(pack_argb(255, 10, 20, 30)));
    assert_eq!(h.renderer.draws(), 1);
}

#[test]
fn reopened_cache_maps_existing_artifact_without_rendering() {
    let h = Harness::new("");
    h.store_original("A", &solid(10, 20, 30, 255));
    let before = h.fetch("A", size(8.0, 8.0), scale(2.0)).unwrap().pixels().to_vec();

    let h = h.reopen("");
    let after = h.fetch("A", size(8.0, 8.0), scale(2.0)).unwrap();
    assert_eq!(after.pixels(), before.as_slice());
    assert_eq!(h.renderer.draws(), 0);
    assert_eq!(h.cache.renders().renders_completed(), 0);
}

#[test]
fn truncated_artifact_is_rebuilt() {
    let h = Harness::new("");
    h.store_original("A", &solid(1, 1, 1, 255));
    let path = h.fetch("A", size(8.0, 8.0), scale(1.0)).unwrap().path().to_path_buf();

    let h = h.reopen("");
    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(HEADER_LEN as u64 + 7).unwrap();
    drop(file);

    let rebuilt = h.fetch("A", size(8.0, 8.0), scale(1.0)).unwrap();
    assert_eq!(h.renderer.draws(), 1);
    assert_eq!(
        fs::metadata(&path).unwrap().len(),
        rebuilt.header().total_len()
    );
}

#[test]
fn zero_length_artifact_is_a_miss() {
    let h = Harness::new("");
    let path = h.cache.renders().artifact_path(&ArtifactKey::new(
        "A".to_string(),
        size(8.0, 8.0),
        scale(1.0),
    ));
    fs::write(&path, b"").unwrap();

    // No original either: the request resolves to no image without panicking.
    let rx = h.request("A", size(8.0, 8.0), scale(1.0)).err().unwrap();
    wait_until(|| h.provider.parked() == 1);
    h.provider.drop_all();
    let (_, image, _) = rx.recv_timeout(TIMEOUT).unwrap();
    assert!(image.is_none());
    assert_eq!(h.renderer.draws(), 0);
}

#[test]
fn invalidate_forces_rerender() {
    let h = Harness::new("");
    h.store_original("A", &solid(5, 5, 5, 255));
    let first = h.fetch("A", size(4.0, 4.0), scale(1.0)).unwrap();

    assert!(h
        .cache
        .renders()
        .invalidate("A".to_string(), size(4.0, 4.0), scale(1.0))
        .unwrap());
    let second = h.fetch("A", size(4.0, 4.0), scale(1.0)).unwrap();
    assert!(!first.same_mapping(&second));
    assert_eq!(h.renderer.draws(), 2);
    // The old handle stays readable.
    assert_eq!(first.pixels(), second.pixels());
}

// ---------------------------------------------------------------------------
// Opacity
// ---------------------------------------------------------------------------

#[test]
fn opaque_artifacts_have_no_transparent_pixels() {
    let h = Harness::new("");
    h.store_original("A", &solid(0, 0, 0, 0));
    h.renderer.draw_word(0x4011_2233);

    let image = h.fetch("A", size(7.0, 5.0), scale(1.0)).unwrap();
    assert!(image.header().is_opaque());
    for y in 0..5 {
        for x in 0..7 {
            assert_eq!(unpack_argb(image.pixel(x, y).unwrap())[0], 0xFF);
        }
    }
}

#[test]
fn opaque_artifacts_keep_alpha_after_raw_row_writes() {
    let h = Harness::new("");
    h.store_original("A", &solid(0, 0, 0, 0));
    h.renderer.draw_raw_rows(0);

    let image = h.fetch("A", size(6.0, 4.0), scale(1.0)).unwrap();
    assert!(image.header().is_opaque());
    for y in 0..4 {
        for x in 0..6 {
            assert_eq!(image.pixel(x, y), Some(0xFF00_0000));
        }
    }
}

#[test]
fn transparent_artifacts_keep_partial_alpha() {
    let h = Harness::new("[render]\nopaque = false\n");
    h.store_original("A", &solid(0, 0, 0, 0));
    h.renderer.draw_word(0x8040_2010);

    let image = h.fetch("A", size(3.0, 3.0), scale(1.0)).unwrap();
    assert!(!image.header().is_opaque());
    assert_eq!(image.pixel(2, 2), Some(0x8040_2010));
}

#[test]
fn transparent_background_starts_clear() {
    let h = Harness::new("[render]\nopaque = false\n");
    h.store_original("A", &solid(0, 0, 0, 0));

    let image = h.fetch("A", size(3.0, 3.0), scale(1.0)).unwrap();
    assert_eq!(image.pixel(1, 1), Some(0));
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[test]
fn renderer_panic_yields_none_then_recovers() {
    let h = Harness::new("");
    h.store_original("A", &solid(1, 2, 3, 255));
    h.renderer.panic_next(1);

    assert!(h.fetch("A", size(6.0, 6.0), scale(1.0)).is_none());
    let path = h.cache.renders().artifact_path(&ArtifactKey::new(
        "A".to_string(),
        size(6.0, 6.0),
        scale(1.0),
    ));
    assert!(!path.exists());
    assert_eq!(h.cache.renders().mapped_count(), 0);

    let image = h.fetch("A", size(6.0, 6.0), scale(1.0)).unwrap();
    assert_eq!(image.pixel(0, 0), Some(pack_argb(255, 1, 2, 3)));
    assert_eq!(h.cache.renders().renders_completed(), 1);
    let leftovers = fs::read_dir(h.cache.renders().dir())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn invalid_geometry_yields_none() {
    let h = Harness::new("");
    h.store_original("A", &solid(1, 2, 3, 255));
    let (tx, rx) = std::sync::mpsc::channel();
    let hit = h.cache.renders().get(
        "A".to_string(),
        size(f64::NAN, 10.0),
        scale(1.0),
        move |_, image| tx.send(image.is_none()).unwrap(),
    );
    assert!(hit.is_none());
    assert!(rx.recv_timeout(TIMEOUT).unwrap());
    assert_eq!(h.renderer.draws(), 0);
}

// ---------------------------------------------------------------------------
// Resource bounds and threading
// ---------------------------------------------------------------------------

#[test]
fn mapping_bound_evicts_least_recent() {
    let h = Harness::new("[render]\nmax_mapped_entries = 2\n");
    h.store_original("A", &solid(1, 2, 3, 255));

    let oldest = h.fetch("A", size(1.0, 1.0), scale(1.0)).unwrap();
    h.fetch("A", size(2.0, 2.0), scale(1.0)).unwrap();
    h.fetch("A", size(3.0, 3.0), scale(1.0)).unwrap();
    assert_eq!(h.cache.renders().mapped_count(), 2);

    // Evicted: served again from disk, asynchronously, without a re-render.
    assert!(h.request("A", size(1.0, 1.0), scale(1.0)).is_err());
    wait_until(|| h.cache.renders().active_lanes() == 0);
    assert_eq!(h.renderer.draws(), 3);
    assert_eq!(oldest.pixel(0, 0), Some(pack_argb(255, 1, 2, 3)));
}

#[test]
fn unbounded_by_default() {
    let h = Harness::new("");
    h.store_original("A", &solid(1, 2, 3, 255));
    for w in 1..=6 {
        h.fetch("A", size(f64::from(w), 1.0), scale(1.0)).unwrap();
    }
    assert_eq!(h.cache.renders().mapped_count(), 6);
}

#[test]
fn completions_run_on_main_context() {
    let h = Harness::new("");
    h.store_original("A", &solid(1, 2, 3, 255));
    let rx = h.request("A", size(5.0, 5.0), scale(1.0)).err().unwrap();
    let (key, image, on_main) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(key, "A");
    assert!(image.is_some());
    assert!(on_main);
}

#[tokio::test]
async fn get_async_resolves_after_render() {
    let h = Harness::new("");
    h.store_original("A", &solid(4, 5, 6, 255));
    let image = h
        .cache
        .renders()
        .get_async("A".to_string(), size(12.0, 12.0), scale(1.0))
        .await
        .unwrap();
    assert_eq!(image.pixel(11, 11), Some(pack_argb(255, 4, 5, 6)));

    let again = h
        .cache
        .renders()
        .get_async("A".to_string(), size(12.0, 12.0), scale(1.0))
        .await
        .unwrap();
    assert!(image.same_mapping(&again));
}
