//! Integration tests writing images to gmh containers and reading them back
//!
//! Every loader strategy is exercised: in-process streaming always, system
//! tar extraction and caching when a `tar` binary is available.

use gmh::archive::{ArchiveReader, ArchiveWriter};
use gmh::utils::{mask_member_name, samples_to_bytes};
use gmh::{
    Adapter, BoundingBox, CompressionLevel, CompressionMethod, GmhError, Image, LoaderStrategy,
    ReadOptions, SystemTar, WriteOptions,
};
use ndarray::{s, Array3};
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const SHAPE: (usize, usize, usize) = (6, 7, 8);

/// Build a test image with `segments` segments, every third one empty
fn generate_image(identifier: &str, segments: usize) -> Image {
    let samples = Array3::from_shape_fn(SHAPE, |(i, j, k)| (i * 1000 + j * 10 + k) as i32 - 3000);
    let mut image = Image::with_samples(samples);
    image.set_identifier(Some(identifier)).unwrap();
    image.set_voxel_size(Some([0.5, 0.75, 1.25])).unwrap();
    image.set_voxel_spacing(Some([1.0, 1.0, 2.5])).unwrap();
    image.meta_data_mut().insert("modality".into(), json!("CT"));
    image.meta_data_mut().insert("nested".into(), json!({"a": [1, 2, 3]}));

    image.add_slice(0, Some("bottom")).unwrap();
    image.add_slice(3, None).unwrap().meta_data_mut().insert("note".into(), json!(7));
    image.add_slice(5, Some("top slice")).unwrap();

    for n in 0..segments {
        let mut mask = Array3::from_elem(SHAPE, false);
        if n % 3 != 2 {
            mask.slice_mut(s![n % 6..(n % 6) + 1, 1..5, n..n + 3]).fill(true);
            mask[[5, 6, 7]] = n % 2 == 0;
        }
        let color = (n % 2 == 0).then_some([n as u8 * 40, 100, 200]);
        let segment = image
            .add_segment(&format!("segment {}", n), mask, color)
            .unwrap();
        segment.meta_data_mut().insert("index".into(), json!(n));
    }

    image
}

fn assert_images_equal(expected: &Image, actual: &Image) {
    assert_eq!(actual.identifier(), expected.identifier());
    assert_eq!(actual.samples().unwrap(), expected.samples().unwrap());
    assert_eq!(actual.voxel_size(), expected.voxel_size());
    assert_eq!(actual.voxel_spacing(), expected.voxel_spacing());
    assert_eq!(actual.meta_data(), expected.meta_data());

    let slices = |image: &Image| {
        image
            .slices()
            .map(|slice| {
                (
                    slice.index(),
                    slice.identifier().map(str::to_string),
                    slice.meta_data().clone(),
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(slices(actual), slices(expected));

    let expected_segments = expected.ordered_segments();
    let actual_segments = actual.ordered_segments();
    assert_eq!(actual_segments.len(), expected_segments.len());
    for (expected, actual) in expected_segments.iter().zip(&actual_segments) {
        assert_eq!(actual.identifier(), expected.identifier());
        assert_eq!(actual.color(), expected.color());
        assert_eq!(actual.meta_data(), expected.meta_data());
        assert_eq!(actual.mask().unwrap(), expected.mask().unwrap());
    }
}

fn round_trip(
    adapter: &Adapter,
    image: &Image,
    dir: &Path,
    write: &WriteOptions,
    read: &ReadOptions,
) -> Image {
    let path = dir.join(format!("{}.gmh", image.identifier().unwrap()));
    adapter.write(image, &path, write).unwrap();
    adapter.read(&path, read).unwrap()
}

#[test]
fn test_round_trip_in_process() {
    let adapter = Adapter::new().without_system_tar();

    for segments in [0, 1, 5] {
        for compress in [false, true] {
            let dir = TempDir::new().unwrap();
            let image = generate_image(&format!("image_{}", segments), segments);
            let options = WriteOptions::default().with_compression(compress);

            let read = round_trip(&adapter, &image, dir.path(), &options, &ReadOptions::default());
            assert_images_equal(&image, &read);
        }
    }
}

#[test]
fn test_round_trip_with_system_tar() {
    let Some(tool) = SystemTar::detect() else {
        println!("no system tar, skipping");
        return;
    };
    let adapter = Adapter::new().with_system_tar(tool);

    for compress in [false, true] {
        let dir = TempDir::new().unwrap();
        let image = generate_image("via tar", 5);
        let options = WriteOptions::default().with_compression(compress);

        let read = round_trip(&adapter, &image, dir.path(), &options, &ReadOptions::default());
        assert_images_equal(&image, &read);

        // containers written by the tool are readable in process and vice versa
        let path = dir.path().join("via tar.gmh");
        let streamed = Adapter::new()
            .without_system_tar()
            .read(&path, &ReadOptions::default())
            .unwrap();
        assert_images_equal(&image, &streamed);
    }
}

#[test]
fn test_round_trip_all_empty_segments() {
    let dir = TempDir::new().unwrap();
    let mut image = Image::with_samples(Array3::ones(SHAPE));
    image.set_identifier(Some("blank")).unwrap();
    image.add_segment("a", Array3::from_elem(SHAPE, false), None).unwrap();
    image.add_segment("b", Array3::from_elem(SHAPE, false), Some([0, 0, 0])).unwrap();

    let adapter = Adapter::new().without_system_tar();
    let options = (WriteOptions::default(), ReadOptions::default());
    let read = round_trip(&adapter, &image, dir.path(), &options.0, &options.1);
    assert_images_equal(&image, &read);

    // empty masks are materialized up front, with no payload behind them
    assert!(read.segment("a").unwrap().is_materialized());
    let path = dir.path().join("blank.gmh");
    let reader = ArchiveReader::open(path, CompressionMethod::None).unwrap();
    assert_eq!(reader.member_names().count(), 2);
}

#[test]
fn test_strategies_agree() {
    let dir = TempDir::new().unwrap();
    let image = generate_image("parity", 4);
    let path = dir.path().join("parity.gmh");
    Adapter::new()
        .without_system_tar()
        .write(&image, &path, &WriteOptions::default().with_compression(true))
        .unwrap();

    let streaming = Adapter::new().without_system_tar();
    let read = streaming.read(&path, &ReadOptions::default()).unwrap();
    assert_images_equal(&image, &read);

    let cached = streaming
        .read(&path, &ReadOptions::default().with_cache(true))
        .unwrap();
    assert_images_equal(&image, &cached);
    assert!(dir.path().join(".cache-parity.gmh").is_dir());

    if let Some(tool) = SystemTar::detect() {
        let extracting = Adapter::new().with_system_tar(tool);
        let read = extracting.read(&path, &ReadOptions::default()).unwrap();
        assert_images_equal(&image, &read);
    }
}

#[test]
fn test_masks_are_stored_cropped() {
    let dir = TempDir::new().unwrap();
    let mut image = Image::with_samples(Array3::zeros(SHAPE));
    image.set_identifier(Some("cropped")).unwrap();
    let mut mask = Array3::from_elem(SHAPE, false);
    mask.slice_mut(s![2..4, 1..6, 3..5]).fill(true);
    mask[[2, 1, 3]] = false;
    image.add_segment("cube", mask.clone(), None).unwrap();

    let path = dir.path().join("cropped.gmh");
    let adapter = Adapter::new().without_system_tar();
    adapter.write(&image, &path, &WriteOptions::default()).unwrap();

    let read = adapter.read(&path, &ReadOptions::default()).unwrap();
    let segment = read.segment("cube").unwrap();
    assert!(!segment.is_materialized());
    let slug = segment.slug().unwrap().to_string();

    let reader = ArchiveReader::open(&path, CompressionMethod::None).unwrap();
    let payload = reader.read_member(&mask_member_name(&slug)).unwrap();
    assert_eq!(payload.len(), 2 * 5 * 2);
    assert_eq!(
        segment.bounding_box().unwrap(),
        BoundingBox::new([2, 1, 3], [3, 5, 4])
    );
    assert_eq!(segment.mask().unwrap(), &mask);
}

#[test]
fn test_write_rejects_existing_destination() {
    let dir = TempDir::new().unwrap();
    let image = generate_image("exists", 1);
    let path = dir.path().join("exists.gmh");
    let adapter = Adapter::new().without_system_tar();
    adapter.write(&image, &path, &WriteOptions::default()).unwrap();
    let before = fs::read(&path).unwrap();

    let result = adapter.write(&image, &path, &WriteOptions::default().with_compression(true));
    assert!(matches!(result, Err(GmhError::Precondition(_))));
    assert_eq!(fs::read(&path).unwrap(), before);
    // nothing left behind under a temporary name
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_shape_mismatch_leaves_segments_unchanged() {
    let mut image = generate_image("mismatch", 2);
    let result = image.add_segment("wrong", Array3::from_elem((6, 7, 9), true), None);
    assert!(matches!(result, Err(GmhError::Validation(_))));
    assert_eq!(image.segment_count(), 2);
    assert!(!image.has_segment("wrong"));
}

#[test]
fn test_compression_is_sniffed_not_named() {
    let dir = TempDir::new().unwrap();
    let image = generate_image("sniffed", 1);
    let adapter = Adapter::new().without_system_tar();

    let compressed = dir.path().join("sniffed.tar");
    adapter
        .write(&image, &compressed, &WriteOptions::default().with_compression(true))
        .unwrap();
    assert!(Adapter::is_compressed(&compressed).unwrap());
    assert_eq!(&fs::read(&compressed).unwrap()[..3], &[0x1F, 0x8B, 0x08]);

    let plain = dir.path().join("plain.tar.gz");
    adapter.write(&image, &plain, &WriteOptions::default()).unwrap();
    assert!(!Adapter::is_compressed(&plain).unwrap());

    let read = adapter.read(&compressed, &ReadOptions::default()).unwrap();
    assert_eq!(read.samples().unwrap(), image.samples().unwrap());
}

#[test]
fn test_missing_member_is_corruption() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.gmh");
    let manifest = json!({
        "image": {
            "precision_bytes": 4,
            "size": [2, 2, 2],
            "voxel_size": null,
            "voxel_spacing": null
        },
        "meta_data": {},
        "slices": [],
        "segments": [{
            "identifier": "ghost",
            "slug": "qwert",
            "bounding_box": [[0, 0, 0], [1, 1, 1]],
            "color": null,
            "meta_data": {}
        }]
    });

    let file = fs::File::create(&path).unwrap();
    let mut writer = ArchiveWriter::new(file, CompressionMethod::None, CompressionLevel::default());
    writer.append("manifest.json", manifest.to_string().as_bytes()).unwrap();
    writer
        .append("image_data.npy", &samples_to_bytes(&Array3::zeros((2, 2, 2))))
        .unwrap();
    writer.finish().unwrap();

    let image = Adapter::new()
        .without_system_tar()
        .read(&path, &ReadOptions::default())
        .unwrap();
    assert_eq!(image.samples().unwrap().len(), 8);
    let segment = image.segment("ghost").unwrap();
    assert!(matches!(segment.mask(), Err(GmhError::Corruption(_))));
    // a failed fetch can be retried and fails the same way
    assert!(matches!(segment.mask(), Err(GmhError::Corruption(_))));
}

fn write_manifest_only(path: &Path, manifest: &serde_json::Value) {
    let file = fs::File::create(path).unwrap();
    let mut writer = ArchiveWriter::new(file, CompressionMethod::None, CompressionLevel::default());
    writer.append("manifest.json", manifest.to_string().as_bytes()).unwrap();
    writer.finish().unwrap();
}

#[test]
fn test_unaddressable_size_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("huge.gmh");
    let huge = 1u64 << 40;
    write_manifest_only(
        &path,
        &json!({
            "image": {
                "precision_bytes": 4,
                "size": [huge, huge, huge],
                "voxel_size": null,
                "voxel_spacing": null
            },
            "meta_data": {},
            "slices": [],
            "segments": [{
                "identifier": "void",
                "slug": null,
                "bounding_box": null,
                "color": null,
                "meta_data": {}
            }]
        }),
    );

    let adapter = Adapter::new().without_system_tar();
    let result = adapter.read(&path, &ReadOptions::default());
    assert!(matches!(result, Err(GmhError::Schema(_))));

    let options = ReadOptions::default().with_manifest_validation(false);
    let result = adapter.read(&path, &options);
    assert!(matches!(result, Err(GmhError::Corruption(_))));
}

#[test]
fn test_out_of_bounds_mask_is_corruption_without_validation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("inverted.gmh");
    let manifest = json!({
        "image": {
            "precision_bytes": 4,
            "size": [2, 2, 2],
            "voxel_size": null,
            "voxel_spacing": null
        },
        "meta_data": {},
        "slices": [],
        "segments": [{
            "identifier": "twisted",
            "slug": "zxcvb",
            "bounding_box": [[1, 1, 1], [0, 0, 0]],
            "color": null,
            "meta_data": {}
        }]
    });
    let file = fs::File::create(&path).unwrap();
    let mut writer = ArchiveWriter::new(file, CompressionMethod::None, CompressionLevel::default());
    writer.append("manifest.json", manifest.to_string().as_bytes()).unwrap();
    writer.append(&mask_member_name("zxcvb"), &[0u8]).unwrap();
    writer.finish().unwrap();

    let options = ReadOptions::default().with_manifest_validation(false);
    let image = Adapter::new().without_system_tar().read(&path, &options).unwrap();
    let segment = image.segment("twisted").unwrap();
    assert!(matches!(segment.mask(), Err(GmhError::Corruption(_))));
}

#[test]
fn test_invalid_manifest_aborts_read() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("invalid.gmh");
    let file = fs::File::create(&path).unwrap();
    let mut writer = ArchiveWriter::new(file, CompressionMethod::None, CompressionLevel::default());
    writer.append("manifest.json", br#"{"image": {"precision_bytes": 4}}"#).unwrap();
    writer.finish().unwrap();

    let result = Adapter::new()
        .without_system_tar()
        .read(&path, &ReadOptions::default());
    assert!(matches!(result, Err(GmhError::Schema(_))));
}

#[test]
fn test_loader_strategy_reporting() {
    let dir = TempDir::new().unwrap();
    let image = generate_image("strategy", 1);
    let path = dir.path().join("strategy.gmh");
    let adapter = Adapter::new().without_system_tar();
    adapter.write(&image, &path, &WriteOptions::default()).unwrap();

    let loader = gmh::ArchiveDataLoader::open(&path, CompressionMethod::None, true).unwrap();
    assert_eq!(gmh::DataLoader::strategy(&loader), LoaderStrategy::Streaming);
    let loader = gmh::CachedDataLoader::open(&path, CompressionMethod::None, None, true).unwrap();
    assert_eq!(gmh::DataLoader::strategy(&loader), LoaderStrategy::Cached);
}
