//! End-to-end tests of the client-facing `need_copy_block`/`copy_block`/
//! `finish` protocol, running against [`NullBackend`] so they exercise the
//! whole pipeline (engine, histogram, thumbnail, attributes) without linking
//! libhdf5.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use ims_writer::prelude::*;
use ims_writer::converter::ColorMode;
use ims_writer::datetime::DateTime;
use ims_writer::geometry::Axis;

fn axis_order() -> AxisOrder {
    AxisOrder::new([Axis::X, Axis::Y, Axis::Z, Axis::C, Axis::T]).unwrap()
}

fn options(backend: Arc<Mutex<NullBackend>>, image_size: Vec3, file_block_size: Vec3) -> ConverterOptions {
    options_with_channels(backend, image_size, file_block_size, 1)
}

fn options_with_channels(backend: Arc<Mutex<NullBackend>>, image_size: Vec3, file_block_size: Vec3, channels: u32) -> ConverterOptions {
    ConverterOptions {
        image_size,
        channels,
        time_points: 1,
        sample: Vec3::splat(1),
        block_dim_order: axis_order(),
        file_block_size,
        output_path: PathBuf::from("test.ims"),
        thumbnail_size_xy: 64,
        flip_xyz: [false, false, false],
        force_file_block_size_z1: false,
        enable_log_progress: false,
        number_of_threads: 1,
        compression: Compression::None,
        disable_pyramid: true,
        application_name: "ims-writer-tests".into(),
        application_version: "0.1.0".into(),
        progress_callback: None,
        backend,
    }
}

fn extent() -> ImageExtent {
    ImageExtent { min: [0.0, 0.0, 0.0], max: [4.0, 4.0, 2.0], unit: "um" }
}

fn parameters() -> Parameters {
    Parameters { creator: "tester".into(), version: "1.0".into() }
}

fn time_info() -> Vec<TimeInfo> {
    vec![TimeInfo { recording_date: DateTime { year: 2026, month: 7, day: 26, hour: 0, minute: 0, second: 0 } }]
}

#[test]
fn single_block_conversion_drives_the_full_pipeline() {
    let backend = Arc::new(Mutex::new(NullBackend::default()));
    let image_size = Vec3::new(4, 4, 2);
    let opts = options(backend.clone(), image_size, image_size);

    let mut converter: Converter<u8> = Converter::new(opts).unwrap();

    let block_index = BlockIndex { block: Vec3::new(0, 0, 0), channel: 0, time_point: 0 };
    assert!(converter.need_copy_block(block_index));

    let buffer = vec![7u8; image_size.product() as usize];
    converter.copy_block(&buffer, block_index).unwrap();

    assert!(!converter.need_copy_block(block_index));

    converter.finish(extent(), parameters(), time_info(), vec![], true).unwrap();

    let backend = backend.lock().unwrap();
    assert!(backend.closed);
    assert_eq!(backend.chunks_written, 1);
    assert_eq!(backend.histograms_written, 1);
    assert!(backend.thumbnail_written);
    assert!(backend.datasets_created.iter().any(|path| path.contains("ResolutionLevel 0")));
}

#[test]
fn copying_the_same_block_twice_is_an_error() {
    let backend = Arc::new(Mutex::new(NullBackend::default()));
    let image_size = Vec3::new(2, 2, 2);
    let opts = options(backend, image_size, image_size);
    let mut converter: Converter<u8> = Converter::new(opts).unwrap();

    let block_index = BlockIndex { block: Vec3::new(0, 0, 0), channel: 0, time_point: 0 };
    let buffer = vec![1u8; image_size.product() as usize];

    converter.copy_block(&buffer, block_index).unwrap();
    let result = converter.copy_block(&buffer, block_index);
    assert!(result.is_err());
}

#[test]
fn wrong_sized_buffer_is_rejected() {
    let backend = Arc::new(Mutex::new(NullBackend::default()));
    let image_size = Vec3::new(4, 4, 2);
    let opts = options(backend, image_size, image_size);
    let mut converter: Converter<u8> = Converter::new(opts).unwrap();

    let block_index = BlockIndex { block: Vec3::new(0, 0, 0), channel: 0, time_point: 0 };
    let too_short = vec![1u8; 3];
    assert!(converter.copy_block(&too_short, block_index).is_err());
}

#[test]
fn block_index_outside_the_file_grid_has_no_overlap() {
    let backend = Arc::new(Mutex::new(NullBackend::default()));
    let image_size = Vec3::new(4, 4, 2);
    let opts = options(backend, image_size, image_size);
    let converter: Converter<u8> = Converter::new(opts).unwrap();

    let out_of_range = BlockIndex { block: Vec3::new(1, 0, 0), channel: 0, time_point: 0 };
    assert!(!converter.need_copy_block(out_of_range));
}

/// Each channel gets its own independent chunked image (and so its own
/// independent completion counter); pushing one whole-image block per
/// channel is the multi-block case that does not depend on how the pyramid
/// planner happens to have chosen the chunk shape for a single image.
#[test]
fn one_whole_image_block_per_channel_reaches_full_progress() {
    let backend = Arc::new(Mutex::new(NullBackend::default()));
    let image_size = Vec3::new(4, 4, 1);
    let channels = 4;

    let fractions = Arc::new(Mutex::new(Vec::new()));
    let recorded = fractions.clone();

    let mut opts = options_with_channels(backend.clone(), image_size, image_size, channels);
    opts.progress_callback = Some(Box::new(move |fraction, _done| {
        recorded.lock().unwrap().push(fraction);
    }));

    let mut converter: Converter<u8> = Converter::new(opts).unwrap();

    for channel in 0..channels {
        let block_index = BlockIndex { block: Vec3::new(0, 0, 0), channel, time_point: 0 };
        let buffer = vec![42u8; image_size.product() as usize];
        converter.copy_block(&buffer, block_index).unwrap();
    }

    converter.finish(extent(), parameters(), time_info(), vec![], false).unwrap();

    let fractions = fractions.lock().unwrap();
    assert_eq!(fractions.len(), channels as usize);
    assert!((fractions.last().unwrap() - 1.0).abs() < 1e-6);

    let backend = backend.lock().unwrap();
    assert_eq!(backend.chunks_written, channels as usize);
    assert_eq!(backend.histograms_written, channels as usize);
}

/// Four 2x2x1 file blocks tiling one channel's 4x4x1 image. With
/// `disable_pyramid` the planner keeps a single level-0 chunk covering the
/// whole image, so this exercises the case the completion counter must get
/// right: several smaller file blocks jointly completing one larger chunk,
/// rather than the first of them completing it prematurely.
#[test]
fn several_file_blocks_tile_one_memory_chunk() {
    let backend = Arc::new(Mutex::new(NullBackend::default()));
    let image_size = Vec3::new(4, 4, 1);
    let file_block_size = Vec3::new(2, 2, 1);
    let opts = options(backend.clone(), image_size, file_block_size);
    let mut converter: Converter<u8> = Converter::new(opts).unwrap();

    let buffer = vec![9u8; file_block_size.product() as usize];
    for by in 0..2 {
        for bx in 0..2 {
            let block_index = BlockIndex { block: Vec3::new(bx, by, 0), channel: 0, time_point: 0 };
            assert!(converter.need_copy_block(block_index));
            converter.copy_block(&buffer, block_index).unwrap();
        }
    }

    converter.finish(extent(), parameters(), time_info(), vec![], false).unwrap();

    let backend = backend.lock().unwrap();
    assert!(backend.closed);
    // The chunk must only be written once, after all four file blocks that
    // overlap it have arrived - not once per file block.
    assert_eq!(backend.chunks_written, 1);
    assert_eq!(backend.histograms_written, 1);
}

#[test]
fn explicit_color_info_is_forwarded_to_attributes() {
    let backend = Arc::new(Mutex::new(NullBackend::default()));
    let image_size = Vec3::new(2, 2, 2);
    let opts = options(backend.clone(), image_size, image_size);
    let mut converter: Converter<u8> = Converter::new(opts).unwrap();

    let block_index = BlockIndex { block: Vec3::new(0, 0, 0), channel: 0, time_point: 0 };
    let buffer = vec![128u8; image_size.product() as usize];
    converter.copy_block(&buffer, block_index).unwrap();

    let color_info = vec![ColorInfo {
        name: "DAPI".into(),
        description: "nuclei".into(),
        color: ColorMode::BaseColor([0.0, 0.0, 1.0]),
        range: Some((0.0, 255.0)),
        opacity: 1.0,
        gamma: 1.0,
    }];

    converter.finish(extent(), parameters(), time_info(), color_info, false).unwrap();

    let backend = backend.lock().unwrap();
    assert!(backend.attributes_written.iter().any(|(path, _)| path == "DataSetInfo/Channel 0"));
}
