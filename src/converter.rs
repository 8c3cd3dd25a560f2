//! Public converter facade (C13): the crate's only client-facing entry
//! point. Wires the memory pool, chunked images, engine, histograms,
//! thumbnail and container backend behind the `need_copy_block` /
//! `copy_block` / `finish` protocol. Grounded on `bpConverter.cxx` /
//! `bpImsDataSetWriter.cxx`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::color;
use crate::compression::Compression;
use crate::container::ContainerBackend;
use crate::datetime::DateTime;
use crate::engine::Engine;
use crate::error::{messages, Error, Result};
use crate::geometry::{AxisOrder, BlockIndex, Vec2, Vec3, Voxel};
use crate::histogram::Histogram;
use crate::thumbnail::{self, Thumbnail};

/// Construction parameters for a [`Converter`]; one field per constructor
/// argument of the client API (see the module-level client API summary).
pub struct ConverterOptions {
    pub image_size: Vec3,
    pub channels: u32,
    pub time_points: u32,
    /// Per-axis downsample stride applied before storage; `1` means no
    /// subsampling. `file_block_size`/`copy_block` are interpreted in the
    /// already-sampled (stored) coordinate space — the caller is expected to
    /// have subsampled its own data before pushing blocks when this is not
    /// all-ones, since this port does not re-derive a box filter for ingress
    /// subsampling on top of the pyramid's own downsampling.
    pub sample: Vec3,
    pub block_dim_order: AxisOrder,
    pub file_block_size: Vec3,
    pub output_path: PathBuf,
    pub thumbnail_size_xy: u32,
    pub flip_xyz: [bool; 3],
    pub force_file_block_size_z1: bool,
    pub enable_log_progress: bool,
    pub number_of_threads: usize,
    pub compression: Compression,
    pub disable_pyramid: bool,
    pub application_name: String,
    pub application_version: String,
    pub progress_callback: Option<Box<dyn FnMut(f32, u64) + Send>>,
    pub backend: Arc<Mutex<dyn ContainerBackend>>,
}

impl std::fmt::Debug for ConverterOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConverterOptions")
            .field("image_size", &self.image_size)
            .field("channels", &self.channels)
            .field("time_points", &self.time_points)
            .field("sample", &self.sample)
            .field("file_block_size", &self.file_block_size)
            .field("output_path", &self.output_path)
            .field("thumbnail_size_xy", &self.thumbnail_size_xy)
            .field("flip_xyz", &self.flip_xyz)
            .field("compression", &self.compression)
            .field("disable_pyramid", &self.disable_pyramid)
            .finish_non_exhaustive()
    }
}

/// Physical extent of the image, for the `/DataSetInfo/Image` attributes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageExtent {
    pub min: [f32; 3],
    pub max: [f32; 3],
    pub unit: &'static str,
}

/// Creator/version metadata persisted under `/DataSetInfo/ImarisDataSet`.
#[derive(Debug, Clone)]
pub struct Parameters {
    pub creator: String,
    pub version: String,
}

/// One time point's recording date, persisted under `/DataSetInfo/TimeInfo`.
#[derive(Debug, Clone, Copy)]
pub struct TimeInfo {
    pub recording_date: DateTime,
}

/// How a channel is colorized in viewers: either a single base color or an
/// explicit lookup table, matching the `ColorMode` attribute's two forms.
#[derive(Debug, Clone)]
pub enum ColorMode {
    BaseColor([f32; 3]),
    TableColor(Vec<[f32; 3]>),
}

/// Per-channel metadata persisted under `/DataSetInfo/Channel {i}`.
#[derive(Debug, Clone)]
pub struct ColorInfo {
    pub name: String,
    pub description: String,
    pub color: ColorMode,
    /// Explicit display range; overridden by the histogram auto-range when
    /// `auto_adjust_color_range` is passed to [`Converter::finish`].
    pub range: Option<(f32, f32)>,
    pub opacity: f32,
    pub gamma: f32,
}

/// Per-channel running projections kept for thumbnail composition: a
/// maximum-intensity projection and the image's middle Z slice, both at
/// full stored XY resolution. Updated incrementally as file blocks arrive,
/// since by the time [`Converter::finish`] runs every chunk's voxel buffer
/// has already been released back to the pool and handed to the writer.
struct Projections {
    mip: Vec<f32>,
    mid: Vec<f32>,
    mid_z: u32,
}

impl Projections {
    fn new(size: Vec2, mid_z: u32) -> Self {
        let area = size.x as usize * size.y as usize;
        Self { mip: vec![f32::NEG_INFINITY; area], mid: vec![0.0; area], mid_z }
    }

    fn update<T: Voxel>(&mut self, size_x: u32, z: u32, x0: u32, y0: u32, width: u32, height: u32, src: &[T], src_row_stride: u32) {
        for row in 0..height {
            let src_start = (row * src_row_stride) as usize;
            let dst_row_start = (y0 + row) as usize * size_x as usize + x0 as usize;
            for col in 0..width as usize {
                let value = src[src_start + col].to_f32();
                let dst_index = dst_row_start + col;
                if value > self.mip[dst_index] {
                    self.mip[dst_index] = value;
                }
                if z == self.mid_z {
                    self.mid[dst_index] = value;
                }
            }
        }
    }
}

/// Drives one conversion run: accepts file blocks in any order (subject to
/// the `need_copy_block`/`copy_block` protocol) and, on [`finish`],
/// flushes histograms, composes the thumbnail and writes all metadata.
pub struct Converter<T: Voxel> {
    stored_size: Vec3,
    file_block_size: Vec3,
    file_grid: Vec3,
    channels: u32,
    time_points: u32,
    flip_xyz: [bool; 3],
    thumbnail_size_xy: u32,
    enable_log_progress: bool,
    application_name: String,
    application_version: String,
    progress_callback: Option<Box<dyn FnMut(f32, u64) + Send>>,
    copied: Vec<bool>,
    blocks_done: u64,
    blocks_total: u64,
    projections: Vec<Projections>,
    engine: Engine<T>,
    backend: Arc<Mutex<dyn ContainerBackend>>,
}

impl<T: Voxel> Converter<T> {
    pub fn new(options: ConverterOptions) -> Result<Self> {
        if options.image_size.product() == 0 {
            return Err(Error::config(messages::IMAGE_EXTENT_REQUIRED));
        }
        if options.channels == 0 || options.time_points == 0 {
            return Err(Error::config(messages::SIZE_REQUIRED));
        }
        if options.file_block_size.product() == 0 {
            return Err(Error::config(messages::SIZE_REQUIRED));
        }

        let sample = Vec3::new(options.sample.x.max(1), options.sample.y.max(1), options.sample.z.max(1));
        let stored_size = options.image_size.div_ceil(sample);
        let file_grid = stored_size.div_ceil(options.file_block_size);

        let max_buffer_bytes = options.number_of_threads.max(1) as i64 * 64 * 1024 * 1024;
        let backend_for_engine = options.backend.clone();

        let engine = Engine::new(
            stored_size,
            options.channels,
            options.time_points,
            options.force_file_block_size_z1,
            options.disable_pyramid,
            options.compression,
            options.number_of_threads.max(1),
            max_buffer_bytes,
            options.file_block_size,
            backend_for_engine,
        )?;

        let level_sizes = engine.level_sizes();
        let chunk_shapes = engine.chunk_shapes();
        {
            let mut backend = options.backend.lock().unwrap();
            backend.create_group(&["DataSet"])?;
            for (level, (&size, &chunk_shape)) in level_sizes.iter().zip(chunk_shapes.iter()).enumerate() {
                for time_point in 0..options.time_points {
                    for channel in 0..options.channels {
                        let group = format!("ResolutionLevel {level}");
                        let time = format!("TimePoint {time_point}");
                        let chan = format!("Channel {channel}");
                        backend.create_group(&["DataSet", group.as_str(), time.as_str(), chan.as_str()])?;
                        backend.create_dataset(
                            &["DataSet", group.as_str(), time.as_str(), chan.as_str(), "Data"],
                            size,
                            chunk_shape,
                            options.compression,
                        )?;
                    }
                }
            }
        }

        let blocks_total = file_grid.product() * u64::from(options.channels) * u64::from(options.time_points);
        let projection_size = Vec2::new(stored_size.x, stored_size.y);
        let mid_z = stored_size.z / 2;
        let projections = (0..options.channels).map(|_| Projections::new(projection_size, mid_z)).collect();

        Ok(Self {
            stored_size,
            file_block_size: options.file_block_size,
            file_grid,
            channels: options.channels,
            time_points: options.time_points,
            flip_xyz: options.flip_xyz,
            thumbnail_size_xy: options.thumbnail_size_xy.max(1),
            enable_log_progress: options.enable_log_progress,
            application_name: options.application_name,
            application_version: options.application_version,
            progress_callback: options.progress_callback,
            copied: vec![false; blocks_total as usize],
            blocks_done: 0,
            blocks_total,
            projections,
            engine,
            backend: options.backend,
        })
    }

    fn mirrored_block(&self, block: Vec3) -> Vec3 {
        Vec3::new(
            if self.flip_xyz[0] { self.file_grid.x - 1 - block.x } else { block.x },
            if self.flip_xyz[1] { self.file_grid.y - 1 - block.y } else { block.y },
            if self.flip_xyz[2] { self.file_grid.z - 1 - block.z } else { block.z },
        )
    }

    fn flat_index(&self, block_index: BlockIndex) -> Option<usize> {
        if block_index.block.x >= self.file_grid.x || block_index.block.y >= self.file_grid.y || block_index.block.z >= self.file_grid.z {
            return None;
        }
        if block_index.channel >= self.channels || block_index.time_point >= self.time_points {
            return None;
        }

        let per_volume = self.file_grid.product() as usize;
        let volume_index = block_index.block.x as usize
            + block_index.block.y as usize * self.file_grid.x as usize
            + block_index.block.z as usize * (self.file_grid.x * self.file_grid.y) as usize;
        let time_channel_index = (block_index.time_point * self.channels + block_index.channel) as usize;
        Some(time_channel_index * per_volume + volume_index)
    }

    /// Whether a file block at `block_index` still needs to be pushed: it
    /// has overlap with the image and has not already been copied.
    pub fn need_copy_block(&self, block_index: BlockIndex) -> bool {
        match self.flat_index(block_index) {
            Some(index) => !self.copied[index],
            None => false,
        }
    }

    /// Ingests one file block. Errors if the block has already been copied,
    /// has the wrong size, or falls entirely outside the image.
    pub fn copy_block(&mut self, buffer: &[T], block_index: BlockIndex) -> Result<()> {
        let index = self.flat_index(block_index).ok_or_else(|| Error::protocol(messages::BLOCK_NO_OVERLAP))?;
        if self.copied[index] {
            return Err(Error::protocol(messages::BLOCK_ALREADY_COPIED));
        }

        let expected_len = self.file_block_size.product() as usize;
        if buffer.len() != expected_len {
            return Err(Error::config(messages::INVALID_DATA_SIZE));
        }

        let block = self.mirrored_block(block_index.block);
        let origin = block.zip_map(self.file_block_size, |b, s| b * s);

        let width = self.file_block_size.x.min(self.stored_size.x.saturating_sub(origin.x));
        let height = self.file_block_size.y.min(self.stored_size.y.saturating_sub(origin.y));
        let depth = self.file_block_size.z.min(self.stored_size.z.saturating_sub(origin.z));

        if width == 0 || height == 0 || depth == 0 {
            return Err(Error::protocol(messages::BLOCK_NO_OVERLAP));
        }

        let plane = self.file_block_size.x as usize * self.file_block_size.y as usize;
        let projections = &mut self.projections[block_index.channel as usize];

        for dz in 0..depth {
            let z_start = dz as usize * plane;
            let slice = &buffer[z_start..z_start + plane];
            projections.update(self.stored_size.x, origin.z + dz, origin.x, origin.y, width, height, slice, self.file_block_size.x);
        }

        // One engine call for the whole block: the completion counter must
        // be decremented once per file block, not once per Z plane.
        self.engine.copy_data(
            block_index.time_point,
            block_index.channel,
            origin.z,
            origin.x,
            origin.y,
            width,
            height,
            depth,
            buffer,
            self.file_block_size.x,
            plane as u32,
        )?;

        self.copied[index] = true;
        self.blocks_done += 1;
        let fraction = self.blocks_done as f32 / self.blocks_total.max(1) as f32;

        if self.enable_log_progress {
            info!(blocks_done = self.blocks_done, blocks_total = self.blocks_total, fraction, "block copied");
        }
        if let Some(callback) = self.progress_callback.as_mut() {
            callback(fraction, self.blocks_done);
        }

        Ok(())
    }

    /// Flushes histograms, composes the thumbnail, writes every required
    /// attribute, and drains the writer pipeline. Consumes `self`: a
    /// finished (or failed) converter cannot be reused, so there is no
    /// separate "terminal state" flag to check.
    pub fn finish(
        mut self,
        image_extent: ImageExtent,
        parameters: Parameters,
        time_info: Vec<TimeInfo>,
        color_info: Vec<ColorInfo>,
        auto_adjust_color_range: bool,
    ) -> Result<()> {
        info!(blocks_done = self.blocks_done, blocks_total = self.blocks_total, "finishing conversion");

        let channel_histograms: Vec<Histogram> = (0..self.channels).map(|channel| self.engine.channel_histogram(channel)).collect();
        let ranges = self.resolve_color_ranges(&color_info, &channel_histograms, auto_adjust_color_range);

        self.write_histograms(&channel_histograms)?;
        self.write_thumbnail(&color_info, &ranges, &image_extent)?;
        self.write_attributes(&image_extent, &parameters, &time_info, &color_info, &ranges, &channel_histograms)?;

        self.engine.finish_write()
    }

    fn resolve_color_ranges(&self, color_info: &[ColorInfo], histograms: &[Histogram], auto_adjust: bool) -> Vec<(f32, f32)> {
        (0..self.channels as usize)
            .map(|channel| {
                if auto_adjust {
                    let range = color::auto_range(&histograms[channel]);
                    (range.min, range.max)
                } else if let Some(range) = color_info.get(channel).and_then(|info| info.range) {
                    range
                } else {
                    (histograms[channel].min, histograms[channel].max)
                }
            })
            .collect()
    }

    fn write_histograms(&self, histograms: &[Histogram]) -> Result<()> {
        let mut backend = self.backend.lock().unwrap();
        for (channel, histogram) in histograms.iter().enumerate() {
            let chan = format!("Channel {channel}");
            backend.write_histogram(
                &["DataSet", "ResolutionLevel 0", "TimePoint 0", chan.as_str(), "Histogram"],
                &histogram.bins,
            )?;
        }
        Ok(())
    }

    fn write_thumbnail(&self, color_info: &[ColorInfo], ranges: &[(f32, f32)], image_extent: &ImageExtent) -> Result<()> {
        let level_sizes_xy: Vec<(u32, u32)> = self
            .engine
            .level_sizes()
            .iter()
            .map(|size| (size.x, size.y))
            .collect();

        let level = thumbnail::choose_level(self.thumbnail_size_xy, &level_sizes_xy);
        let (level_x, level_y) = level_sizes_xy[level];
        let extent_x = image_extent.max[0] - image_extent.min[0];
        let extent_y = image_extent.max[1] - image_extent.min[1];
        let size = thumbnail::thumbnail_size(self.thumbnail_size_xy, Vec2::new(level_x, level_y), extent_x.max(1.0), extent_y.max(1.0));

        let mut output = Thumbnail::new(size);
        let source_size = Vec2::new(self.stored_size.x, self.stored_size.y);

        for (channel, projection) in self.projections.iter().enumerate() {
            let mip = downsample_projection(&projection.mip, source_size, size);
            let mid = downsample_projection(&projection.mid, source_size, size);

            let (min, max) = ranges[channel];
            let info = color_info.get(channel);

            let mip_thumbnail = colorize(&mip, size, min, max, info);
            let mid_thumbnail = colorize(&mid, size, min, max, info);
            let winner = if mip_thumbnail.quality() >= mid_thumbnail.quality() { mip_thumbnail } else { mid_thumbnail };

            for y in 0..size.y {
                for x in 0..size.x {
                    let i = (x as usize + y as usize * size.x as usize) * 4;
                    output.merge_pixel(x, y, (winner.rgba[i], winner.rgba[i + 1], winner.rgba[i + 2]));
                }
            }
        }

        let mut backend = self.backend.lock().unwrap();
        backend.write_thumbnail(output.size.x, output.size.y, &output.rgba)
    }

    #[allow(clippy::too_many_arguments)]
    fn write_attributes(
        &self,
        image_extent: &ImageExtent,
        parameters: &Parameters,
        time_info: &[TimeInfo],
        color_info: &[ColorInfo],
        ranges: &[(f32, f32)],
        histograms: &[Histogram],
    ) -> Result<()> {
        use crate::container::Attribute;

        let attr = |name: &str, value: String| Attribute { name: name.to_string(), value };
        let mut backend = self.backend.lock().unwrap();

        backend.write_attributes(
            &[],
            &[
                attr("ImarisDataSet", "ImarisDataSet".into()),
                attr("ImarisVersion", "5.5.0".into()),
                attr("NumberOfDataSets", "1".into()),
            ],
        )?;

        backend.write_attributes(
            &["DataSetInfo", "ImarisDataSet"],
            &[
                attr("NumberOfImages", "1".into()),
                attr("Creator", parameters.creator.clone()),
                attr("Version", parameters.version.clone()),
                attr("ApplicationName", self.application_name.clone()),
                attr("ApplicationVersion", self.application_version.clone()),
            ],
        )?;

        let recording_date = time_info.first().map(|info| info.recording_date.format_recording_date()).unwrap_or_default();
        backend.write_attributes(
            &["DataSetInfo", "Image"],
            &[
                attr("ExtMin0", format!("{}", image_extent.min[0])),
                attr("ExtMin1", format!("{}", image_extent.min[1])),
                attr("ExtMin2", format!("{}", image_extent.min[2])),
                attr("ExtMax0", format!("{}", image_extent.max[0])),
                attr("ExtMax1", format!("{}", image_extent.max[1])),
                attr("ExtMax2", format!("{}", image_extent.max[2])),
                attr("X", self.stored_size.x.to_string()),
                attr("Y", self.stored_size.y.to_string()),
                attr("Z", self.stored_size.z.to_string()),
                attr("Unit", image_extent.unit.to_string()),
                attr("RecordingDate", recording_date),
                attr("ResampleDimensionX", "true".into()),
                attr("ResampleDimensionY", "true".into()),
                attr("ResampleDimensionZ", "true".into()),
            ],
        )?;

        let mut time_attrs = vec![
            attr("FileTimePoints", self.time_points.to_string()),
            attr("DatasetTimePoints", self.time_points.to_string()),
        ];
        for (i, info) in time_info.iter().enumerate() {
            time_attrs.push(attr(&format!("TimePoint{}", i + 1), info.recording_date.format_recording_date()));
        }
        backend.write_attributes(&["DataSetInfo", "TimeInfo"], &time_attrs)?;

        for channel in 0..self.channels as usize {
            let histogram = &histograms[channel];
            let resampled_1024 = histogram.resampled(1024.min(histogram.bins.len().max(1)));
            let chan_group = format!("Channel {channel}");
            backend.write_attributes(
                &["DataSetInfo", chan_group.as_str()],
                &[
                    attr("ImageSizeX", self.stored_size.x.to_string()),
                    attr("ImageSizeY", self.stored_size.y.to_string()),
                    attr("ImageSizeZ", self.stored_size.z.to_string()),
                    attr("HistogramMin", format!("{}", histogram.min)),
                    attr("HistogramMax", format!("{}", histogram.max)),
                    attr("HistogramMin1024", format!("{}", resampled_1024.min)),
                    attr("HistogramMax1024", format!("{}", resampled_1024.max)),
                ],
            )?;

            let (range_min, range_max) = ranges[channel];
            let mut channel_attrs = vec![attr("ColorRange", format!("{range_min} {range_max}"))];

            if let Some(info) = color_info.get(channel) {
                channel_attrs.push(attr("Name", info.name.clone()));
                channel_attrs.push(attr("Description", info.description.clone()));
                channel_attrs.push(attr("ColorOpacity", format!("{}", info.opacity)));
                channel_attrs.push(attr("GammaCorrection", format!("{}", info.gamma)));
                match &info.color {
                    ColorMode::BaseColor([r, g, b]) => {
                        channel_attrs.push(attr("ColorMode", "BaseColor".into()));
                        channel_attrs.push(attr("Color", format!("{r} {g} {b}")));
                    }
                    ColorMode::TableColor(table) => {
                        channel_attrs.push(attr("ColorMode", "TableColor".into()));
                        channel_attrs.push(attr("ColorTableLength", table.len().to_string()));
                        let flat: Vec<String> = table.iter().flat_map(|[r, g, b]| [r, g, b]).map(|v| v.to_string()).collect();
                        channel_attrs.push(attr("ColorTable", flat.join(" ")));
                    }
                }
            }

            backend.write_attributes(&["DataSetInfo", chan_group.as_str()], &channel_attrs)?;
        }

        Ok(())
    }
}

/// Nearest-neighbor projection resize used only for thumbnail composition,
/// where exactness matters far less than for the stored pyramid data.
fn downsample_projection(src: &[f32], src_size: Vec2, dst_size: Vec2) -> Vec<f32> {
    let mut out = vec![0.0f32; dst_size.x as usize * dst_size.y as usize];
    for y in 0..dst_size.y {
        let src_y = (y * src_size.y / dst_size.y.max(1)).min(src_size.y.saturating_sub(1));
        for x in 0..dst_size.x {
            let src_x = (x * src_size.x / dst_size.x.max(1)).min(src_size.x.saturating_sub(1));
            let value = src[src_y as usize * src_size.x as usize + src_x as usize];
            out[y as usize * dst_size.x as usize + x as usize] = if value.is_finite() { value } else { 0.0 };
        }
    }
    out
}

/// Maps a grayscale projection through a channel's display range, base
/// color and gamma into an RGBA thumbnail, matching the original's additive
/// channel colorization.
fn colorize(values: &[f32], size: Vec2, min: f32, max: f32, info: Option<&ColorInfo>) -> Thumbnail {
    let mut thumbnail = Thumbnail::new(size);
    let base = match info.map(|i| &i.color) {
        Some(ColorMode::BaseColor(rgb)) => *rgb,
        _ => [1.0, 1.0, 1.0],
    };
    let gamma = info.map(|i| i.gamma).unwrap_or(1.0).max(0.01);
    let opacity = info.map(|i| i.opacity).unwrap_or(1.0).clamp(0.0, 1.0);
    let range = (max - min).max(f32::EPSILON);

    for y in 0..size.y {
        for x in 0..size.x {
            let value = values[y as usize * size.x as usize + x as usize];
            let normalized = ((value - min) / range).clamp(0.0, 1.0).powf(1.0 / gamma) * opacity;
            let color = (
                (base[0] * normalized * 255.0) as u8,
                (base[1] * normalized * 255.0) as u8,
                (base[2] * normalized * 255.0) as u8,
            );
            thumbnail.merge_pixel(x, y, color);
        }
    }

    thumbnail
}
