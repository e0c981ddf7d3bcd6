// SPDX-License-Identifier: GPL-3.0-only

//! Format catalog and selection coercion
//!
//! Hardware reports a flat list of (resolution, frame rate, pixel format)
//! modes. The catalog folds that into one [`VideoFormatInfo`] per resolution,
//! groups those by marketing name for presentation and keeps the
//! (format, fps) selection valid whenever the list changes.
//!
//! Ordering contract:
//! - [`grouped_formats`] returns the most pixels first, then the highest max
//!   fps, then the lowest id.
//! - [`fps_options`] returns frame rates highest first.
//! - [`coerce_fps`] falls back to the first valid option, so with
//!   [`fps_options`] as input the default is the highest frame rate.

use crate::backends::HardwareFormat;
use crate::constants::{MARKETING_NAMES, PREFERRED_FPS_LADDER};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Stable key of a [`VideoFormatInfo`]: `"{width}x{height}@{fps desc}"`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FormatId(String);

impl FormatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FormatId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One resolution with every frame rate it can stream at
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoFormatInfo {
    pub width: u32,
    pub height: u32,
    fps_options: BTreeSet<u32>,
}

impl VideoFormatInfo {
    /// `None` when no non-zero frame rate is given
    pub fn new(width: u32, height: u32, fps: impl IntoIterator<Item = u32>) -> Option<Self> {
        let fps_options: BTreeSet<u32> = fps.into_iter().filter(|f| *f > 0).collect();
        if fps_options.is_empty() {
            return None;
        }
        Some(Self {
            width,
            height,
            fps_options,
        })
    }

    pub fn fps_set(&self) -> &BTreeSet<u32> {
        &self.fps_options
    }

    pub fn supports_fps(&self, fps: u32) -> bool {
        self.fps_options.contains(&fps)
    }

    pub fn id(&self) -> FormatId {
        let fps = self
            .fps_options
            .iter()
            .rev()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        FormatId(format!("{}x{}@{}", self.width, self.height, fps))
    }

    pub fn marketing_name(&self) -> String {
        MARKETING_NAMES
            .iter()
            .find(|((w, h), _)| *w == self.width && *h == self.height)
            .map(|(_, name)| (*name).to_string())
            .unwrap_or_else(|| format!("{}x{}", self.width, self.height))
    }

    pub fn pixels(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }

    pub fn max_fps(&self) -> u32 {
        // Never empty after construction
        self.fps_options.last().copied().unwrap_or(0)
    }

    /// `(pixels, max_fps)`
    pub fn sort_key(&self) -> (u64, u32) {
        (self.pixels(), self.max_fps())
    }
}

impl std::fmt::Display for VideoFormatInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}x{})", self.marketing_name(), self.width, self.height)
    }
}

/// Current (format, frame rate) choice
///
/// When both are set the fps is one of the format's options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub selected_format_id: Option<FormatId>,
    pub selected_fps: Option<u32>,
}

impl Selection {
    pub fn new(format_id: FormatId, fps: u32) -> Self {
        Self {
            selected_format_id: Some(format_id),
            selected_fps: Some(fps),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selected_format_id.is_none()
    }
}

/// One representative per marketing name, most pixels first
pub fn grouped_formats(formats: &[VideoFormatInfo]) -> Vec<(String, VideoFormatInfo)> {
    let mut best: BTreeMap<String, &VideoFormatInfo> = BTreeMap::new();

    for format in formats {
        best.entry(format.marketing_name())
            .and_modify(|current| {
                let better = format.sort_key() > current.sort_key()
                    || (format.sort_key() == current.sort_key() && format.id() < current.id());
                if better {
                    *current = format;
                }
            })
            .or_insert(format);
    }

    let mut grouped: Vec<(String, VideoFormatInfo)> = best
        .into_iter()
        .map(|(name, format)| (name, format.clone()))
        .collect();
    grouped.sort_by(|(_, a), (_, b)| {
        b.sort_key()
            .cmp(&a.sort_key())
            .then_with(|| a.id().cmp(&b.id()))
    });
    grouped
}

/// Frame rates of a format, highest first
pub fn fps_options(format: &VideoFormatInfo) -> Vec<u32> {
    format.fps_options.iter().rev().copied().collect()
}

/// Keep `current` if valid, else the first of `valid_options`
pub fn coerce_fps(current: Option<u32>, valid_options: &[u32]) -> Option<u32> {
    let first = valid_options.first().copied()?;
    match current {
        Some(fps) if valid_options.contains(&fps) => Some(fps),
        _ => Some(first),
    }
}

/// Re-derive the selection against a new format list
///
/// An existing format id that is still offered is kept and its fps
/// re-coerced. Otherwise the top grouped format is chosen with the first
/// frame rate of the preferred ladder it offers, or its highest rate.
pub fn initialize_selection(current: &Selection, available: &[VideoFormatInfo]) -> Selection {
    if available.is_empty() {
        return Selection::default();
    }

    if let Some(id) = &current.selected_format_id {
        if let Some(format) = available.iter().find(|f| &f.id() == id) {
            return Selection {
                selected_format_id: Some(id.clone()),
                selected_fps: coerce_fps(current.selected_fps, &fps_options(format)),
            };
        }
    }

    let grouped = grouped_formats(available);
    let Some((name, top)) = grouped.first() else {
        return Selection::default();
    };
    let fps = PREFERRED_FPS_LADDER
        .iter()
        .copied()
        .find(|fps| top.supports_fps(*fps))
        .unwrap_or_else(|| top.max_fps());

    debug!(format = %name, id = %top.id(), fps, "Initialized format selection");
    Selection::new(top.id(), fps)
}

/// Raw pixel formats, preferred over compressed ones
const RAW_PIXEL_FORMATS: [&str; 9] = [
    "YUYV", "UYVY", "YUY2", "NV12", "YV12", "I420", "RGB3", "BGR3", "GREY",
];

pub fn is_raw_format(pixel_format: &str) -> bool {
    RAW_PIXEL_FORMATS
        .iter()
        .any(|raw| raw.eq_ignore_ascii_case(pixel_format))
}

/// Pick one hardware mode among several equivalent ones
///
/// Raw > H.264 > hardware MJPEG > hardware accelerated > MJPEG > first.
pub fn select_best_codec<'a>(formats: &[&'a HardwareFormat]) -> Option<&'a HardwareFormat> {
    formats
        .iter()
        .find(|f| is_raw_format(&f.pixel_format))
        .or_else(|| formats.iter().find(|f| f.pixel_format == "H264"))
        .or_else(|| {
            formats
                .iter()
                .find(|f| f.hardware_accelerated && f.pixel_format == "MJPG")
        })
        .or_else(|| formats.iter().find(|f| f.hardware_accelerated))
        .or_else(|| formats.iter().find(|f| f.pixel_format == "MJPG"))
        .or_else(|| formats.first())
        .copied()
}

/// Formats of the current device
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormatCatalog {
    formats: Vec<VideoFormatInfo>,
    hardware: Vec<HardwareFormat>,
}

impl FormatCatalog {
    /// Fold hardware modes into one entry per resolution
    pub fn from_hardware(modes: &[HardwareFormat]) -> Self {
        let mut by_resolution: BTreeMap<(u32, u32), BTreeSet<u32>> = BTreeMap::new();
        for mode in modes {
            by_resolution
                .entry((mode.width, mode.height))
                .or_default()
                .insert(mode.fps);
        }

        let formats: Vec<VideoFormatInfo> = by_resolution
            .into_iter()
            .filter_map(|((width, height), fps)| VideoFormatInfo::new(width, height, fps))
            .collect();

        debug!(
            modes = modes.len(),
            resolutions = formats.len(),
            "Built format catalog"
        );

        Self {
            formats,
            hardware: modes.to_vec(),
        }
    }

    pub fn formats(&self) -> &[VideoFormatInfo] {
        &self.formats
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn grouped(&self) -> Vec<(String, VideoFormatInfo)> {
        grouped_formats(&self.formats)
    }

    pub fn find(&self, id: &FormatId) -> Option<&VideoFormatInfo> {
        self.formats.iter().find(|f| &f.id() == id)
    }

    /// Frame rates of the selected format, highest first
    pub fn fps_options_for(&self, id: &FormatId) -> Vec<u32> {
        self.find(id).map(fps_options).unwrap_or_default()
    }

    /// Concrete hardware mode for a selected format and frame rate
    pub fn resolve(&self, id: &FormatId, fps: u32) -> Option<HardwareFormat> {
        let format = self.find(id)?;
        let candidates: Vec<&HardwareFormat> = self
            .hardware
            .iter()
            .filter(|m| m.width == format.width && m.height == format.height && m.fps == fps)
            .collect();
        select_best_codec(&candidates).cloned()
    }

    /// Concrete hardware mode for a complete selection
    pub fn resolve_selection(&self, selection: &Selection) -> Option<HardwareFormat> {
        let id = selection.selected_format_id.as_ref()?;
        self.resolve(id, selection.selected_fps?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(width: u32, height: u32, fps: &[u32]) -> VideoFormatInfo {
        VideoFormatInfo::new(width, height, fps.iter().copied()).unwrap()
    }

    fn hw(width: u32, height: u32, fps: u32, pixel_format: &str, accel: bool) -> HardwareFormat {
        HardwareFormat {
            width,
            height,
            fps,
            hardware_accelerated: accel,
            pixel_format: pixel_format.to_string(),
        }
    }

    #[test]
    fn empty_fps_set_is_rejected() {
        assert!(VideoFormatInfo::new(1920, 1080, []).is_none());
        assert!(VideoFormatInfo::new(1920, 1080, [0]).is_none());
    }

    #[test]
    fn id_lists_fps_descending_and_deduplicated() {
        let format = fmt(1920, 1080, &[30, 60, 30, 120]);
        assert_eq!(format.id().as_str(), "1920x1080@120,60,30");
        assert_eq!(format.fps_set().len(), 3);
    }

    #[test]
    fn marketing_names() {
        assert_eq!(fmt(3840, 2160, &[30]).marketing_name(), "4K");
        assert_eq!(fmt(4096, 2160, &[30]).marketing_name(), "4K");
        assert_eq!(fmt(1920, 1080, &[30]).marketing_name(), "1080p");
        assert_eq!(fmt(1280, 720, &[30]).marketing_name(), "720p");
        assert_eq!(fmt(640, 480, &[30]).marketing_name(), "640x480");
    }

    #[test]
    fn grouped_formats_pick_largest_per_name() {
        let formats = vec![
            fmt(3840, 2160, &[30, 60]),
            fmt(4096, 2160, &[24]),
            fmt(1920, 1080, &[30]),
            fmt(1280, 720, &[30, 60]),
            fmt(640, 480, &[30]),
        ];
        let grouped = grouped_formats(&formats);

        let names: Vec<&str> = grouped.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["4K", "1080p", "720p", "640x480"]);
        assert_eq!(grouped[0].1.width, 4096);
    }

    #[test]
    fn grouped_formats_tie_breaks_on_max_fps() {
        let formats = vec![fmt(1920, 1080, &[30]), fmt(1920, 1080, &[30, 120])];
        let grouped = grouped_formats(&formats);
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].1.max_fps(), 120);
    }

    #[test]
    fn grouped_formats_invariants_hold() {
        let sets: Vec<Vec<VideoFormatInfo>> = vec![
            vec![],
            vec![fmt(320, 240, &[15])],
            vec![
                fmt(3840, 2160, &[24]),
                fmt(3840, 2160, &[30]),
                fmt(4096, 2160, &[24]),
                fmt(1920, 1080, &[60]),
                fmt(1920, 1080, &[60, 30]),
            ],
            vec![
                fmt(1280, 720, &[30]),
                fmt(1280, 720, &[240]),
                fmt(800, 600, &[30]),
                fmt(640, 480, &[30]),
            ],
        ];

        for formats in sets {
            let grouped = grouped_formats(&formats);
            let names: BTreeSet<&String> = grouped.iter().map(|(n, _)| n).collect();
            assert_eq!(names.len(), grouped.len(), "duplicate marketing name");

            for (name, chosen) in &grouped {
                let best = formats
                    .iter()
                    .filter(|f| &f.marketing_name() == name)
                    .map(VideoFormatInfo::sort_key)
                    .max()
                    .unwrap();
                assert_eq!(chosen.sort_key(), best);
            }

            for pair in grouped.windows(2) {
                assert!(pair[0].1.sort_key() >= pair[1].1.sort_key());
            }
        }
    }

    #[test]
    fn fps_options_are_highest_first() {
        assert_eq!(fps_options(&fmt(1920, 1080, &[30, 240, 60])), vec![240, 60, 30]);
    }

    #[test]
    fn coerce_fps_keeps_member_or_takes_first() {
        assert_eq!(coerce_fps(Some(60), &[]), None);
        assert_eq!(coerce_fps(None, &[]), None);
        assert_eq!(coerce_fps(Some(30), &[60, 30]), Some(30));
        assert_eq!(coerce_fps(None, &[60, 30]), Some(60));
        assert_eq!(coerce_fps(Some(25), &[60, 30]), Some(60));
    }

    #[test]
    fn coerce_fps_result_is_always_valid() {
        let option_sets: [&[u32]; 4] = [&[], &[30], &[60, 30, 24], &[240, 120]];
        for options in option_sets {
            for current in [None, Some(24), Some(30), Some(59), Some(240)] {
                match coerce_fps(current, options) {
                    None => assert!(options.is_empty()),
                    Some(fps) => assert!(options.contains(&fps)),
                }
            }
        }
    }

    #[test]
    fn switching_to_lower_rate_format_coerces_to_highest() {
        let target = fmt(1280, 720, &[24, 30]);
        assert_eq!(coerce_fps(Some(60), &fps_options(&target)), Some(30));
    }

    #[test]
    fn first_selection_prefers_most_pixels() {
        let available = vec![fmt(1920, 1080, &[30, 60]), fmt(3840, 2160, &[30])];
        let selection = initialize_selection(&Selection::default(), &available);
        assert_eq!(
            selection.selected_format_id,
            Some(FormatId::new("3840x2160@30"))
        );
        assert_eq!(selection.selected_fps, Some(30));
    }

    #[test]
    fn first_selection_walks_fps_ladder() {
        let available = vec![fmt(1920, 1080, &[25, 60, 120])];
        let selection = initialize_selection(&Selection::default(), &available);
        assert_eq!(selection.selected_fps, Some(120));

        let available = vec![fmt(1920, 1080, &[24, 25])];
        let selection = initialize_selection(&Selection::default(), &available);
        assert_eq!(selection.selected_fps, Some(25));
    }

    #[test]
    fn existing_selection_is_kept_and_recoerced() {
        let available = vec![fmt(3840, 2160, &[30]), fmt(1280, 720, &[30, 60])];
        let current = Selection::new(FormatId::new("1280x720@60,30"), 60);
        assert_eq!(initialize_selection(&current, &available), current);

        let current = Selection::new(FormatId::new("1280x720@60,30"), 15);
        let selection = initialize_selection(&current, &available);
        assert_eq!(selection.selected_fps, Some(60));
    }

    #[test]
    fn stale_selection_falls_back_to_top_format() {
        let available = vec![fmt(1280, 720, &[30])];
        let current = Selection::new(FormatId::new("1920x1080@60"), 60);
        let selection = initialize_selection(&current, &available);
        assert_eq!(
            selection.selected_format_id,
            Some(FormatId::new("1280x720@30"))
        );
        assert_eq!(selection.selected_fps, Some(30));
    }

    #[test]
    fn empty_catalog_clears_selection() {
        let current = Selection::new(FormatId::new("1920x1080@60"), 60);
        assert_eq!(initialize_selection(&current, &[]), Selection::default());
    }

    #[test]
    fn initialized_selection_is_consistent() {
        let sets = vec![
            vec![fmt(640, 480, &[15])],
            vec![fmt(1920, 1080, &[30, 60]), fmt(3840, 2160, &[30])],
            vec![fmt(1280, 720, &[240, 30]), fmt(1280, 720, &[90])],
        ];
        for available in sets {
            let selection = initialize_selection(&Selection::default(), &available);
            let id = selection.selected_format_id.clone().unwrap();
            let format = available.iter().find(|f| f.id() == id).unwrap();
            assert!(format.supports_fps(selection.selected_fps.unwrap()));
        }
    }

    #[test]
    fn catalog_folds_modes_per_resolution() {
        let catalog = FormatCatalog::from_hardware(&[
            hw(1920, 1080, 30, "MJPG", false),
            hw(1920, 1080, 60, "MJPG", false),
            hw(1920, 1080, 30, "YUYV", false),
            hw(640, 480, 30, "YUYV", false),
        ]);
        assert_eq!(catalog.formats().len(), 2);
        let id = FormatId::new("1920x1080@60,30");
        assert_eq!(catalog.fps_options_for(&id), vec![60, 30]);
    }

    #[test]
    fn resolve_prefers_raw_then_h264() {
        let catalog = FormatCatalog::from_hardware(&[
            hw(1920, 1080, 30, "MJPG", true),
            hw(1920, 1080, 30, "H264", false),
            hw(1920, 1080, 30, "YUYV", false),
            hw(1920, 1080, 60, "MJPG", false),
            hw(1920, 1080, 60, "H264", false),
        ]);
        let id = FormatId::new("1920x1080@60,30");
        assert_eq!(catalog.resolve(&id, 30).unwrap().pixel_format, "YUYV");
        assert_eq!(catalog.resolve(&id, 60).unwrap().pixel_format, "H264");
        assert!(catalog.resolve(&id, 120).is_none());
    }
}
