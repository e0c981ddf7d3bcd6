// SPDX-License-Identifier: GPL-3.0-only

//! Device and format catalogs
//!
//! Both catalogs are plain data owned by the session coordinator. Pure
//! functions (merging, grouping, selection coercion) are exported so the
//! policies can be exercised without hardware.

pub mod devices;
pub mod formats;

pub use devices::{DeviceCatalog, merge_cameras, seed_preference};
pub use formats::{
    FormatCatalog, FormatId, Selection, VideoFormatInfo, coerce_fps, fps_options,
    grouped_formats, initialize_selection,
};
