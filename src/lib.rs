pub mod assets;
pub mod catalog;
pub mod config;
pub mod coverage;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod layout;
pub mod manifest;
pub mod mosaic;
pub mod output;
pub mod pipeline;
pub mod preview;
pub mod pyramid;
pub mod raster;
pub mod selector;
