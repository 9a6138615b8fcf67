//! Neighbourhood choropleth dashboard core.
//!
//! Reads the menu catalog, fetches boundary and indicator datasets, joins
//! them and builds the color scales the map and charts are drawn with.

pub mod catalog;
pub mod config;
pub mod data;
pub mod index;
pub mod join;
pub mod scale;
pub mod selection;
