pub mod aggregator;
pub mod clock;
pub mod config;
pub mod crs;
pub mod error;
pub mod fish;
pub mod grid;
pub mod model;
pub mod parser;
pub mod providers;
pub mod reference;
pub mod refresh;
pub mod region;
pub mod service;
pub mod sky_code;
pub mod store;
pub mod wfs;
