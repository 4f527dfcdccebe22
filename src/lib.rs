extern crate nalgebra as na;

pub mod bounds;
pub mod bvh;
pub mod config;
pub mod error;
pub mod export;
pub mod objects;
pub mod scenes;
pub mod textures;

pub use error::{Error, Result};
