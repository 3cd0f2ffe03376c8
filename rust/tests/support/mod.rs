#![allow(dead_code)]

pub mod helpers;

pub use helpers::*;
