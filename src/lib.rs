//! story-reader: folk-tale reader with hybrid sentence-by-sentence narration.

pub mod api;
pub mod config;
pub mod error;
pub mod player;
pub mod preferences;
pub mod segmenter;
pub mod sequencer;
pub mod service;
pub mod speech;
pub mod story;
pub mod track;
pub mod visualizer;
pub mod voice;
