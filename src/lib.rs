pub mod api;
pub mod config;
pub mod data_models;
pub mod rag;
pub mod render;
pub mod stream;
pub mod widget;
