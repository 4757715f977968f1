pub mod hasher;
pub mod settings;
pub mod workshop;
