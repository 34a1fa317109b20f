/*
 * Meeting Scribe - Rust Edition
 * Copyright (c) 2025 Meeting Scribe Contributors
 *
 * This work is licensed under the Creative Commons Attribution-NonCommercial 4.0 International License.
 * To view a copy of this license, visit http://creativecommons.org/licenses/by-nc/4.0/
 *
 * You are free to share and adapt this work for non-commercial purposes with attribution.
 * Commercial use is prohibited without explicit written permission.
 *
 * For commercial licensing inquiries, please contact the project maintainers.
 */

pub mod files;
pub mod sql;
pub mod vector;

pub use files::FileStore;
pub use sql::SqlStore;
pub use vector::{InMemoryVectorStore, VectorRecord, VectorStore};
