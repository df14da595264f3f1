// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Configuration for a memfs namespace instance

use serde::{Deserialize, Serialize};

/// Byte returned for file regions that lie inside the logical length but
/// beyond the retained payload buffer.
pub const FILLER_BYTE: u8 = b'a';

/// Namespace configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    /// Full path of the export root. The root node's name is this path.
    pub export_path: String,
    /// Fixed payload capacity of each regular file, in bytes. Writes beyond
    /// this grow the logical length but their bytes are not retained.
    pub file_capacity: usize,
    /// Owner of the export root
    pub root_uid: u32,
    /// Group of the export root
    pub root_gid: u32,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            export_path: "/".to_string(),
            file_capacity: 4096,
            root_uid: 0,
            root_gid: 0,
        }
    }
}
