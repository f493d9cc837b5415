//! REST-backed tools described by data files.

use std::path::Path;
use std::sync::Arc;

use log::{info, warn};

pub mod adapter;
pub mod client;
pub mod config;

pub use adapter::HttpTool;
pub use client::{ApiClient, ApiClientConfig};
pub use config::{HttpToolConfig, load_dir};

use crate::{ToolError, ToolSet};

/// Builds a [`ToolSet`] from every definition in `dir`, sharing `client`.
///
/// Definitions that cannot become a tool are skipped with a warning.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn load_tool_set(name: &str, dir: &Path, client: &ApiClient) -> Result<ToolSet, ToolError> {
    let mut set = ToolSet::new(name);
    for config in load_dir(dir)? {
        let tool_name = config.name.clone();
        match HttpTool::new(config, client.clone()) {
            Ok(tool) => set.register(Arc::new(tool)),
            Err(e) => warn!("Skipping tool '{tool_name}' for provider '{name}': {e}"),
        }
    }
    info!("Loaded {} HTTP tools for provider '{name}'", set.len());
    Ok(set)
}
