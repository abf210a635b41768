use std::{env, fs, path::PathBuf};

use storefront_api::openapi::ApiDoc;
use utoipa::OpenApi;

/// Writes the OpenAPI document to `openapi/storefront-api.json`, or to the
/// path given as the first argument.
fn main() -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(&ApiDoc::openapi())?;

    let output_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("openapi").join("storefront-api.json"));
    if let Some(dir) = output_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    fs::write(&output_path, json)?;

    println!("OpenAPI spec written to {}", output_path.display());
    Ok(())
}
