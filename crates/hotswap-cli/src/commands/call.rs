//! `hotswap call` command implementation

use std::path::Path;

use hotswap_kernel::ReloaderConfig;
use hotswap_runtime::HotReloader;

use super::{loader_for, parse_arg};

/// Execute the `hotswap call` command
pub async fn run(
    module: &Path,
    type_name: &str,
    method: &str,
    raw_args: &[String],
) -> anyhow::Result<()> {
    let config = ReloaderConfig::new("cli", module, type_name);
    let reloader = HotReloader::new(config, loader_for(module))?;
    reloader.initialize().await?;

    let args: Vec<serde_json::Value> = raw_args.iter().map(|raw| parse_arg(raw)).collect();
    let result = reloader.proxy().invoke(method, &args)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
