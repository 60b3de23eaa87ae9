use anyhow::{Context, Result};
use clamstream_core::{ClamClient, Config};

use crate::OutputFormat;

pub fn run(config: &Config, format: OutputFormat) -> Result<()> {
    let client = ClamClient::from_config(config);
    let version = client
        .version()
        .with_context(|| format!("Failed to query version from {}", client.endpoint()))?;

    match format {
        OutputFormat::Plain => {
            println!("{}", version);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string(&version)?);
        }
    }

    Ok(())
}
