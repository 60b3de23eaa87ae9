use std::process::ExitCode;

use clamstream_core::{ClamClient, Config};
use serde_json::json;

use crate::OutputFormat;

pub fn run(config: &Config, format: OutputFormat) -> ExitCode {
    let client = ClamClient::from_config(config);
    let alive = client.ping();

    match format {
        OutputFormat::Plain => {
            let state = if alive { "ALIVE" } else { "DOWN" };
            println!("{}: {}", client.endpoint(), state);
        }
        OutputFormat::Json => {
            println!(
                "{}",
                json!({ "endpoint": client.endpoint().to_string(), "alive": alive })
            );
        }
    }

    if alive {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
