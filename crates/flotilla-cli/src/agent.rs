use flotilla_common::config::AppConfig;

use crate::telemetry::init_telemetry;

pub fn run_agent_command() -> Result<(), Box<dyn std::error::Error>> {
    init_telemetry()?;

    let config = AppConfig::load()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(flotilla_agent::run_agent(&config))?;

    fastrace::flush();

    Ok(())
}
