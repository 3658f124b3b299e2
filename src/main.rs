mod account;
mod command;
mod config;
mod logging;
mod panel;
mod series;
mod tui;
mod widgets;

use anyhow::anyhow;
use clap::Parser;
use tracing::info;

use crate::tui::TuiApp;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), anyhow::Error> {
    let param = config::CliParams::parse();
    let log_path = param.log_file.clone().unwrap_or_else(logging::default_path);
    logging::init_logging(&log_path)?;

    let markets = param.market_configs()?;
    info!(
        markets = markets.len(),
        seed = ?param.seed,
        "starting market simulator"
    );
    let mut app = TuiApp::new(
        &markets,
        param.render_area(),
        param.balance,
        param.seed,
        param.frame_interval(),
    )?;
    let app_result = tokio::select! {
        result = app.run() => result,
        _ = tokio::signal::ctrl_c() => Ok(()),
    };
    app.dispose();
    app_result.map_err(|err| anyhow!(err.to_string()))?;
    Ok(())
}
