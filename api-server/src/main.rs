mod api;
mod config;
mod models;

use config::Config;
use log::info;
use models::context::Context;
use simplelog::{ColorChoice, TermLogger, TerminalMode};
use std::sync::Arc;

#[rocket::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    TermLogger::init(
        config.level_filter(),
        simplelog::Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let context = Arc::new(Context::new(config.clone()).await);
    let figment = rocket::Config::figment()
        .merge(("address", *config.address()))
        .merge(("port", *config.port()));

    info!("Serving messages on {}:{}", config.address(), config.port());
    api::mount(rocket::custom(figment), context.clone())
        .launch()
        .await?;

    context.flush().await;
    Ok(())
}
