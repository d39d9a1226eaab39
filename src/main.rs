pub mod app;
pub mod renderer;

use color_eyre::Result;
use app::App;
use renderer::config::RenderConfig;

fn main() -> Result<()> {
    color_eyre::install()?;
    env_logger::init();

    let mut config = RenderConfig::default();
    if let Some(model_path) = std::env::args_os().nth(1) {
        config.model_path = model_path.into();
    }
    log::info!("Loading model {}", config.model_path.display());

    let mut app = App::new(config);
    app.run()?;

    Ok(())
}
