use glade_renderer::app::DEFAULT_CONFIG_PATH;
use glade_renderer::cli::CliOverrides;
use glade_renderer::{run_with_config, RendererConfig};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = match CliOverrides::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("[cli] {err}");
            std::process::exit(2);
        }
    };
    let config = match cli.config_path() {
        Some(path) => RendererConfig::load_or_default(path),
        None => RendererConfig::load_or_default(DEFAULT_CONFIG_PATH),
    };
    if let Err(err) = pollster::block_on(run_with_config(config, cli.into_config_overrides())) {
        log::error!(target: "renderer", "Application error: {err:?}");
        std::process::exit(1);
    }
}
