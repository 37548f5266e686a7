/// Configuration management command handlers
use anyhow::Result;
use clap::Subcommand;
use vigil_core::{config::config_path, GuardConfig};

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the config file location
    Path,
    /// Write the defaults to the config file if it does not exist
    Init,
}

pub fn handle_config_command(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => print!("{}", GuardConfig::load()?.to_toml()?),
        ConfigAction::Path => println!("{}", config_path()?.display()),
        ConfigAction::Init => {
            let path = config_path()?;
            if path.exists() {
                println!("Config already exists at {}", path.display());
            } else {
                GuardConfig::default().save_to(&path)?;
                println!("Wrote default config to {}", path.display());
            }
        }
    }
    Ok(())
}
