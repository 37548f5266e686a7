use anyhow::Result;
use clap::Subcommand;

use super::helpers::open_records;

#[derive(Subcommand, Debug)]
pub enum PinAction {
    /// Set a new 4-digit PIN
    Set {
        /// The new PIN
        #[arg(long = "new")]
        new_pin: String,
        /// The current PIN, required once a PIN has been set
        #[arg(long)]
        current: Option<String>,
    },
}

pub fn handle_pin_command(action: PinAction) -> Result<()> {
    match action {
        PinAction::Set { new_pin, current } => {
            let records = open_records()?;
            records
                .pins
                .change_pin(current.as_deref(), &new_pin, &records.incidents)?;
            println!("PIN updated.");
            Ok(())
        }
    }
}
