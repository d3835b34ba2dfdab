use anyhow::Result;

use crate::cli::CheckConfigArgs;
use crate::config::load_config_from_path;

pub fn execute_check_config(args: CheckConfigArgs) -> Result<()> {
    let config = load_config_from_path(&args.config)?;
    config.validate()?;

    println!("==> {} is valid", args.config.display());
    println!();
    print!("{}", config.to_toml()?);
    Ok(())
}
