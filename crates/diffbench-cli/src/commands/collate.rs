use crate::cli::CollateArgs;
use anyhow::Result;
use diffbench::reporting::{collate_dir, COLLATED_FILENAME};
use diffbench::Settings;

pub fn handle_collate(args: CollateArgs, settings: &Settings) -> Result<()> {
    let base_path = args.base_path.unwrap_or_else(|| settings.base_path.clone());
    let output = args
        .output
        .unwrap_or_else(|| base_path.join(COLLATED_FILENAME));

    let rows = collate_dir(&base_path, &output)?;
    println!("Collated {} rows into {}", rows, output.display());
    Ok(())
}
