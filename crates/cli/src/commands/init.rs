//! `timegraph init`: Write a default config file.

use std::path::{Path, PathBuf};
use timegraph_config::{AppConfig, CONFIG_FILE_NAME};

use super::CommandResult;

pub fn run(path: Option<&Path>, force: bool) -> CommandResult {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_NAME));

    if path.exists() && !force {
        println!("⚠️  Config already exists at: {}", path.display());
        println!("   Edit it manually or re-run with --force.");
        return Ok(());
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("✅ Created {}", path.display());
    println!("\n📝 Next steps:");
    println!("   1. Set TIMEGRAPH_API_KEY (or api_key in the file)");
    println!("   2. Run: timegraph insert --period 2022 report-2022.txt");
    println!("   3. Run: timegraph query --time 2022 \"What happened?\"\n");
    Ok(())
}
