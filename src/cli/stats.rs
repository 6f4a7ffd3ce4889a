use anyhow::Result;

use folio::config::FolioConfig;
use folio::library::Library;

/// Display library statistics in the terminal.
pub async fn stats(config: &FolioConfig) -> Result<()> {
    let library = super::open_library(config).await?;

    println!("Library Statistics");
    println!("{}", "=".repeat(40));
    print_library(&library);

    if let Some(parent) = library.parent() {
        println!();
        println!("Parent Library");
        println!("{}", "=".repeat(40));
        print_library(parent);
    }

    Ok(())
}

fn print_library(library: &Library) {
    let stats = library.stats();
    println!("  Name:                {}", stats.name);
    println!("  Records:             {}", stats.records);
    println!("  Types:               {}", stats.types);
    println!("  Recent changes:      {}", stats.changes);
    println!("  Cached files:        {}", stats.cached_files);
    println!("  File reads:          {}", stats.file_reads);
}
