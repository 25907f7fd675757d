use anyhow::Context;
use flagdeck_core::catalog::Catalog;
use flagdeck_core::config::Config;
use flagdeck_core::rules::RuleSet;
use flagdeck_core::{io, paths};
use std::path::Path;

pub fn run(root: &Path) -> anyhow::Result<()> {
    println!("Initializing flagdeck in: {}", root.display());
    std::fs::create_dir_all(root)
        .with_context(|| format!("failed to create {}", root.display()))?;

    let config_path = paths::config_path(root);
    if config_path.exists() {
        println!("  exists:  {}", paths::CONFIG_FILE);
    } else {
        Config::scaffold()
            .save(root)
            .with_context(|| format!("failed to write {}", paths::CONFIG_FILE))?;
        println!("  created: {}", paths::CONFIG_FILE);
    }

    let documents = [
        (paths::CATALOG_FILE, Catalog::builtin_source()),
        (paths::RULES_FILE, RuleSet::starter_source()),
    ];
    for (name, contents) in documents {
        let created = io::write_if_missing(&root.join(name), contents.as_bytes())
            .with_context(|| format!("failed to write {name}"))?;
        if created {
            println!("  created: {name}");
        } else {
            println!("  exists:  {name}");
        }
    }

    println!("\nNext: edit {} and run 'flagdeck rules validate'.", paths::RULES_FILE);
    Ok(())
}
