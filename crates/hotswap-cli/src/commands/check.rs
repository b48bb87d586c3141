//! `hotswap check` command implementation

use std::path::PathBuf;

use colored::Colorize;

use super::loader_for;

/// Execute the `hotswap check` command
pub fn run(files: &[PathBuf], type_name: Option<&str>) -> anyhow::Result<()> {
    let mut failed = 0;

    for path in files {
        let loader = loader_for(path);
        let outcome = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|source| loader.check_syntax(path, &source))
            .and_then(|()| match type_name {
                Some(type_name) => loader
                    .load(path, type_name)
                    .map(|_| ())
                    .map_err(|e| e.to_string()),
                None => Ok(()),
            });

        match outcome {
            Ok(()) => println!("{} {}", "ok".green(), path.display()),
            Err(message) => {
                failed += 1;
                println!("{} {}: {}", "error".red(), path.display(), message);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} module(s) failed", failed, files.len());
    }
    Ok(())
}
